//! Credit ledger client SDK.
//!
//! Request handlers of the generation product use this crate to check and
//! charge credits and to enforce the anonymous free quota.
//!
//! # Example
//!
//! ```no_run
//! use credit_ledger_client::LedgerClient;
//! use credit_ledger_core::AccountId;
//!
//! # async fn example(account_id: AccountId) -> Result<(), credit_ledger_client::ClientError> {
//! let client = LedgerClient::new("http://credit-ledger:8080", "your-service-api-key")?;
//!
//! let check = client.check_credits(account_id, "video", Some(10)).await?;
//! if check.allowed {
//!     // ... run the generation ...
//!     let deducted = client.deduct_credits(account_id, "video", Some(10)).await?;
//!     println!("New balance: {} credits", deducted.new_balance);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, LedgerClient};
pub use error::ClientError;
pub use types::*;
