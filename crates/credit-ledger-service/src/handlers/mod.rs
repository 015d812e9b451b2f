//! API handlers.

pub mod accounts;
pub mod admin;
pub mod anonymous;
pub mod credits;
pub mod health;
pub mod usage;
pub mod webhooks;
