//! Key encoding utilities for `RocksDB`.
//!
//! Fixed-width big-endian integers keep lexicographic key order equal to
//! numeric order, so prefix scans come back sorted.

use chrono::{DateTime, Utc};

use credit_ledger_core::{AccountId, TransactionId};

/// Create an account key from an account ID.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.as_bytes().to_vec()
}

/// Create a transaction key from a transaction ID.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (16 bytes) || seq (8 bytes, big-endian)`
///
/// `seq` is the account's transaction count before this row, so the index
/// orders an account's history by write order.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(account_id.as_bytes());
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Decode an index value back into a transaction ID.
///
/// Returns `None` if the value is not 16 bytes.
#[must_use]
pub fn transaction_id_from_value(value: &[u8]) -> Option<TransactionId> {
    let bytes: [u8; 16] = value.try_into().ok()?;
    Some(TransactionId::from_bytes(bytes))
}

/// Encode a counter value.
#[must_use]
pub fn encode_count(count: u64) -> [u8; 8] {
    count.to_be_bytes()
}

/// Decode a counter value; anything malformed reads as zero.
#[must_use]
pub fn decode_count(value: &[u8]) -> u64 {
    value.try_into().map(u64::from_be_bytes).unwrap_or(0)
}

/// Create a promo code key from user input.
#[must_use]
pub fn promo_code_key(code: &str) -> Vec<u8> {
    credit_ledger_core::promo::normalize_code(code).into_bytes()
}

/// Create a transaction reference key.
#[must_use]
pub fn reference_key(reference: &str) -> Vec<u8> {
    reference.as_bytes().to_vec()
}

/// Prefix shared by every quota entry for one IP: `ip || 0x00`.
#[must_use]
pub fn quota_prefix(ip_address: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ip_address.len() + 1);
    key.extend_from_slice(ip_address.as_bytes());
    key.push(0);
    key
}

fn millis(at: DateTime<Utc>) -> [u8; 8] {
    u64::try_from(at.timestamp_millis()).unwrap_or(0).to_be_bytes()
}

/// Lower bound of the quota scan for one IP from `since`.
#[must_use]
pub fn quota_scan_start(ip_address: &str, since: DateTime<Utc>) -> Vec<u8> {
    let mut key = quota_prefix(ip_address);
    key.extend_from_slice(&millis(since));
    key
}

/// Create a quota entry key.
///
/// Format: `ip || 0x00 || created_at millis (8 bytes) || nonce (16 bytes)`
#[must_use]
pub fn quota_key(ip_address: &str, at: DateTime<Utc>, nonce: &[u8; 16]) -> Vec<u8> {
    let mut key = quota_scan_start(ip_address, at);
    key.extend_from_slice(nonce);
    key
}
