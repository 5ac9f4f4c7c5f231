//! Engine Error Taxonomy
//!
//! The closed set of failures surfaced from the engine entry points.
//! Domain errors are never retried internally; `Transient` is the one kind
//! callers may safely retry.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::engine::store::StoreError;

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    /// Unknown or inactive market symbol
    #[error("unknown or inactive market {0}")]
    InvalidMarket(String),

    /// A reservation or withdrawal exceeds the available balance
    #[error("insufficient {asset}: required {required}, available {available}")]
    InsufficientFunds {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    /// The order exists but is not in a cancelable state
    #[error("order {0} is not cancelable")]
    OrderNotCancelable(u64),

    /// No such order visible to this user
    #[error("order {0} not found")]
    OrderNotFound(u64),

    /// Rejected input: non-positive values, zero after quantization,
    /// malformed numerics, bad codes
    #[error("validation failed: {0}")]
    Validation(String),

    /// Lock contention outlasted the bounded retries; safe to retry
    #[error("transient contention: {0}")]
    Transient(String),

    /// Accounting state that should be unreachable
    #[error("internal accounting error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}
