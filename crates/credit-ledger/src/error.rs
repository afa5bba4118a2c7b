//! Ledger error types.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur in the balance ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No account with this id.
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account already exists.
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// Balance is below the requested amount.
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    /// Another transaction holds the account.
    #[error("Account is locked by a concurrent transaction: {0}")]
    Contention(String),

    /// The reservation was already settled or released.
    #[error("Reservation already settled or released for account: {0}")]
    ReservationReleased(String),

    /// Amount is not positive or has more than two fractional digits.
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    /// Storage I/O error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<std::io::Error> for LedgerError {
    fn from(e: std::io::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}
