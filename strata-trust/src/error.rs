//! Error types

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Custom error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Bad input shape or uniqueness violation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Debits and credits of an entry differ
    #[error("Entry does not balance: debits {debits} != credits {credits}")]
    UnbalancedEntry { debits: Decimal, credits: Decimal },

    /// Posting against an account the scheme may not use
    #[error("Invalid account {account_id}: {reason}")]
    InvalidAccount { account_id: Uuid, reason: String },

    /// Opening balances already seeded for the scheme
    #[error("Opening balances already applied for scheme {0}")]
    AlreadyApplied(Uuid),

    /// No opening balances to clear
    #[error("No opening balances applied for scheme {0}")]
    NotApplied(Uuid),

    /// Missing scheme, lot, account, ...
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another writer changed the ledger between read and commit
    #[error("Conflicting update: {0}")]
    Conflict(String),

    /// Backing store failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_account(account_id: Uuid, reason: impl Into<String>) -> Self {
        LedgerError::InvalidAccount {
            account_id,
            reason: reason.into(),
        }
    }

    pub fn out_of_range(what: &str) -> Self {
        LedgerError::Validation(format!("{} is out of range", what))
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, LedgerError>;
