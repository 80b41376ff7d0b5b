//! Strata Trust Core - double-entry trust accounting for strata schemes
//!
//! This library provides the ledger engine behind strata trust accounts:
//! organisations and schemes with their lots, a two-level chart of accounts,
//! an append-only journal of balanced entries, opening balance seeding and
//! point-in-time balance projections. Storage sits behind the
//! [`repository::TrustRepository`] trait.

pub mod error;
pub mod models;
pub mod repository;
pub mod services;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{LedgerError, Result};
pub use repository::{InMemoryTrustRepository, OpeningBalanceGuard, TrustRepository};
pub use services::{
    AccountRegistry, BalanceProjector, EntryStream, LedgerStore, OpeningBalanceImporter, SchemeDirectory,
    TrustServices,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
