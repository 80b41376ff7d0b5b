//! Trust ledger services
//!
//! Each service re-validates scheme scoping on every call; nothing here relies
//! on the caller's authorisation layer having filtered ids already.

pub mod accounts;
pub mod balances;
pub mod directory;
pub mod ledger;
pub mod opening_balances;

#[cfg(test)]
mod opening_balances_test;

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::{OpeningBalanceAccounts, Scheme};
use crate::repository::TrustRepository;

pub use accounts::AccountRegistry;
pub use balances::BalanceProjector;
pub use directory::SchemeDirectory;
pub use ledger::{EntryStream, LedgerStore};
pub use opening_balances::OpeningBalanceImporter;

/// Load a scheme or fail with `NotFound`
pub(crate) async fn require_scheme(repository: &dyn TrustRepository, scheme_id: Uuid) -> Result<Scheme> {
    repository
        .get_scheme(scheme_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("Scheme", scheme_id))
}

/// All services over one repository
#[derive(Clone)]
pub struct TrustServices {
    pub directory: SchemeDirectory,
    pub accounts: AccountRegistry,
    pub ledger: LedgerStore,
    pub opening_balances: OpeningBalanceImporter,
    pub balances: BalanceProjector,
}

impl TrustServices {
    pub fn new(repository: Arc<dyn TrustRepository>, opening_accounts: OpeningBalanceAccounts) -> Self {
        let accounts = AccountRegistry::new(repository.clone());
        Self {
            directory: SchemeDirectory::new(repository.clone()),
            ledger: LedgerStore::new(repository.clone()),
            opening_balances: OpeningBalanceImporter::new(repository.clone(), accounts.clone(), opening_accounts),
            balances: BalanceProjector::new(repository),
            accounts,
        }
    }
}
