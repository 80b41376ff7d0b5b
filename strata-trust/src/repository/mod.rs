//! Storage seam for the trust ledger

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Account, AccountScope, DateRange, EntryPosition, LedgerEntry, Lot, NewEntry, Organisation,
    Ownership, PostingFilter, PostingTotals, Scheme,
};

pub use memory::InMemoryTrustRepository;

/// Opening balance precondition checked inside an append transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpeningBalanceGuard {
    /// Live postings; the opening balance set is not consulted
    Unchecked,
    /// The active opening balance entries must be exactly this set
    ExpectActive(BTreeSet<Uuid>),
}

/// Repository trait for trust ledger operations
///
/// Every write is atomic. `append_entries` is the only multi-record write and
/// must run [`crate::validation::validate_batch`] against state read in the same
/// transaction, serialising writers of one scheme.
#[async_trait]
pub trait TrustRepository: Send + Sync {
    // Directory operations
    async fn create_organisation(&self, organisation: &Organisation) -> Result<()>;
    async fn get_organisation(&self, id: Uuid) -> Result<Option<Organisation>>;
    async fn create_scheme(&self, scheme: &Scheme) -> Result<()>;
    async fn get_scheme(&self, id: Uuid) -> Result<Option<Scheme>>;
    async fn update_scheme(&self, scheme: &Scheme) -> Result<()>;
    async fn create_lot(&self, lot: &Lot) -> Result<()>;
    async fn get_lot(&self, id: Uuid) -> Result<Option<Lot>>;
    async fn list_lots(&self, scheme_id: Uuid) -> Result<Vec<Lot>>;

    /// Close the lot's current ownership at the new start date and open `ownership`
    async fn record_ownership(&self, ownership: &Ownership) -> Result<()>;
    async fn current_ownership(&self, lot_id: Uuid) -> Result<Option<Ownership>>;

    // Account operations
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;
    /// All accounts of one scope, active or not, ordered by code
    async fn list_accounts(&self, scope: AccountScope) -> Result<Vec<Account>>;
    /// Insert or update; rejects a second active account with the same code in a scope
    /// and a type change once the account has postings. Serialised with
    /// `append_entries` of every scheme that can post to the account.
    async fn save_account(&self, account: &Account) -> Result<()>;

    // Journal operations
    async fn append_entries(
        &self,
        scheme_id: Uuid,
        entries: &[NewEntry],
        guard: OpeningBalanceGuard,
    ) -> Result<Vec<LedgerEntry>>;
    async fn get_entry(&self, scheme_id: Uuid, entry_id: Uuid) -> Result<Option<LedgerEntry>>;
    /// Entries in `range` ordered by position, strictly after `after`
    async fn list_entries(
        &self,
        scheme_id: Uuid,
        range: DateRange,
        after: Option<EntryPosition>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>>;
    /// Opening balance entries without a reversal, ordered by position
    async fn active_opening_entries(&self, scheme_id: Uuid) -> Result<Vec<LedgerEntry>>;

    // Balance operations
    async fn posting_totals(
        &self,
        scheme_id: Uuid,
        filter: PostingFilter,
        as_of: NaiveDate,
    ) -> Result<PostingTotals>;
    async fn account_totals(&self, scheme_id: Uuid, as_of: NaiveDate) -> Result<Vec<(Uuid, PostingTotals)>>;
}
