//! In-memory implementation for development and testing

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OpeningBalanceGuard, TrustRepository};
use crate::error::{LedgerError, Result};
use crate::models::{
    Account, AccountScope, DateRange, EntryPosition, LedgerEntry, Lot, NewEntry, Organisation,
    Ownership, PostingFilter, PostingTotals, ReferenceType, Scheme,
};
use crate::validation::{check_account_retype, validate_batch, BatchContext, BatchRefs};

#[derive(Debug, Default)]
struct State {
    organisations: HashMap<Uuid, Organisation>,
    schemes: HashMap<Uuid, Scheme>,
    lots: HashMap<Uuid, Lot>,
    ownerships: HashMap<Uuid, Vec<Ownership>>,
    accounts: HashMap<Uuid, Account>,
    /// Journal per scheme, in insertion order
    journals: HashMap<Uuid, Vec<LedgerEntry>>,
}

impl State {
    fn journal(&self, scheme_id: Uuid) -> &[LedgerEntry] {
        self.journals.get(&scheme_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn reversed_ids(&self, scheme_id: Uuid) -> HashSet<Uuid> {
        self.journal(scheme_id)
            .iter()
            .filter_map(|entry| entry.reverses)
            .collect()
    }

    fn active_opening(&self, scheme_id: Uuid) -> Vec<&LedgerEntry> {
        let reversed = self.reversed_ids(scheme_id);
        let mut entries: Vec<&LedgerEntry> = self
            .journal(scheme_id)
            .iter()
            .filter(|entry| entry.reference_type == ReferenceType::OpeningBalance)
            .filter(|entry| !reversed.contains(&entry.id))
            .collect();
        entries.sort_by_key(|entry| entry.position());
        entries
    }
}

/// Whole ledger behind one lock; writers hold the write lock from validation to commit
#[derive(Debug, Default)]
pub struct InMemoryTrustRepository {
    state: RwLock<State>,
}

impl InMemoryTrustRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrustRepository for InMemoryTrustRepository {
    async fn create_organisation(&self, organisation: &Organisation) -> Result<()> {
        let mut state = self.state.write().await;
        if state.organisations.contains_key(&organisation.id) {
            return Err(LedgerError::Validation(format!(
                "Organisation '{}' already exists",
                organisation.id
            )));
        }
        state.organisations.insert(organisation.id, organisation.clone());
        Ok(())
    }

    async fn get_organisation(&self, id: Uuid) -> Result<Option<Organisation>> {
        let state = self.state.read().await;
        Ok(state.organisations.get(&id).cloned())
    }

    async fn create_scheme(&self, scheme: &Scheme) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.organisations.contains_key(&scheme.organisation_id) {
            return Err(LedgerError::not_found("Organisation", scheme.organisation_id));
        }
        if state.schemes.contains_key(&scheme.id) {
            return Err(LedgerError::Validation(format!("Scheme '{}' already exists", scheme.id)));
        }
        state.schemes.insert(scheme.id, scheme.clone());
        Ok(())
    }

    async fn get_scheme(&self, id: Uuid) -> Result<Option<Scheme>> {
        let state = self.state.read().await;
        Ok(state.schemes.get(&id).cloned())
    }

    async fn update_scheme(&self, scheme: &Scheme) -> Result<()> {
        let mut state = self.state.write().await;
        match state.schemes.get_mut(&scheme.id) {
            Some(existing) => {
                existing.name = scheme.name.clone();
                existing.financial_year_end = scheme.financial_year_end;
                existing.updated_at = scheme.updated_at;
                Ok(())
            }
            None => Err(LedgerError::not_found("Scheme", scheme.id)),
        }
    }

    async fn create_lot(&self, lot: &Lot) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.schemes.contains_key(&lot.scheme_id) {
            return Err(LedgerError::not_found("Scheme", lot.scheme_id));
        }
        if state
            .lots
            .values()
            .any(|existing| existing.scheme_id == lot.scheme_id && existing.lot_number == lot.lot_number)
        {
            return Err(LedgerError::Validation(format!(
                "Lot number '{}' already exists in scheme",
                lot.lot_number
            )));
        }
        state.lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn get_lot(&self, id: Uuid) -> Result<Option<Lot>> {
        let state = self.state.read().await;
        Ok(state.lots.get(&id).cloned())
    }

    async fn list_lots(&self, scheme_id: Uuid) -> Result<Vec<Lot>> {
        let state = self.state.read().await;
        let mut lots: Vec<Lot> = state
            .lots
            .values()
            .filter(|lot| lot.scheme_id == scheme_id)
            .cloned()
            .collect();
        lots.sort_by(|a, b| a.lot_number.cmp(&b.lot_number));
        Ok(lots)
    }

    async fn record_ownership(&self, ownership: &Ownership) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.lots.contains_key(&ownership.lot_id) {
            return Err(LedgerError::not_found("Lot", ownership.lot_id));
        }
        let records = state.ownerships.entry(ownership.lot_id).or_default();
        if let Some(current) = records.iter_mut().find(|record| record.is_current()) {
            if ownership.ownership_start_date <= current.ownership_start_date {
                return Err(LedgerError::Validation(format!(
                    "Ownership must start after {}",
                    current.ownership_start_date
                )));
            }
            current.ownership_end_date = Some(ownership.ownership_start_date);
        }
        records.push(ownership.clone());
        Ok(())
    }

    async fn current_ownership(&self, lot_id: Uuid) -> Result<Option<Ownership>> {
        let state = self.state.read().await;
        Ok(state
            .ownerships
            .get(&lot_id)
            .and_then(|records| records.iter().find(|record| record.is_current()))
            .cloned())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let state = self.state.read().await;
        Ok(state.accounts.get(&id).cloned())
    }

    async fn list_accounts(&self, scope: AccountScope) -> Result<Vec<Account>> {
        let state = self.state.read().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| account.scope == scope)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code).then(a.created_at.cmp(&b.created_at)));
        Ok(accounts)
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut state = self.state.write().await;
        if account.is_active
            && state.accounts.values().any(|existing| {
                existing.id != account.id
                    && existing.is_active
                    && existing.scope == account.scope
                    && existing.code == account.code
            })
        {
            return Err(LedgerError::Validation(format!(
                "Account code '{}' already exists in {}",
                account.code, account.scope
            )));
        }
        if let Some(existing) = state.accounts.get(&account.id) {
            let has_postings = state
                .journals
                .values()
                .flatten()
                .flat_map(|entry| entry.postings.iter())
                .any(|posting| posting.account_id == account.id);
            check_account_retype(existing, account, has_postings)?;
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn append_entries(
        &self,
        scheme_id: Uuid,
        entries: &[NewEntry],
        guard: OpeningBalanceGuard,
    ) -> Result<Vec<LedgerEntry>> {
        let mut state = self.state.write().await;
        let scheme = state
            .schemes
            .get(&scheme_id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("Scheme", scheme_id))?;

        let refs = BatchRefs::collect(entries);
        let reversed = state.reversed_ids(scheme_id);
        let ctx = BatchContext {
            scheme: &scheme,
            accounts: refs
                .account_ids
                .iter()
                .filter_map(|id| state.accounts.get(id).map(|a| (*id, a.clone())))
                .collect(),
            lots: refs
                .lot_ids
                .iter()
                .filter_map(|id| state.lots.get(id).map(|l| (*id, l.clone())))
                .collect(),
            targets: state
                .journal(scheme_id)
                .iter()
                .filter(|entry| refs.reversal_targets.contains(&entry.id))
                .map(|entry| (entry.id, entry.clone()))
                .collect(),
            reversed: refs
                .reversal_targets
                .iter()
                .filter(|id| reversed.contains(id))
                .copied()
                .collect(),
            active_opening: state
                .active_opening(scheme_id)
                .into_iter()
                .map(|entry| entry.id)
                .collect::<BTreeSet<Uuid>>(),
        };
        validate_batch(&ctx, entries, &guard)?;

        let journal = state.journals.entry(scheme_id).or_default();
        let mut sequence = journal.last().map_or(0, |entry| entry.sequence);
        let mut appended = Vec::with_capacity(entries.len());
        for entry in entries {
            sequence += 1;
            appended.push(LedgerEntry::from_new(scheme_id, sequence, entry.clone()));
        }
        journal.extend(appended.iter().cloned());
        Ok(appended)
    }

    async fn get_entry(&self, scheme_id: Uuid, entry_id: Uuid) -> Result<Option<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state
            .journal(scheme_id)
            .iter()
            .find(|entry| entry.id == entry_id)
            .cloned())
    }

    async fn list_entries(
        &self,
        scheme_id: Uuid,
        range: DateRange,
        after: Option<EntryPosition>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<&LedgerEntry> = state
            .journal(scheme_id)
            .iter()
            .filter(|entry| range.contains(entry.posting_date))
            .filter(|entry| after.map_or(true, |after| entry.position() > after))
            .collect();
        entries.sort_by_key(|entry| entry.position());
        Ok(entries.into_iter().take(limit).cloned().collect())
    }

    async fn active_opening_entries(&self, scheme_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let state = self.state.read().await;
        Ok(state.active_opening(scheme_id).into_iter().cloned().collect())
    }

    async fn posting_totals(
        &self,
        scheme_id: Uuid,
        filter: PostingFilter,
        as_of: NaiveDate,
    ) -> Result<PostingTotals> {
        let state = self.state.read().await;
        let mut totals = PostingTotals::default();
        for entry in state.journal(scheme_id).iter().filter(|e| e.posting_date <= as_of) {
            for posting in &entry.postings {
                let matches = match filter {
                    PostingFilter::Account(id) => posting.account_id == id,
                    PostingFilter::Lot(id) => posting.lot_id == Some(id),
                };
                if matches {
                    totals.add(posting.side, posting.amount)?;
                }
            }
        }
        Ok(totals)
    }

    async fn account_totals(&self, scheme_id: Uuid, as_of: NaiveDate) -> Result<Vec<(Uuid, PostingTotals)>> {
        let state = self.state.read().await;
        let mut totals: BTreeMap<Uuid, PostingTotals> = BTreeMap::new();
        for entry in state.journal(scheme_id).iter().filter(|e| e.posting_date <= as_of) {
            for posting in &entry.postings {
                totals
                    .entry(posting.account_id)
                    .or_default()
                    .add(posting.side, posting.amount)?;
            }
        }
        Ok(totals.into_iter().collect())
    }
}
