//! Opening balance importer
//!
//! A scheme is either without opening balances or has them applied. Applying
//! posts one entry per lot; clearing posts the exact reversal of each applied
//! entry. Both run as a single repository append guarded by the set of active
//! opening entries the importer read, so concurrent imports cannot interleave.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::accounts::AccountRegistry;
use super::ledger::reversal_of;
use super::require_scheme;
use crate::error::{LedgerError, Result};
use crate::models::{
    Account, AccountType, ApplyOpeningBalances, LedgerEntry, Lot, LotOpeningBalance, NewEntry,
    OpeningBalanceAccounts, OpeningBalanceRecord, OpeningBalanceStatus, Posting, ReferenceType, Side,
};
use crate::models::entry::checked_sum;
use crate::repository::{OpeningBalanceGuard, TrustRepository};
use crate::validation::check_money_scale;

fn no_opening_balances() -> LedgerError {
    LedgerError::Validation("Import contains no non-zero opening balances".to_string())
}

/// Lot balance carried by an opening entry (its lot-tagged postings, debit-positive)
pub fn opening_amount(entry: &LedgerEntry) -> Result<Decimal> {
    checked_sum(
        entry
            .postings
            .iter()
            .filter(|posting| posting.lot_id.is_some())
            .map(|posting| match posting.side {
                Side::Debit => posting.amount,
                Side::Credit => -posting.amount,
            }),
        "Opening balance",
    )
}

#[derive(Clone)]
pub struct OpeningBalanceImporter {
    repository: Arc<dyn TrustRepository>,
    registry: AccountRegistry,
    accounts: OpeningBalanceAccounts,
}

impl OpeningBalanceImporter {
    pub fn new(
        repository: Arc<dyn TrustRepository>,
        registry: AccountRegistry,
        accounts: OpeningBalanceAccounts,
    ) -> Self {
        Self {
            repository,
            registry,
            accounts,
        }
    }

    pub async fn check_status(&self, scheme_id: Uuid) -> Result<OpeningBalanceStatus> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        let active = self.repository.active_opening_entries(scheme_id).await?;
        debug!(%scheme_id, active = active.len(), "Checked opening balance status");
        Ok(OpeningBalanceStatus::from_count(active.len()))
    }

    /// Seed every lot's opening balance; returns the ids of the opening entries
    pub async fn apply_opening_balances(&self, scheme_id: Uuid, request: ApplyOpeningBalances) -> Result<Vec<Uuid>> {
        let lots = request.balances.len();
        let result = self.apply(scheme_id, request).await;
        match &result {
            Ok(ids) => info!(%scheme_id, lots, entries = ids.len(), "Opening balances applied"),
            Err(e) => warn!(%scheme_id, lots, error = %e, "Opening balance import rejected"),
        }
        result
    }

    async fn apply(&self, scheme_id: Uuid, request: ApplyOpeningBalances) -> Result<Vec<Uuid>> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        if request.balances.is_empty() {
            return Err(no_opening_balances());
        }
        let active = self.repository.active_opening_entries(scheme_id).await?;
        if !active.is_empty() && !request.reseed {
            return Err(LedgerError::AlreadyApplied(scheme_id));
        }

        let (control, receivable) = self.resolve_accounts(scheme_id).await?;

        let mut seen = HashSet::new();
        let mut batch: Vec<NewEntry> = active
            .iter()
            .map(|entry| reversal_of(entry, entry.posting_date, "Opening balance re-seeded".to_string()))
            .collect();
        let reversal_count = batch.len();

        for LotOpeningBalance { lot_id, balance } in &request.balances {
            if !seen.insert(*lot_id) {
                return Err(LedgerError::Validation(format!(
                    "Lot {} appears more than once in the import",
                    lot_id
                )));
            }
            check_money_scale(*balance)?;
            let lot = self.require_lot(scheme_id, *lot_id).await?;
            if balance.is_zero() {
                continue;
            }
            batch.push(opening_entry(
                &lot,
                *balance,
                request.posting_date,
                &control,
                &receivable,
            ));
        }

        if batch.len() == reversal_count {
            return Err(no_opening_balances());
        }

        let guard = OpeningBalanceGuard::ExpectActive(active.iter().map(|entry| entry.id).collect());
        let appended = self.repository.append_entries(scheme_id, &batch, guard).await?;
        Ok(appended
            .into_iter()
            .skip(reversal_count)
            .map(|entry| entry.id)
            .collect())
    }

    /// Reverse every active opening entry; returns the reversal ids
    pub async fn clear_opening_balances(&self, scheme_id: Uuid) -> Result<Vec<Uuid>> {
        let result = self.clear(scheme_id).await;
        match &result {
            Ok(ids) => info!(%scheme_id, reversals = ids.len(), "Opening balances cleared"),
            Err(e) => warn!(%scheme_id, error = %e, "Opening balance clear rejected"),
        }
        result
    }

    async fn clear(&self, scheme_id: Uuid) -> Result<Vec<Uuid>> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        let active = self.repository.active_opening_entries(scheme_id).await?;
        if active.is_empty() {
            return Err(LedgerError::NotApplied(scheme_id));
        }

        // Reversals keep the original posting date so every as-of projection returns to its prior value
        let batch: Vec<NewEntry> = active
            .iter()
            .map(|entry| reversal_of(entry, entry.posting_date, "Opening balance cleared".to_string()))
            .collect();
        let expected: BTreeSet<Uuid> = active.iter().map(|entry| entry.id).collect();
        let appended = self
            .repository
            .append_entries(scheme_id, &batch, OpeningBalanceGuard::ExpectActive(expected))
            .await?;
        Ok(appended.into_iter().map(|entry| entry.id).collect())
    }

    /// Opening balances currently applied, one per lot
    pub async fn opening_balance_records(&self, scheme_id: Uuid) -> Result<Vec<OpeningBalanceRecord>> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        let active = self.repository.active_opening_entries(scheme_id).await?;
        active
            .iter()
            .map(|entry| -> Result<OpeningBalanceRecord> {
                let lot_id = entry
                    .reference_id
                    .as_deref()
                    .and_then(|id| Uuid::parse_str(id).ok())
                    .ok_or_else(|| {
                        LedgerError::Storage(format!("Opening entry {} has no lot reference", entry.id))
                    })?;
                Ok(OpeningBalanceRecord {
                    lot_id,
                    balance: opening_amount(entry)?,
                    entry_id: entry.id,
                    posting_date: entry.posting_date,
                })
            })
            .collect()
    }

    async fn resolve_accounts(&self, scheme_id: Uuid) -> Result<(Account, Account)> {
        let control = self.resolve(scheme_id, &self.accounts.control_code).await?;
        let receivable = self.resolve(scheme_id, &self.accounts.receivable_code).await?;
        if receivable.account_type != AccountType::Asset {
            return Err(LedgerError::Validation(format!(
                "Lot receivable account {} must be an asset account, found {}",
                receivable.code, receivable.account_type
            )));
        }
        if control.id == receivable.id {
            return Err(LedgerError::Validation(
                "Opening balance control and receivable accounts must differ".to_string(),
            ));
        }
        Ok((control, receivable))
    }

    async fn resolve(&self, scheme_id: Uuid, code: &str) -> Result<Account> {
        self.registry
            .resolve_code(scheme_id, code)
            .await?
            .ok_or_else(|| LedgerError::not_found("Account", code))
    }

    async fn require_lot(&self, scheme_id: Uuid, lot_id: Uuid) -> Result<Lot> {
        match self.repository.get_lot(lot_id).await? {
            Some(lot) if lot.scheme_id == scheme_id => Ok(lot),
            _ => Err(LedgerError::not_found("Lot", lot_id)),
        }
    }
}

/// Positive balances debit the lot receivable, negative ones credit it
fn opening_entry(
    lot: &Lot,
    balance: Decimal,
    posting_date: NaiveDate,
    control: &Account,
    receivable: &Account,
) -> NewEntry {
    let amount = balance.abs();
    let postings = if balance.is_sign_positive() {
        vec![
            Posting::debit(receivable.id, amount).for_lot(lot.id),
            Posting::credit(control.id, amount),
        ]
    } else {
        vec![
            Posting::credit(receivable.id, amount).for_lot(lot.id),
            Posting::debit(control.id, amount),
        ]
    };
    NewEntry {
        posting_date,
        reference_type: ReferenceType::OpeningBalance,
        reference_id: Some(lot.id.to_string()),
        description: format!("Opening balance for lot {}", lot.lot_number),
        reverses: None,
        postings,
    }
}
