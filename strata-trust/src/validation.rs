//! Ledger write rules shared by every repository implementation
//!
//! Repositories gather the accounts, lots and entries a batch refers to inside
//! their own transaction and then call [`validate_batch`], so the same rules
//! hold for the in-memory store and the SQL store.

use std::collections::{BTreeSet, HashMap, HashSet};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::{
    Account, AccountScope, LedgerEntry, Lot, NewEntry, Posting, PostingTotals, ReferenceType, Scheme,
};
use crate::repository::OpeningBalanceGuard;

/// Maximum number of decimal places of a money amount
pub const MONEY_SCALE: u32 = 2;

const MAX_CODE_LEN: usize = 20;

/// Reject amounts finer than a cent
pub fn check_money_scale(amount: Decimal) -> Result<()> {
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(LedgerError::Validation(format!(
            "Amount {} has more than {} decimal places",
            amount, MONEY_SCALE
        )));
    }
    Ok(())
}

/// Posting amounts must be positive whole cents
pub fn check_posting_amount(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!(
            "Posting amount must be positive, got {}",
            amount
        )));
    }
    check_money_scale(amount)
}

/// Money amount as integer cents
pub fn to_cents(amount: Decimal) -> Result<i64> {
    check_money_scale(amount)?;
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| LedgerError::Validation(format!("Amount {} is out of range", amount)))
}

/// Integer cents as a money amount
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, MONEY_SCALE)
}

pub fn validate_account_code(code: &str) -> Result<()> {
    if code.is_empty() || code.len() > MAX_CODE_LEN {
        return Err(LedgerError::Validation(format!(
            "Account code must be 1 to {} characters: '{}'",
            MAX_CODE_LEN, code
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(LedgerError::Validation(format!(
            "Account code contains invalid characters: '{}'",
            code
        )));
    }
    Ok(())
}

/// Whether a scheme may see an account (its own, or its organisation's default)
pub fn account_visible_to(scheme: &Scheme, account: &Account) -> bool {
    match account.scope {
        AccountScope::Scheme(id) => id == scheme.id,
        AccountScope::Organisation(id) => id == scheme.organisation_id,
    }
}

/// Reject a type change on an account that already carries postings
pub fn check_account_retype(existing: &Account, account: &Account, has_postings: bool) -> Result<()> {
    if existing.account_type != account.account_type && has_postings {
        return Err(LedgerError::Validation(format!(
            "Account {} has postings; its type cannot change from {} to {}",
            existing.code, existing.account_type, account.account_type
        )));
    }
    Ok(())
}

/// Check postings are well formed and debits equal credits exactly
pub fn check_balanced(postings: &[Posting]) -> Result<()> {
    if postings.is_empty() {
        return Err(LedgerError::Validation(
            "Entry must have at least one posting".to_string(),
        ));
    }

    let mut totals = PostingTotals::default();
    for posting in postings {
        check_posting_amount(posting.amount)?;
        totals
            .add(posting.side, posting.amount)
            .map_err(|_| LedgerError::out_of_range("Entry total"))?;
    }
    let PostingTotals { debits, credits } = totals;

    if debits != credits {
        return Err(LedgerError::UnbalancedEntry { debits, credits });
    }
    Ok(())
}

/// Ids a batch of new entries refers to
#[derive(Debug, Default)]
pub struct BatchRefs {
    pub account_ids: HashSet<Uuid>,
    pub lot_ids: HashSet<Uuid>,
    pub reversal_targets: HashSet<Uuid>,
}

impl BatchRefs {
    pub fn collect(entries: &[NewEntry]) -> Self {
        let mut refs = Self::default();
        for entry in entries {
            if let Some(target) = entry.reverses {
                refs.reversal_targets.insert(target);
            }
            for posting in &entry.postings {
                refs.account_ids.insert(posting.account_id);
                if let Some(lot_id) = posting.lot_id {
                    refs.lot_ids.insert(lot_id);
                }
            }
        }
        refs
    }
}

/// Committed state a batch is validated against
#[derive(Debug)]
pub struct BatchContext<'a> {
    pub scheme: &'a Scheme,
    pub accounts: HashMap<Uuid, Account>,
    pub lots: HashMap<Uuid, Lot>,
    /// Entries referenced by reversals in the batch, keyed by id
    pub targets: HashMap<Uuid, LedgerEntry>,
    /// Targets that already have a reversal
    pub reversed: HashSet<Uuid>,
    /// Active (unreversed) opening balance entries of the scheme
    pub active_opening: BTreeSet<Uuid>,
}

/// Validate a whole batch; nothing may be written unless this succeeds
pub fn validate_batch(ctx: &BatchContext<'_>, entries: &[NewEntry], guard: &OpeningBalanceGuard) -> Result<()> {
    check_opening_guard(ctx.scheme.id, guard, &ctx.active_opening)?;

    if entries.is_empty() {
        return Err(LedgerError::Validation("Nothing to post".to_string()));
    }

    let mut reversed_in_batch = HashSet::new();
    for entry in entries {
        check_balanced(&entry.postings)?;
        for posting in &entry.postings {
            check_posting_refs(ctx, posting)?;
        }
        if let Some(target) = entry.reverses {
            check_reversal(ctx, entry, target)?;
            if !reversed_in_batch.insert(target) {
                return Err(LedgerError::Validation(format!(
                    "Entry {} is reversed twice in one batch",
                    target
                )));
            }
        } else if entry.reference_type == ReferenceType::Reversal {
            return Err(LedgerError::Validation(
                "Reversal entries must reference the entry they reverse".to_string(),
            ));
        }
    }
    Ok(())
}

fn check_posting_refs(ctx: &BatchContext<'_>, posting: &Posting) -> Result<()> {
    let account = ctx
        .accounts
        .get(&posting.account_id)
        .ok_or_else(|| LedgerError::invalid_account(posting.account_id, "unknown account"))?;
    if !account_visible_to(ctx.scheme, account) {
        return Err(LedgerError::invalid_account(
            account.id,
            format!("account {} belongs to another scope", account.code),
        ));
    }
    if !account.is_active {
        return Err(LedgerError::invalid_account(
            account.id,
            format!("account {} is inactive", account.code),
        ));
    }

    if let Some(lot_id) = posting.lot_id {
        match ctx.lots.get(&lot_id) {
            Some(lot) if lot.scheme_id == ctx.scheme.id => {}
            _ => return Err(LedgerError::not_found("Lot", lot_id)),
        }
    }
    Ok(())
}

fn check_reversal(ctx: &BatchContext<'_>, entry: &NewEntry, target_id: Uuid) -> Result<()> {
    let target = ctx
        .targets
        .get(&target_id)
        .filter(|target| target.scheme_id == ctx.scheme.id)
        .ok_or_else(|| LedgerError::not_found("Ledger entry", target_id))?;

    if target.reverses.is_some() {
        return Err(LedgerError::Validation(format!(
            "Entry {} is itself a reversal and cannot be reversed",
            target_id
        )));
    }
    if ctx.reversed.contains(&target_id) {
        return Err(LedgerError::Validation(format!(
            "Entry {} has already been reversed",
            target_id
        )));
    }
    if entry.reference_type != ReferenceType::Reversal {
        return Err(LedgerError::Validation(
            "Entries reversing another entry must use the reversal reference type".to_string(),
        ));
    }

    let expected: Vec<Posting> = target.postings.iter().map(Posting::reversed).collect();
    if entry.postings != expected {
        return Err(LedgerError::Validation(format!(
            "Reversal postings do not mirror entry {}",
            target_id
        )));
    }
    Ok(())
}

/// Compare the opening balance set a writer read with the committed one
pub fn check_opening_guard(scheme_id: Uuid, guard: &OpeningBalanceGuard, active: &BTreeSet<Uuid>) -> Result<()> {
    match guard {
        OpeningBalanceGuard::Unchecked => Ok(()),
        OpeningBalanceGuard::ExpectActive(expected) if expected == active => Ok(()),
        OpeningBalanceGuard::ExpectActive(expected) if expected.is_empty() => {
            Err(LedgerError::AlreadyApplied(scheme_id))
        }
        OpeningBalanceGuard::ExpectActive(_) if active.is_empty() => Err(LedgerError::NotApplied(scheme_id)),
        OpeningBalanceGuard::ExpectActive(_) => Err(LedgerError::Conflict(format!(
            "Opening balances of scheme {} changed concurrently",
            scheme_id
        ))),
    }
}
