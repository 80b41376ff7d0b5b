//! Balance projector

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::debug;
use uuid::Uuid;

use super::require_scheme;
use crate::error::{LedgerError, Result};
use crate::models::{AccountBalance, LotBalance, PostingFilter, TrialBalance, TrialBalanceLine};
use crate::repository::TrustRepository;
use crate::validation::account_visible_to;

#[derive(Clone)]
pub struct BalanceProjector {
    repository: Arc<dyn TrustRepository>,
}

impl BalanceProjector {
    pub fn new(repository: Arc<dyn TrustRepository>) -> Self {
        Self { repository }
    }

    /// Postings on or before `as_of`, signed by the account's normal side
    pub async fn get_account_balance(
        &self,
        scheme_id: Uuid,
        account_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<AccountBalance> {
        let scheme = require_scheme(self.repository.as_ref(), scheme_id).await?;
        let account = self
            .repository
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Account", account_id))?;
        if !account_visible_to(&scheme, &account) {
            return Err(LedgerError::invalid_account(
                account_id,
                format!("account {} is not available to scheme {}", account.code, scheme_id),
            ));
        }

        let totals = self
            .repository
            .posting_totals(scheme_id, PostingFilter::Account(account_id), as_of)
            .await?;
        debug!(%scheme_id, %account_id, %as_of, "Projected account balance");
        Ok(AccountBalance::new(&account, as_of, totals))
    }

    /// Lot-tagged postings on or before `as_of`, debits minus credits
    pub async fn get_lot_balance(&self, scheme_id: Uuid, lot_id: Uuid, as_of: NaiveDate) -> Result<LotBalance> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        let lot = match self.repository.get_lot(lot_id).await? {
            Some(lot) if lot.scheme_id == scheme_id => lot,
            _ => return Err(LedgerError::not_found("Lot", lot_id)),
        };

        let totals = self
            .repository
            .posting_totals(scheme_id, PostingFilter::Lot(lot_id), as_of)
            .await?;
        debug!(%scheme_id, %lot_id, %as_of, "Projected lot balance");
        Ok(LotBalance {
            lot_id,
            lot_number: lot.lot_number,
            as_of,
            balance: totals.net_debit(),
        })
    }

    /// One line per account with postings, ordered by code
    pub async fn trial_balance(&self, scheme_id: Uuid, as_of: NaiveDate) -> Result<TrialBalance> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        let totals = self.repository.account_totals(scheme_id, as_of).await?;

        let mut lines = Vec::with_capacity(totals.len());
        let mut total_debits = Decimal::ZERO;
        let mut total_credits = Decimal::ZERO;
        for (account_id, totals) in totals {
            let account = self
                .repository
                .get_account(account_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("Account", account_id))?;
            let net = totals.net_debit();
            let (debit_balance, credit_balance) = if net >= Decimal::ZERO {
                (net, Decimal::ZERO)
            } else {
                (Decimal::ZERO, -net)
            };
            total_debits = total_debits
                .checked_add(debit_balance)
                .ok_or_else(|| LedgerError::out_of_range("Trial balance total"))?;
            total_credits = total_credits
                .checked_add(credit_balance)
                .ok_or_else(|| LedgerError::out_of_range("Trial balance total"))?;
            lines.push(TrialBalanceLine {
                account_id,
                account_code: account.code,
                account_name: account.name,
                account_type: account.account_type,
                debit_balance,
                credit_balance,
            });
        }
        lines.sort_by(|a, b| a.account_code.cmp(&b.account_code));

        Ok(TrialBalance {
            scheme_id,
            as_of,
            lines,
            total_debits,
            total_credits,
        })
    }
}
