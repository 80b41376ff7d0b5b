//! Balance projections

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::{Account, AccountType};
use super::entry::Side;
use crate::error::{LedgerError, Result};

/// Raw debit and credit sums of a set of postings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingTotals {
    pub debits: Decimal,
    pub credits: Decimal,
}

impl PostingTotals {
    pub fn add(&mut self, side: Side, amount: Decimal) -> Result<()> {
        let total = match side {
            Side::Debit => &mut self.debits,
            Side::Credit => &mut self.credits,
        };
        *total = total
            .checked_add(amount)
            .ok_or_else(|| LedgerError::out_of_range("Posting total"))?;
        Ok(())
    }

    /// Debits minus credits
    pub fn net_debit(&self) -> Decimal {
        self.debits - self.credits
    }

    /// Balance signed by the account type's normal side
    pub fn signed_for(&self, account_type: AccountType) -> Decimal {
        match account_type.normal_side() {
            Side::Debit => self.debits - self.credits,
            Side::Credit => self.credits - self.debits,
        }
    }
}

/// Which postings a total is taken over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingFilter {
    Account(Uuid),
    Lot(Uuid),
}

/// Account balance information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: Uuid,
    pub account_code: String,
    pub account_name: String,
    pub account_type: AccountType,
    pub as_of: NaiveDate,
    pub debits: Decimal,
    pub credits: Decimal,
    pub balance: Decimal,
}

impl AccountBalance {
    pub fn new(account: &Account, as_of: NaiveDate, totals: PostingTotals) -> Self {
        Self {
            account_id: account.id,
            account_code: account.code.clone(),
            account_name: account.name.clone(),
            account_type: account.account_type,
            as_of,
            debits: totals.debits,
            credits: totals.credits,
            balance: totals.signed_for(account.account_type),
        }
    }
}

/// Lot balance information; positive means the lot owes the scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotBalance {
    pub lot_id: Uuid,
    pub lot_number: String,
    pub as_of: NaiveDate,
    pub balance: Decimal,
}

/// Trial balance entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceLine {
    pub account_id: Uuid,
    pub account_code: String,
    pub account_name: String,
    pub account_type: AccountType,
    pub debit_balance: Decimal,
    pub credit_balance: Decimal,
}

/// Trial balance of a scheme at a date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub scheme_id: Uuid,
    pub as_of: NaiveDate,
    pub lines: Vec<TrialBalanceLine>,
    pub total_debits: Decimal,
    pub total_credits: Decimal,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debits == self.total_credits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_balance_follows_normal_side() {
        let mut totals = PostingTotals::default();
        totals.add(Side::Debit, Decimal::new(15000, 2)).unwrap();
        totals.add(Side::Credit, Decimal::new(4000, 2)).unwrap();

        assert_eq!(totals.signed_for(AccountType::Asset), Decimal::new(11000, 2));
        assert_eq!(totals.signed_for(AccountType::Expense), Decimal::new(11000, 2));
        assert_eq!(totals.signed_for(AccountType::Income), Decimal::new(-11000, 2));
        assert_eq!(totals.net_debit(), Decimal::new(11000, 2));
    }

    #[test]
    fn test_totals_report_overflow() {
        let mut totals = PostingTotals::default();
        totals.add(Side::Credit, Decimal::MAX).unwrap();
        assert!(matches!(
            totals.add(Side::Credit, Decimal::ONE),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(totals.credits, Decimal::MAX);
        assert!(totals.add(Side::Debit, Decimal::MAX).is_ok());
    }
}
