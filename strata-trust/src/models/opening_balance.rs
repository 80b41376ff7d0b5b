//! Opening balance import types

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opening balance state of a scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpeningBalanceState {
    None,
    Applied,
}

/// Result of an opening balance status check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningBalanceStatus {
    pub has_opening_balances: bool,
    /// Number of active (unreversed) opening balance entries
    pub entry_count: usize,
}

impl OpeningBalanceStatus {
    pub fn from_count(entry_count: usize) -> Self {
        Self {
            has_opening_balances: entry_count > 0,
            entry_count,
        }
    }

    pub fn state(&self) -> OpeningBalanceState {
        if self.has_opening_balances {
            OpeningBalanceState::Applied
        } else {
            OpeningBalanceState::None
        }
    }
}

/// Starting balance of one lot; positive means the owner owes the scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotOpeningBalance {
    pub lot_id: Uuid,
    pub balance: Decimal,
}

/// Import request for a scheme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOpeningBalances {
    pub posting_date: NaiveDate,
    pub balances: Vec<LotOpeningBalance>,
    /// Replace balances that are already applied
    #[serde(default)]
    pub reseed: bool,
}

/// Applied opening balance of a lot, projected from the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningBalanceRecord {
    pub lot_id: Uuid,
    pub balance: Decimal,
    pub entry_id: Uuid,
    pub posting_date: NaiveDate,
}

/// Account codes the importer posts against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningBalanceAccounts {
    /// Equity control account balancing every lot's opening entry
    pub control_code: String,
    /// Lot receivable (asset) account carrying the lot tag
    pub receivable_code: String,
}

impl Default for OpeningBalanceAccounts {
    fn default() -> Self {
        Self {
            control_code: "3900".to_string(),
            receivable_code: "1200".to_string(),
        }
    }
}
