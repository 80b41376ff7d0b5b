//! Chart of accounts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::Side;

/// Account types in the chart of accounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountType {
    /// Side on which the account's balance increases
    pub fn normal_side(&self) -> Side {
        match self {
            AccountType::Asset | AccountType::Expense => Side::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Income => Side::Credit,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountType::Asset => write!(f, "asset"),
            AccountType::Liability => write!(f, "liability"),
            AccountType::Equity => write!(f, "equity"),
            AccountType::Income => write!(f, "income"),
            AccountType::Expense => write!(f, "expense"),
        }
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asset" => Ok(AccountType::Asset),
            "liability" => Ok(AccountType::Liability),
            "equity" => Ok(AccountType::Equity),
            "income" => Ok(AccountType::Income),
            "expense" => Ok(AccountType::Expense),
            _ => Err(format!("Invalid account type: {}", s)),
        }
    }
}

/// Where an account is visible: one scheme, or every scheme of an organisation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum AccountScope {
    Organisation(Uuid),
    Scheme(Uuid),
}

impl AccountScope {
    /// Stable storage key, e.g. `scheme:<uuid>`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for AccountScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountScope::Organisation(id) => write!(f, "org:{}", id),
            AccountScope::Scheme(id) => write!(f, "scheme:{}", id),
        }
    }
}

impl std::str::FromStr for AccountScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (level, id) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid account scope: {}", s))?;
        let id = Uuid::parse_str(id).map_err(|_| format!("Invalid account scope: {}", s))?;
        match level {
            "org" => Ok(AccountScope::Organisation(id)),
            "scheme" => Ok(AccountScope::Scheme(id)),
            _ => Err(format!("Invalid account scope: {}", s)),
        }
    }
}

/// Ledger account entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub scope: AccountScope,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create-or-update request for the account registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertAccount {
    /// `None` creates a new account
    pub id: Option<Uuid>,
    pub scope: AccountScope,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_round_trips_through_key() {
        let scope = AccountScope::Scheme(Uuid::new_v4());
        assert_eq!(scope.key().parse::<AccountScope>().unwrap(), scope);
        assert!("tenant:abc".parse::<AccountScope>().is_err());
    }

    #[test]
    fn test_normal_sides() {
        assert_eq!(AccountType::Asset.normal_side(), Side::Debit);
        assert_eq!(AccountType::Expense.normal_side(), Side::Debit);
        assert_eq!(AccountType::Income.normal_side(), Side::Credit);
        assert_eq!(AccountType::Equity.normal_side(), Side::Credit);
        assert_eq!(AccountType::Liability.normal_side(), Side::Credit);
    }
}
