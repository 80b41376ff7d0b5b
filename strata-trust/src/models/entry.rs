//! Journal entries and postings

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{self, LedgerError};

/// Posting side (debit or credit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Debit => write!(f, "debit"),
            Side::Credit => write!(f, "credit"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Side::Debit),
            "credit" => Ok(Side::Credit),
            _ => Err(format!("Invalid posting side: {}", s)),
        }
    }
}

/// Operation an entry originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    OpeningBalance,
    Invoice,
    Payment,
    Journal,
    Reversal,
}

impl ReferenceType {
    /// Reference types only the ledger itself may write
    pub fn is_reserved(&self) -> bool {
        matches!(self, ReferenceType::OpeningBalance | ReferenceType::Reversal)
    }
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceType::OpeningBalance => write!(f, "opening_balance"),
            ReferenceType::Invoice => write!(f, "invoice"),
            ReferenceType::Payment => write!(f, "payment"),
            ReferenceType::Journal => write!(f, "journal"),
            ReferenceType::Reversal => write!(f, "reversal"),
        }
    }
}

impl std::str::FromStr for ReferenceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "opening_balance" => Ok(ReferenceType::OpeningBalance),
            "invoice" => Ok(ReferenceType::Invoice),
            "payment" => Ok(ReferenceType::Payment),
            "journal" => Ok(ReferenceType::Journal),
            "reversal" => Ok(ReferenceType::Reversal),
            _ => Err(format!("Invalid reference type: {}", s)),
        }
    }
}

/// One debit or credit line of an entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub account_id: Uuid,
    #[serde(default)]
    pub lot_id: Option<Uuid>,
    pub side: Side,
    pub amount: Decimal,
    #[serde(default)]
    pub memo: Option<String>,
}

impl Posting {
    pub fn debit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            lot_id: None,
            side: Side::Debit,
            amount,
            memo: None,
        }
    }

    pub fn credit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            lot_id: None,
            side: Side::Credit,
            amount,
            memo: None,
        }
    }

    pub fn for_lot(mut self, lot_id: Uuid) -> Self {
        self.lot_id = Some(lot_id);
        self
    }

    /// Same line on the opposite side
    pub fn reversed(&self) -> Self {
        Self {
            side: self.side.opposite(),
            ..self.clone()
        }
    }
}

/// Caller-facing request to post a live entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostEntry {
    pub posting_date: NaiveDate,
    pub reference_type: ReferenceType,
    #[serde(default)]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub postings: Vec<Posting>,
}

/// Entry handed to the repository for appending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub posting_date: NaiveDate,
    pub reference_type: ReferenceType,
    pub reference_id: Option<String>,
    pub description: String,
    pub reverses: Option<Uuid>,
    pub postings: Vec<Posting>,
}

impl From<PostEntry> for NewEntry {
    fn from(entry: PostEntry) -> Self {
        Self {
            posting_date: entry.posting_date,
            reference_type: entry.reference_type,
            reference_id: entry.reference_id,
            description: entry.description,
            reverses: None,
            postings: entry.postings,
        }
    }
}

/// Immutable journal entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub scheme_id: Uuid,
    pub sequence: i64,
    pub posting_date: NaiveDate,
    pub reference_type: ReferenceType,
    pub reference_id: Option<String>,
    pub description: String,
    pub reverses: Option<Uuid>,
    pub postings: Vec<Posting>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn from_new(scheme_id: Uuid, sequence: i64, entry: NewEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            scheme_id,
            sequence,
            posting_date: entry.posting_date,
            reference_type: entry.reference_type,
            reference_id: entry.reference_id,
            description: entry.description,
            reverses: entry.reverses,
            postings: entry.postings,
            created_at: Utc::now(),
        }
    }

    pub fn position(&self) -> EntryPosition {
        EntryPosition {
            posting_date: self.posting_date,
            sequence: self.sequence,
        }
    }

    /// Total of one side of the entry
    pub fn total(&self, side: Side) -> error::Result<Decimal> {
        checked_sum(
            self.postings.iter().filter(|p| p.side == side).map(|p| p.amount),
            "Entry total",
        )
    }
}

/// Sum without overflow; `what` names the total in the error
pub fn checked_sum(amounts: impl IntoIterator<Item = Decimal>, what: &str) -> error::Result<Decimal> {
    amounts.into_iter().try_fold(Decimal::ZERO, |total, amount| {
        total
            .checked_add(amount)
            .ok_or_else(|| LedgerError::out_of_range(what))
    })
}

/// Sort key of an entry: posting date, then insertion order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryPosition {
    pub posting_date: NaiveDate,
    pub sequence: i64,
}

/// Inclusive posting-date range; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn up_to(to: NaiveDate) -> Self {
        Self { from: None, to: Some(to) }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}
