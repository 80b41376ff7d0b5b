//! Data models for the trust ledger

pub mod account;
pub mod balance;
pub mod directory;
pub mod entry;
pub mod opening_balance;

pub use account::{Account, AccountScope, AccountType, UpsertAccount};
pub use balance::{
    AccountBalance, LotBalance, PostingFilter, PostingTotals, TrialBalance, TrialBalanceLine,
};
pub use directory::{FinancialYearEnd, Lot, Organisation, Ownership, Scheme, SchemeMetadata};
pub use entry::{
    DateRange, EntryPosition, LedgerEntry, NewEntry, PostEntry, Posting, ReferenceType, Side,
};
pub use opening_balance::{
    ApplyOpeningBalances, LotOpeningBalance, OpeningBalanceAccounts, OpeningBalanceRecord,
    OpeningBalanceState, OpeningBalanceStatus,
};
