//! End-to-end trust accounting flows against the in-memory repository

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use futures::TryStreamExt;
use rust_decimal::Decimal;

use strata_trust::models::{
    Account, AccountScope, AccountType, ApplyOpeningBalances, DateRange, FinancialYearEnd, LedgerEntry,
    Lot, LotOpeningBalance, OpeningBalanceAccounts, PostEntry, Posting, ReferenceType, Scheme,
    SchemeMetadata, UpsertAccount,
};
use strata_trust::{InMemoryTrustRepository, LedgerError, TrustServices};

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

struct Books {
    services: TrustServices,
    scheme: Scheme,
    lot: Lot,
    cash: Account,
    receivable: Account,
    levies: Account,
}

async fn open_books() -> Books {
    let services = TrustServices::new(
        Arc::new(InMemoryTrustRepository::new()),
        OpeningBalanceAccounts::default(),
    );
    let org = services.directory.create_organisation("Harbourside Strata").await.unwrap();
    let scheme = services
        .directory
        .create_scheme(org.id, "SP 7781", FinancialYearEnd::new(3, 31).unwrap())
        .await
        .unwrap();
    let lot = services.directory.create_lot(scheme.id, "12").await.unwrap();

    let mut saved = Vec::new();
    for (scope, code, account_type) in [
        (AccountScope::Organisation(org.id), "1000", AccountType::Asset),
        (AccountScope::Organisation(org.id), "1200", AccountType::Asset),
        (AccountScope::Organisation(org.id), "3900", AccountType::Equity),
        (AccountScope::Scheme(scheme.id), "4000", AccountType::Income),
    ] {
        let account = services
            .accounts
            .upsert_account(UpsertAccount {
                id: None,
                scope,
                code: code.to_string(),
                name: format!("Account {}", code),
                account_type,
                is_active: true,
            })
            .await
            .unwrap();
        saved.push(account);
    }
    let levies = saved.pop().unwrap();
    let _control = saved.pop().unwrap();
    let receivable = saved.pop().unwrap();
    let cash = saved.pop().unwrap();

    Books {
        services,
        scheme,
        lot,
        cash,
        receivable,
        levies,
    }
}

fn levy_notice(books: &Books, posting_date: NaiveDate, amount: &str) -> PostEntry {
    PostEntry {
        posting_date,
        reference_type: ReferenceType::Invoice,
        reference_id: Some("LEVY-Q1".to_string()),
        description: "Admin fund levy".to_string(),
        postings: vec![
            Posting::debit(books.receivable.id, dec(amount)).for_lot(books.lot.id),
            Posting::credit(books.levies.id, dec(amount)),
        ],
    }
}

fn payment(books: &Books, posting_date: NaiveDate, amount: &str) -> PostEntry {
    PostEntry {
        posting_date,
        reference_type: ReferenceType::Payment,
        reference_id: Some("RCPT-88".to_string()),
        description: "Levy receipt".to_string(),
        postings: vec![
            Posting::debit(books.cash.id, dec(amount)),
            Posting::credit(books.receivable.id, dec(amount)).for_lot(books.lot.id),
        ],
    }
}

#[tokio::test]
async fn test_levy_cycle_with_opening_balance() {
    let books = open_books().await;
    let scheme_id = books.scheme.id;

    books
        .services
        .opening_balances
        .apply_opening_balances(
            scheme_id,
            ApplyOpeningBalances {
                posting_date: date(2024, 4, 1),
                balances: vec![LotOpeningBalance {
                    lot_id: books.lot.id,
                    balance: dec("120.50"),
                }],
                reseed: false,
            },
        )
        .await
        .unwrap();

    books.services.ledger.post_entry(scheme_id, levy_notice(&books, date(2024, 4, 15), "600.00")).await.unwrap();
    let receipt = books.services.ledger.post_entry(scheme_id, payment(&books, date(2024, 5, 2), "720.50")).await.unwrap();

    let balances = &books.services.balances;
    let owing = balances.get_lot_balance(scheme_id, books.lot.id, date(2024, 4, 30)).await.unwrap();
    assert_eq!(owing.balance, dec("720.50"));
    assert_eq!(owing.lot_number, "12");
    let settled = balances.get_lot_balance(scheme_id, books.lot.id, date(2024, 6, 30)).await.unwrap();
    assert_eq!(settled.balance, Decimal::ZERO);

    let cash = balances.get_account_balance(scheme_id, books.cash.id, date(2024, 6, 30)).await.unwrap();
    assert_eq!(cash.balance, dec("720.50"));
    let income = balances.get_account_balance(scheme_id, books.levies.id, date(2024, 6, 30)).await.unwrap();
    assert_eq!(income.balance, dec("600.00"));

    // bounced receipt
    books
        .services
        .ledger
        .reverse_entry(scheme_id, receipt, date(2024, 5, 9), "dishonoured")
        .await
        .unwrap();
    let owing_again = balances.get_lot_balance(scheme_id, books.lot.id, date(2024, 6, 30)).await.unwrap();
    assert_eq!(owing_again.balance, dec("720.50"));
    // as-of before the reversal is unaffected
    let before = balances.get_lot_balance(scheme_id, books.lot.id, date(2024, 5, 5)).await.unwrap();
    assert_eq!(before.balance, Decimal::ZERO);

    let trial = balances.trial_balance(scheme_id, date(2024, 6, 30)).await.unwrap();
    assert!(trial.is_balanced());

    let entries: Vec<LedgerEntry> = books
        .services
        .ledger
        .entries(scheme_id, DateRange::all())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let kinds: Vec<ReferenceType> = entries.iter().map(|e| e.reference_type).collect();
    assert_eq!(
        kinds,
        vec![
            ReferenceType::OpeningBalance,
            ReferenceType::Invoice,
            ReferenceType::Payment,
            ReferenceType::Reversal,
        ]
    );
}

#[tokio::test]
async fn test_concurrent_posts_all_commit() {
    let books = open_books().await;
    let scheme_id = books.scheme.id;

    let posts = (1..=20).map(|day| {
        let ledger = books.services.ledger.clone();
        let entry = levy_notice(&books, date(2024, 7, day), "10.00");
        async move { ledger.post_entry(scheme_id, entry).await }
    });
    let results = join_all(posts).await;
    assert!(results.iter().all(Result::is_ok));

    let entries: Vec<LedgerEntry> = books
        .services
        .ledger
        .entries(scheme_id, DateRange::all())
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let mut sequences: Vec<i64> = entries.iter().map(|e| e.sequence).collect();
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), 20);

    let lot = books
        .services
        .balances
        .get_lot_balance(scheme_id, books.lot.id, date(2024, 12, 31))
        .await
        .unwrap();
    assert_eq!(lot.balance, dec("200.00"));
}

#[tokio::test]
async fn test_concurrent_imports_apply_once() {
    let books = open_books().await;
    let scheme_id = books.scheme.id;

    let imports = ["10.00", "20.00", "30.00"].into_iter().map(|balance| {
        let importer = books.services.opening_balances.clone();
        let request = ApplyOpeningBalances {
            posting_date: date(2024, 4, 1),
            balances: vec![LotOpeningBalance {
                lot_id: books.lot.id,
                balance: dec(balance),
            }],
            reseed: false,
        };
        tokio::spawn(async move { importer.apply_opening_balances(scheme_id, request).await })
    });
    let results: Vec<_> = join_all(imports).await.into_iter().map(|joined| joined.unwrap()).collect();

    let applied = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(applied, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::AlreadyApplied(_))));

    let status = books.services.opening_balances.check_status(scheme_id).await.unwrap();
    assert_eq!(status.entry_count, 1);
}

#[tokio::test]
async fn test_scheme_metadata_and_ownership() {
    let books = open_books().await;
    let directory = &books.services.directory;

    let updated = directory
        .update_scheme_metadata(
            books.scheme.id,
            SchemeMetadata {
                name: Some("SP 7781 Harbourside".to_string()),
                financial_year_end: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "SP 7781 Harbourside");
    assert_eq!(updated.financial_year_end, FinancialYearEnd::new(3, 31).unwrap());

    let first = directory.record_ownership(books.lot.id, "J. Citizen", date(2020, 1, 10)).await.unwrap();
    directory.record_ownership(books.lot.id, "A. Buyer", date(2024, 2, 1)).await.unwrap();
    let current = directory.current_owner(books.lot.id).await.unwrap().unwrap();
    assert_eq!(current.owner_name, "A. Buyer");
    assert_ne!(current.id, first.id);

    assert!(matches!(
        directory.create_lot(books.scheme.id, "12").await,
        Err(LedgerError::Validation(_))
    ));
}
