//! Tests for the opening balance importer and balance projector

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use futures::TryStreamExt;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use crate::error::LedgerError;
    use crate::models::{
        Account, AccountScope, AccountType, ApplyOpeningBalances, DateRange, FinancialYearEnd,
        LedgerEntry, Lot, LotOpeningBalance, OpeningBalanceAccounts, OpeningBalanceState,
        PostEntry, Posting, ReferenceType, Scheme, Side, UpsertAccount,
    };
    use crate::repository::InMemoryTrustRepository;
    use crate::services::TrustServices;

    struct Fixture {
        services: TrustServices,
        scheme: Scheme,
        lots: Vec<Lot>,
        receivable: Account,
        control: Account,
        cash: Account,
    }

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn date(month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, month, day).unwrap()
    }

    async fn fixture(lot_count: usize) -> Fixture {
        let services = TrustServices::new(
            Arc::new(InMemoryTrustRepository::new()),
            OpeningBalanceAccounts::default(),
        );
        let org = services.directory.create_organisation("Acme Strata").await.unwrap();
        let scheme = services
            .directory
            .create_scheme(org.id, "SP 20411", FinancialYearEnd::default())
            .await
            .unwrap();

        let mut lots = Vec::new();
        for n in 1..=lot_count {
            lots.push(services.directory.create_lot(scheme.id, &n.to_string()).await.unwrap());
        }

        let upsert = |scope: AccountScope, code: &str, account_type: AccountType| UpsertAccount {
            id: None,
            scope,
            code: code.to_string(),
            name: format!("Account {}", code),
            account_type,
            is_active: true,
        };
        // receivable and control are organisation defaults; cash is scheme-specific
        let receivable = services
            .accounts
            .upsert_account(upsert(AccountScope::Organisation(org.id), "1200", AccountType::Asset))
            .await
            .unwrap();
        let control = services
            .accounts
            .upsert_account(upsert(AccountScope::Organisation(org.id), "3900", AccountType::Equity))
            .await
            .unwrap();
        let cash = services
            .accounts
            .upsert_account(upsert(AccountScope::Scheme(scheme.id), "1000", AccountType::Asset))
            .await
            .unwrap();

        Fixture {
            services,
            scheme,
            lots,
            receivable,
            control,
            cash,
        }
    }

    fn request(balances: Vec<(Uuid, &str)>) -> ApplyOpeningBalances {
        ApplyOpeningBalances {
            posting_date: date(7, 1),
            balances: balances
                .into_iter()
                .map(|(lot_id, balance)| LotOpeningBalance {
                    lot_id,
                    balance: dec(balance),
                })
                .collect(),
            reseed: false,
        }
    }

    async fn all_entries(f: &Fixture) -> Vec<LedgerEntry> {
        f.services
            .ledger
            .entries(f.scheme.id, DateRange::all())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_two_lots_example() {
        let f = fixture(2).await;
        let (l1, l2) = (f.lots[0].id, f.lots[1].id);

        let ids = f
            .services
            .opening_balances
            .apply_opening_balances(f.scheme.id, request(vec![(l1, "150.00"), (l2, "-40.00")]))
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let entries = all_entries(&f).await;
        assert_eq!(entries.len(), 2);
        for entry in &entries {
            assert_eq!(entry.reference_type, ReferenceType::OpeningBalance);
            assert_eq!(entry.total(Side::Debit), entry.total(Side::Credit));
        }

        let today = date(12, 31);
        let balances = &f.services.balances;
        assert_eq!(balances.get_lot_balance(f.scheme.id, l1, today).await.unwrap().balance, dec("150.00"));
        assert_eq!(balances.get_lot_balance(f.scheme.id, l2, today).await.unwrap().balance, dec("-40.00"));

        let receivable = balances.get_account_balance(f.scheme.id, f.receivable.id, today).await.unwrap();
        assert_eq!(receivable.balance, dec("110.00"));
        let control = balances.get_account_balance(f.scheme.id, f.control.id, today).await.unwrap();
        assert_eq!(control.balance, dec("110.00"));

        // nothing before the posting date
        let before = balances.get_lot_balance(f.scheme.id, l1, date(6, 30)).await.unwrap();
        assert_eq!(before.balance, Decimal::ZERO);

        let status = f.services.opening_balances.check_status(f.scheme.id).await.unwrap();
        assert!(status.has_opening_balances);
        assert_eq!(status.state(), OpeningBalanceState::Applied);

        let mut records = f.services.opening_balances.opening_balance_records(f.scheme.id).await.unwrap();
        records.sort_by_key(|r| r.balance);
        assert_eq!(records[0].lot_id, l2);
        assert_eq!(records[0].balance, dec("-40.00"));
        assert_eq!(records[1].balance, dec("150.00"));
    }

    #[tokio::test]
    async fn test_second_apply_requires_reseed() {
        let f = fixture(1).await;
        let importer = &f.services.opening_balances;
        importer
            .apply_opening_balances(f.scheme.id, request(vec![(f.lots[0].id, "10.00")]))
            .await
            .unwrap();

        let again = importer
            .apply_opening_balances(f.scheme.id, request(vec![(f.lots[0].id, "20.00")]))
            .await;
        assert_eq!(again, Err(LedgerError::AlreadyApplied(f.scheme.id)));

        let mut reseed = request(vec![(f.lots[0].id, "20.00")]);
        reseed.reseed = true;
        importer.apply_opening_balances(f.scheme.id, reseed).await.unwrap();

        let lot = f.services.balances.get_lot_balance(f.scheme.id, f.lots[0].id, date(12, 31)).await.unwrap();
        assert_eq!(lot.balance, dec("20.00"));
        let status = importer.check_status(f.scheme.id).await.unwrap();
        assert_eq!(status.entry_count, 1);
        // original, its reversal, and the new opening entry
        assert_eq!(all_entries(&f).await.len(), 3);
    }

    #[tokio::test]
    async fn test_clear_restores_prior_balances() {
        let f = fixture(3).await;
        let day = date(8, 15);
        f.services
            .ledger
            .post_entry(
                f.scheme.id,
                PostEntry {
                    posting_date: date(7, 20),
                    reference_type: ReferenceType::Payment,
                    reference_id: Some("RCPT-1".to_string()),
                    description: "Levy payment".to_string(),
                    postings: vec![
                        Posting::debit(f.cash.id, dec("75.00")),
                        Posting::credit(f.receivable.id, dec("75.00")).for_lot(f.lots[0].id),
                    ],
                },
            )
            .await
            .unwrap();

        let balances = &f.services.balances;
        let mut before = Vec::new();
        for account in [&f.receivable, &f.control, &f.cash] {
            before.push(balances.get_account_balance(f.scheme.id, account.id, day).await.unwrap().balance);
        }
        let lot_before = balances.get_lot_balance(f.scheme.id, f.lots[0].id, day).await.unwrap();

        let importer = &f.services.opening_balances;
        importer
            .apply_opening_balances(
                f.scheme.id,
                request(vec![(f.lots[0].id, "300.00"), (f.lots[1].id, "-12.34"), (f.lots[2].id, "0")]),
            )
            .await
            .unwrap();
        assert_eq!(importer.check_status(f.scheme.id).await.unwrap().entry_count, 2);

        let reversals = importer.clear_opening_balances(f.scheme.id).await.unwrap();
        assert_eq!(reversals.len(), 2);
        assert!(!importer.check_status(f.scheme.id).await.unwrap().has_opening_balances);

        for (account, expected) in [&f.receivable, &f.control, &f.cash].into_iter().zip(&before) {
            let after = balances.get_account_balance(f.scheme.id, account.id, day).await.unwrap();
            assert_eq!(&after.balance, expected);
        }
        assert_eq!(
            balances.get_lot_balance(f.scheme.id, f.lots[0].id, day).await.unwrap(),
            lot_before
        );

        assert_eq!(
            importer.clear_opening_balances(f.scheme.id).await,
            Err(LedgerError::NotApplied(f.scheme.id))
        );

        // cleared schemes can be seeded again
        importer
            .apply_opening_balances(f.scheme.id, request(vec![(f.lots[2].id, "5.00")]))
            .await
            .unwrap();
        assert!(importer.check_status(f.scheme.id).await.unwrap().has_opening_balances);
    }

    #[tokio::test]
    async fn test_invalid_lot_aborts_whole_import() {
        let f = fixture(10).await;
        let other_org = f.services.directory.create_organisation("Other").await.unwrap();
        let other_scheme = f
            .services
            .directory
            .create_scheme(other_org.id, "SP 9", FinancialYearEnd::default())
            .await
            .unwrap();
        let foreign_lot = f.services.directory.create_lot(other_scheme.id, "7").await.unwrap();

        let mut balances: Vec<(Uuid, &str)> = f.lots.iter().map(|lot| (lot.id, "100.00")).collect();
        balances[6] = (foreign_lot.id, "100.00");

        let result = f
            .services
            .opening_balances
            .apply_opening_balances(f.scheme.id, request(balances))
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound { entity: "Lot", .. })));
        assert!(all_entries(&f).await.is_empty());
        assert!(!f.services.opening_balances.check_status(f.scheme.id).await.unwrap().has_opening_balances);

        let mut fine_cents: Vec<(Uuid, &str)> = f.lots.iter().map(|lot| (lot.id, "1.00")).collect();
        fine_cents[6].1 = "1.001";
        let result = f
            .services
            .opening_balances
            .apply_opening_balances(f.scheme.id, request(fine_cents))
            .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));

        let duplicate = vec![(f.lots[0].id, "1.00"), (f.lots[0].id, "2.00")];
        let result = f
            .services
            .opening_balances
            .apply_opening_balances(f.scheme.id, request(duplicate))
            .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert!(all_entries(&f).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_control_account() {
        let f = fixture(1).await;
        let mut retire = UpsertAccount {
            id: Some(f.control.id),
            scope: f.control.scope,
            code: f.control.code.clone(),
            name: f.control.name.clone(),
            account_type: f.control.account_type,
            is_active: false,
        };
        f.services.accounts.upsert_account(retire.clone()).await.unwrap();

        let result = f
            .services
            .opening_balances
            .apply_opening_balances(f.scheme.id, request(vec![(f.lots[0].id, "1.00")]))
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound { entity: "Account", .. })));

        retire.is_active = true;
        f.services.accounts.upsert_account(retire).await.unwrap();
        assert!(f
            .services
            .opening_balances
            .apply_opening_balances(f.scheme.id, request(vec![(f.lots[0].id, "1.00")]))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_projections_are_idempotent_and_trial_balance_balances() {
        let f = fixture(2).await;
        f.services
            .opening_balances
            .apply_opening_balances(f.scheme.id, request(vec![(f.lots[0].id, "99.99"), (f.lots[1].id, "-0.01")]))
            .await
            .unwrap();

        let as_of = date(9, 1);
        let first = f.services.balances.get_account_balance(f.scheme.id, f.receivable.id, as_of).await.unwrap();
        let second = f.services.balances.get_account_balance(f.scheme.id, f.receivable.id, as_of).await.unwrap();
        assert_eq!(first, second);

        let trial = f.services.balances.trial_balance(f.scheme.id, as_of).await.unwrap();
        assert!(trial.is_balanced());
        assert_eq!(trial.total_debits, dec("99.98"));
        let codes: Vec<&str> = trial.lines.iter().map(|l| l.account_code.as_str()).collect();
        assert_eq!(codes, vec!["1200", "3900"]);
    }

    #[tokio::test]
    async fn test_foreign_account_balance_rejected() {
        let f = fixture(1).await;
        let org = f.services.directory.create_organisation("Elsewhere").await.unwrap();
        let other = f
            .services
            .directory
            .create_scheme(org.id, "SP 2", FinancialYearEnd::default())
            .await
            .unwrap();

        let result = f.services.balances.get_account_balance(other.id, f.cash.id, date(1, 1)).await;
        assert!(matches!(result, Err(LedgerError::InvalidAccount { .. })));
        let result = f.services.balances.get_lot_balance(other.id, f.lots[0].id, date(1, 1)).await;
        assert!(matches!(result, Err(LedgerError::NotFound { entity: "Lot", .. })));
    }

    #[tokio::test]
    async fn test_zero_balances_post_nothing() {
        let f = fixture(2).await;
        let (l1, l2) = (f.lots[0].id, f.lots[1].id);
        let importer = &f.services.opening_balances;

        let ids = importer
            .apply_opening_balances(f.scheme.id, request(vec![(l1, "0.00"), (l2, "25.00")]))
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(all_entries(&f).await.len(), 1);

        let records = importer.opening_balance_records(f.scheme.id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lot_id, l2);
        assert_eq!(records[0].balance, dec("25.00"));
    }

    #[tokio::test]
    async fn test_import_without_balances_is_rejected() {
        let f = fixture(2).await;
        let (l1, l2) = (f.lots[0].id, f.lots[1].id);
        let importer = &f.services.opening_balances;

        let all_zero = importer
            .apply_opening_balances(f.scheme.id, request(vec![(l1, "0.00"), (l2, "0")]))
            .await;
        assert!(matches!(all_zero, Err(LedgerError::Validation(_))));
        let empty = importer.apply_opening_balances(f.scheme.id, request(vec![])).await;
        assert!(matches!(empty, Err(LedgerError::Validation(_))));
        assert!(!importer.check_status(f.scheme.id).await.unwrap().has_opening_balances);
        assert!(all_entries(&f).await.is_empty());

        // a zero-only reseed must not clear the applied set
        importer
            .apply_opening_balances(f.scheme.id, request(vec![(l1, "10.00")]))
            .await
            .unwrap();
        let mut reseed = request(vec![(l1, "0.00")]);
        reseed.reseed = true;
        assert!(matches!(
            importer.apply_opening_balances(f.scheme.id, reseed).await,
            Err(LedgerError::Validation(_))
        ));
        let status = importer.check_status(f.scheme.id).await.unwrap();
        assert!(status.has_opening_balances);
        assert_eq!(status.entry_count, 1);
        let lot = f.services.balances.get_lot_balance(f.scheme.id, l1, date(12, 31)).await.unwrap();
        assert_eq!(lot.balance, dec("10.00"));
    }
}
