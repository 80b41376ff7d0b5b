//! SQLx-based trust ledger repository
//!
//! One schema serves PostgreSQL and SQLite: ids, dates and enums are stored as
//! text and money as integer cents, so every query binds the same Rust types on
//! both backends. Ledger writes open a transaction whose first statement bumps
//! `schemes.ledger_version`, which serialises writers of a scheme until commit.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use strata_trust::models::{
    Account, AccountScope, DateRange, EntryPosition, LedgerEntry, Lot, NewEntry, Organisation, Ownership,
    Posting, PostingFilter, PostingTotals, Scheme,
};
use strata_trust::validation::{
    check_account_retype, from_cents, to_cents, validate_batch, BatchContext, BatchRefs,
};
use strata_trust::{LedgerError, OpeningBalanceGuard, Result, TrustRepository};

use crate::database::connection::DatabasePool;

/// Run `$body` against whichever pool backs the repository
macro_rules! with_pool {
    ($pool:expr, $conn:ident => $body:expr) => {
        match $pool {
            DatabasePool::Postgres($conn) => $body,
            DatabasePool::Sqlite($conn) => $body,
        }
    };
}

/// Entry rows of `$query` with their postings attached, in row order
macro_rules! load_entries {
    ($exec:expr, $query:expr) => {{
        let rows = $query.fetch_all($exec).await.map_err(db_err)?;
        let mut entries = rows.iter().map(entry_from_row).collect::<Result<Vec<LedgerEntry>>>()?;
        if !entries.is_empty() {
            let sql = format!(
                "SELECT entry_id, account_id, lot_id, side, amount_cents, memo FROM postings \
                 WHERE entry_id IN ({}) ORDER BY entry_id, line_no",
                placeholders(1, entries.len())
            );
            let mut query = sqlx::query(&sql);
            for entry in &entries {
                query = query.bind(entry.id.to_string());
            }
            let rows = query.fetch_all($exec).await.map_err(db_err)?;
            attach_postings(&mut entries, &rows)?;
        }
        entries
    }};
}

const ENTRY_COLUMNS: &str =
    "id, scheme_id, sequence, posting_date, reference_type, reference_id, description, reverses, created_at";
const ACCOUNT_COLUMNS: &str = "id, scope_key, code, name, account_type, is_active, created_at, updated_at";

const TOTALS_COLUMNS: &str = "CAST(COALESCE(SUM(CASE WHEN p.side = 'debit' THEN p.amount_cents ELSE 0 END), 0) AS BIGINT) AS debits, \
     CAST(COALESCE(SUM(CASE WHEN p.side = 'credit' THEN p.amount_cents ELSE 0 END), 0) AS BIGINT) AS credits";

/// SQLx-based trust repository implementation
pub struct SqlTrustRepository {
    pool: DatabasePool,
}

impl SqlTrustRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

/// Map unique-constraint failures to validation errors
fn write_err(what: &str) -> impl Fn(sqlx::Error) -> LedgerError + '_ {
    move |e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return LedgerError::Validation(format!("{} already exists", what));
            }
        }
        db_err(e)
    }
}

/// `$start, $start+1, ...` for `count` parameters
fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|n| format!("${}", n))
        .collect::<Vec<_>>()
        .join(", ")
}

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn corrupt(column: &str, value: &str) -> LedgerError {
    LedgerError::Storage(format!("Unreadable {} value '{}'", column, value))
}

/// Typed column access shared by both backends' rows
trait RowExt {
    fn text(&self, column: &str) -> Result<String>;
    fn opt_text(&self, column: &str) -> Result<Option<String>>;
    fn int(&self, column: &str) -> Result<i64>;
    fn flag(&self, column: &str) -> Result<bool>;

    fn uuid(&self, column: &str) -> Result<Uuid> {
        let value = self.text(column)?;
        Uuid::parse_str(&value).map_err(|_| corrupt(column, &value))
    }

    fn opt_uuid(&self, column: &str) -> Result<Option<Uuid>> {
        self.opt_text(column)?
            .map(|value| Uuid::parse_str(&value).map_err(|_| corrupt(column, &value)))
            .transpose()
    }

    fn date(&self, column: &str) -> Result<NaiveDate> {
        let value = self.text(column)?;
        NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| corrupt(column, &value))
    }

    fn opt_date(&self, column: &str) -> Result<Option<NaiveDate>> {
        self.opt_text(column)?
            .map(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|_| corrupt(column, &value)))
            .transpose()
    }

    fn timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        let value = self.text(column)?;
        DateTime::parse_from_rfc3339(&value)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|_| corrupt(column, &value))
    }

    fn parsed<T: FromStr>(&self, column: &str) -> Result<T> {
        let value = self.text(column)?;
        value.parse().map_err(|_| corrupt(column, &value))
    }
}

macro_rules! impl_row_ext {
    ($row:ty) => {
        impl RowExt for $row {
            fn text(&self, column: &str) -> Result<String> {
                self.try_get(column).map_err(db_err)
            }

            fn opt_text(&self, column: &str) -> Result<Option<String>> {
                self.try_get(column).map_err(db_err)
            }

            fn int(&self, column: &str) -> Result<i64> {
                self.try_get(column).map_err(db_err)
            }

            fn flag(&self, column: &str) -> Result<bool> {
                self.try_get(column).map_err(db_err)
            }
        }
    };
}

impl_row_ext!(sqlx::postgres::PgRow);
impl_row_ext!(sqlx::sqlite::SqliteRow);

fn organisation_from_row<R: RowExt>(row: &R) -> Result<Organisation> {
    Ok(Organisation {
        id: row.uuid("id")?,
        name: row.text("name")?,
        created_at: row.timestamp("created_at")?,
    })
}

fn scheme_from_row<R: RowExt>(row: &R) -> Result<Scheme> {
    Ok(Scheme {
        id: row.uuid("id")?,
        organisation_id: row.uuid("organisation_id")?,
        name: row.text("name")?,
        financial_year_end: row.parsed("financial_year_end")?,
        created_at: row.timestamp("created_at")?,
        updated_at: row.timestamp("updated_at")?,
    })
}

fn lot_from_row<R: RowExt>(row: &R) -> Result<Lot> {
    Ok(Lot {
        id: row.uuid("id")?,
        scheme_id: row.uuid("scheme_id")?,
        lot_number: row.text("lot_number")?,
        created_at: row.timestamp("created_at")?,
    })
}

fn ownership_from_row<R: RowExt>(row: &R) -> Result<Ownership> {
    Ok(Ownership {
        id: row.uuid("id")?,
        lot_id: row.uuid("lot_id")?,
        owner_name: row.text("owner_name")?,
        ownership_start_date: row.date("ownership_start_date")?,
        ownership_end_date: row.opt_date("ownership_end_date")?,
    })
}

fn account_from_row<R: RowExt>(row: &R) -> Result<Account> {
    Ok(Account {
        id: row.uuid("id")?,
        scope: row.parsed::<AccountScope>("scope_key")?,
        code: row.text("code")?,
        name: row.text("name")?,
        account_type: row.parsed("account_type")?,
        is_active: row.flag("is_active")?,
        created_at: row.timestamp("created_at")?,
        updated_at: row.timestamp("updated_at")?,
    })
}

/// Entry header; postings are attached separately
fn entry_from_row<R: RowExt>(row: &R) -> Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.uuid("id")?,
        scheme_id: row.uuid("scheme_id")?,
        sequence: row.int("sequence")?,
        posting_date: row.date("posting_date")?,
        reference_type: row.parsed("reference_type")?,
        reference_id: row.opt_text("reference_id")?,
        description: row.text("description")?,
        reverses: row.opt_uuid("reverses")?,
        postings: Vec::new(),
        created_at: row.timestamp("created_at")?,
    })
}

fn attach_postings<R: RowExt>(entries: &mut [LedgerEntry], rows: &[R]) -> Result<()> {
    let mut by_entry: HashMap<Uuid, Vec<Posting>> = HashMap::new();
    for row in rows {
        by_entry.entry(row.uuid("entry_id")?).or_default().push(Posting {
            account_id: row.uuid("account_id")?,
            lot_id: row.opt_uuid("lot_id")?,
            side: row.parsed("side")?,
            amount: from_cents(row.int("amount_cents")?),
            memo: row.opt_text("memo")?,
        });
    }
    for entry in entries.iter_mut() {
        entry.postings = by_entry.remove(&entry.id).unwrap_or_default();
    }
    Ok(())
}

fn totals_from_row<R: RowExt>(row: &R) -> Result<PostingTotals> {
    Ok(PostingTotals {
        debits: from_cents(row.int("debits")?),
        credits: from_cents(row.int("credits")?),
    })
}

#[async_trait]
impl TrustRepository for SqlTrustRepository {
    async fn create_organisation(&self, organisation: &Organisation) -> Result<()> {
        debug!("Creating organisation: {}", organisation.id);
        let query = "INSERT INTO organisations (id, name, created_at) VALUES ($1, $2, $3)";
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(organisation.id.to_string())
                .bind(&organisation.name)
                .bind(organisation.created_at.to_rfc3339())
                .execute(pool)
                .await
                .map_err(write_err("Organisation"))?;
        });
        Ok(())
    }

    async fn get_organisation(&self, id: Uuid) -> Result<Option<Organisation>> {
        let query = "SELECT id, name, created_at FROM organisations WHERE id = $1";
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(id.to_string())
                .fetch_optional(pool)
                .await
                .map_err(db_err)?
                .map(|row| organisation_from_row(&row))
                .transpose()
        })
    }

    async fn create_scheme(&self, scheme: &Scheme) -> Result<()> {
        debug!("Creating scheme: {}", scheme.id);
        if self.get_organisation(scheme.organisation_id).await?.is_none() {
            return Err(LedgerError::not_found("Organisation", scheme.organisation_id));
        }
        let query = r#"
            INSERT INTO schemes (id, organisation_id, name, financial_year_end, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
        "#;
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(scheme.id.to_string())
                .bind(scheme.organisation_id.to_string())
                .bind(&scheme.name)
                .bind(scheme.financial_year_end.to_string())
                .bind(scheme.created_at.to_rfc3339())
                .bind(scheme.updated_at.to_rfc3339())
                .execute(pool)
                .await
                .map_err(write_err("Scheme"))?;
        });
        Ok(())
    }

    async fn get_scheme(&self, id: Uuid) -> Result<Option<Scheme>> {
        let query = "SELECT id, organisation_id, name, financial_year_end, created_at, updated_at FROM schemes WHERE id = $1";
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(id.to_string())
                .fetch_optional(pool)
                .await
                .map_err(db_err)?
                .map(|row| scheme_from_row(&row))
                .transpose()
        })
    }

    async fn update_scheme(&self, scheme: &Scheme) -> Result<()> {
        let query = "UPDATE schemes SET name = $1, financial_year_end = $2, updated_at = $3 WHERE id = $4";
        let updated = with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(&scheme.name)
                .bind(scheme.financial_year_end.to_string())
                .bind(scheme.updated_at.to_rfc3339())
                .bind(scheme.id.to_string())
                .execute(pool)
                .await
                .map_err(db_err)?
                .rows_affected()
        });
        if updated == 0 {
            return Err(LedgerError::not_found("Scheme", scheme.id));
        }
        Ok(())
    }

    async fn create_lot(&self, lot: &Lot) -> Result<()> {
        debug!("Creating lot {} in scheme {}", lot.lot_number, lot.scheme_id);
        if self.get_scheme(lot.scheme_id).await?.is_none() {
            return Err(LedgerError::not_found("Scheme", lot.scheme_id));
        }
        let query = "INSERT INTO lots (id, scheme_id, lot_number, created_at) VALUES ($1, $2, $3, $4)";
        let what = format!("Lot number '{}' in scheme", lot.lot_number);
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(lot.id.to_string())
                .bind(lot.scheme_id.to_string())
                .bind(&lot.lot_number)
                .bind(lot.created_at.to_rfc3339())
                .execute(pool)
                .await
                .map_err(write_err(&what))?;
        });
        Ok(())
    }

    async fn get_lot(&self, id: Uuid) -> Result<Option<Lot>> {
        let query = "SELECT id, scheme_id, lot_number, created_at FROM lots WHERE id = $1";
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(id.to_string())
                .fetch_optional(pool)
                .await
                .map_err(db_err)?
                .map(|row| lot_from_row(&row))
                .transpose()
        })
    }

    async fn list_lots(&self, scheme_id: Uuid) -> Result<Vec<Lot>> {
        let query = "SELECT id, scheme_id, lot_number, created_at FROM lots WHERE scheme_id = $1 ORDER BY lot_number";
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(scheme_id.to_string())
                .fetch_all(pool)
                .await
                .map_err(db_err)?
                .iter()
                .map(lot_from_row)
                .collect()
        })
    }

    async fn record_ownership(&self, ownership: &Ownership) -> Result<()> {
        debug!("Recording ownership of lot {}", ownership.lot_id);
        if self.get_lot(ownership.lot_id).await?.is_none() {
            return Err(LedgerError::not_found("Lot", ownership.lot_id));
        }
        with_pool!(&self.pool, pool => {
            let mut tx = pool.begin().await.map_err(db_err)?;
            let current = sqlx::query(
                "SELECT id, lot_id, owner_name, ownership_start_date, ownership_end_date \
                 FROM ownerships WHERE lot_id = $1 AND ownership_end_date IS NULL",
            )
            .bind(ownership.lot_id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?
            .map(|row| ownership_from_row(&row))
            .transpose()?;

            if let Some(current) = current {
                if ownership.ownership_start_date <= current.ownership_start_date {
                    return Err(LedgerError::Validation(format!(
                        "Ownership must start after {}",
                        current.ownership_start_date
                    )));
                }
                sqlx::query("UPDATE ownerships SET ownership_end_date = $1 WHERE id = $2")
                    .bind(date_text(ownership.ownership_start_date))
                    .bind(current.id.to_string())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
            }

            sqlx::query(
                "INSERT INTO ownerships (id, lot_id, owner_name, ownership_start_date, ownership_end_date) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(ownership.id.to_string())
            .bind(ownership.lot_id.to_string())
            .bind(&ownership.owner_name)
            .bind(date_text(ownership.ownership_start_date))
            .bind(ownership.ownership_end_date.map(date_text))
            .execute(&mut *tx)
            .await
            .map_err(write_err("Current ownership"))?;

            tx.commit().await.map_err(db_err)?;
        });
        Ok(())
    }

    async fn current_ownership(&self, lot_id: Uuid) -> Result<Option<Ownership>> {
        let query = "SELECT id, lot_id, owner_name, ownership_start_date, ownership_end_date \
                     FROM ownerships WHERE lot_id = $1 AND ownership_end_date IS NULL";
        with_pool!(&self.pool, pool => {
            sqlx::query(query)
                .bind(lot_id.to_string())
                .fetch_optional(pool)
                .await
                .map_err(db_err)?
                .map(|row| ownership_from_row(&row))
                .transpose()
        })
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        with_pool!(&self.pool, pool => {
            sqlx::query(&query)
                .bind(id.to_string())
                .fetch_optional(pool)
                .await
                .map_err(db_err)?
                .map(|row| account_from_row(&row))
                .transpose()
        })
    }

    async fn list_accounts(&self, scope: AccountScope) -> Result<Vec<Account>> {
        let query = format!(
            "SELECT {} FROM accounts WHERE scope_key = $1 ORDER BY code, created_at",
            ACCOUNT_COLUMNS
        );
        with_pool!(&self.pool, pool => {
            sqlx::query(&query)
                .bind(scope.key())
                .fetch_all(pool)
                .await
                .map_err(db_err)?
                .iter()
                .map(account_from_row)
                .collect()
        })
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        debug!("Saving account {} ({})", account.id, account.code);
        let query = r#"
            INSERT INTO accounts (id, scope_key, code, name, account_type, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                code = excluded.code,
                name = excluded.name,
                account_type = excluded.account_type,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
        "#;
        let what = format!("Account code '{}' in {}", account.code, account.scope);
        // the same scheme rows append_entries locks
        let (lock_sql, scope_id) = match account.scope {
            AccountScope::Scheme(id) => ("UPDATE schemes SET ledger_version = ledger_version + 1 WHERE id = $1", id),
            AccountScope::Organisation(id) => (
                "UPDATE schemes SET ledger_version = ledger_version + 1 WHERE organisation_id = $1",
                id,
            ),
        };
        let account_sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
        with_pool!(&self.pool, pool => {
            let mut tx = pool.begin().await.map_err(db_err)?;
            sqlx::query(lock_sql)
                .bind(scope_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;

            let existing = sqlx::query(&account_sql)
                .bind(account.id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_err)?
                .map(|row| account_from_row(&row))
                .transpose()?;
            if let Some(existing) = existing {
                if existing.account_type != account.account_type {
                    let postings = sqlx::query("SELECT COUNT(*) AS n FROM postings WHERE account_id = $1")
                        .bind(account.id.to_string())
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(db_err)?
                        .int("n")?;
                    check_account_retype(&existing, account, postings > 0)?;
                }
            }

            sqlx::query(query)
                .bind(account.id.to_string())
                .bind(account.scope.key())
                .bind(&account.code)
                .bind(&account.name)
                .bind(account.account_type.to_string())
                .bind(account.is_active)
                .bind(account.created_at.to_rfc3339())
                .bind(account.updated_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(write_err(&what))?;
            tx.commit().await.map_err(db_err)?;
        });
        Ok(())
    }

    async fn append_entries(
        &self,
        scheme_id: Uuid,
        entries: &[NewEntry],
        guard: OpeningBalanceGuard,
    ) -> Result<Vec<LedgerEntry>> {
        let refs = BatchRefs::collect(entries);
        let scheme_key = scheme_id.to_string();

        let appended = with_pool!(&self.pool, pool => {
            let mut tx = pool.begin().await.map_err(db_err)?;

            let locked = sqlx::query("UPDATE schemes SET ledger_version = ledger_version + 1 WHERE id = $1")
                .bind(&scheme_key)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?
                .rows_affected();
            if locked == 0 {
                return Err(LedgerError::not_found("Scheme", scheme_id));
            }

            let scheme = sqlx::query(
                "SELECT id, organisation_id, name, financial_year_end, created_at, updated_at FROM schemes WHERE id = $1",
            )
            .bind(&scheme_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)
            .and_then(|row| scheme_from_row(&row))?;

            let account_sql = format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS);
            let mut accounts = HashMap::new();
            for id in &refs.account_ids {
                let row = sqlx::query(&account_sql)
                    .bind(id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
                if let Some(row) = row {
                    accounts.insert(*id, account_from_row(&row)?);
                }
            }

            let mut lots = HashMap::new();
            for id in &refs.lot_ids {
                let row = sqlx::query("SELECT id, scheme_id, lot_number, created_at FROM lots WHERE id = $1")
                    .bind(id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
                if let Some(row) = row {
                    lots.insert(*id, lot_from_row(&row)?);
                }
            }

            let mut targets = HashMap::new();
            let mut reversed = HashSet::new();
            if !refs.reversal_targets.is_empty() {
                let ids: Vec<Uuid> = refs.reversal_targets.iter().copied().collect();
                let sql = format!(
                    "SELECT {} FROM entries WHERE scheme_id = $1 AND id IN ({})",
                    ENTRY_COLUMNS,
                    placeholders(2, ids.len())
                );
                let mut query = sqlx::query(&sql).bind(&scheme_key);
                for id in &ids {
                    query = query.bind(id.to_string());
                }
                for entry in load_entries!(&mut *tx, query) {
                    targets.insert(entry.id, entry);
                }

                let sql = format!("SELECT reverses FROM entries WHERE reverses IN ({})", placeholders(1, ids.len()));
                let mut query = sqlx::query(&sql);
                for id in &ids {
                    query = query.bind(id.to_string());
                }
                for row in query.fetch_all(&mut *tx).await.map_err(db_err)? {
                    if let Some(id) = row.opt_uuid("reverses")? {
                        reversed.insert(id);
                    }
                }
            }

            let active_opening = sqlx::query(
                "SELECT e.id FROM entries e WHERE e.scheme_id = $1 AND e.reference_type = 'opening_balance' \
                 AND NOT EXISTS (SELECT 1 FROM entries r WHERE r.reverses = e.id)",
            )
            .bind(&scheme_key)
            .fetch_all(&mut *tx)
            .await
            .map_err(db_err)?
            .iter()
            .map(|row| row.uuid("id"))
            .collect::<Result<BTreeSet<Uuid>>>()?;

            let ctx = BatchContext {
                scheme: &scheme,
                accounts,
                lots,
                targets,
                reversed,
                active_opening,
            };
            validate_batch(&ctx, entries, &guard)?;

            let mut sequence = sqlx::query("SELECT COALESCE(MAX(sequence), 0) AS last FROM entries WHERE scheme_id = $1")
                .bind(&scheme_key)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?
                .int("last")?;

            let mut appended = Vec::with_capacity(entries.len());
            for entry in entries {
                sequence += 1;
                let entry = LedgerEntry::from_new(scheme_id, sequence, entry.clone());
                sqlx::query(&format!(
                    "INSERT INTO entries ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                    ENTRY_COLUMNS
                ))
                .bind(entry.id.to_string())
                .bind(&scheme_key)
                .bind(entry.sequence)
                .bind(date_text(entry.posting_date))
                .bind(entry.reference_type.to_string())
                .bind(entry.reference_id.clone())
                .bind(&entry.description)
                .bind(entry.reverses.map(|id| id.to_string()))
                .bind(entry.created_at.to_rfc3339())
                .execute(&mut *tx)
                .await
                .map_err(write_err("Reversal of this entry"))?;

                for (line_no, posting) in entry.postings.iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO postings (entry_id, line_no, account_id, lot_id, side, amount_cents, memo) \
                         VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    )
                    .bind(entry.id.to_string())
                    .bind(line_no as i64)
                    .bind(posting.account_id.to_string())
                    .bind(posting.lot_id.map(|id| id.to_string()))
                    .bind(posting.side.to_string())
                    .bind(to_cents(posting.amount)?)
                    .bind(posting.memo.clone())
                    .execute(&mut *tx)
                    .await
                    .map_err(db_err)?;
                }
                appended.push(entry);
            }

            tx.commit().await.map_err(db_err)?;
            appended
        });

        debug!("Appended {} entries to scheme {}", appended.len(), scheme_id);
        Ok(appended)
    }

    async fn get_entry(&self, scheme_id: Uuid, entry_id: Uuid) -> Result<Option<LedgerEntry>> {
        let sql = format!("SELECT {} FROM entries WHERE id = $1 AND scheme_id = $2", ENTRY_COLUMNS);
        let entries = with_pool!(&self.pool, pool => {
            load_entries!(
                pool,
                sqlx::query(&sql).bind(entry_id.to_string()).bind(scheme_id.to_string())
            )
        });
        Ok(entries.into_iter().next())
    }

    async fn list_entries(
        &self,
        scheme_id: Uuid,
        range: DateRange,
        after: Option<EntryPosition>,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let mut sql = format!("SELECT {} FROM entries WHERE scheme_id = $1", ENTRY_COLUMNS);
        let mut dates = Vec::new();
        if let Some(from) = range.from {
            dates.push(date_text(from));
            sql.push_str(&format!(" AND posting_date >= ${}", dates.len() + 1));
        }
        if let Some(to) = range.to {
            dates.push(date_text(to));
            sql.push_str(&format!(" AND posting_date <= ${}", dates.len() + 1));
        }
        let after_sequence = after.map(|position| {
            dates.push(date_text(position.posting_date));
            let date_param = dates.len() + 1;
            sql.push_str(&format!(
                " AND (posting_date > ${d} OR (posting_date = ${d} AND sequence > ${s}))",
                d = date_param,
                s = date_param + 1
            ));
            position.sequence
        });
        let limit_param = dates.len() + 2 + usize::from(after_sequence.is_some());
        sql.push_str(&format!(" ORDER BY posting_date, sequence LIMIT ${}", limit_param));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let entries = with_pool!(&self.pool, pool => {
            let mut query = sqlx::query(&sql).bind(scheme_id.to_string());
            for date in &dates {
                query = query.bind(date.clone());
            }
            if let Some(sequence) = after_sequence {
                query = query.bind(sequence);
            }
            load_entries!(pool, query.bind(limit))
        });
        Ok(entries)
    }

    async fn active_opening_entries(&self, scheme_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            "SELECT {} FROM entries e WHERE e.scheme_id = $1 AND e.reference_type = 'opening_balance' \
             AND NOT EXISTS (SELECT 1 FROM entries r WHERE r.reverses = e.id) \
             ORDER BY e.posting_date, e.sequence",
            ENTRY_COLUMNS
        );
        let entries = with_pool!(&self.pool, pool => {
            load_entries!(pool, sqlx::query(&sql).bind(scheme_id.to_string()))
        });
        Ok(entries)
    }

    async fn posting_totals(
        &self,
        scheme_id: Uuid,
        filter: PostingFilter,
        as_of: NaiveDate,
    ) -> Result<PostingTotals> {
        let (column, id) = match filter {
            PostingFilter::Account(id) => ("account_id", id),
            PostingFilter::Lot(id) => ("lot_id", id),
        };
        let sql = format!(
            "SELECT {} FROM postings p JOIN entries e ON e.id = p.entry_id \
             WHERE e.scheme_id = $1 AND e.posting_date <= $2 AND p.{} = $3",
            TOTALS_COLUMNS, column
        );
        with_pool!(&self.pool, pool => {
            let row = sqlx::query(&sql)
                .bind(scheme_id.to_string())
                .bind(date_text(as_of))
                .bind(id.to_string())
                .fetch_one(pool)
                .await
                .map_err(db_err)?;
            totals_from_row(&row)
        })
    }

    async fn account_totals(&self, scheme_id: Uuid, as_of: NaiveDate) -> Result<Vec<(Uuid, PostingTotals)>> {
        let sql = format!(
            "SELECT p.account_id AS account_id, {} FROM postings p JOIN entries e ON e.id = p.entry_id \
             WHERE e.scheme_id = $1 AND e.posting_date <= $2 GROUP BY p.account_id ORDER BY p.account_id",
            TOTALS_COLUMNS
        );
        with_pool!(&self.pool, pool => {
            sqlx::query(&sql)
                .bind(scheme_id.to_string())
                .bind(date_text(as_of))
                .fetch_all(pool)
                .await
                .map_err(db_err)?
                .iter()
                .map(|row| Ok((row.uuid("account_id")?, totals_from_row(row)?)))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(1, 3), "$1, $2, $3");
        assert_eq!(placeholders(2, 1), "$2");
    }

    #[test]
    fn test_date_text_sorts_lexically() {
        let early = date_text(NaiveDate::from_ymd_opt(2024, 2, 9).unwrap());
        let late = date_text(NaiveDate::from_ymd_opt(2024, 11, 1).unwrap());
        assert_eq!(early, "2024-02-09");
        assert!(early < late);
    }
}
