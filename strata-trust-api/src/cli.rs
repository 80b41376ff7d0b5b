//! `strata-trust` operator command line

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use futures::TryStreamExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use strata_trust::models::{
    AccountScope, AccountType, ApplyOpeningBalances, DateRange, FinancialYearEnd, LotOpeningBalance, PostEntry,
    SchemeMetadata, UpsertAccount,
};
use strata_trust::{TrustRepository, TrustServices};

use crate::config::{AppConfig, LogFormat};
use crate::database::{initialize_database, SqlTrustRepository};

#[derive(Parser, Debug)]
#[command(name = "strata-trust")]
#[command(about = "Strata trust accounting ledger")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL override
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Log output format (pretty or json)
    #[arg(long, global = true, env = "LOG_FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl Cli {
    /// Apply command line overrides on top of the environment configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(url) = &self.database_url {
            config.database.database_url = url.clone();
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create or upgrade the database schema
    Migrate,
    /// Organisation operations
    Org {
        #[command(subcommand)]
        action: OrgCommands,
    },
    /// Scheme operations
    Scheme {
        #[command(subcommand)]
        action: SchemeCommands,
    },
    /// Lot and ownership operations
    Lot {
        #[command(subcommand)]
        action: LotCommands,
    },
    /// Chart of accounts
    Account {
        #[command(subcommand)]
        action: AccountCommands,
    },
    /// Journal entries
    Entry {
        #[command(subcommand)]
        action: EntryCommands,
    },
    /// Opening balance import
    OpeningBalances {
        #[command(subcommand)]
        action: OpeningBalanceCommands,
    },
    /// Balance projections
    Balance {
        #[command(subcommand)]
        action: BalanceCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum OrgCommands {
    /// Create an organisation
    Create {
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SchemeCommands {
    /// Create a scheme
    Create {
        #[arg(long)]
        organisation: Uuid,
        #[arg(long)]
        name: String,
        /// Financial year end as MM-DD
        #[arg(long, default_value = "06-30")]
        financial_year_end: FinancialYearEnd,
    },
    /// Update scheme metadata
    Update {
        scheme: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        financial_year_end: Option<FinancialYearEnd>,
    },
    /// Show a scheme
    Show { scheme: Uuid },
}

#[derive(Subcommand, Debug)]
pub enum LotCommands {
    /// Create a lot
    Create {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        number: String,
    },
    /// List lots of a scheme
    List {
        #[arg(long)]
        scheme: Uuid,
    },
    /// Show the current owner of a lot
    Owner {
        #[arg(long)]
        lot: Uuid,
    },
    /// Record a new owner, closing the current ownership
    Transfer {
        #[arg(long)]
        lot: Uuid,
        #[arg(long)]
        owner: String,
        #[arg(long)]
        start: NaiveDate,
    },
}

#[derive(Subcommand, Debug)]
pub enum AccountCommands {
    /// Create or update an account
    Upsert {
        /// Existing account id; omit to create
        #[arg(long)]
        id: Option<Uuid>,
        /// org:<uuid> or scheme:<uuid>
        #[arg(long)]
        scope: AccountScope,
        #[arg(long)]
        code: String,
        #[arg(long)]
        name: String,
        #[arg(long = "type")]
        account_type: AccountType,
        #[arg(long)]
        inactive: bool,
    },
    /// List accounts
    List(AccountListArgs),
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct AccountListArgs {
    /// Active accounts visible to a scheme
    #[arg(long)]
    pub scheme: Option<Uuid>,
    /// Every default account of an organisation
    #[arg(long)]
    pub organisation: Option<Uuid>,
}

#[derive(Subcommand, Debug)]
pub enum EntryCommands {
    /// Post an entry read from a JSON file
    Post {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        file: PathBuf,
    },
    /// Reverse an entry
    Reverse {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        entry: Uuid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        reason: String,
    },
    /// Stream entries as JSON lines
    List {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
    },
}

#[derive(Subcommand, Debug)]
pub enum OpeningBalanceCommands {
    /// Report whether opening balances are applied
    Status {
        #[arg(long)]
        scheme: Uuid,
    },
    /// Apply opening balances from a `lot_id,balance` CSV file
    Apply {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        file: PathBuf,
        /// Replace balances that are already applied
        #[arg(long)]
        reseed: bool,
    },
    /// Reverse every applied opening balance
    Clear {
        #[arg(long)]
        scheme: Uuid,
    },
    /// List applied opening balances
    Records {
        #[arg(long)]
        scheme: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum BalanceCommands {
    /// Balance of one account
    Account {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        account: Uuid,
        /// Defaults to today
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Balance owed by a lot
    Lot {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        lot: Uuid,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Trial balance of a scheme
    Trial {
        #[arg(long)]
        scheme: Uuid,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
}

#[derive(Deserialize)]
struct BalanceRow {
    lot_id: Uuid,
    balance: String,
}

/// Parse a `lot_id,balance` CSV with a header row; balances keep their exact decimal text
pub fn read_opening_balances<R: Read>(reader: R) -> Result<Vec<LotOpeningBalance>> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut balances = Vec::new();
    for (i, record) in reader.deserialize::<BalanceRow>().enumerate() {
        let row = i + 1;
        let record = record.with_context(|| format!("Invalid opening balance on CSV row {}", row))?;
        let balance = Decimal::from_str(&record.balance)
            .with_context(|| format!("Invalid balance '{}' on CSV row {}", record.balance, row))?;
        balances.push(LotOpeningBalance {
            lot_id: record.lot_id,
            balance,
        });
    }
    Ok(balances)
}

fn read_entry_file(path: &Path) -> Result<PostEntry> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid entry JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Execute one command against the configured database
pub async fn run(cli: Cli, config: AppConfig) -> Result<()> {
    let pool = initialize_database(&config.database)
        .await
        .context("Failed to open the database")?;

    if let Commands::Migrate = cli.command {
        pool.health_check().await?;
        info!(backend = pool.backend(), "Database schema is up to date");
        return print_json(&serde_json::json!({ "status": "ok", "backend": pool.backend() }));
    }

    let repository: Arc<dyn TrustRepository> = Arc::new(SqlTrustRepository::new(pool));
    let services = TrustServices::new(repository, config.opening_accounts.clone());
    execute(&services, cli.command).await
}

/// Dispatch a command to the services
pub async fn execute(services: &TrustServices, command: Commands) -> Result<()> {
    match command {
        Commands::Migrate => Ok(()),
        Commands::Org { action } => match action {
            OrgCommands::Create { name } => print_json(&services.directory.create_organisation(&name).await?),
        },
        Commands::Scheme { action } => match action {
            SchemeCommands::Create {
                organisation,
                name,
                financial_year_end,
            } => print_json(
                &services
                    .directory
                    .create_scheme(organisation, &name, financial_year_end)
                    .await?,
            ),
            SchemeCommands::Update {
                scheme,
                name,
                financial_year_end,
            } => print_json(
                &services
                    .directory
                    .update_scheme_metadata(scheme, SchemeMetadata { name, financial_year_end })
                    .await?,
            ),
            SchemeCommands::Show { scheme } => print_json(&services.directory.get_scheme(scheme).await?),
        },
        Commands::Lot { action } => match action {
            LotCommands::Create { scheme, number } => print_json(&services.directory.create_lot(scheme, &number).await?),
            LotCommands::List { scheme } => print_json(&services.directory.list_lots(scheme).await?),
            LotCommands::Owner { lot } => print_json(&services.directory.current_owner(lot).await?),
            LotCommands::Transfer { lot, owner, start } => {
                print_json(&services.directory.record_ownership(lot, &owner, start).await?)
            }
        },
        Commands::Account { action } => match action {
            AccountCommands::Upsert {
                id,
                scope,
                code,
                name,
                account_type,
                inactive,
            } => print_json(
                &services
                    .accounts
                    .upsert_account(UpsertAccount {
                        id,
                        scope,
                        code,
                        name,
                        account_type,
                        is_active: !inactive,
                    })
                    .await?,
            ),
            AccountCommands::List(AccountListArgs { scheme, organisation }) => match (scheme, organisation) {
                (Some(scheme), _) => print_json(&services.accounts.list_active_accounts(scheme).await?),
                (None, Some(organisation)) => {
                    print_json(&services.accounts.list_organisation_defaults(organisation).await?)
                }
                (None, None) => anyhow::bail!("Pass --scheme or --organisation"),
            },
        },
        Commands::Entry { action } => match action {
            EntryCommands::Post { scheme, file } => {
                let entry = read_entry_file(&file)?;
                let id = services.ledger.post_entry(scheme, entry).await?;
                print_json(&services.ledger.get_entry(scheme, id).await?)
            }
            EntryCommands::Reverse {
                scheme,
                entry,
                date,
                reason,
            } => {
                let id = services.ledger.reverse_entry(scheme, entry, date, &reason).await?;
                print_json(&services.ledger.get_entry(scheme, id).await?)
            }
            EntryCommands::List { scheme, from, to } => {
                let mut entries = services.ledger.entries(scheme, DateRange { from, to }).await?;
                let mut stdout = io::stdout();
                while let Some(entry) = entries.try_next().await? {
                    serde_json::to_writer(&mut stdout, &entry)?;
                    writeln!(stdout)?;
                }
                Ok(())
            }
        },
        Commands::OpeningBalances { action } => match action {
            OpeningBalanceCommands::Status { scheme } => {
                print_json(&services.opening_balances.check_status(scheme).await?)
            }
            OpeningBalanceCommands::Apply {
                scheme,
                date,
                file,
                reseed,
            } => {
                let csv = std::fs::File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?;
                let request = ApplyOpeningBalances {
                    posting_date: date,
                    balances: read_opening_balances(csv)?,
                    reseed,
                };
                let ids = services.opening_balances.apply_opening_balances(scheme, request).await?;
                print_json(&serde_json::json!({ "applied": ids.len(), "entry_ids": ids }))
            }
            OpeningBalanceCommands::Clear { scheme } => {
                let ids = services.opening_balances.clear_opening_balances(scheme).await?;
                print_json(&serde_json::json!({ "reversed": ids.len(), "reversal_ids": ids }))
            }
            OpeningBalanceCommands::Records { scheme } => {
                print_json(&services.opening_balances.opening_balance_records(scheme).await?)
            }
        },
        Commands::Balance { action } => match action {
            BalanceCommands::Account { scheme, account, as_of } => print_json(
                &services
                    .balances
                    .get_account_balance(scheme, account, as_of.unwrap_or_else(today))
                    .await?,
            ),
            BalanceCommands::Lot { scheme, lot, as_of } => print_json(
                &services
                    .balances
                    .get_lot_balance(scheme, lot, as_of.unwrap_or_else(today))
                    .await?,
            ),
            BalanceCommands::Trial { scheme, as_of } => {
                print_json(&services.balances.trial_balance(scheme, as_of.unwrap_or_else(today)).await?)
            }
        },
    }
}
