use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;
use weekly_orders_api::{
    ApiSettings, CheckReport, CheckRequest, CreateRequest, SeedDocument, WeeklyOrdersApi,
};
use weekly_orders_core::{CutoffPolicy, ExpectedOrder, DEFAULT_PAGE_SIZE};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "wo")]
#[command(about = "Weekly order reconciliation CLI")]
struct Cli {
    #[arg(long, default_value = "./weekly_orders.sqlite3")]
    db: PathBuf,

    /// Weekday of the cutoff, overriding the stored setting for this run.
    #[arg(long, global = true, requires = "cutoff_time")]
    cutoff_day: Option<String>,

    /// Time of day of the cutoff (HH:MM, UTC), overriding the stored setting for this run.
    #[arg(long, global = true, requires = "cutoff_day")]
    cutoff_time: Option<String>,

    #[arg(long, global = true, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Load catalog, clients and configuration history from a JSON document.
    Seed(SeedArgs),
    /// Report expected and missing orders for a delivery week.
    Check(CheckArgs),
    /// Create missing orders for a week, or from a saved check report.
    Create(CreateArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum SettingsCommand {
    /// Show the effective cutoff, or persist a new one.
    Cutoff(CutoffArgs),
}

#[derive(Debug, Args)]
struct CutoffArgs {
    #[arg(long, requires = "time")]
    day: Option<String>,
    #[arg(long, requires = "day")]
    time: Option<String>,
}

#[derive(Debug, Args)]
struct SeedArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long)]
    week_start: String,
    /// Restrict the run to these clients. Repeatable.
    #[arg(long = "client")]
    clients: Vec<String>,
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(long, required_unless_present = "missing_file", conflicts_with = "missing_file")]
    week_start: Option<String>,
    #[arg(long = "client", requires = "week_start")]
    client: Option<String>,
    /// A check report, or a bare JSON array of expected orders.
    #[arg(long)]
    missing_file: Option<PathBuf>,
    #[arg(long)]
    creation_id: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MissingFile {
    Orders(Vec<ExpectedOrder>),
    Report(Box<CheckReport>),
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Db { command } => run_db(command, &api(&cli)?),
        Command::Settings { command: SettingsCommand::Cutoff(args) } => {
            run_settings_cutoff(args, &api(&cli)?)
        }
        Command::Seed(args) => run_seed(args, &api(&cli)?),
        Command::Check(args) => run_check(args, &api(&cli)?),
        Command::Create(args) => run_create(args, &api(&cli)?),
    }
}

fn api(cli: &Cli) -> Result<WeeklyOrdersApi> {
    let cutoff = match (&cli.cutoff_day, &cli.cutoff_time) {
        (Some(day), Some(time_of_day)) => Some(CutoffPolicy::parse(day, time_of_day)?),
        _ => None,
    };
    Ok(WeeklyOrdersApi::with_settings(
        cli.db.clone(),
        ApiSettings { cutoff, page_size: cli.page_size },
    ))
}

fn run_db(command: &DbCommand, api: &WeeklyOrdersApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(api),
        DbCommand::Migrate(args) => run_db_migrate(args, api),
        DbCommand::IntegrityCheck => run_db_integrity_check(api),
    }
}

fn run_db_schema_version(api: &WeeklyOrdersApi) -> Result<()> {
    let status = api.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, api: &WeeklyOrdersApi) -> Result<()> {
    let result = api.migrate(args.dry_run)?;
    emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
}

fn run_db_integrity_check(api: &WeeklyOrdersApi) -> Result<()> {
    let report = api.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_settings_cutoff(args: &CutoffArgs, api: &WeeklyOrdersApi) -> Result<()> {
    let settings = match (&args.day, &args.time) {
        (Some(day), Some(time_of_day)) => api.set_cutoff(day, time_of_day)?,
        _ => api.cutoff_settings()?,
    };
    emit_json(serde_json::to_value(&settings).context("failed to serialize cutoff settings")?)
}

fn run_seed(args: &SeedArgs, api: &WeeklyOrdersApi) -> Result<()> {
    tracing::debug!(path = %args.file.display(), "loading seed document");
    let document: SeedDocument = read_json(&args.file)?;
    let result = api.seed(&document)?;
    emit_json(serde_json::to_value(result).context("failed to serialize seed result")?)
}

fn run_check(args: &CheckArgs, api: &WeeklyOrdersApi) -> Result<()> {
    let request = CheckRequest {
        week_start: args.week_start.clone(),
        client_ids: (!args.clients.is_empty()).then(|| args.clients.clone()),
    };
    let report = api.check(&request)?;
    emit_json(serde_json::to_value(&report).context("failed to serialize check report")?)
}

fn run_create(args: &CreateArgs, api: &WeeklyOrdersApi) -> Result<()> {
    let request = match (&args.missing_file, &args.week_start) {
        (Some(path), _) => {
            let missing = match read_json::<MissingFile>(path)? {
                MissingFile::Orders(orders) => orders,
                MissingFile::Report(report) => report.missing_orders(),
            };
            CreateRequest::Direct { missing, creation_id: args.creation_id }
        }
        (None, Some(week_start)) => CreateRequest::Recompute {
            week_start: week_start.clone(),
            client_id: args.client.clone(),
            creation_id: args.creation_id,
        },
        (None, None) => anyhow::bail!("either --week-start or --missing-file is required"),
    };
    let report = api.create(&request)?;
    emit_json(serde_json::to_value(&report).context("failed to serialize create report")?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("failed to parse {}", path.display()))
}
