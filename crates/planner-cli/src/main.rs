use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use planner_api::{JwtAuthenticator, PlannerApi, DEFAULT_TOKEN_TTL_SECS};
use planner_core::{OwnerId, RecordKind};
use serde_json::{Map, Value};

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "pl")]
#[command(about = "Planner admin CLI")]
struct Cli {
    #[arg(long, env = "PLANNER_DB", default_value = "./planner.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
    Record {
        #[command(subcommand)]
        command: Box<RecordCommand>,
    },
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
enum TokenCommand {
    Issue(TokenIssueArgs),
}

#[derive(Debug, Args)]
struct TokenIssueArgs {
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    user_name: Option<String>,
    #[arg(long, env = "PLANNER_JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS)]
    ttl_secs: u64,
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    Create(RecordWriteArgs),
    List(RecordListArgs),
    Get(RecordTargetArgs),
    Update(RecordUpdateArgs),
    Delete(RecordTargetArgs),
    /// Toggle a goal, or mark a todo complete.
    Complete(RecordTargetArgs),
}

#[derive(Debug, Args)]
struct Scope {
    #[arg(long)]
    owner: String,
    #[arg(long, value_enum)]
    kind: KindArg,
}

#[derive(Debug, Args)]
struct RecordWriteArgs {
    #[command(flatten)]
    scope: Scope,
    /// Record fields as a JSON object, using the HTTP field names.
    #[arg(long)]
    json: String,
}

#[derive(Debug, Args)]
struct RecordListArgs {
    #[command(flatten)]
    scope: Scope,
    /// Only records whose schedule covers this day (`YYYY-MM-DD`) or instant.
    #[arg(long)]
    date: Option<String>,
}

#[derive(Debug, Args)]
struct RecordTargetArgs {
    #[command(flatten)]
    scope: Scope,
    #[arg(long)]
    id: String,
}

#[derive(Debug, Args)]
struct RecordUpdateArgs {
    #[command(flatten)]
    target: RecordTargetArgs,
    #[arg(long)]
    json: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Goal,
    Event,
    Todo,
}

impl From<KindArg> for RecordKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Goal => Self::Goal,
            KindArg::Event => Self::Event,
            KindArg::Todo => Self::Todo,
        }
    }
}

impl Scope {
    fn parts(&self) -> (OwnerId, RecordKind) {
        (OwnerId::new(self.owner.clone()), self.kind.into())
    }
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
    let cli = Cli::parse();
    let api = PlannerApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Token { command } => run_token(command),
        Command::Record { command } => run_record(*command, &api),
    }
}

fn run_db(command: DbCommand, api: &PlannerApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(api),
        DbCommand::Migrate(args) => run_db_migrate(&args, api),
        DbCommand::IntegrityCheck => run_db_integrity_check(api),
    }
}

fn run_db_schema_version(api: &PlannerApi) -> Result<()> {
    let status = api.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty(),
        "inferred_from_legacy": status.inferred_from_legacy
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, api: &PlannerApi) -> Result<()> {
    let result = api.migrate(args.dry_run)?;
    emit_json(serde_json::to_value(&result).context("failed to serialize migration result")?)
}

fn run_db_integrity_check(api: &PlannerApi) -> Result<()> {
    let report = api.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_token(command: TokenCommand) -> Result<()> {
    match command {
        TokenCommand::Issue(args) => {
            let auth = JwtAuthenticator::new(args.jwt_secret, args.ttl_secs)?;
            let token = auth.issue(&args.user_id, args.user_name.as_deref())?;
            emit_json(serde_json::json!({
                "user_id": args.user_id,
                "expires_in_secs": args.ttl_secs,
                "token": token
            }))
        }
    }
}

fn run_record(command: RecordCommand, api: &PlannerApi) -> Result<()> {
    let value = match command {
        RecordCommand::Create(args) => {
            let (owner_id, kind) = args.scope.parts();
            let payload = parse_payload(&args.json)?;
            serde_json::to_value(api.create(&owner_id, kind, &payload, None)?)?
        }
        RecordCommand::List(args) => {
            let (owner_id, kind) = args.scope.parts();
            let records = match args.date.as_deref() {
                Some(date) => api.list_on(&owner_id, kind, date)?,
                None => api.list(&owner_id, kind)?,
            };
            serde_json::json!({ "kind": kind.as_str(), "count": records.len(), "records": records })
        }
        RecordCommand::Get(args) => {
            let (owner_id, kind) = args.scope.parts();
            serde_json::to_value(api.get(&owner_id, kind, &args.id)?)?
        }
        RecordCommand::Update(args) => {
            let (owner_id, kind) = args.target.scope.parts();
            let payload = parse_payload(&args.json)?;
            serde_json::to_value(api.update(&owner_id, kind, &args.target.id, &payload, None)?)?
        }
        RecordCommand::Delete(args) => {
            let (owner_id, kind) = args.scope.parts();
            serde_json::to_value(api.delete(&owner_id, kind, &args.id)?)?
        }
        RecordCommand::Complete(args) => {
            let (owner_id, kind) = args.scope.parts();
            let change = if kind == RecordKind::Todo {
                api.set_complete(&owner_id, kind, &args.id)?
            } else {
                api.toggle_completion(&owner_id, kind, &args.id)?
            };
            serde_json::to_value(change)?
        }
    };
    emit_json(value)
}

fn parse_payload(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("--json must be valid JSON")? {
        Value::Object(payload) => Ok(payload),
        other => Err(anyhow!("--json must be a JSON object, got {other}")),
    }
}
