use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use refuge_store::{
    ActivationId, ActorId, AuditLogApi, CreateFromTemplateInput, DatasetRegistryApi,
    DatasetTemplate, Id, LocationId, SnapshotApi, default_sqlite_path, load_or_init_config,
    open_store,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Init(args) => init_datastore(args).await,
        Command::ImportTemplate(args) => import_template(args).await,
        Command::Snapshot(args) => print_snapshot(args).await,
        Command::Audit(args) => print_audit(args).await,
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Developer utilities for the Refuge dataset engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the default config (if missing) and run migrations.
    Init(DatastoreArgs),
    /// Create a dataset with its fields and options from a template JSON file.
    ImportTemplate(ImportTemplateArgs),
    /// Print the spreadsheet view of a dataset as JSON.
    Snapshot(DatasetArgs),
    /// Print the audit trail of a dataset and everything it owns.
    Audit(AuditArgs),
}

#[derive(Parser)]
struct DatastoreArgs {
    /// Directory holding refuge.json and the sqlite file.
    #[arg(long, default_value = ".refuge")]
    datastore: PathBuf,
}

#[derive(Parser)]
struct ImportTemplateArgs {
    #[command(flatten)]
    store: DatastoreArgs,
    /// Path to the template JSON file.
    #[arg(long)]
    template: PathBuf,
    /// Activation (tenant) that owns the new dataset.
    #[arg(long)]
    activation: String,
    /// Location the dataset is created for.
    #[arg(long)]
    location: String,
    /// Numeric id of the acting user.
    #[arg(long, default_value_t = 0)]
    actor: i64,
}

#[derive(Parser)]
struct DatasetArgs {
    #[command(flatten)]
    store: DatastoreArgs,
    /// Dataset id (uuid or ulid).
    #[arg(long)]
    dataset: String,
}

#[derive(Parser)]
struct AuditArgs {
    #[command(flatten)]
    target: DatasetArgs,
    /// Maximum number of entries to print.
    #[arg(long)]
    limit: Option<u64>,
}

fn parse_id(raw: &str, what: &str) -> Result<Id> {
    Id::parse(raw).with_context(|| format!("invalid {what} id '{raw}'"))
}

async fn init_datastore(args: DatastoreArgs) -> Result<()> {
    let config = load_or_init_config(&args.datastore)
        .with_context(|| format!("load config in {}", args.datastore.display()))?;
    open_store(&args.datastore)
        .await
        .context("open datastore")?;
    if config.backend_name() == "sqlite" {
        println!(
            "datastore ready at {}",
            config
                .sqlite_path(&args.datastore)
                .unwrap_or_else(|_| default_sqlite_path(&args.datastore))
                .display()
        );
    } else {
        println!("datastore ready on {}", config.backend_name());
    }
    Ok(())
}

async fn import_template(args: ImportTemplateArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.template)
        .with_context(|| format!("read {}", args.template.display()))?;
    let template: DatasetTemplate = serde_json::from_str(&raw)
        .with_context(|| format!("parse {}", args.template.display()))?;
    let store = open_store(&args.store.datastore)
        .await
        .context("open datastore")?;
    let dataset = store
        .create_dataset_from_template(CreateFromTemplateInput {
            activation_id: ActivationId(parse_id(&args.activation, "activation")?),
            location_id: LocationId(parse_id(&args.location, "location")?),
            actor: ActorId(args.actor),
            template,
        })
        .await
        .context("create dataset from template")?;
    println!("{}", serde_json::to_string_pretty(&dataset)?);
    Ok(())
}

async fn print_snapshot(args: DatasetArgs) -> Result<()> {
    let dataset_id = parse_id(&args.dataset, "dataset")?;
    let store = open_store(&args.store.datastore)
        .await
        .context("open datastore")?;
    let snapshot = store
        .dataset_snapshot(dataset_id)
        .await
        .with_context(|| format!("snapshot dataset {dataset_id}"))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn print_audit(args: AuditArgs) -> Result<()> {
    let dataset_id = parse_id(&args.target.dataset, "dataset")?;
    let store = open_store(&args.target.store.datastore)
        .await
        .context("open datastore")?;
    let entries = store
        .list_dataset_audit(dataset_id, args.limit)
        .await
        .with_context(|| format!("audit dataset {dataset_id}"))?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}
