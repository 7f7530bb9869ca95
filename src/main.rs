use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ledgerflow_config::Settings;
use ledgerflow_engine::workflow_report;
use ledgerflow_store::SqliteStore;
use ledgerflow_workflow::StepConfig;

/// Ledgerflow - transactional workflows across chains
#[derive(Parser)]
#[command(name = "ledgerflow")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the settings file (JSON)
  #[arg(long, global = true)]
  settings: Option<PathBuf>,

  /// SQLite database URL (default: settings file, then ~/.ledgerflow/ledgerflow.db)
  #[arg(long, global = true)]
  database_url: Option<String>,

  /// Log at debug level unless RUST_LOG is set
  #[arg(long, global = true)]
  debug: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Compile every workflow in the settings file and report problems
  Validate,

  /// Create the database if needed and apply migrations
  Migrate,

  /// Print a workflow's status and step log as JSON
  Status {
    /// The workflow ID
    workflow_id: String,
  },
}

fn init_tracing(debug: bool) {
  let default = if debug { "debug" } else { "info" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::registry()
    .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
    .with(filter)
    .init();
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(cli.debug);

  let Some(command) = cli.command else {
    println!("ledgerflow - use --help to see available commands");
    return Ok(());
  };

  let settings = cli.settings.as_deref().map(load_settings).transpose()?;
  let rt = tokio::runtime::Runtime::new()?;

  match command {
    Commands::Validate => {
      let settings = settings.context("validate needs --settings")?;
      validate(&settings)
    }
    Commands::Migrate => {
      let url = database_url(cli.database_url, settings.as_ref())?;
      rt.block_on(migrate(&url))
    }
    Commands::Status { workflow_id } => {
      let url = database_url(cli.database_url, settings.as_ref())?;
      rt.block_on(status(&url, &workflow_id))
    }
  }
}

fn load_settings(path: &Path) -> Result<Settings> {
  let content = std::fs::read_to_string(path)
    .with_context(|| format!("failed to read settings file: {}", path.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse settings file: {}", path.display()))
}

fn database_url(flag: Option<String>, settings: Option<&Settings>) -> Result<String> {
  if let Some(url) = flag.or_else(|| settings.and_then(|s| s.database_url.clone())) {
    return Ok(url);
  }
  let data_dir = dirs::home_dir()
    .context("could not determine home directory")?
    .join(".ledgerflow");
  std::fs::create_dir_all(&data_dir)
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
  Ok(format!("sqlite://{}", data_dir.join("ledgerflow.db").display()))
}

fn validate(settings: &Settings) -> Result<()> {
  let mut chain_ids: Vec<u64> = settings.chains.iter().map(|chain| chain.chain_id).collect();
  chain_ids.sort_unstable();
  if let Some(pair) = chain_ids.windows(2).find(|pair| pair[0] == pair[1]) {
    bail!("chain {} is configured twice", pair[0]);
  }
  for chain in &settings.chains {
    info!(
      chain_id = chain.chain_id,
      kind = ?chain.kind,
      finality_depth = chain.finality_depth(),
      "chain_configured"
    );
  }

  let config =
    StepConfig::new(settings.workflows.clone()).context("workflow definitions are invalid")?;
  for graph in config.iter() {
    info!(
      workflow_kind = %graph.kind(),
      init_step = %graph.init_step(),
      steps = graph.kinds().count(),
      "workflow_valid"
    );
  }
  println!(
    "{} workflow(s) and {} chain(s) valid",
    settings.workflows.len(),
    settings.chains.len()
  );
  Ok(())
}

async fn migrate(database_url: &str) -> Result<()> {
  let store = SqliteStore::connect(database_url)
    .await
    .with_context(|| format!("failed to open database: {database_url}"))?;
  store.migrate().await.context("failed to apply migrations")?;
  info!(database_url, "migrations_applied");
  Ok(())
}

async fn status(database_url: &str, workflow_id: &str) -> Result<()> {
  let store = SqliteStore::connect(database_url)
    .await
    .with_context(|| format!("failed to open database: {database_url}"))?;
  let report = workflow_report(&store, workflow_id)
    .await
    .with_context(|| format!("failed to load workflow {workflow_id}"))?;
  println!("{}", serde_json::to_string_pretty(&report)?);
  Ok(())
}
