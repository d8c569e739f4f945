//! `flowcalc` CLI entry-point.
//!
//! Available sub-commands:
//! - `migrate`: create or upgrade the database schema.
//! - `validate`: validate a workflow JSON file.
//! - `eval`: evaluate one expression with a chosen engine.
//! - `trigger`: store a workflow, create a record, and print the jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine::{builtin_registry, save_workflow, EngineSettings, TriggerDispatcher, Workflow, WorkflowExecutor};
use expression::EngineRegistry;
use nodes::{CalculationInstruction, CalculationMode};

#[derive(Parser)]
#[command(
    name = "flowcalc",
    about = "Workflow engine with template-driven calculation nodes",
    version
)]
struct Cli {
    /// Engine settings file (TOML).
    #[arg(long, global = true, env = "FLOWCALC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run pending database migrations.
    Migrate {
        /// Overrides `database_url` from the settings file.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Evaluate an expression. Placeholders resolve against `--scope`.
    Eval {
        #[arg(long, default_value = "math.js")]
        engine: String,
        expression: String,
        /// JSON object placeholders are resolved against.
        #[arg(long, default_value = "{}")]
        scope: String,
    },
    /// Store a workflow, create a record in a collection, print the executions.
    Trigger {
        #[arg(long)]
        workflow: PathBuf,
        #[arg(long)]
        collection: String,
        /// Record data as a JSON object.
        #[arg(long, default_value = "{}")]
        values: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = match &cli.config {
        Some(path) => EngineSettings::from_file(path)?,
        None => EngineSettings::default(),
    };

    match cli.command {
        Command::Migrate { database_url } => {
            if let Some(url) = database_url {
                settings.database_url = url;
            }
            info!("Running migrations against {}", settings.database_url);
            let pool = db::create_pool(&settings.database_url, settings.max_connections).await?;
            db::run_migrations(&pool).await?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let workflow = read_workflow(&path)?;
            match engine::validate_dag(&workflow) {
                Ok(order) => println!("Workflow is valid. Execution order: {order:?}"),
                Err(e) => bail!("validation failed: {e}"),
            }
        }
        Command::Eval { engine, expression, scope } => {
            let scope = parse_json(&scope, "--scope")?;
            let calculator = CalculationInstruction::new(Arc::new(EngineRegistry::with_builtins()));
            let mode = CalculationMode::Static { engine, expression };
            let value = calculator.calculate(&mode, &scope)?;
            println!("{value}");
        }
        Command::Trigger { workflow, collection, values, database_url } => {
            if let Some(url) = database_url {
                settings.database_url = url;
            }
            let workflow = read_workflow(&workflow)?;
            let values = parse_json(&values, "--values")?;

            let pool = db::create_pool(&settings.database_url, settings.max_connections).await?;
            db::run_migrations(&pool).await?;
            save_workflow(&pool, &workflow).await?;

            let registry = builtin_registry(&pool, Arc::new(EngineRegistry::with_builtins()));
            let executor = WorkflowExecutor::new(pool, registry, settings.executor_config())
                .with_system(settings.system_vars());
            let dispatcher = TriggerDispatcher::new(Arc::new(executor));

            let outcome = dispatcher.create_record(&collection, &values).await?;
            if outcome.executions.is_empty() {
                info!("no workflow fired on '{collection}'");
            }
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    Ok(())
}

fn read_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn parse_json(source: &str, flag: &str) -> Result<Value> {
    serde_json::from_str(source).with_context(|| format!("{flag} is not valid JSON"))
}
