mod definition;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use lattix_core::config::AppConfig;
use lattix_core::event::{EngineEvent, EventBus};
use lattix_core::traits::ExecutionStore;
use lattix_engine::{EchoInvoker, Orchestrator, WorkflowBuilder};
use lattix_store::SqliteStore;

#[derive(Parser)]
#[command(name = "lattix", version, about = "DAG workflow orchestration for multi-agent pipelines")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "lattix.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow definition and print its execution order
    Validate {
        /// Workflow definition file (TOML)
        #[arg(short, long)]
        workflow: PathBuf,
    },
    /// Run a workflow definition to completion
    Run {
        /// Workflow definition file (TOML)
        #[arg(short, long)]
        workflow: PathBuf,
        /// Initial input as JSON; plain text becomes {"message": ...}
        #[arg(short, long)]
        input: Option<String>,
        /// Database path, overriding the configured one
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Send one message to an agent from a workflow definition
    Chat {
        /// Workflow definition file (TOML)
        #[arg(short, long)]
        workflow: PathBuf,
        /// Agent name as defined in the file
        #[arg(short, long)]
        agent: String,
        /// Message text
        #[arg(short, long)]
        message: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LATTIX_LOG")
                .unwrap_or_else(|_| EnvFilter::new("lattix=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)?;

    match cli.command {
        Commands::Validate { workflow } => validate(&workflow).await,
        Commands::Run {
            workflow,
            input,
            db,
        } => run(&config, &workflow, input, db).await,
        Commands::Chat {
            workflow,
            agent,
            message,
        } => chat(&config, &workflow, &agent, &message).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// Seed the definition into an in-memory store and run the pre-flight.
async fn validate(workflow_file: &Path) -> anyhow::Result<()> {
    let def = definition::load(workflow_file)?;
    let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::in_memory()?);
    let seeded = definition::seed(&def, store.clone()).await?;

    let builder = WorkflowBuilder::new(store);
    let order = builder
        .execution_order(seeded.workflow.id)
        .await
        .with_context(|| format!("workflow '{}' is invalid", seeded.workflow.name))?;

    println!("workflow '{}' is valid", seeded.workflow.name);
    println!("execution order:");
    for (index, node_id) in order.iter().enumerate() {
        let name = seeded.node_name(*node_id).unwrap_or("?");
        println!("  {}. {}", index + 1, name);
    }
    Ok(())
}

/// Seed, execute, and stream progress until the run reaches a terminal
/// state.
async fn run(
    config: &AppConfig,
    workflow_file: &Path,
    input: Option<String>,
    db: Option<PathBuf>,
) -> anyhow::Result<()> {
    let def = definition::load(workflow_file)?;
    let db_path = db.unwrap_or_else(|| PathBuf::from(&config.store.path));
    let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::open(&db_path)?);
    info!(db = %db_path.display(), "store opened");
    let seeded = definition::seed(&def, store.clone()).await?;
    info!(workflow = %seeded.workflow.name, nodes = seeded.nodes.len(), "workflow seeded");

    let initial_input: Value = match input {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|_| json!({ "message": raw })),
        None => json!({ "message": format!("Run workflow '{}'", seeded.workflow.name) }),
    };

    let bus = Arc::new(EventBus::default());
    let mut events = bus.subscribe();
    let orchestrator = Orchestrator::new(
        config.engine.clone(),
        store,
        Arc::new(EchoInvoker),
        bus.clone(),
    );

    let execution_id = orchestrator
        .start_execution(seeded.workflow.id, initial_input)
        .await?;
    println!("execution {} queued", execution_id);

    while let Ok(event) = events.recv().await {
        match event {
            EngineEvent::NodeStarted {
                execution_id: id,
                node_id,
                kind,
            } if id == execution_id => {
                println!("  -> {} ({})", seeded.node_name(node_id).unwrap_or("?"), kind);
            }
            EngineEvent::NodeCompleted {
                execution_id: id,
                delegations,
                ..
            } if id == execution_id && delegations > 0 => {
                println!("     {} delegation(s)", delegations);
            }
            EngineEvent::NodeFailed {
                execution_id: id,
                error,
                ..
            } if id == execution_id => {
                println!("     failed: {}", error);
            }
            EngineEvent::ExecutionCompleted { execution_id: id }
            | EngineEvent::ExecutionFailed {
                execution_id: id, ..
            } if id == execution_id => break,
            _ => {}
        }
    }

    let execution = orchestrator.execution_status(execution_id).await?;
    println!("status: {}", execution.status);
    if let Some(output) = &execution.final_output {
        println!("final output:\n{}", serde_json::to_string_pretty(output)?);
    }
    if let Some(error) = &execution.error_message {
        println!("error: {}", error);
    }

    let logs = orchestrator.execution_logs(execution_id).await?;
    println!("node visits: {}", logs.len());
    for log in &logs {
        let name = seeded.node_name(log.node_id).unwrap_or("?");
        let outcome = if log.error_message.is_some() {
            "failed"
        } else {
            "ok"
        };
        let delegated = if log.delegated { ", delegated" } else { "" };
        println!("  [{}] {} ({}{})", log.id, name, outcome, delegated);
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Direct agent invocation against a definition, no execution row.
async fn chat(
    config: &AppConfig,
    workflow_file: &Path,
    agent_name: &str,
    message: &str,
) -> anyhow::Result<()> {
    let def = definition::load(workflow_file)?;
    let store: Arc<dyn ExecutionStore> = Arc::new(SqliteStore::in_memory()?);
    let seeded = definition::seed(&def, store.clone()).await?;

    let agent = seeded.agents.get(agent_name).with_context(|| {
        format!(
            "agent '{}' is not defined in {}",
            agent_name,
            workflow_file.display()
        )
    })?;

    let orchestrator = Orchestrator::new(
        config.engine.clone(),
        store,
        Arc::new(EchoInvoker),
        Arc::new(EventBus::default()),
    );
    let reply = orchestrator.invoke_agent(agent.id, message).await?;

    println!("[correlation {}]", reply.correlation_id);
    println!("{}: {}", reply.agent_name, reply.reply.text);
    for event in &reply.delegations {
        println!(
            "  delegated to {} (depth {}): {}",
            event.delegate_name, event.depth, event.response
        );
    }

    orchestrator.shutdown().await;
    Ok(())
}
