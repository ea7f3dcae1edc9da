// crates/layercli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use layercore::{NodeSpec, WorkflowDefinition, WorkflowEvent};
use layerruntime::{ExecutionPlan, ExecutorRegistry, LayerRuntime, RuntimeConfig};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "layer")]
#[command(about = "Layered workflow runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Events buffered per subscriber before it starts lagging
        #[arg(long)]
        buffer: Option<usize>,
    },

    /// Validate a workflow file and print its layers
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            verbose,
            buffer,
        } => {
            init_tracing(verbose);
            run_workflow(file, buffer).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise info, or debug with `--verbose`
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

fn builtin_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    layernodes::register_all(&mut registry);
    registry
}

fn load(file: &Path) -> Result<WorkflowDefinition> {
    WorkflowDefinition::from_file(file)
        .with_context(|| format!("Could not load workflow from {}", file.display()))
}

async fn run_workflow(file: PathBuf, buffer: Option<usize>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let workflow = load(&file)?;

    println!("📋 Workflow: {}", workflow.name.as_deref().unwrap_or(&workflow.id));
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!();

    let mut config = RuntimeConfig::from_env();
    if let Some(size) = buffer {
        config.event_buffer_size = size.max(1);
    }
    tracing::debug!("Runtime config: {:?}", config);
    let runtime = LayerRuntime::with_registry(builtin_registry(), config);

    // Subscribe before starting so the first status update is not missed
    let mut events = runtime.subscribe(&workflow.id);
    let receipt = runtime.start_definition(&workflow)?;
    println!(
        "▶️  Workflow {} started (generation {})",
        receipt.workflow_id, receipt.generation
    );

    let outcome = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            Ok(()) = tokio::signal::ctrl_c() => {
                println!("⏹  Interrupted, cancelling...");
                runtime.cancel(&workflow.id);
                continue;
            }
        };

        let Some(event) = event else {
            bail!("Event stream closed before the workflow finished");
        };
        print_event(&event);
        if event.is_terminal() {
            break event;
        }
    };

    match outcome {
        WorkflowEvent::WorkflowExecutionCompleted { .. } => Ok(()),
        WorkflowEvent::WorkflowExecutionError { error, .. } => bail!("Workflow failed: {error}"),
        WorkflowEvent::WorkflowExecutionCancelled { .. } => bail!("Workflow was cancelled"),
        other => bail!("Unexpected final event: {}", other.name()),
    }
}

fn print_event(event: &WorkflowEvent) {
    match event {
        WorkflowEvent::NodeStatusUpdate { node_statuses } => {
            let summary: Vec<String> = node_statuses
                .iter()
                .map(|(id, status)| format!("{id}={}", status_label(*status)))
                .collect();
            println!("  🔄 {}", summary.join(" "));
        }
        WorkflowEvent::WorkflowExecutionProgress {
            current_layer,
            nodes_completed,
            results,
        } => {
            println!(
                "  ✅ Layer {} done: {}",
                current_layer + 1,
                nodes_completed.join(", ")
            );
            for result in results.values() {
                println!(
                    "     {} ({}ms): {}",
                    result.node_id, result.execution_time_ms, result.output
                );
            }
        }
        WorkflowEvent::WorkflowExecutionCompleted { results, .. } => {
            println!("✨ Workflow completed successfully");
            println!();
            println!("📤 Outputs:");
            for (node_id, result) in results {
                println!("   {}: {}", node_id, result.output);
            }
        }
        WorkflowEvent::WorkflowExecutionError {
            error, cancelled, ..
        } => {
            if *cancelled {
                println!("⚠️  {}", error);
            } else {
                println!("💥 {}", error);
            }
        }
        WorkflowEvent::WorkflowExecutionCancelled { generation } => {
            println!("⏹  Generation {} cancelled", generation);
        }
    }
}

fn status_label(status: layercore::NodeStatus) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{status:?}"))
}

fn validate_workflow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());
    let workflow = load(&file)?;

    let plan = ExecutionPlan::new(workflow.nodes.clone(), workflow.edges.clone())
        .context("Workflow graph is invalid")?;

    println!("✅ Workflow is valid:");
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Edges: {}", workflow.edges.len());
    println!("   Layers:");
    for (idx, layer) in plan.layers.iter().enumerate() {
        println!("     {}: {}", idx + 1, layer.join(", "));
    }

    let registry = builtin_registry();
    for node in &workflow.nodes {
        if !registry.contains(&node.node_type) {
            println!(
                "⚠️  Node {} uses unknown type {}; it will fail at run time",
                node.id, node.node_type
            );
        }
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = builtin_registry();
    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let mut workflow = WorkflowDefinition::new("example").with_name("Parallel delays");
    workflow.description = Some("Two delays run side by side, then a debug node reports".to_string());

    let short = workflow.add_node(NodeSpec::new("short", "time.delay").with_config("delay_ms", 2000));
    let long = workflow.add_node(NodeSpec::new("long", "time.delay").with_config("delay_ms", 3000));
    let report = workflow.add_node(
        NodeSpec::new("report", "debug.log").with_config("message", "both delays finished"),
    );

    workflow.connect(short, report.clone());
    workflow.connect(long, report);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  layer run --file {}", output.display());

    Ok(())
}
