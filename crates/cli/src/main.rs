//! Taskloom CLI - workflow execution kernel front end.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use taskloom_core::{ContainerOverrides, RunStatus, WorkflowGraph, DEFAULT_PRIORITY};
use taskloom_decompose::detect_dependencies;
use taskloom_dispatch::DockerRuntime;
use taskloom_execution::{KernelConfig, WorkflowEngine};
use taskloom_safety::Rejection;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskloom")]
#[command(about = "Workflow execution kernel", long_about = None)]
struct Cli {
    /// Kernel config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Syntax and safety report for a code payload
    Check {
        /// Python source file
        file: PathBuf,
    },
    /// Runtime dependencies a code payload needs
    Deps {
        /// Python source file
        file: PathBuf,
    },
    /// Whether a step label routes to isolated execution
    Isolate {
        /// Step label
        label: String,
        /// Show the node built for this code
        #[arg(long)]
        code: Option<PathBuf>,
    },
    /// Validated execution order of a graph
    Order {
        /// Graph file (JSON)
        graph: PathBuf,
    },
    /// Run a graph and print the run report
    Run {
        /// Graph file (JSON)
        graph: PathBuf,
        /// Run inputs (JSON)
        #[arg(long, default_value = "{}")]
        inputs: String,
        /// Seconds to wait for the run
        #[arg(long, default_value = "600")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => KernelConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => KernelConfig::default(),
    };
    debug!(?config, "Kernel config");

    let engine = WorkflowEngine::builder(config)
        .with_runtime(Arc::new(DockerRuntime::default()))
        .build()?;

    match cli.command {
        Commands::Check { file } => {
            let code = read(&file)?;
            match engine.validator().accept(&code) {
                Ok(()) => println!("{}: ok", file.display()),
                Err(Rejection::Syntax(issue)) => {
                    println!("{}:{}:{}: {}", file.display(), issue.line, issue.offset, issue.message);
                    anyhow::bail!("syntax check failed");
                }
                Err(Rejection::Unsafe(report)) => {
                    for violation in &report.violations {
                        println!("{}: {}", file.display(), violation);
                    }
                    anyhow::bail!("{} safety violation(s)", report.violations.len());
                }
            }
        }
        Commands::Deps { file } => {
            let code = read(&file)?;
            for dependency in detect_dependencies(&code) {
                println!("{}", dependency);
            }
        }
        Commands::Isolate { label, code } => {
            let decomposer = engine.decomposer();
            println!(
                "{}: {}",
                label,
                if decomposer.needs_isolation(&label) {
                    "isolated"
                } else {
                    "in-process"
                }
            );
            if let Some(path) = code {
                let code = read(&path)?;
                let node = decomposer.create(&label, &code, "", &ContainerOverrides::default());
                println!("{}", serde_json::to_string_pretty(&node)?);
            }
        }
        Commands::Order { graph } => {
            let graph = load_graph(&graph)?;
            for (i, id) in graph.topological_order().into_iter().enumerate() {
                println!("{:>3}. {}", i + 1, id);
            }
        }
        Commands::Run {
            graph,
            inputs,
            timeout,
        } => {
            let name = graph.display().to_string();
            let graph = load_graph(&graph)?;
            let inputs: serde_json::Value =
                serde_json::from_str(&inputs).context("Invalid --inputs JSON")?;

            let id = engine
                .submit_run(name, graph, inputs, DEFAULT_PRIORITY, vec![])
                .await?;
            let report = engine
                .run_report(id, Duration::from_secs(timeout))
                .await?;

            info!(run_id = %report.run_id, status = ?report.status, "Run complete");
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.status != RunStatus::Completed {
                anyhow::bail!("run finished with {} error(s)", report.errors.len());
            }
        }
    }

    Ok(())
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_graph(path: &Path) -> Result<WorkflowGraph> {
    let content = read(path)?;
    serde_json::from_str(&content).with_context(|| format!("Invalid graph {}", path.display()))
}
