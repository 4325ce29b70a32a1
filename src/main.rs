//! flowsim CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use flowsim::{driver, Engine, RunBoard, SimulationConfig, Workflow};
use std::path::PathBuf;

/// Simulate an agent workflow and print its update stream
#[derive(Parser, Debug)]
#[command(name = "flowsim", version, about)]
struct Cli {
    /// Workflow YAML file (with a `system` root key)
    workflow: PathBuf,

    /// Pause after every node until Enter is pressed
    #[arg(long)]
    step: bool,

    /// Simulation config file (defaults to ./flowsim.yml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for latencies, branch choices and transfer sizes
    #[arg(long)]
    seed: Option<u64>,

    /// Skip all simulated delays
    #[arg(long)]
    instant: bool,

    /// Print updates as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    log::info!("flowsim v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => SimulationConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SimulationConfig::auto_load()?,
    };
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    if cli.instant {
        config = config.instant();
    }

    log::info!("Loading workflow from: {}", cli.workflow.display());
    let workflow = Workflow::from_file(&cli.workflow)
        .with_context(|| format!("failed to load workflow {}", cli.workflow.display()))?;
    log::info!(
        "Loaded '{}' with {} agents",
        workflow.name,
        workflow.agents.len()
    );

    let mut board = RunBoard::new(&workflow);
    let mut handle = driver::spawn(Engine::with_config(workflow, cli.step, &config));

    while let Some(update) = handle.recv().await {
        board.apply(&update);
        if cli.json {
            println!("{}", update.to_json_line());
        } else {
            println!("{}", update);
        }

        if cli.step && update.is_suspension() {
            if !wait_for_enter().await? {
                log::info!("stdin closed, stopping run");
                handle.stop();
                break;
            }
            handle.resume();
        }
    }

    if !cli.json {
        println!();
        print!("{}", board.render_table());
    }

    Ok(())
}

/// Block on stdin until a line arrives; false on EOF
async fn wait_for_enter() -> Result<bool> {
    eprint!("Press Enter to continue...");
    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|n| n > 0)
    })
    .await??;
    Ok(read)
}
