mod ci;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mtconnect_bridge::action::{ActionConnector, HttpActionConnector, SimulatedActionConnector};
use mtconnect_bridge::adapter::ShdrAdapter;
use mtconnect_bridge::dispatch::ActionDispatcher;
use mtconnect_bridge::goal::CurrentGoalSource;
use mtconnect_bridge::stream::AgentClient;
use mtconnect_bridge::{Bridge, BridgeConfig, BridgeError, BridgeParts};

#[derive(Parser)]
#[command(
    name = "mtconnect-bridge",
    version,
    about = "Run remote actions requested through an MTConnect agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the agent stream and dispatch requested actions.
    Run {
        /// Path to the bridge TOML file.
        #[arg(long, env = "MTCONNECT_BRIDGE_CONFIG")]
        config: PathBuf,
        /// Answer every action in-process instead of calling the action server.
        #[arg(long)]
        simulate: bool,
    },
    /// Check a bridge TOML file and exit.
    Validate {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run { config, simulate } => run(&config, simulate),
        Command::Validate { config } => validate(&config),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = ci::classify_error(&err);
            error!(code, "{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn validate(path: &Path) -> Result<()> {
    let config = BridgeConfig::load(path)?;
    println!(
        "{}: ok ({} action(s), agent {})",
        path.display(),
        config.actions.len(),
        config.agent.base_url()
    );
    Ok(())
}

fn run(path: &Path, simulate: bool) -> Result<()> {
    let config = BridgeConfig::load(path)?;
    init_tracing(&config.log_level);
    info!(config = %path.display(), simulate, "starting mtconnect-bridge");

    let connector = action_connector(&config, simulate)?;
    let registry = Arc::new(config.actions.clone());
    let adapter = ShdrAdapter::start(
        &config.adapter,
        registry.schemas().map(|schema| schema.data_item()),
    )
    .context("start SHDR adapter")?;

    let agent = AgentClient::new(&config.agent);
    let parts = BridgeParts {
        goals: Box::new(CurrentGoalSource::new(
            agent.clone(),
            Arc::clone(&registry),
            config.agent.namespace.clone(),
        )),
        dispatcher: Box::new(ActionDispatcher::new(
            connector,
            Arc::clone(&registry),
            config.dispatch.announce_active,
        )),
        sink: Box::new(adapter),
    };
    let bridge = Bridge::new(registry, config.agent.namespace.clone(), parts);
    bridge.announce_ready();

    let chunks = bridge.run(&agent)?;
    info!(chunks, "agent closed the sample stream");
    Ok(())
}

/// Simulation only on request; a live run needs an action server.
fn action_connector(config: &BridgeConfig, simulate: bool) -> Result<Box<dyn ActionConnector>> {
    if simulate {
        info!(result = %config.dispatch.simulated_result, "using simulated action server");
        return Ok(Box::new(SimulatedActionConnector::new(
            config.dispatch.simulated_result.clone(),
        )));
    }
    let server = config.dispatch.server.as_deref().ok_or_else(|| {
        BridgeError::InvalidConfig("dispatch.server is required unless --simulate".into())
    })?;
    Ok(Box::new(HttpActionConnector::new(
        server,
        Duration::from_millis(config.dispatch.poll_ms),
    )))
}
