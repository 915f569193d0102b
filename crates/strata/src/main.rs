mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use strata_engine::Engine;

#[derive(Debug, Parser)]
#[command(name = "strata", version, about = "Composable virtual file-system server")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log filter, e.g. `debug` or `strata=debug,tower_http=warn`.
    #[arg(long, global = true, env = "STRATA_LOG")]
    log: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a blueprint and run its front-ends until interrupted.
    Serve {
        /// Blueprint file (YAML or JSON).
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Validate a blueprint without starting anything.
    Check {
        #[arg(long, short)]
        config: PathBuf,
    },
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();
    for provider in strata_engine::backend_providers() {
        engine.register(provider);
    }
    for provider in strata_http::frontend_providers() {
        engine.register(provider);
    }
    engine
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    logging::init(cli.log.as_deref())?;

    match cli.command {
        Command::Serve { config } => serve(&config).await,
        Command::Check { config } => check(&config),
    }
}

async fn serve(config: &std::path::Path) -> Result<(), anyhow::Error> {
    let specs = strata_config::load_blueprint_file(config)?;
    info!(config = %config.display(), components = specs.len(), "loading blueprint");

    let mut engine = build_engine();
    engine.load(&specs).await?;
    for (name, addr) in engine.frontend_addrs() {
        info!(name = %name, addr = %addr, "front-end ready");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    engine.dispose().await;
    Ok(())
}

fn check(config: &std::path::Path) -> Result<(), anyhow::Error> {
    let specs = strata_config::load_blueprint_file(config)?;
    build_engine().check(&specs)?;
    println!(
        "{}: {} component(s) ok",
        config.display(),
        specs.len()
    );
    Ok(())
}
