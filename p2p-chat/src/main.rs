use std::process::ExitCode;

use clap::Parser;

use p2p_chat::{
    cli::Cli,
    config::ConfigStore,
    orchestrator::Orchestrator,
    terminal::{Console, LineInput},
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    // Chat text owns stdout; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    Orchestrator::new(
        LineInput::stdin(),
        Console::stdout(),
        ConfigStore::new(&cli.config),
        cli.race_settings(),
        cli.presets(),
    )
    .start()
    .await
}
