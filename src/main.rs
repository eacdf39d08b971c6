mod cli;
mod engine;
mod error;
mod model;
mod orchestrator;
mod text_summary;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code reported when the run is interrupted with Ctrl-C.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = cli::Cli::parse();

    // Interrupting leaves the cluster and any submitted job running.
    let code = tokio::select! {
        res = cli::run(args) => match res {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {e:#}");
                cli::exit_code(&e)
            }
        },
        _ = tokio::signal::ctrl_c() => INTERRUPTED_EXIT_CODE,
    };
    std::process::exit(code);
}
