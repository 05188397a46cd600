/// stanza command line
///
/// Evaluates fragments, runs a line prompt, and exposes completion, member
/// listing and the tool bridge for scripting and debugging.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use stanza_core::cli::{self, Cli};
use stanza_core::config::Config;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging; configuration errors surface again during init
    let trace = cli.trace
        || Config::builder()
            .config_path(cli.config.as_ref().map(PathBuf::from))
            .build()
            .map(|config| config.trace)
            .unwrap_or(false);
    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli::run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
