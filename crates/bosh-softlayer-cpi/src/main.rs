use anyhow::Context;
use bosh_softlayer_cpi::{dispatcher_from_config, Request, Response};
use clap::Parser;
use softlayer_cpi_core::config::CpiConfig;
use softlayer_cpi_core::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Runs one BOSH CPI request read from stdin and prints the response to stdout.
#[derive(Parser)]
#[command(name = "bosh-softlayer-cpi", version)]
struct Cli {
    /// Path to the CPI configuration file
    #[arg(short, long, env = "BOSH_SOFTLAYER_CPI_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the response
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Reading request from stdin")?;

    let response = run(&cli.config, &input).await;
    let line = serde_json::to_string(&response).context("Serializing response")?;
    println!("{line}");
    Ok(())
}

async fn run(config_path: &Path, input: &str) -> Response {
    let request: Request = match serde_json::from_str(input) {
        Ok(request) => request,
        Err(e) => {
            return Response::failed(Error::ParseError(format!(
                "Extracting request from stdin: {e}"
            )))
        }
    };

    let dispatcher =
        match CpiConfig::from_file(config_path).and_then(|c| dispatcher_from_config(&c)) {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                tracing::error!(
                    path = %config_path.display(),
                    error = %err,
                    "Loading CPI configuration"
                );
                return Response::failed(err);
            }
        };

    dispatcher.dispatch(&request).await
}
