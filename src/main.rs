mod admin;
mod api;
mod cli;
mod config;
mod executions;
mod model;
mod notebooks;
mod render;
mod session;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logs go to stderr so stdout stays parseable. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "nbrun=debug,warn",
        _ => "nbrun=trace,info",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);
    let is_json = args.json;

    match cli::run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            if is_json {
                // Keep stdout machine-readable for scripts.
                let detail = e
                    .chain()
                    .find_map(|cause| cause.downcast_ref::<api::ApiError>())
                    .and_then(api::ApiError::detail);
                println!(
                    "{}",
                    serde_json::json!({ "error": format!("{e:#}"), "detail": detail })
                );
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
