//! Entry point for the Payroll Engine binary.
//!
//! Running this binary starts an HTTP server exposing payroll run
//! creation, run status changes and filing generation.  Settings are
//! read from `PAYROLL_*` environment variables (see
//! [`payroll_engine::config::Config::from_env`]); the directory of
//! statutory rule-set JSON files defaults to `rules` relative to the
//! current working directory.  Log verbosity follows `RUST_LOG`.

use payroll_engine::{api, config::Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "starting payroll engine");
    api::serve(config).await
}
