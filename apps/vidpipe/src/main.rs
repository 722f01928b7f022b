//! vidpipe entry point.
//!
//! `vidpipe produce` uploads the configured producer folders;
//! `vidpipe consume` runs the receiving server until Ctrl-C.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mode = app::Mode::from_args(std::env::args().skip(1))?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), ?mode, "starting vidpipe");

    let path = config::config_path();
    let config = config::Config::load(&path)?;
    tracing::info!(path = %path.display(), "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(mode, config))?;

    tracing::info!("vidpipe shut down cleanly");
    Ok(())
}
