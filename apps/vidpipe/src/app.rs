//! Runs one of the two vidpipe roles.

use tokio_util::sync::CancellationToken;

use vidpipe_consumer::ConsumerServer;
use vidpipe_producer::Uploader;

use crate::config::Config;

/// Which side of the transfer this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Produce,
    Consume,
}

impl Mode {
    /// Parses the first command-line argument.
    pub fn from_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        match args.next().as_deref() {
            Some("produce") => Ok(Mode::Produce),
            Some("consume") => Ok(Mode::Consume),
            Some(other) => anyhow::bail!("unknown mode {other:?}, expected `produce` or `consume`"),
            None => anyhow::bail!("usage: vidpipe <produce|consume>"),
        }
    }
}

pub async fn run(mode: Mode, config: Config) -> anyhow::Result<()> {
    match mode {
        Mode::Produce => produce(config).await,
        Mode::Consume => consume(config).await,
    }
}

async fn produce(config: Config) -> anyhow::Result<()> {
    let uploader = Uploader::new(config.upload_config());
    let summary = uploader.upload_to(&config.producer.server_addr).await?;

    tracing::info!(
        files = summary.files_total,
        uploaded = summary.files_uploaded,
        failed = summary.files_failed,
        chunks = summary.chunks_sent,
        bytes = summary.bytes_sent,
        retries = summary.retries,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        mib_per_sec = summary.bytes_per_second() / (1024.0 * 1024.0),
        "upload summary"
    );

    if summary.files_failed > 0 {
        anyhow::bail!("{} of {} files failed", summary.files_failed, summary.files_total);
    }
    Ok(())
}

async fn consume(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let server = ConsumerServer::bind(config.consumer_config(), cancel.clone()).await?;
    let server_task = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    server_task.await??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn parses_modes() {
        assert_eq!(Mode::from_args(args(&["produce"])).unwrap(), Mode::Produce);
        assert_eq!(Mode::from_args(args(&["consume", "extra"])).unwrap(), Mode::Consume);
    }

    #[test]
    fn rejects_missing_or_unknown_mode() {
        assert!(Mode::from_args(args(&[])).is_err());
        assert!(Mode::from_args(args(&["serve"])).is_err());
    }
}
