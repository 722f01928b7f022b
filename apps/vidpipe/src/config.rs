//! vidpipe configuration.
//!
//! Stored as TOML in `vidpipe.toml` in the working directory, or wherever
//! `VIDPIPE_CONFIG` points. A default file is written on first run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use vidpipe_consumer::ConsumerConfig;
use vidpipe_producer::{RetryPolicy, UploadConfig};

/// Environment variable overriding the configuration path.
pub const CONFIG_ENV: &str = "VIDPIPE_CONFIG";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub producer: ProducerSettings,

    #[serde(default)]
    pub consumer: ConsumerSettings,
}

/// `[producer]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerSettings {
    /// Consumer address to connect to.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Folder holding the numbered producer folders `0`, `1`, ...
    #[serde(default = "default_input_root")]
    pub input_root: PathBuf,

    /// Number of producer folders read concurrently.
    #[serde(default = "default_thread_count")]
    pub thread_count: u32,

    /// Chunk payload size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Attach SHA-256 checksums to chunks.
    #[serde(default = "default_true")]
    pub checksums: bool,

    #[serde(default = "default_ok_delay_ms")]
    pub ok_delay_ms: u64,

    #[serde(default = "default_full_delay_ms")]
    pub full_delay_ms: u64,

    #[serde(default = "default_wait_delay_ms")]
    pub wait_delay_ms: u64,

    /// Sends per chunk before giving up on a file (0 = unlimited).
    #[serde(default)]
    pub max_attempts: u32,
}

/// `[consumer]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerSettings {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Where reassembled files are written.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Number of reassembly workers.
    #[serde(default = "default_thread_count")]
    pub thread_count: u32,

    /// Maximum number of files in flight.
    #[serde(default = "default_queue_length")]
    pub queue_length: u32,

    /// Byte budget for chunks of files no worker owns yet (0 = disabled).
    #[serde(default)]
    pub max_buffered_bytes: usize,

    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_server_addr() -> String {
    "127.0.0.1:5001".into()
}

fn default_listen_addr() -> String {
    "0.0.0.0:5001".into()
}

fn default_input_root() -> PathBuf {
    PathBuf::from("videos")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("received")
}

fn default_thread_count() -> u32 {
    4
}

fn default_queue_length() -> u32 {
    10
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_ok_delay_ms() -> u64 {
    10
}

fn default_full_delay_ms() -> u64 {
    500
}

fn default_wait_delay_ms() -> u64 {
    100
}

fn default_drain_timeout_secs() -> u64 {
    30
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            input_root: default_input_root(),
            thread_count: default_thread_count(),
            chunk_size: default_chunk_size(),
            checksums: default_true(),
            ok_delay_ms: default_ok_delay_ms(),
            full_delay_ms: default_full_delay_ms(),
            wait_delay_ms: default_wait_delay_ms(),
            max_attempts: 0,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            output_dir: default_output_dir(),
            thread_count: default_thread_count(),
            queue_length: default_queue_length(),
            max_buffered_bytes: 0,
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Config {
    /// Loads configuration from `path`, writing a default file if missing.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Producer settings, advertising the consumer section in the handshake.
    pub fn upload_config(&self) -> UploadConfig {
        let p = &self.producer;
        UploadConfig {
            input_root: p.input_root.clone(),
            producer_threads: p.thread_count,
            consumer_threads: self.consumer.thread_count,
            queue_length: self.consumer.queue_length,
            chunk_size: p.chunk_size,
            checksums: p.checksums,
            retry: RetryPolicy {
                ok_delay: Duration::from_millis(p.ok_delay_ms),
                full_delay: Duration::from_millis(p.full_delay_ms),
                wait_delay: Duration::from_millis(p.wait_delay_ms),
                max_attempts: p.max_attempts,
            },
        }
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        let c = &self.consumer;
        ConsumerConfig {
            listen_addr: c.listen_addr.clone(),
            output_dir: c.output_dir.clone(),
            worker_count: c.thread_count as usize,
            buffer_capacity: c.queue_length as usize,
            max_buffered_bytes: c.max_buffered_bytes,
            drain_timeout: Duration::from_secs(c.drain_timeout_secs),
        }
    }
}

/// Returns the configuration file path.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("vidpipe.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.producer.thread_count, 4);
        assert_eq!(config.producer.chunk_size, 1024 * 1024);
        assert_eq!(config.producer.max_attempts, 0);
        assert_eq!(config.consumer.queue_length, 10);
        assert_eq!(config.consumer.max_buffered_bytes, 0);
    }

    #[test]
    fn config_roundtrip_toml() {
        let mut config = Config::default();
        config.producer.server_addr = "10.0.0.5:7000".into();
        config.producer.max_attempts = 20;
        config.consumer.output_dir = PathBuf::from("/srv/videos");
        config.consumer.max_buffered_bytes = 64 * 1024 * 1024;

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        let toml_str = r#"
            [producer]
            thread_count = 2

            [consumer]
            queue_length = 1
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.producer.thread_count, 2);
        assert_eq!(config.producer.full_delay_ms, 500);
        assert_eq!(config.consumer.queue_length, 1);
        assert_eq!(config.consumer.thread_count, 4);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_writes_default_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("conf").join("vidpipe.toml");

        let config = Config::load(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load(&path).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn handshake_advertises_consumer_settings() {
        let mut config = Config::default();
        config.consumer.thread_count = 3;
        config.consumer.queue_length = 7;
        config.producer.wait_delay_ms = 25;

        let upload = config.upload_config();
        assert_eq!(upload.consumer_threads, 3);
        assert_eq!(upload.queue_length, 7);
        assert_eq!(upload.retry.wait_delay, Duration::from_millis(25));

        let consumer = config.consumer_config();
        assert_eq!(consumer.worker_count, 3);
        assert_eq!(consumer.buffer_capacity, 7);
    }
}
