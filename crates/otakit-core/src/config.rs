//! Configuration for the otakit tools.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $OTAKIT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/otakit/config.toml
//!   3. ~/.config/otakit/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtakitConfig {
    pub broker: BrokerConfig,
    pub subscriber: SubscriberConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname or address.
    pub host: String,
    /// Plain MQTT port.
    pub port: u16,
    /// MQTT keep-alive interval in seconds.
    pub keep_alive_secs: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Kit name, used in topic construction.
    pub kit: String,
    /// Company prefix for all topics.
    pub topic_prefix: String,
    /// Topic segment the publisher listens on for requests.
    pub publisher_listen_topic: String,
    /// Where the reassembled image is written.
    pub output_file: PathBuf,
    /// Seconds to wait before re-requesting after a failed exchange.
    pub retry_wait_secs: u64,
    /// Seconds to wait between completed downloads.
    pub restart_wait_secs: u64,
    /// Use the direct flow instead of the job flow.
    pub direct_flow: bool,
}

impl OtakitConfig {
    /// Topic the subscriber publishes requests and results on.
    pub fn publish_topic(&self) -> String {
        format!(
            "{}/{}/{}",
            self.subscriber.topic_prefix, self.subscriber.kit, self.subscriber.publisher_listen_topic
        )
    }

    /// A fresh per-download topic for receiving the chunk stream.
    pub fn unique_topic(&self, nonce: u32) -> String {
        format!(
            "{}/{}/subscriber/image{}",
            self.subscriber.topic_prefix, self.subscriber.kit, nonce
        )
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for OtakitConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            subscriber: SubscriberConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "test.mosquitto.org".into(),
            port: 1883,
            keep_alive_secs: 60,
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            kit: "CY8CPROTO_062_4343W".into(),
            topic_prefix: "anycloud".into(),
            publisher_listen_topic: "publish_notify".into(),
            output_file: PathBuf::from("anycloud-ota.out.bin"),
            retry_wait_secs: 20,
            restart_wait_secs: 15,
            direct_flow: false,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("otakit")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl OtakitConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            OtakitConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("OTAKIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&OtakitConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply OTAKIT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OTAKIT_BROKER__HOST") {
            self.broker.host = v;
        }
        if let Ok(v) = std::env::var("OTAKIT_BROKER__PORT") {
            if let Ok(p) = v.parse() {
                self.broker.port = p;
            }
        }
        if let Ok(v) = std::env::var("OTAKIT_SUBSCRIBER__KIT") {
            self.subscriber.kit = v;
        }
        if let Ok(v) = std::env::var("OTAKIT_SUBSCRIBER__OUTPUT_FILE") {
            self.subscriber.output_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OTAKIT_SUBSCRIBER__DIRECT_FLOW") {
            self.subscriber.direct_flow = v == "true" || v == "1";
        }
    }
}
