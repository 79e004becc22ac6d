//! Configuration loading
//!
//! Layers, lowest precedence first: built-in defaults, a TOML file
//! (`BOTFLOW_CONFIG_PATH` or `./botflow.toml`, optional), then environment
//! variables such as `BOTFLOW_DATABASE__URL` or `BOTFLOW_ENGINE__MAX_HOPS`.
//! A `.env` file is loaded into the environment first.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::flow::CallLimits;

const ENV_PREFIX: &str = "BOTFLOW";
const DEFAULT_CONFIG_FILE: &str = "botflow.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub integrations: IntegrationsConfig,
    pub timers: TimersConfig,
    /// Channel name -> entry flow id for sessions started on that channel
    pub channels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Node hops allowed in one step before the session fails
    pub max_hops: u32,
    /// Sent to the contact when a session fails
    pub fallback_message: String,
    /// Sent when a typed input rejects a reply and the node has no retry message
    pub invalid_input_message: String,
    /// Paused flows keep stepping sessions already bound to them
    pub drain_paused_flows: bool,
    pub lease_ttl_secs: u64,
    pub lease_retries: u32,
    pub lease_retry_delay_ms: u64,
    /// Trigger tokens remembered per session for de-duplication
    pub recent_trigger_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hops: 100,
            fallback_message: "Transferring you to a human agent.".to_string(),
            invalid_input_message: "Sorry, I didn't understand that. Please try again."
                .to_string(),
            drain_paused_flows: true,
            lease_ttl_secs: 60,
            lease_retries: 5,
            lease_retry_delay_ms: 50,
            recent_trigger_window: 32,
        }
    }
}

impl EngineConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn lease_retry_delay(&self) -> Duration {
        Duration::from_millis(self.lease_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    /// Per-attempt timeout for one external call
    pub timeout_secs: u64,
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub email_relay_url: Option<String>,
    pub sheets_api_url: Option<String>,
    /// Overrides by call kind (`webhook`, `sheets`, `email`, `openai`)
    pub kinds: HashMap<String, CallLimits>,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 2,
            backoff_base_ms: 200,
            backoff_max_ms: 5000,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_api_key: None,
            email_relay_url: None,
            sheets_api_url: None,
            kinds: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimersConfig {
    pub poll_interval_ms: u64,
    pub batch_size: i64,
    /// How long a claimed wake stays invisible to other pollers
    pub claim_ttl_secs: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            batch_size: 50,
            claim_ttl_secs: 60,
        }
    }
}

impl TimersConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn claim_ttl(&self) -> Duration {
        Duration::from_secs(self.claim_ttl_secs)
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default file and environment
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Entry flow for sessions started on `channel`, falling back to `"*"`
    pub fn entry_flow(&self, channel: &str) -> Option<&str> {
        self.channels
            .get(channel)
            .or_else(|| self.channels.get("*"))
            .map(String::as_str)
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database.url.as_deref().context(
            "Database URL is not configured. Set BOTFLOW_DATABASE__URL, \
             [database] url in botflow.toml, or pass --database-url",
        )
    }
}

/// Programmatic overrides applied on top of file and environment
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
}

impl ConfigBuilder {
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let explicit = self
            .config_path
            .or_else(|| std::env::var(format!("{}_CONFIG_PATH", ENV_PREFIX)).ok().map(PathBuf::from));

        let mut builder = config::Config::builder();
        match &explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder = builder.add_source(config::File::from(path.as_path()));
            }
            None => {
                builder = builder
                    .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(url) = self.database_url {
            builder = builder
                .set_override("database.url", url)
                .context("Failed to apply database URL override")?;
        }

        let settings = builder.build().context("Failed to load configuration")?;
        let mut config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;

        if config.database.url.is_none() {
            config.database.url = std::env::var("DATABASE_URL").ok();
        }

        Ok(config)
    }
}
