use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub snowflake: SnowflakeConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowflakeConfig {
    pub account: String,
    pub user: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Control-plane base URL; derived from the account when absent
    #[serde(default)]
    pub url: Option<String>,
    pub database: String,
    pub schema: String,
    pub pipe: String,
    #[serde(default = "default_channel_name")]
    pub channel_name: String,
}

fn default_channel_name() -> String {
    "SENSEHAT_CHNL".to_string()
}

impl SnowflakeConfig {
    pub fn control_url(&self) -> String {
        match &self.url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.snowflakecomputing.com",
                self.account.to_lowercase()
            ),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub private_key_file: Option<PathBuf>,
    #[serde(default)]
    pub private_key_passphrase: Option<String>,
    #[serde(default)]
    pub pat_token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("private_key_file", &self.private_key_file)
            .field(
                "private_key_passphrase",
                &self.private_key_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("pat_token", &self.pat_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_interval", with = "humantime_serde")]
    pub batch_interval: Duration,
    #[serde(default = "default_reading_interval", with = "humantime_serde")]
    pub reading_interval: Duration,
    /// Stop after this many successful batches (0 = unlimited)
    #[serde(default)]
    pub max_batches: u64,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_token_safety_margin", with = "humantime_serde")]
    pub token_safety_margin: Duration,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_interval: default_batch_interval(),
            reading_interval: default_reading_interval(),
            max_batches: 0,
            request_timeout: default_request_timeout(),
            token_safety_margin: default_token_safety_margin(),
            retry: RetryConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_reading_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_token_safety_margin() -> Duration {
    Duration::from_secs(300)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_base_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_verify_commit")]
    pub verify_commit: bool,
    #[serde(default = "default_commit_timeout", with = "humantime_serde")]
    pub commit_timeout: Duration,
    #[serde(default = "default_commit_poll_interval", with = "humantime_serde")]
    pub commit_poll_interval: Duration,
    #[serde(default)]
    pub drop_channel_on_close: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            verify_commit: default_verify_commit(),
            commit_timeout: default_commit_timeout(),
            commit_poll_interval: default_commit_poll_interval(),
            drop_channel_on_close: false,
        }
    }
}

fn default_verify_commit() -> bool {
    true
}

fn default_commit_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_commit_poll_interval() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    #[serde(default)]
    pub simulate: bool,
    /// Seed for the simulated sensor; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Colour the LED matrix by temperature on each reading
    #[serde(default = "default_display")]
    pub display: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            seed: None,
            display: default_display(),
        }
    }
}

fn default_display() -> bool {
    true
}
