use crate::auth::{Credential, CredentialError, CredentialSigner, TokenManager};
use crate::config::types::Config;
use crate::config::{load_config, validate_config, ConfigError};
use crate::http;
use crate::ingest::api::PipeTarget;
use crate::ingest::{channel_name_for, ChannelSession, IngestError, IngestStats, IngestionClient};
use crate::sensor;
use chrono::Utc;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(
        "config not found\n\
         Searched locations:\n  ~/.config/sensestream/config.yml\n  /etc/sensestream/config.yml\n\n\
         Use --config <path> to specify a config file, or run 'sensestream config init' to generate one."
    )]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ingestion failed: {0}")]
    Ingest(#[from] IngestError),
}

/// Overrides for values from the config file
#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// Rows per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Maximum age of a batch before it is sent (e.g. 5s)
    #[arg(long, value_parser = parse_duration)]
    pub interval: Option<Duration>,

    /// Time between sensor readings (e.g. 500ms)
    #[arg(long, value_parser = parse_duration)]
    pub reading_interval: Option<Duration>,

    /// Use simulated sensor data
    #[arg(long)]
    pub simulate: bool,

    /// Stop after this many batches (0 = run until interrupted)
    #[arg(long)]
    pub max_batches: Option<u64>,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

impl RunArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(batch_size) = self.batch_size {
            config.streaming.batch_size = batch_size;
        }
        if let Some(interval) = self.interval {
            config.streaming.batch_interval = interval;
        }
        if let Some(reading_interval) = self.reading_interval {
            config.streaming.reading_interval = reading_interval;
        }
        if self.simulate {
            config.sensor.simulate = true;
        }
        if let Some(max_batches) = self.max_batches {
            config.streaming.max_batches = max_batches;
        }
    }
}

pub async fn run(config_path: Option<PathBuf>, args: RunArgs) -> Result<IngestStats, RunError> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    let config = prepare_config(&config_path, &args)?;

    let ct = CancellationToken::new();
    spawn_signal_handler(ct.clone());

    run_with_config(config, ct).await
}

fn prepare_config(path: &Path, args: &RunArgs) -> Result<Config, RunError> {
    info!(config_path = %path.display(), "Loading configuration");
    let mut config = load_config(path)?;
    args.apply(&mut config);
    validate_config(&config)?;
    Ok(config)
}

/// Wire up the sensor, tokens, channel and client from a validated config
/// and run until `ct` is cancelled.
pub async fn run_with_config(config: Config, ct: CancellationToken) -> Result<IngestStats, RunError> {
    let streaming = &config.streaming;

    let credential = Credential::from_config(&config.snowflake, &config.auth)?;
    if let Some(fingerprint) = credential.fingerprint() {
        info!(fingerprint, "Key pair credential loaded");
    }

    let http = http::build_client(streaming.request_timeout)?;
    let tokens = Arc::new(TokenManager::new(
        CredentialSigner::new(credential),
        http.clone(),
        config.snowflake.control_url(),
        config.snowflake.role.clone(),
        streaming.token_safety_margin,
    ));

    let channel_name = channel_name_for(&config.snowflake.channel_name, Utc::now());
    let target = PipeTarget::from_config(&config.snowflake);
    info!(
        account = %config.snowflake.account,
        pipe = %target,
        channel = %channel_name,
        batch_size = streaming.batch_size,
        batch_interval_ms = streaming.batch_interval.as_millis() as u64,
        "Starting ingestion"
    );

    let channel = ChannelSession::new(Arc::clone(&tokens), http, target, channel_name)
        .with_commit_poll_interval(streaming.shutdown.commit_poll_interval)
        .with_drop_on_close(streaming.shutdown.drop_channel_on_close);
    let client = Arc::new(IngestionClient::new(channel, tokens, streaming));

    let source = sensor::open_source(&config.sensor);
    let stats = client.run(source, ct).await?;
    Ok(stats)
}

fn spawn_signal_handler(ct: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, draining");
        ct.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"
snowflake:
  account: acct
  user: sensehat
  database: SENSORS
  schema: PUBLIC
  pipe: SENSEHAT_PIPE
auth:
  pat_token: abc123
"#;

    #[test]
    fn test_overrides_replace_config_values() {
        let mut config = parse_config(CONFIG).unwrap();
        let args = RunArgs {
            batch_size: Some(25),
            interval: Some(Duration::from_secs(2)),
            reading_interval: None,
            simulate: true,
            max_batches: Some(3),
        };
        args.apply(&mut config);

        assert_eq!(config.streaming.batch_size, 25);
        assert_eq!(config.streaming.batch_interval, Duration::from_secs(2));
        assert_eq!(config.streaming.reading_interval, Duration::from_millis(500));
        assert!(config.sensor.simulate);
        assert_eq!(config.streaming.max_batches, 3);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CONFIG.as_bytes()).unwrap();

        let args = RunArgs {
            batch_size: Some(0),
            ..RunArgs::default()
        };
        let err = prepare_config(file.path(), &args).unwrap_err();
        assert!(matches!(err, RunError::Config(ConfigError::ValidationList(_))));
    }

    #[test]
    fn test_duration_flags() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration("soon").is_err());
    }

    #[tokio::test]
    async fn test_missing_config_path() {
        let err = run(None, RunArgs::default()).await.unwrap_err();
        assert!(matches!(err, RunError::ConfigNotFound));
    }
}
