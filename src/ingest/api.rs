use crate::config::types::SnowflakeConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

// ===== Resource paths =====

/// The pipe all rows are written through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeTarget {
    pub database: String,
    pub schema: String,
    pub pipe: String,
}

impl PipeTarget {
    pub fn from_config(config: &SnowflakeConfig) -> Self {
        Self {
            database: config.database.clone(),
            schema: config.schema.clone(),
            pipe: config.pipe.clone(),
        }
    }

    fn pipe_path(&self) -> String {
        format!(
            "databases/{}/schemas/{}/pipes/{}",
            self.database, self.schema, self.pipe
        )
    }

    /// Channel resource, used to open (PUT) and drop (DELETE) a channel
    pub fn channel_url(&self, base_url: &str, channel: &str) -> String {
        format!(
            "{}/v2/streaming/{}/channels/{}",
            base_url,
            self.pipe_path(),
            channel
        )
    }

    pub fn rows_url(&self, base_url: &str, channel: &str) -> String {
        format!(
            "{}/v2/streaming/data/{}/channels/{}/rows",
            base_url,
            self.pipe_path(),
            channel
        )
    }

    pub fn bulk_status_url(&self, base_url: &str) -> String {
        format!(
            "{}/v2/streaming/{}:bulk-channel-status",
            base_url,
            self.pipe_path()
        )
    }
}

impl std::fmt::Display for PipeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.pipe)
    }
}

// ===== Wire types =====

#[derive(Debug, Clone, Serialize)]
pub struct OpenChannelRequest {}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenChannelResponse {
    pub next_continuation_token: Option<String>,
    #[serde(default)]
    pub channel_status: ChannelStatusEntry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppendRowsResponse {
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkChannelStatusRequest {
    pub channel_names: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkChannelStatusResponse {
    #[serde(default)]
    pub channel_statuses: HashMap<String, ChannelStatusEntry>,
}

/// Server-side view of one channel. Offset tokens are opaque; older
/// deployments report them as numbers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelStatusEntry {
    #[serde(default, deserialize_with = "opaque_token")]
    pub committed_offset_token: Option<String>,
    #[serde(default, deserialize_with = "opaque_token")]
    pub last_committed_offset_token: Option<String>,
    #[serde(default)]
    pub channel_status_code: Option<String>,
}

impl ChannelStatusEntry {
    pub fn committed_offset(&self) -> Option<&str> {
        self.committed_offset_token
            .as_deref()
            .or(self.last_committed_offset_token.as_deref())
    }
}

fn opaque_token<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
