use crate::auth::{ScopedToken, TokenManager};
use crate::http;
use crate::ingest::api::{
    AppendRowsResponse, BulkChannelStatusRequest, BulkChannelStatusResponse, ChannelStatusEntry,
    OpenChannelRequest, OpenChannelResponse, PipeTarget,
};
use crate::ingest::batch::Batch;
use crate::ingest::error::{IngestError, Operation};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Channel name for this process: base name plus the start time, so that
/// reopening within one run lands on the same server-side channel.
pub fn channel_name_for(base: &str, started_at: DateTime<Utc>) -> String {
    format!("{}_{}", base, started_at.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Unopened,
    Open,
    /// The server may have invalidated the channel; reopen before appending
    NeedsReopen,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ChannelState {
    pub name: String,
    pub continuation_token: Option<String>,
    /// Offset token of the last acknowledged append
    pub last_submitted_offset: Option<String>,
    pub committed_offset: Option<String>,
    pub status: ChannelStatus,
}

/// Result of one acknowledged append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReceipt {
    pub rows: usize,
    pub bytes: usize,
    pub offset_token: String,
    pub continuation_token: String,
}

/// Open, append to, verify and close one streaming channel.
///
/// Only one caller may drive a session at a time; the ingestion client keeps
/// it behind an async mutex for the whole retry sequence of a batch.
pub struct ChannelSession {
    tokens: Arc<TokenManager>,
    http: reqwest::Client,
    target: PipeTarget,
    state: ChannelState,
    commit_poll_interval: Duration,
    drop_on_close: bool,
}

impl ChannelSession {
    pub fn new(
        tokens: Arc<TokenManager>,
        http: reqwest::Client,
        target: PipeTarget,
        channel_name: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            http,
            target,
            state: ChannelState {
                name: channel_name.into(),
                continuation_token: None,
                last_submitted_offset: None,
                committed_offset: None,
                status: ChannelStatus::Unopened,
            },
            commit_poll_interval: Duration::from_secs(2),
            drop_on_close: false,
        }
    }

    pub fn with_commit_poll_interval(mut self, interval: Duration) -> Self {
        self.commit_poll_interval = interval;
        self
    }

    pub fn with_drop_on_close(mut self, drop_on_close: bool) -> Self {
        self.drop_on_close = drop_on_close;
        self
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_open(&self) -> bool {
        self.state.status == ChannelStatus::Open
    }

    pub fn mark_for_reopen(&mut self) {
        if self.state.status == ChannelStatus::Open {
            self.state.status = ChannelStatus::NeedsReopen;
        }
    }

    async fn token(&self) -> Result<ScopedToken, IngestError> {
        Ok(self.tokens.scoped_token(false).await?)
    }

    /// Open (or reattach to) the channel and take its continuation token
    pub async fn open(&mut self) -> Result<&ChannelState, IngestError> {
        let token = self.token().await?;
        let url = self
            .target
            .channel_url(&token.ingest_base_url(), &self.state.name);

        debug!(channel = %self.state.name, pipe = %self.target, "Opening channel");
        let response = self
            .http
            .put(&url)
            .header(reqwest::header::AUTHORIZATION, http::bearer(token.token()))
            .json(&OpenChannelRequest {})
            .send()
            .await
            .map_err(|e| IngestError::from_reqwest(Operation::Open, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = http::error_body(response).await;
            return Err(IngestError::from_status(
                Operation::Open,
                status.as_u16(),
                message,
            ));
        }

        let body: OpenChannelResponse = response
            .json()
            .await
            .map_err(|e| IngestError::from_reqwest(Operation::Open, e))?;
        let continuation_token =
            body.next_continuation_token
                .ok_or_else(|| IngestError::Transient {
                    operation: Operation::Open,
                    status: Some(status.as_u16()),
                    message: "response has no continuation token".to_string(),
                })?;

        self.state.continuation_token = Some(continuation_token);
        self.state.committed_offset = body.channel_status.committed_offset().map(str::to_string);
        self.state.status = ChannelStatus::Open;

        info!(
            channel = %self.state.name,
            committed_offset = self.state.committed_offset.as_deref().unwrap_or("none"),
            "Channel opened"
        );
        Ok(&self.state)
    }

    /// Append a batch under the current continuation token.
    ///
    /// The stored token only moves forward on success, so a retry after any
    /// failure resubmits against the same pre-append token.
    pub async fn append(&mut self, batch: &Batch) -> Result<AppendReceipt, IngestError> {
        let continuation_token = match (&self.state.status, &self.state.continuation_token) {
            (ChannelStatus::Open, Some(token)) => token.clone(),
            _ => return Err(IngestError::ChannelNotOpen(self.state.name.clone())),
        };

        let payload = batch.to_ndjson()?;
        let bytes = payload.len();
        let offset_token = batch.offset_token();

        let token = self.token().await?;
        let url = self.target.rows_url(&token.ingest_base_url(), &self.state.name);

        let response = self
            .http
            .post(&url)
            .query(&[
                ("continuationToken", continuation_token.as_str()),
                ("offsetToken", offset_token.as_str()),
            ])
            .header(reqwest::header::AUTHORIZATION, http::bearer(token.token()))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await
            .map_err(|e| IngestError::from_reqwest(Operation::Append, e))?;

        let status = response.status();
        if !status.is_success() {
            let code = status.as_u16();
            if matches!(code, 404 | 409) {
                self.state.status = ChannelStatus::NeedsReopen;
            }
            let message = http::error_body(response).await;
            return Err(IngestError::from_status(Operation::Append, code, message));
        }

        let body: AppendRowsResponse = response
            .json()
            .await
            .map_err(|e| IngestError::from_reqwest(Operation::Append, e))?;
        let next = body.next_continuation_token.ok_or_else(|| IngestError::Transient {
            operation: Operation::Append,
            status: Some(status.as_u16()),
            message: "response has no continuation token".to_string(),
        })?;

        self.state.continuation_token = Some(next.clone());
        self.state.last_submitted_offset = Some(offset_token.clone());

        debug!(
            channel = %self.state.name,
            rows = batch.len(),
            bytes,
            offset_token = %offset_token,
            "Rows appended"
        );

        Ok(AppendReceipt {
            rows: batch.len(),
            bytes,
            offset_token,
            continuation_token: next,
        })
    }

    /// Server-side status of this channel
    pub async fn status(&self) -> Result<ChannelStatusEntry, IngestError> {
        let token = self.token().await?;
        let url = self.target.bulk_status_url(&token.ingest_base_url());

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, http::bearer(token.token()))
            .json(&BulkChannelStatusRequest {
                channel_names: vec![self.state.name.clone()],
            })
            .send()
            .await
            .map_err(|e| IngestError::from_reqwest(Operation::Status, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = http::error_body(response).await;
            return Err(IngestError::from_status(
                Operation::Status,
                status.as_u16(),
                message,
            ));
        }

        let mut body: BulkChannelStatusResponse = response
            .json()
            .await
            .map_err(|e| IngestError::from_reqwest(Operation::Status, e))?;
        Ok(body
            .channel_statuses
            .remove(&self.state.name)
            .unwrap_or_default())
    }

    /// Poll until the last submitted offset is reported committed.
    ///
    /// Returns the committed offset, or `None` when nothing was ever
    /// appended. Poll errors are logged and polling continues until timeout.
    pub async fn verify_commit(&mut self, timeout: Duration) -> Result<Option<String>, IngestError> {
        let Some(expected) = self.state.last_submitted_offset.clone() else {
            return Ok(self.state.committed_offset.clone());
        };

        info!(channel = %self.state.name, offset_token = %expected, "Waiting for commit");
        let deadline = Instant::now() + timeout;

        loop {
            match self.status().await {
                Ok(status) => {
                    let committed = status.committed_offset().map(str::to_string);
                    if committed.as_deref() == Some(expected.as_str()) {
                        info!(channel = %self.state.name, offset_token = %expected, "Commit verified");
                        self.state.committed_offset = committed.clone();
                        return Ok(committed);
                    }
                    debug!(
                        channel = %self.state.name,
                        committed = committed.as_deref().unwrap_or("none"),
                        "Commit pending"
                    );
                }
                Err(e) => {
                    warn!(channel = %self.state.name, error = %e, "Channel status poll failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(IngestError::CommitTimeout {
                    offset_token: expected,
                    timeout,
                });
            }
            tokio::time::sleep(self.commit_poll_interval.min(deadline - now)).await;
        }
    }

    /// Stop using the channel. With drop-on-close the server-side channel
    /// is also deleted, best effort.
    pub async fn close(&mut self) -> Result<(), IngestError> {
        if self.state.status == ChannelStatus::Closed {
            return Ok(());
        }
        let was_opened = self.state.status != ChannelStatus::Unopened;
        self.state.status = ChannelStatus::Closed;

        if self.drop_on_close && was_opened {
            if let Err(e) = self.drop_channel().await {
                warn!(channel = %self.state.name, error = %e, "Failed to drop channel");
            }
        }

        info!(channel = %self.state.name, "Channel closed");
        Ok(())
    }

    async fn drop_channel(&self) -> Result<(), IngestError> {
        let token = self.token().await?;
        let url = self
            .target
            .channel_url(&token.ingest_base_url(), &self.state.name);

        let response = self
            .http
            .delete(&url)
            .header(reqwest::header::AUTHORIZATION, http::bearer(token.token()))
            .send()
            .await
            .map_err(|e| IngestError::from_reqwest(Operation::Close, e))?;

        let status = response.status();
        if !status.is_success() {
            let message = http::error_body(response).await;
            return Err(IngestError::from_status(
                Operation::Close,
                status.as_u16(),
                message,
            ));
        }
        info!(channel = %self.state.name, "Channel dropped");
        Ok(())
    }
}

impl std::fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSession")
            .field("target", &self.target)
            .field("state", &self.state)
            .finish()
    }
}
