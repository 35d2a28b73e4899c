use crate::auth::TokenManager;
use crate::config::types::{ShutdownConfig, StreamingConfig};
use crate::ingest::batch::Batch;
use crate::ingest::batch_buffer::BatchBuffer;
use crate::ingest::channel::{AppendReceipt, ChannelSession};
use crate::ingest::error::{ErrorKind, IngestError};
use crate::ingest::retry::{Attempt, RetryDecision, RetryPolicy};
use crate::sensor::{schema, Reading, ReadingSource};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SUMMARY_EVERY_BATCHES: u64 = 10;

/// Lifecycle of the ingestion client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Starting,
    Open,
    Running,
    Draining,
    Closed,
}

#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub rows_sent: u64,
    pub batches_sent: u64,
    pub bytes_sent: u64,
    pub batches_dropped: u64,
    pub rows_dropped: u64,
    pub readings_skipped: u64,
    pub errors: u64,
    pub token_refreshes: u64,
    pub started_at: Option<Instant>,
}

impl IngestStats {
    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn rows_per_second(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.rows_sent as f64 / secs
        } else {
            0.0
        }
    }

    fn log_summary(&self, phase: &'static str) {
        info!(
            phase,
            rows_sent = self.rows_sent,
            batches_sent = self.batches_sent,
            bytes_sent = self.bytes_sent,
            batches_dropped = self.batches_dropped,
            rows_dropped = self.rows_dropped,
            readings_skipped = self.readings_skipped,
            errors = self.errors,
            token_refreshes = self.token_refreshes,
            elapsed_secs = self.elapsed().as_secs(),
            rows_per_sec = self.rows_per_second(),
            "Ingestion summary"
        );
    }
}

/// What happened to one drained batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered
    Empty,
    Sent(AppendReceipt),
    Dropped { rows: usize },
}

/// Drives a single channel: batches readings, appends them with retries,
/// and drains on shutdown.
pub struct IngestionClient {
    channel: tokio::sync::Mutex<ChannelSession>,
    tokens: Arc<TokenManager>,
    buffer: Arc<Mutex<BatchBuffer>>,
    flush_ready: Notify,
    policy: RetryPolicy,
    reading_interval: Duration,
    max_batches: u64,
    shutdown: ShutdownConfig,
    state_tx: watch::Sender<ClientState>,
    stats: Mutex<IngestStats>,
}

impl IngestionClient {
    pub fn new(channel: ChannelSession, tokens: Arc<TokenManager>, config: &StreamingConfig) -> Self {
        let (state_tx, _) = watch::channel(ClientState::Starting);
        Self {
            channel: tokio::sync::Mutex::new(channel),
            tokens,
            buffer: Arc::new(Mutex::new(BatchBuffer::new(
                config.batch_size,
                config.batch_interval,
            ))),
            flush_ready: Notify::new(),
            policy: RetryPolicy::from(&config.retry),
            reading_interval: config.reading_interval,
            max_batches: config.max_batches,
            shutdown: config.shutdown.clone(),
            state_tx,
            stats: Mutex::new(IngestStats::default()),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ClientState {
        *self.state_tx.borrow()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn buffered(&self) -> usize {
        self.lock_buffer().len()
    }

    fn lock_buffer(&self) -> std::sync::MutexGuard<'_, BatchBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_stats(&self, f: impl FnOnce(&mut IngestStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
    }

    fn set_state(&self, state: ClientState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Client state changed");
        }
    }

    /// Obtain a scoped token and open the channel
    pub async fn start(&self) -> Result<(), IngestError> {
        self.set_state(ClientState::Starting);
        self.update_stats(|s| s.started_at = Some(Instant::now()));

        let mut channel = self.channel.lock().await;
        let mut attempt = Attempt::default();
        let mut force_refresh = false;

        loop {
            let err = match self.try_open(&mut channel, force_refresh).await {
                Ok(()) => break,
                Err(e) => e,
            };

            self.update_stats(|s| s.errors += 1);
            match self.policy.decide(&attempt, err.kind()) {
                RetryDecision::RefreshAndRetry => {
                    warn!(channel = %channel.name(), error = %err, "Open rejected token, refreshing");
                    attempt.auth_refreshes += 1;
                    force_refresh = true;
                }
                RetryDecision::RetryAfter(delay) => {
                    attempt.transient_failures += 1;
                    warn!(
                        channel = %channel.name(),
                        attempt = attempt.transient_failures,
                        status = ?err.status(),
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Channel open failed, retrying"
                    );
                    force_refresh = false;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DropBatch | RetryDecision::Abort => {
                    error!(channel = %channel.name(), error = %err, "Failed to open channel");
                    self.set_state(ClientState::Closed);
                    return Err(err);
                }
            }
        }

        self.set_state(ClientState::Open);
        Ok(())
    }

    /// Buffer a reading. Readings that do not fit the row schema are skipped.
    pub fn push(&self, reading: Reading) -> bool {
        if let Err(violation) = schema::validate(&reading) {
            warn!(reading_id = %reading.id(), error = %violation, "Skipping invalid reading");
            self.update_stats(|s| s.readings_skipped += 1);
            return false;
        }

        // A first reading arms the flush deadline, so the flush loop must
        // wake for it as well as for a full buffer.
        let wake = {
            let mut buffer = self.lock_buffer();
            let was_empty = buffer.is_empty();
            buffer.push(reading);
            was_empty || buffer.should_flush(Instant::now())
        };
        if wake {
            self.flush_ready.notify_one();
        }
        true
    }

    /// Drain one batch from the buffer and deliver it
    pub async fn flush(&self) -> Result<FlushOutcome, IngestError> {
        let batch = self.lock_buffer().drain();
        match batch {
            Some(batch) => self.send_batch(batch).await,
            None => Ok(FlushOutcome::Empty),
        }
    }

    async fn send_batch(&self, batch: Batch) -> Result<FlushOutcome, IngestError> {
        let mut channel = self.channel.lock().await;
        let mut attempt = Attempt::default();
        let mut force_refresh = false;

        loop {
            let result = self.try_append(&mut channel, &batch, force_refresh).await;
            force_refresh = false;

            let err = match result {
                Ok(receipt) => {
                    self.record_sent(&receipt);
                    return Ok(FlushOutcome::Sent(receipt));
                }
                Err(e) => e,
            };

            self.update_stats(|s| s.errors += 1);
            let kind = err.kind();
            match self.policy.decide(&attempt, kind) {
                RetryDecision::RefreshAndRetry => {
                    warn!(
                        channel = %channel.name(),
                        batch_id = %batch.batch_id(),
                        "Scoped token rejected, refreshing and resending"
                    );
                    attempt.auth_refreshes += 1;
                    force_refresh = true;
                }
                RetryDecision::RetryAfter(delay) => {
                    attempt.transient_failures += 1;
                    warn!(
                        channel = %channel.name(),
                        batch_id = %batch.batch_id(),
                        attempt = attempt.transient_failures,
                        status = ?err.status(),
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DropBatch => {
                    error!(
                        channel = %channel.name(),
                        batch_id = %batch.batch_id(),
                        rows = batch.len(),
                        status = ?err.status(),
                        error = %err,
                        "Dropping batch"
                    );
                    if kind != ErrorKind::MalformedBatch {
                        channel.mark_for_reopen();
                    }
                    self.update_stats(|s| {
                        s.batches_dropped += 1;
                        s.rows_dropped += batch.len() as u64;
                    });
                    return Ok(FlushOutcome::Dropped { rows: batch.len() });
                }
                RetryDecision::Abort => {
                    error!(channel = %channel.name(), error = %err, "Fatal ingestion error");
                    return Err(err);
                }
            }
        }
    }

    async fn try_open(
        &self,
        channel: &mut ChannelSession,
        force_refresh: bool,
    ) -> Result<(), IngestError> {
        if force_refresh {
            self.refresh_token().await?;
        }
        channel.open().await?;
        Ok(())
    }

    async fn try_append(
        &self,
        channel: &mut ChannelSession,
        batch: &Batch,
        force_refresh: bool,
    ) -> Result<AppendReceipt, IngestError> {
        if force_refresh {
            self.refresh_token().await?;
        }
        if !channel.is_open() {
            info!(channel = %channel.name(), "Reopening channel");
            channel.open().await?;
        }
        channel.append(batch).await
    }

    async fn refresh_token(&self) -> Result<(), IngestError> {
        self.tokens.scoped_token(true).await?;
        self.update_stats(|s| s.token_refreshes += 1);
        Ok(())
    }

    fn ready_to_flush(&self) -> bool {
        self.lock_buffer().should_flush(Instant::now())
    }

    fn record_sent(&self, receipt: &AppendReceipt) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        stats.rows_sent += receipt.rows as u64;
        stats.batches_sent += 1;
        stats.bytes_sent += receipt.bytes as u64;

        info!(rows = receipt.rows, bytes = receipt.bytes, "Batch sent");
        if stats.batches_sent % SUMMARY_EVERY_BATCHES == 0 {
            stats.log_summary("progress");
        }
    }

    /// Drain everything still buffered, optionally verify the commit, and
    /// close the channel.
    pub async fn shutdown(&self) -> Result<IngestStats, IngestError> {
        self.set_state(ClientState::Draining);
        info!(buffered = self.buffered(), "Draining buffered readings");

        loop {
            match self.flush().await {
                Ok(FlushOutcome::Empty) => break,
                Ok(_) => {}
                Err(e) => {
                    self.close_channel().await;
                    return Err(e);
                }
            }
        }

        if self.shutdown.verify_commit {
            let mut channel = self.channel.lock().await;
            if let Err(e) = channel.verify_commit(self.shutdown.commit_timeout).await {
                warn!(channel = %channel.name(), error = %e, "Commit not verified");
            }
        }

        self.close_channel().await;

        let stats = self.stats();
        stats.log_summary("finished");
        Ok(stats)
    }

    async fn close_channel(&self) {
        let mut channel = self.channel.lock().await;
        if let Err(e) = channel.close().await {
            warn!(channel = %channel.name(), error = %e, "Failed to close channel");
        }
        self.set_state(ClientState::Closed);
    }

    /// Run until cancelled (or `max_batches` is reached), then drain.
    ///
    /// Cancellation is observed between polls and between flushes; an
    /// in-flight request always completes.
    pub async fn run(
        self: Arc<Self>,
        source: Box<dyn ReadingSource>,
        ct: CancellationToken,
    ) -> Result<IngestStats, IngestError> {
        self.start().await?;
        self.set_state(ClientState::Running);
        info!(
            simulated = source.is_simulated(),
            reading_interval_ms = self.reading_interval.as_millis() as u64,
            "Ingestion running"
        );

        let poller = tokio::spawn(Arc::clone(&self).poll_loop(source, ct.clone()));
        let result = self.flush_loop(&ct).await;

        ct.cancel();
        if let Err(e) = poller.await {
            warn!(error = %e, "Poll task ended abnormally");
        }

        match result {
            Ok(()) => self.shutdown().await,
            Err(e) => {
                self.close_channel().await;
                Err(e)
            }
        }
    }

    async fn poll_loop(self: Arc<Self>, mut source: Box<dyn ReadingSource>, ct: CancellationToken) {
        let mut ticker = tokio::time::interval(self.reading_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match source.poll() {
                Ok(reading) => {
                    source.display(&reading);
                    self.push(reading);
                }
                Err(e) => warn!(error = %e, "Sensor read failed"),
            }

            if ct.is_cancelled() {
                break;
            }
        }
        source.clear_display();
        debug!("Poll loop stopped");
    }

    async fn flush_loop(&self, ct: &CancellationToken) -> Result<(), IngestError> {
        loop {
            let deadline = self.lock_buffer().flush_deadline();
            tokio::select! {
                _ = ct.cancelled() => return Ok(()),
                _ = self.flush_ready.notified() => {}
                _ = sleep_until(deadline) => {}
            }

            while self.ready_to_flush() {
                self.flush().await?;

                if self.max_batches > 0 && self.stats().batches_sent >= self.max_batches {
                    info!(max_batches = self.max_batches, "Batch limit reached, stopping");
                    ct.cancel();
                }
                if ct.is_cancelled() {
                    return Ok(());
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for IngestionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionClient")
            .field("state", &self.state())
            .field("buffered", &self.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_throughput_without_start() {
        let stats = IngestStats::default();
        assert_eq!(stats.elapsed(), Duration::ZERO);
        assert_eq!(stats.rows_per_second(), 0.0);
    }
}
