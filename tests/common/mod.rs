//! In-process stand-in for the control plane and the ingest host.
//!
//! One fallback handler dispatches on method and path, so the
//! `:bulk-channel-status` suffix needs no special routing.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::{TimeZone, Utc};
use sensestream::auth::{Credential, CredentialSigner, TokenManager};
use sensestream::config::types::{RetryConfig, ShutdownConfig, StreamingConfig};
use sensestream::ingest::api::PipeTarget;
use sensestream::ingest::ChannelSession;
use sensestream::sensor::device::DeviceIdentity;
use sensestream::sensor::{Reading, ReadingSource, SensorError, SimulatedSensor};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const CHANNEL: &str = "TEST_CHNL_20260128_100000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAppend {
    pub continuation_token: String,
    pub offset_token: String,
    pub body: String,
    pub authorization: String,
    pub status: u16,
}

impl RecordedAppend {
    pub fn rows(&self) -> usize {
        self.body.lines().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Accepted offsets are committed at once
    Immediate,
    /// Nothing is ever reported committed
    Never,
}

#[derive(Debug)]
pub struct FakeState {
    pub hostname_calls: u32,
    pub token_calls: u32,
    pub token_delay: Duration,
    pub token_expires_in: u64,
    pub token_forms: Vec<String>,
    pub open_calls: u32,
    pub open_statuses: VecDeque<u16>,
    pub append_statuses: VecDeque<u16>,
    pub appends: Vec<RecordedAppend>,
    pub status_calls: u32,
    pub delete_calls: u32,
    pub commit_mode: CommitMode,
    pub committed_offset: Option<String>,
    /// Ordered log of handled requests, e.g. "open", "append:4", "delete"
    pub events: Vec<String>,
    continuation_seq: u32,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            hostname_calls: 0,
            token_calls: 0,
            token_delay: Duration::ZERO,
            token_expires_in: 3600,
            token_forms: Vec::new(),
            open_calls: 0,
            open_statuses: VecDeque::new(),
            append_statuses: VecDeque::new(),
            appends: Vec::new(),
            status_calls: 0,
            delete_calls: 0,
            commit_mode: CommitMode::Immediate,
            committed_offset: None,
            events: Vec::new(),
            continuation_seq: 0,
        }
    }
}

impl FakeState {
    fn next_continuation_token(&mut self) -> String {
        self.continuation_seq += 1;
        format!("ct-{}", self.continuation_seq)
    }

    pub fn accepted(&self) -> Vec<&RecordedAppend> {
        self.appends.iter().filter(|a| a.status == 200).collect()
    }
}

pub type Shared = Arc<Mutex<FakeState>>;

pub struct FakeService {
    pub base_url: String,
    pub state: Shared,
}

impl FakeService {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(FakeState::default()));
        let app = Router::new().fallback(handle).with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn script_appends(&self, statuses: &[u16]) {
        self.with(|s| s.append_statuses.extend(statuses.iter().copied()));
    }

    pub fn script_opens(&self, statuses: &[u16]) {
        self.with(|s| s.open_statuses.extend(statuses.iter().copied()));
    }

    pub fn appends(&self) -> Vec<RecordedAppend> {
        self.with(|s| s.appends.clone())
    }

    pub fn events(&self) -> Vec<String> {
        self.with(|s| s.events.clone())
    }

    pub fn token_calls(&self) -> u32 {
        self.with(|s| s.token_calls)
    }
}

fn json(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn query_param(uri: &Uri, name: &str) -> String {
    let url = reqwest::Url::parse(&format!("http://fake{}", uri)).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let body = String::from_utf8_lossy(&body).into_owned();
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    match (method.as_str(), path.as_str()) {
        ("GET", "/v2/streaming/hostname") => {
            state.lock().unwrap().hostname_calls += 1;
            json(
                StatusCode::OK,
                serde_json::json!({ "hostname": format!("http://{}", host) }),
            )
        }
        ("POST", "/oauth/token") => {
            let delay = {
                let mut s = state.lock().unwrap();
                s.token_calls += 1;
                s.token_forms.push(body);
                s.token_delay
            };
            tokio::time::sleep(delay).await;
            let (n, expires_in) = {
                let s = state.lock().unwrap();
                (s.token_calls, s.token_expires_in)
            };
            json(
                StatusCode::OK,
                serde_json::json!({ "access_token": format!("scoped-{}", n), "expires_in": expires_in }),
            )
        }
        ("PUT", p) if p.starts_with("/v2/streaming/databases/") => {
            let mut s = state.lock().unwrap();
            s.open_calls += 1;
            s.events.push("open".to_string());
            let status = s.open_statuses.pop_front().unwrap_or(200);
            if status != 200 {
                return json(
                    StatusCode::from_u16(status).unwrap(),
                    serde_json::json!({ "message": "scripted open failure" }),
                );
            }
            let token = s.next_continuation_token();
            json(
                StatusCode::OK,
                serde_json::json!({
                    "next_continuation_token": token,
                    "channel_status": { "last_committed_offset_token": s.committed_offset },
                }),
            )
        }
        ("POST", p) if p.starts_with("/v2/streaming/data/") && p.ends_with("/rows") => {
            let mut s = state.lock().unwrap();
            let status = s.append_statuses.pop_front().unwrap_or(200);
            let record = RecordedAppend {
                continuation_token: query_param(&uri, "continuationToken"),
                offset_token: query_param(&uri, "offsetToken"),
                body,
                authorization,
                status,
            };
            s.events.push(format!("append:{}", record.rows()));
            let offset = record.offset_token.clone();
            s.appends.push(record);

            if status != 200 {
                return json(
                    StatusCode::from_u16(status).unwrap(),
                    serde_json::json!({ "message": "scripted append failure" }),
                );
            }
            if s.commit_mode == CommitMode::Immediate {
                s.committed_offset = Some(offset);
            }
            let token = s.next_continuation_token();
            json(
                StatusCode::OK,
                serde_json::json!({ "next_continuation_token": token }),
            )
        }
        ("POST", p) if p.ends_with(":bulk-channel-status") => {
            let mut s = state.lock().unwrap();
            s.status_calls += 1;
            s.events.push("status".to_string());
            let request: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
            let mut statuses = serde_json::Map::new();
            if let Some(names) = request["channel_names"].as_array() {
                for name in names.iter().filter_map(|n| n.as_str()) {
                    statuses.insert(
                        name.to_string(),
                        serde_json::json!({ "committed_offset_token": s.committed_offset }),
                    );
                }
            }
            json(
                StatusCode::OK,
                serde_json::json!({ "channel_statuses": statuses }),
            )
        }
        ("DELETE", p) if p.starts_with("/v2/streaming/databases/") => {
            let mut s = state.lock().unwrap();
            s.delete_calls += 1;
            s.events.push("delete".to_string());
            json(StatusCode::OK, serde_json::json!({}))
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

// ===== Component builders =====

pub fn streaming_config() -> StreamingConfig {
    StreamingConfig {
        batch_size: 10,
        batch_interval: Duration::from_secs(5),
        reading_interval: Duration::from_millis(10),
        max_batches: 0,
        request_timeout: Duration::from_secs(5),
        token_safety_margin: Duration::from_secs(300),
        retry: RetryConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: 3,
        },
        shutdown: ShutdownConfig {
            verify_commit: true,
            commit_timeout: Duration::from_secs(2),
            commit_poll_interval: Duration::from_millis(20),
            drop_channel_on_close: false,
        },
    }
}

pub fn token_manager(service: &FakeService) -> Arc<TokenManager> {
    let credential = Credential::from_access_token("acct", "sensehat", "pat-token");
    Arc::new(TokenManager::new(
        CredentialSigner::new(credential),
        reqwest::Client::new(),
        service.base_url.clone(),
        None,
        Duration::from_secs(300),
    ))
}

pub fn target() -> PipeTarget {
    PipeTarget {
        database: "SENSORS".to_string(),
        schema: "PUBLIC".to_string(),
        pipe: "SENSEHAT_PIPE".to_string(),
    }
}

pub fn channel(tokens: &Arc<TokenManager>) -> ChannelSession {
    ChannelSession::new(Arc::clone(tokens), reqwest::Client::new(), target(), CHANNEL)
        .with_commit_poll_interval(Duration::from_millis(20))
}

pub fn sensor(seed: u64) -> SimulatedSensor {
    let identity = DeviceIdentity {
        hostname: "testpi".to_string(),
        ip_address: "10.0.0.5".to_string(),
        mac_address: "b8:27:eb:00:00:05".to_string(),
    };
    let mut second = 0;
    SimulatedSensor::with_clock(seed, identity, move || {
        second += 1;
        Utc.timestamp_opt(1_769_594_400 + second, 0).unwrap()
    })
}

pub fn readings(count: usize) -> Vec<Reading> {
    let mut sensor = sensor(11);
    (0..count).map(|_| sensor.poll().unwrap()).collect()
}

/// Yields a fixed set of readings, then fails every poll. Display calls are
/// counted.
pub struct BurstSource {
    readings: VecDeque<Reading>,
    pub shown: Arc<AtomicUsize>,
    pub cleared: Arc<AtomicBool>,
}

impl BurstSource {
    pub fn new(count: usize) -> Self {
        Self {
            readings: readings(count).into(),
            shown: Arc::new(AtomicUsize::new(0)),
            cleared: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl ReadingSource for BurstSource {
    fn poll(&mut self) -> Result<Reading, SensorError> {
        self.readings.pop_front().ok_or_else(|| SensorError::Unavailable {
            device: "burst".to_string(),
            message: "no more readings".to_string(),
        })
    }

    fn is_simulated(&self) -> bool {
        true
    }

    fn display(&mut self, _reading: &Reading) {
        self.shown.fetch_add(1, Ordering::SeqCst);
    }

    fn clear_display(&mut self) {
        self.cleared.store(true, Ordering::SeqCst);
    }
}
