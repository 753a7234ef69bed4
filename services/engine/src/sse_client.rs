//! StreamCore: owns the upstream SSE connection, parses frames, and routes
//! survivors through dedup, filtering, and the event bus.
//!
//! The frame parser is a line-buffering accumulator in the same shape used
//! elsewhere for `bytes_stream()` consumers: it tolerates SSE events split
//! across TCP chunk boundaries and emits complete `data:` payloads only
//! once a full blank-line-terminated event has arrived.

use std::fmt;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::Notify;

use dedup_cache::DedupCache;
use event_bus::EventBus;
use filter_pipeline::FilterPipeline;
use stream_protocol::{Channel, ConnState, RuntimeSubscriptionState, SubscriptionMode, SubscriptionSource, TwitterEvent};

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_RETRIES_PER_ENDPOINT: u32 = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const IDLE_READ_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum StreamCoreError {
    /// Fatal at startup: every initial candidate failed transiently.
    Config(String),
    /// Fatal at runtime: the upstream rejected our credentials.
    Auth(String),
}

impl fmt::Display for StreamCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamCoreError::Config(msg) => write!(f, "config error: {msg}"),
            StreamCoreError::Auth(msg) => write!(f, "auth error: {msg}"),
        }
    }
}

impl std::error::Error for StreamCoreError {}

enum ConnectOutcome {
    Connected(reqwest::Response),
    Transient(String),
    Auth(String),
}

#[derive(Debug, Clone, Copy)]
pub struct StreamCoreStats {
    pub connection_status: ConnState,
    pub current_endpoint: Option<Channel>,
    pub total_events: u64,
    pub delivered_events: u64,
    pub deduped_events: u64,
    pub start_time: Option<DateTime<Utc>>,
}

struct State {
    status: ConnState,
    current_endpoint: Option<Channel>,
    endpoints: Vec<Channel>,
    total_events: u64,
    delivered_events: u64,
    deduped_events: u64,
    start_time: Option<DateTime<Utc>>,
    subscription: RuntimeSubscriptionState,
}

/// SSE client with automatic reconnect, endpoint rotation, and
/// per-connection statistics.
pub struct StreamCore {
    http: reqwest::Client,
    base_url: String,
    token: String,
    dedup: Arc<DedupCache>,
    filters: Arc<FilterPipeline>,
    bus: Arc<EventBus<TwitterEvent>>,
    state: RwLock<State>,
    running: AtomicBool,
    stop_notify: Notify,
    resubscribe_notify: Notify,
}

impl StreamCore {
    pub fn new(
        base_url: String,
        token: String,
        endpoints: Vec<Channel>,
        dedup: Arc<DedupCache>,
        filters: Arc<FilterPipeline>,
        bus: Arc<EventBus<TwitterEvent>>,
    ) -> Arc<Self> {
        let subscription = RuntimeSubscriptionState {
            channels: endpoints.clone(),
            users: Vec::new(),
            mode: SubscriptionMode::Active,
            source: SubscriptionSource::Config,
            updated_at: Utc::now().to_rfc3339(),
        };
        Arc::new(StreamCore {
            http: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build http client"),
            base_url,
            token,
            dedup,
            filters,
            bus,
            state: RwLock::new(State {
                status: ConnState::Disconnected,
                current_endpoint: None,
                endpoints,
                total_events: 0,
                delivered_events: 0,
                deduped_events: 0,
                start_time: None,
                subscription,
            }),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
            resubscribe_notify: Notify::new(),
        })
    }

    /// Begin streaming. Idempotent when already running. Fails with
    /// `StreamCoreError::Config` if the first three endpoint candidates
    /// are all transiently unreachable, or `StreamCoreError::Auth` if the
    /// upstream rejects the bearer token.
    pub async fn start(self: &Arc<Self>) -> Result<(), StreamCoreError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let endpoints = self.state.read().expect("lock poisoned").endpoints.clone();
        if endpoints.is_empty() {
            self.running.store(false, Ordering::SeqCst);
            return Err(StreamCoreError::Config("no endpoint candidates configured".to_string()));
        }

        let probe_count = endpoints.len().min(3);
        let mut last_transient = None;
        let mut connected = None;
        for (idx, candidate) in endpoints.iter().enumerate().take(probe_count) {
            match self.connect_once(*candidate).await {
                ConnectOutcome::Connected(resp) => {
                    connected = Some((idx, resp));
                    break;
                }
                ConnectOutcome::Auth(msg) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(StreamCoreError::Auth(msg));
                }
                ConnectOutcome::Transient(msg) => last_transient = Some(msg),
            }
        }

        let (start_idx, response) = match connected {
            Some(pair) => pair,
            None => {
                self.running.store(false, Ordering::SeqCst);
                return Err(StreamCoreError::Config(
                    last_transient.unwrap_or_else(|| "unreachable".to_string()),
                ));
            }
        };

        {
            let mut state = self.state.write().expect("lock poisoned");
            state.start_time = Some(Utc::now());
        }
        self.set_connected(endpoints[start_idx]);

        let core = Arc::clone(self);
        tokio::spawn(async move {
            core.run(start_idx, Some(response)).await;
        });
        Ok(())
    }

    /// Cease streaming. The in-flight read is cancelled promptly and the
    /// reconnect loop exits.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        self.set_status(ConnState::Disconnected);
    }

    pub fn get_stats(&self) -> StreamCoreStats {
        let state = self.state.read().expect("lock poisoned");
        StreamCoreStats {
            connection_status: state.status,
            current_endpoint: state.current_endpoint,
            total_events: state.total_events,
            delivered_events: state.delivered_events,
            deduped_events: state.deduped_events,
            start_time: state.start_time,
        }
    }

    pub fn get_runtime_subscription(&self) -> RuntimeSubscriptionState {
        self.state.read().expect("lock poisoned").subscription.clone()
    }

    /// Apply a new channel/user subscription. Closes the current
    /// connection and reopens against the new endpoint list.
    pub fn apply_runtime_subscription(&self, channels: Vec<Channel>, users: Vec<String>) -> RuntimeSubscriptionState {
        let new_state = RuntimeSubscriptionState {
            channels: channels.clone(),
            users,
            mode: SubscriptionMode::Active,
            source: SubscriptionSource::Runtime,
            updated_at: Utc::now().to_rfc3339(),
        };
        {
            let mut state = self.state.write().expect("lock poisoned");
            state.endpoints = channels;
            state.subscription = new_state.clone();
        }
        self.resubscribe_notify.notify_waiters();
        new_state
    }

    fn set_status(&self, status: ConnState) {
        self.state.write().expect("lock poisoned").status = status;
    }

    fn set_connected(&self, endpoint: Channel) {
        let mut state = self.state.write().expect("lock poisoned");
        state.status = ConnState::Connected;
        state.current_endpoint = Some(endpoint);
    }

    async fn connect_once(&self, candidate: Channel) -> ConnectOutcome {
        let url = format!("{}/sse/{}", self.base_url.trim_end_matches('/'), candidate.as_str());
        let request = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .header("Accept", "text/event-stream");

        match request.send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::UNAUTHORIZED
                || resp.status() == reqwest::StatusCode::FORBIDDEN =>
            {
                ConnectOutcome::Auth(format!("upstream rejected credentials: {}", resp.status()))
            }
            Ok(resp) if resp.status().is_success() => ConnectOutcome::Connected(resp),
            Ok(resp) => ConnectOutcome::Transient(format!("unexpected status {}", resp.status())),
            Err(err) => ConnectOutcome::Transient(err.to_string()),
        }
    }

    async fn run(self: Arc<Self>, mut candidate_idx: usize, mut pending_response: Option<reqwest::Response>) {
        let mut attempt = 0u32;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                self.set_status(ConnState::Disconnected);
                return;
            }

            let endpoints = self.state.read().expect("lock poisoned").endpoints.clone();
            if endpoints.is_empty() {
                self.set_status(ConnState::Disconnected);
                return;
            }
            candidate_idx %= endpoints.len();

            let response = match pending_response.take() {
                Some(resp) => resp,
                None => {
                    // The only way to reach this branch is after a prior
                    // successful connection was lost; the public status set
                    // has no distinct "connecting" value (spec's three-value
                    // contract), so this counts as reconnecting.
                    self.set_status(ConnState::Reconnecting);
                    match self.connect_once(endpoints[candidate_idx]).await {
                        ConnectOutcome::Connected(resp) => resp,
                        ConnectOutcome::Auth(msg) => {
                            tracing::error!(error = %msg, "stream core stopped: auth rejected");
                            self.running.store(false, Ordering::SeqCst);
                            self.set_status(ConnState::Disconnected);
                            return;
                        }
                        ConnectOutcome::Transient(msg) => {
                            tracing::warn!(error = %msg, candidate = ?endpoints[candidate_idx], "transient connect failure");
                            attempt += 1;
                            if attempt >= MAX_RETRIES_PER_ENDPOINT {
                                candidate_idx = (candidate_idx + 1) % endpoints.len();
                                attempt = 0;
                            }
                            if self.wait_backoff_or_signal(attempt).await {
                                return;
                            }
                            continue;
                        }
                    }
                }
            };

            self.set_connected(endpoints[candidate_idx]);
            attempt = 0;

            match self.read_frames(response).await {
                ReadOutcome::StopRequested => {
                    self.set_status(ConnState::Disconnected);
                    return;
                }
                ReadOutcome::Resubscribe => {
                    // Endpoint list already updated by apply_runtime_subscription.
                    candidate_idx = 0;
                }
                ReadOutcome::Closed => {
                    self.set_status(ConnState::Reconnecting);
                    attempt += 1;
                    if self.wait_backoff_or_signal(attempt).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep for the backoff window, returning `true` if a stop was
    /// requested while waiting (caller should exit the loop).
    async fn wait_backoff_or_signal(&self, attempt: u32) -> bool {
        let delay = backoff_delay(attempt);
        tokio::select! {
            () = tokio::time::sleep(delay) => false,
            () = self.stop_notify.notified() => true,
        }
    }

    async fn read_frames(&self, response: reqwest::Response) -> ReadOutcome {
        let mut byte_stream = response.bytes_stream();
        let mut parser = SseFrameBuffer::new();

        loop {
            let next = tokio::select! {
                next = tokio::time::timeout(IDLE_READ_TIMEOUT, byte_stream.next()) => next,
                () = self.stop_notify.notified() => return ReadOutcome::StopRequested,
                () = self.resubscribe_notify.notified() => return ReadOutcome::Resubscribe,
            };

            match next {
                Ok(Some(Ok(bytes))) => {
                    for payload in parser.feed(&bytes) {
                        self.handle_payload(&payload);
                    }
                }
                Ok(Some(Err(err))) => {
                    tracing::warn!(error = %err, "sse read error");
                    return ReadOutcome::Closed;
                }
                Ok(None) => {
                    for payload in parser.flush() {
                        self.handle_payload(&payload);
                    }
                    return ReadOutcome::Closed;
                }
                Err(_) => {
                    tracing::warn!("sse idle read timeout");
                    return ReadOutcome::Closed;
                }
            }
        }
    }

    fn handle_payload(&self, payload: &str) {
        let event: TwitterEvent = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unparseable sse frame");
                return;
            }
        };
        self.process_event(event);
    }

    fn process_event(&self, event: TwitterEvent) {
        {
            let mut state = self.state.write().expect("lock poisoned");
            state.total_events += 1;
        }

        if !event.primary_id.is_empty() && self.dedup.seen(&event.primary_id) {
            let mut state = self.state.write().expect("lock poisoned");
            state.deduped_events += 1;
            return;
        }

        if self.filters.should_display_event(&event, None) {
            {
                let mut state = self.state.write().expect("lock poisoned");
                state.delivered_events += 1;
            }
            self.bus.publish("events", event.clone());
            self.bus.publish("alerts", event);
        }
    }
}

enum ReadOutcome {
    StopRequested,
    Resubscribe,
    Closed,
}

fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = BASE_BACKOFF.as_millis() as u64;
    let exp = base_ms.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(MAX_BACKOFF.as_millis() as u64);
    let jitter = rand::random::<u64>() % (base_ms + 1);
    Duration::from_millis(capped + jitter)
}

/// Line-buffering SSE parser: accumulates bytes until a blank-line
/// terminated event is complete, then returns the joined `data:` payload.
struct SseFrameBuffer {
    buffer: String,
    pending_data: Vec<String>,
}

impl SseFrameBuffer {
    fn new() -> Self {
        SseFrameBuffer {
            buffer: String::new(),
            pending_data: Vec::new(),
        }
    }

    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line = self.buffer[..pos].trim_end_matches('\r').to_string();
            self.buffer = self.buffer[pos + 1..].to_string();
            self.consume_line(&line, &mut frames);
        }
        frames
    }

    fn flush(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.consume_line(&line, &mut frames);
        }
        if !self.pending_data.is_empty() {
            frames.push(self.pending_data.join("\n"));
            self.pending_data.clear();
        }
        frames
    }

    fn consume_line(&mut self, line: &str, frames: &mut Vec<String>) {
        if line.is_empty() {
            if !self.pending_data.is_empty() {
                frames.push(self.pending_data.join("\n"));
                self.pending_data.clear();
            }
            return;
        }
        if let Some(data) = line.strip_prefix("data:") {
            self.pending_data.push(data.trim_start().to_string());
        }
        // event:/id:/retry:/comment lines carry no payload semantics here.
    }
}
