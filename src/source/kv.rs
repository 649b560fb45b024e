//! Key-value store origin, driven by the store's watch primitive.
//!
//! # Responsibilities
//! - Read the configuration key once at init
//! - Follow the key's watch stream and publish each new value
//! - Reconnect with backoff when the stream breaks, then re-read the key
//!
//! # Data Flow
//! ```text
//! KvStore::watch(key) ──Put(bytes)──▶ ContentCache::refresh ──▶ try_send
//!        │ error / end of stream
//!        ▼
//! backoff → KvStore::watch(key) → KvStore::get(key) (catch up)
//! ```
//!
//! # Design Decisions
//! - A Delete keeps the last good snapshot; absence is not a config
//! - `EtcdGateway` speaks the etcd v3 JSON gateway, so no gRPC stack is needed
//! - `MemoryStore` serves embedding and tests with the same contract

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{ConfigFormat, Snapshot};
use crate::lifecycle::shutdown::CancelToken;
use crate::observability::metrics;
use crate::pipeline::ChangeEvent;
use crate::resilience::Backoff;
use crate::source::cache::{publish, ContentCache, Delivery};
use crate::source::{wait_or_cancel, ConfigSource, SourceError};

/// Buffered updates per watch stream.
const WATCH_BUFFER: usize = 16;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A change to a watched key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvUpdate {
    Put(Vec<u8>),
    Delete,
}

/// Stream of updates for one key. Ends when the underlying watch breaks.
pub type KvWatch = mpsc::Receiver<Result<KvUpdate, SourceError>>;

/// Minimal key-value store contract.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Current value of `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SourceError>;

    /// Start watching `key`.
    async fn watch(&self, key: &str) -> Result<KvWatch, SourceError>;

    /// Endpoint description for logs.
    fn describe(&self) -> String;
}

/// Configuration read from one key of a [`KvStore`].
pub struct KvSource<S> {
    store: S,
    key: String,
    cache: ContentCache,
    backoff: Backoff,
}

impl<S: KvStore> KvSource<S> {
    pub fn new(store: S, key: impl Into<String>, format: ConfigFormat) -> Self {
        Self {
            store,
            key: key.into(),
            cache: ContentCache::new(format),
            backoff: Backoff::default(),
        }
    }

    /// Override the reconnect backoff.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Re-read the key after (re)connecting so missed updates are applied.
    async fn catch_up(&self, events: &mpsc::Sender<ChangeEvent>, origin: &str) -> Delivery {
        match self.store.get(&self.key).await {
            Ok(Some(raw)) => publish(&self.cache, &raw, events, origin),
            Ok(None) => {
                tracing::warn!(origin = %origin, "Key is absent, keeping current snapshot");
                Delivery::Sent
            }
            Err(e) => {
                metrics::record_origin_read_failure("etcd");
                tracing::warn!(origin = %origin, error = %e, "Catch-up read failed");
                Delivery::Sent
            }
        }
    }
}

#[async_trait]
impl<S: KvStore> ConfigSource for KvSource<S> {
    async fn init(&self) -> Result<(), SourceError> {
        let raw = self
            .store
            .get(&self.key)
            .await?
            .ok_or_else(|| SourceError::KeyNotFound(self.key.clone()))?;
        let snapshot = self.cache.prime(&raw)?;
        tracing::info!(
            origin = %self.origin(),
            revision = snapshot.revision(),
            "Initial configuration loaded"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        events: mpsc::Sender<ChangeEvent>,
        mut cancel: CancelToken,
    ) -> Result<(), SourceError> {
        if self.cache.current().is_none() {
            return Err(SourceError::NotInitialized);
        }
        let origin = self.origin();
        let mut backoff = self.backoff.clone();

        'session: loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => None,
                result = self.store.watch(&self.key) => Some(result),
            };
            let mut watch = match connected {
                None => break 'session,
                Some(Ok(watch)) => watch,
                Some(Err(e)) => {
                    metrics::record_origin_read_failure("etcd");
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        origin = %origin,
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_in_ms = delay.as_millis() as u64,
                        "Watch connect failed"
                    );
                    if wait_or_cancel(&mut cancel, delay).await {
                        break 'session;
                    }
                    continue 'session;
                }
            };

            if backoff.attempt() > 0 {
                tracing::info!(origin = %origin, attempts = backoff.attempt(), "Watch reconnected");
            }
            backoff.reset();
            if self.catch_up(&events, &origin).await == Delivery::Closed {
                break 'session;
            }

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break 'session,
                    next = watch.recv() => next,
                };
                match next {
                    Some(Ok(KvUpdate::Put(raw))) => {
                        if cancel.is_cancelled() {
                            break 'session;
                        }
                        if publish(&self.cache, &raw, &events, &origin) == Delivery::Closed {
                            break 'session;
                        }
                    }
                    Some(Ok(KvUpdate::Delete)) => {
                        tracing::warn!(origin = %origin, "Key deleted, keeping current snapshot");
                    }
                    Some(Err(e)) => {
                        metrics::record_origin_read_failure("etcd");
                        tracing::warn!(origin = %origin, error = %e, "Watch stream failed");
                        break;
                    }
                    None => {
                        tracing::warn!(origin = %origin, "Watch stream ended");
                        break;
                    }
                }
            }

            let delay = backoff.next_delay();
            if wait_or_cancel(&mut cancel, delay).await {
                break 'session;
            }
        }

        drop(events);
        tracing::info!(origin = %origin, "KV watch stopped");
        Ok(())
    }

    fn current_snapshot(&self) -> Result<Arc<Snapshot>, SourceError> {
        self.cache.current().ok_or(SourceError::NotInitialized)
    }

    fn origin(&self) -> String {
        format!("{}{}", self.store.describe(), self.key)
    }
}

// ---------------------------------------------------------------------------
// In-process store
// ---------------------------------------------------------------------------

type Watchers = HashMap<String, Vec<mpsc::Sender<Result<KvUpdate, SourceError>>>>;

#[derive(Default)]
struct MemoryInner {
    values: HashMap<String, Vec<u8>>,
    watchers: Watchers,
}

/// In-process key-value store. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        self.with_inner(|inner| {
            inner.values.insert(key.to_string(), value.clone());
            notify(&mut inner.watchers, key, || Ok(KvUpdate::Put(value.clone())));
        });
    }

    pub fn delete(&self, key: &str) {
        self.with_inner(|inner| {
            inner.values.remove(key);
            notify(&mut inner.watchers, key, || Ok(KvUpdate::Delete));
        });
    }

    /// Break every watch on `key` with an error, as a lost connection would.
    pub fn break_watches(&self, key: &str) {
        self.with_inner(|inner| {
            if let Some(senders) = inner.watchers.remove(key) {
                for tx in senders {
                    let _ = tx.try_send(Err(SourceError::Watch("connection lost".to_string())));
                }
            }
        });
    }

    /// Number of live watches on `key`.
    pub fn watcher_count(&self, key: &str) -> usize {
        self.with_inner(|inner| {
            inner
                .watchers
                .get(key)
                .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
                .unwrap_or(0)
        })
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut MemoryInner) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

fn notify(
    watchers: &mut Watchers,
    key: &str,
    update: impl Fn() -> Result<KvUpdate, SourceError>,
) {
    if let Some(senders) = watchers.get_mut(key) {
        senders.retain(|tx| match tx.try_send(update()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(key = %key, "Watcher lagging, update dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SourceError> {
        Ok(self.with_inner(|inner| inner.values.get(key).cloned()))
    }

    async fn watch(&self, key: &str) -> Result<KvWatch, SourceError> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.with_inner(|inner| inner.watchers.entry(key.to_string()).or_default().push(tx));
        Ok(rx)
    }

    fn describe(&self) -> String {
        "memory:".to_string()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// etcd v3 JSON gateway
// ---------------------------------------------------------------------------

/// etcd client over the v3 JSON gateway (`/v3/kv/range`, `/v3/watch`).
///
/// Endpoints are tried in order; the first that answers wins. When a
/// username is configured each request first obtains a token from
/// `/v3/auth/authenticate`.
pub struct EtcdGateway {
    client: reqwest::Client,
    endpoints: Vec<Url>,
    username: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RangeResponse {
    kvs: Vec<KeyValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KeyValue {
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WatchFrame {
    result: Option<WatchResult>,
    error: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WatchResult {
    events: Vec<WatchEvent>,
    canceled: bool,
    cancel_reason: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WatchEvent {
    /// Absent for PUT; the gateway omits enum zero values.
    #[serde(rename = "type")]
    kind: Option<String>,
    kv: Option<KeyValue>,
}

impl EtcdGateway {
    pub fn new(endpoints: &[String], username: &str, password: &str) -> Result<Self, SourceError> {
        let endpoints = endpoints
            .iter()
            .map(|e| parse_endpoint(e))
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(SourceError::KvStore("no endpoints configured".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SourceError::KvStore(e.to_string()))?;
        Ok(Self {
            client,
            endpoints,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    async fn token(&self, endpoint: &Url) -> Result<Option<String>, SourceError> {
        if self.username.is_empty() {
            return Ok(None);
        }
        let url = join(endpoint, "v3/auth/authenticate")?;
        let body = serde_json::json!({ "name": self.username, "password": self.password });
        let response = self
            .client
            .post(url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::KvStore(format!("authenticate: {}", e)))?;
        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| SourceError::KvStore(format!("authenticate: {}", e)))?;
        Ok(Some(auth.token))
    }

    /// POST `body` to `path` on the first endpoint that accepts it.
    async fn post(
        &self,
        path: &str,
        body: &serde_json::Value,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, SourceError> {
        let mut last_error = String::new();
        for endpoint in &self.endpoints {
            let attempt = async {
                let url = join(endpoint, path)?;
                let mut request = self.client.post(url).json(body);
                if let Some(timeout) = timeout {
                    request = request.timeout(timeout);
                }
                if let Some(token) = self.token(endpoint).await? {
                    request = request.header(reqwest::header::AUTHORIZATION, token);
                }
                request
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| SourceError::KvStore(e.to_string()))
            };
            match attempt.await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    tracing::debug!(endpoint = %endpoint, error = %e, "etcd endpoint failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(SourceError::KvStore(format!(
            "all {} endpoints failed, last error: {}",
            self.endpoints.len(),
            last_error
        )))
    }
}

#[async_trait]
impl KvStore for EtcdGateway {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, SourceError> {
        let body = serde_json::json!({ "key": STANDARD.encode(key) });
        let response = self.post("v3/kv/range", &body, Some(REQUEST_TIMEOUT)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::KvStore(e.to_string()))?;
        parse_range(&bytes)
    }

    async fn watch(&self, key: &str) -> Result<KvWatch, SourceError> {
        let body = serde_json::json!({ "create_request": { "key": STANDARD.encode(key) } });
        let response = self.post("v3/watch", &body, None).await?;

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        tokio::spawn(forward_watch(response, tx));
        Ok(rx)
    }

    fn describe(&self) -> String {
        let first = self
            .endpoints
            .first()
            .map(|u| u.as_str().trim_end_matches('/').to_string())
            .unwrap_or_default();
        format!("etcd:{}", first)
    }
}

impl fmt::Debug for EtcdGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EtcdGateway")
            .field("endpoints", &self.endpoints)
            .field("username", &self.username)
            .finish()
    }
}

/// Split the streaming watch body into frames and forward the updates.
///
/// Ends when the body ends, on a transport error, or as soon as the
/// receiver is dropped, even if the key stays idle.
async fn forward_watch(
    response: reqwest::Response,
    tx: mpsc::Sender<Result<KvUpdate, SourceError>>,
) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let chunk = tokio::select! {
            _ = tx.closed() => {
                tracing::debug!("etcd watch receiver dropped, closing stream");
                return;
            }
            chunk = stream.next() => chunk,
        };
        let chunk = match chunk {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                let _ = tx.send(Err(SourceError::Watch(e.to_string()))).await;
                return;
            }
            None => return,
        };
        buffer.extend_from_slice(&chunk);
        while let Some(end) = buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=end).collect();
            for update in parse_watch_frame(&line) {
                if tx.send(update).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Accept `host:port` as well as full URLs.
fn parse_endpoint(endpoint: &str) -> Result<Url, SourceError> {
    let endpoint = endpoint.trim();
    let candidate = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };
    Url::parse(&candidate)
        .map_err(|e| SourceError::KvStore(format!("endpoint '{}': {}", endpoint, e)))
}

fn join(endpoint: &Url, path: &str) -> Result<Url, SourceError> {
    endpoint
        .join(path)
        .map_err(|e| SourceError::KvStore(format!("{}{}: {}", endpoint, path, e)))
}

fn decode_value(kv: &KeyValue) -> Result<Vec<u8>, SourceError> {
    STANDARD
        .decode(&kv.value)
        .map_err(|e| SourceError::KvStore(format!("bad base64 value: {}", e)))
}

fn parse_range(body: &[u8]) -> Result<Option<Vec<u8>>, SourceError> {
    let range: RangeResponse =
        serde_json::from_slice(body).map_err(|e| SourceError::KvStore(e.to_string()))?;
    range.kvs.first().map(decode_value).transpose()
}

/// Translate one newline-delimited gateway frame into updates.
fn parse_watch_frame(line: &[u8]) -> Vec<Result<KvUpdate, SourceError>> {
    let start = line.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(line.len());
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    let line = &line[start..end];
    if line.is_empty() {
        return Vec::new();
    }
    let frame: WatchFrame = match serde_json::from_slice(line) {
        Ok(frame) => frame,
        Err(e) => return vec![Err(SourceError::Watch(format!("bad frame: {}", e)))],
    };
    if let Some(error) = frame.error {
        return vec![Err(SourceError::Watch(error.to_string()))];
    }
    let Some(result) = frame.result else {
        return Vec::new();
    };
    if result.canceled {
        return vec![Err(SourceError::Watch(format!(
            "watch canceled: {}",
            result.cancel_reason
        )))];
    }

    result
        .events
        .iter()
        .map(|event| match event.kind.as_deref() {
            Some("DELETE") => Ok(KvUpdate::Delete),
            _ => match &event.kv {
                Some(kv) => decode_value(kv).map(KvUpdate::Put),
                None => Ok(KvUpdate::Put(Vec::new())),
            },
        })
        .collect()
}
