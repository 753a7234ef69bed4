//! Periodic fetcher that keeps the filter pipeline's user allowlist in
//! sync with an externally-hosted active-users list.
//!
//! The upstream response shape is not guaranteed: it may be a bare array
//! of usernames, `{"users": [...]}`, `{"usernames": [...]}`, or an array
//! of objects each carrying a `username` field. All four are accepted.

use std::fmt;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use filter_pipeline::FilterPipeline;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum FetchError {
    Http(String),
    Parse(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Http(msg) => write!(f, "active users request failed: {msg}"),
            FetchError::Parse(msg) => write!(f, "active users response unparseable: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

struct Cache {
    users: Vec<String>,
}

pub struct ActiveUsersFetcher {
    http: reqwest::Client,
    base_url: String,
    filters: Arc<FilterPipeline>,
    cache: RwLock<Cache>,
    stop: Notify,
}

impl ActiveUsersFetcher {
    pub fn new(base_url: String, filters: Arc<FilterPipeline>, initial_users: Vec<String>) -> Arc<Self> {
        let fetcher = Arc::new(ActiveUsersFetcher {
            http: reqwest::Client::new(),
            base_url,
            filters,
            cache: RwLock::new(Cache { users: initial_users.clone() }),
            stop: Notify::new(),
        });
        if !initial_users.is_empty() {
            fetcher.filters.set_users(initial_users);
        }
        fetcher
    }

    pub async fn fetch_once(&self) -> Result<Vec<String>, FetchError> {
        let response = self
            .http
            .get(&self.base_url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|err| FetchError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Http(format!("unexpected status {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| FetchError::Parse(err.to_string()))?;

        parse_users(&body)
    }

    /// Fetch and apply; on failure, keeps serving the last good list and
    /// logs the error rather than clearing the filter's users.
    pub async fn refresh(&self) {
        match self.fetch_once().await {
            Ok(users) => {
                self.cache.write().expect("lock poisoned").users = users.clone();
                self.filters.set_users(users);
            }
            Err(err) => {
                tracing::warn!(error = %err, "active users refresh failed, keeping stale cache");
            }
        }
    }

    pub fn cached_users(&self) -> Vec<String> {
        self.cache.read().expect("lock poisoned").users.clone()
    }

    pub fn start_periodic_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let fetcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => fetcher.refresh().await,
                    () = fetcher.stop.notified() => return,
                }
            }
        })
    }

    pub fn stop_periodic_refresh(&self) {
        self.stop.notify_waiters();
    }
}

fn parse_users(body: &Value) -> Result<Vec<String>, FetchError> {
    if let Some(array) = body.as_array() {
        return extract_from_array(array);
    }
    if let Some(array) = body.get("users").and_then(Value::as_array) {
        return extract_from_array(array);
    }
    if let Some(array) = body.get("usernames").and_then(Value::as_array) {
        return extract_from_array(array);
    }
    Err(FetchError::Parse("expected an array, {users: [...]}, or {usernames: [...]}".to_string()))
}

fn extract_from_array(array: &[Value]) -> Result<Vec<String>, FetchError> {
    array
        .iter()
        .map(|item| {
            if let Some(s) = item.as_str() {
                return Ok(s.to_string());
            }
            if let Some(username) = item.get("username").and_then(Value::as_str) {
                return Ok(username.to_string());
            }
            Err(FetchError::Parse(format!("unrecognized user entry: {item}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bare_array() {
        let users = parse_users(&json!(["alice", "bob"])).unwrap();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[test]
    fn parses_users_wrapper() {
        let users = parse_users(&json!({"users": ["alice"]})).unwrap();
        assert_eq!(users, vec!["alice"]);
    }

    #[test]
    fn parses_usernames_wrapper() {
        let users = parse_users(&json!({"usernames": ["alice"]})).unwrap();
        assert_eq!(users, vec!["alice"]);
    }

    #[test]
    fn parses_array_of_objects() {
        let users = parse_users(&json!([{"username": "alice", "id": 1}])).unwrap();
        assert_eq!(users, vec!["alice"]);
    }

    #[test]
    fn rejects_unrecognized_shape() {
        let result = parse_users(&json!({"foo": "bar"}));
        assert!(result.is_err());
    }
}
