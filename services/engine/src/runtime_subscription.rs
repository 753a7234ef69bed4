//! Validation and application of `getRuntimeSubscription` /
//! `setRuntimeSubscription` dashboard RPCs against a running `StreamCore`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use stream_protocol::{Channel, RuntimeSubscriptionState};

use crate::sse_client::StreamCore;

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq)]
pub enum RpcError {
    NotConnected,
    NotInitialized,
    InvalidChannel(String),
    InvalidUser(String),
    Timeout,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::NotConnected => write!(f, "Socket not connected"),
            RpcError::NotInitialized => write!(f, "StreamCore not initialized"),
            RpcError::InvalidChannel(value) => write!(f, "Invalid channel: {value}"),
            RpcError::InvalidUser(value) => write!(f, "Invalid user: {value}"),
            RpcError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for RpcError {}

pub fn get_runtime_subscription(core: Option<&Arc<StreamCore>>) -> Result<RuntimeSubscriptionState, RpcError> {
    let core = core.ok_or(RpcError::NotInitialized)?;
    Ok(core.get_runtime_subscription())
}

/// Validate and apply a new subscription. Invalid channel or user values
/// are rejected before anything is mutated; `all` is normalised to be
/// exclusive of every other channel.
pub async fn set_runtime_subscription(
    core: Option<&Arc<StreamCore>>,
    raw_channels: Vec<String>,
    raw_users: Vec<String>,
) -> Result<RuntimeSubscriptionState, RpcError> {
    let core = core.ok_or(RpcError::NotInitialized)?;

    let channels = normalize_channels(raw_channels)?;
    let users = normalize_users(raw_users)?;

    let core = Arc::clone(core);
    match tokio::time::timeout(
        RPC_TIMEOUT,
        async move { core.apply_runtime_subscription(channels, users) },
    )
    .await
    {
        Ok(state) => Ok(state),
        Err(_elapsed) => Err(RpcError::Timeout),
    }
}

fn normalize_channels(raw: Vec<String>) -> Result<Vec<Channel>, RpcError> {
    let mut parsed = Vec::with_capacity(raw.len());
    for value in raw {
        let channel = Channel::parse(&value).ok_or_else(|| RpcError::InvalidChannel(value.clone()))?;
        if !parsed.contains(&channel) {
            parsed.push(channel);
        }
    }
    if parsed.is_empty() {
        parsed.push(Channel::All);
    }
    if parsed.contains(&Channel::All) {
        return Ok(vec![Channel::All]);
    }
    Ok(parsed)
}

fn normalize_users(raw: Vec<String>) -> Result<Vec<String>, RpcError> {
    let mut seen = std::collections::HashSet::new();
    let mut users = Vec::new();
    for value in raw {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(RpcError::InvalidUser(value));
        }
        let lower = trimmed.to_lowercase();
        if seen.insert(lower.clone()) {
            users.push(lower);
        }
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_channel_name() {
        let result = normalize_channels(vec!["bogus".to_string()]);
        assert_eq!(result, Err(RpcError::InvalidChannel("bogus".to_string())));
    }

    #[test]
    fn all_absorbs_other_channels() {
        let result = normalize_channels(vec!["tweets".to_string(), "all".to_string()]).unwrap();
        assert_eq!(result, vec![Channel::All]);
    }

    #[test]
    fn empty_channel_list_defaults_to_all() {
        let result = normalize_channels(vec![]).unwrap();
        assert_eq!(result, vec![Channel::All]);
    }

    #[test]
    fn deduplicates_and_lowercases_users() {
        let result = normalize_users(vec!["Alice".to_string(), "alice".to_string(), "Bob".to_string()]).unwrap();
        assert_eq!(result, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn rejects_blank_user() {
        let result = normalize_users(vec!["  ".to_string()]);
        assert!(matches!(result, Err(RpcError::InvalidUser(_))));
    }
}
