//! Wire and domain types shared between the ingest engine and its dashboard
//! clients: the upstream `TwitterEvent` shape, the runtime subscription
//! state, the health snapshot, and the dashboard WebSocket message set.
//!
//! `TwitterEvent::data` is a tagged union discriminated by the sibling
//! `type` field rather than by a tag embedded in `data` itself, so it gets
//! a hand-written `Deserialize` impl instead of `#[serde(tag = ...)]`.

use serde::{Deserialize, Serialize, de};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Event type / channel enums
// ---------------------------------------------------------------------------

/// The seven upstream activity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PostCreated,
    PostUpdated,
    ProfileUpdated,
    ProfilePinned,
    FollowCreated,
    FollowUpdated,
    UserUpdated,
}

impl EventType {
    /// All seven variants, in a stable order. Used as the default
    /// event-type filter set.
    pub const ALL: [EventType; 7] = [
        EventType::PostCreated,
        EventType::PostUpdated,
        EventType::ProfileUpdated,
        EventType::ProfilePinned,
        EventType::FollowCreated,
        EventType::FollowUpdated,
        EventType::UserUpdated,
    ];

    fn payload_kind(self) -> PayloadKind {
        match self {
            EventType::PostCreated | EventType::PostUpdated => PayloadKind::Post,
            EventType::ProfileUpdated | EventType::ProfilePinned | EventType::UserUpdated => {
                PayloadKind::Profile
            }
            EventType::FollowCreated | EventType::FollowUpdated => PayloadKind::Follow,
        }
    }
}

enum PayloadKind {
    Post,
    Profile,
    Follow,
}

/// Upstream endpoint selector. `All` is mutually exclusive with the rest;
/// callers are expected to normalise before storing a set of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    All,
    Tweets,
    Following,
    Profile,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::All => "all",
            Channel::Tweets => "tweets",
            Channel::Following => "following",
            Channel::Profile => "profile",
        }
    }

    pub fn parse(value: &str) -> Option<Channel> {
        match value {
            "all" => Some(Channel::All),
            "tweets" => Some(Channel::Tweets),
            "following" => Some(Channel::Following),
            "profile" => Some(Channel::Profile),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Event payload types
// ---------------------------------------------------------------------------

/// Identity triple carried on every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventUser {
    pub username: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetMetrics {
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub retweets: u64,
    #[serde(default)]
    pub replies: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    #[serde(rename = "type")]
    pub media_type: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetAuthorProfile {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetAuthor {
    pub profile: TweetAuthorProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TweetBody {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tweet {
    #[serde(default)]
    pub body: Option<TweetBody>,
    #[serde(default)]
    pub author: Option<TweetAuthor>,
    #[serde(default)]
    pub metrics: Option<TweetMetrics>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

/// Payload for `post_created` / `post_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostData {
    #[serde(rename = "tweetId")]
    pub tweet_id: String,
    pub username: String,
    pub action: String,
    #[serde(default)]
    pub tweet: Option<Tweet>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileDescription {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub name: String,
    #[serde(default)]
    pub description: Option<ProfileDescription>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub profile: UserProfile,
}

/// Payload for `profile_updated` / `profile_pinned` / `user_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileData {
    pub username: String,
    pub action: String,
    #[serde(default)]
    pub user: Option<UserSnapshot>,
    #[serde(default)]
    pub before: Option<UserSnapshot>,
    #[serde(default)]
    pub pinned: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowingUserSnapshot {
    pub profile: UserProfile,
    #[serde(default)]
    pub handle: Option<String>,
}

/// Payload for `follow_created` / `follow_updated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowingData {
    pub username: String,
    /// One of `created`, `deleted`, `follow`, `unfollow`.
    pub action: String,
    #[serde(default)]
    pub user: Option<FollowingUserSnapshot>,
    #[serde(default)]
    pub following: Option<FollowingUserSnapshot>,
}

/// The variant payload of a `TwitterEvent`. Which variant applies is
/// determined by the event's `type` field, never guessed from shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Post(PostData),
    Profile(ProfileData),
    Follow(FollowingData),
}

/// One immutable record of upstream activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TwitterEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: String,
    #[serde(rename = "primaryId")]
    pub primary_id: String,
    pub user: EventUser,
    pub data: EventPayload,
}

#[derive(Deserialize)]
struct RawTwitterEvent {
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: String,
    #[serde(rename = "primaryId")]
    primary_id: String,
    user: EventUser,
    data: serde_json::Value,
}

impl<'de> Deserialize<'de> for TwitterEvent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawTwitterEvent::deserialize(deserializer)?;
        let data = match raw.event_type.payload_kind() {
            PayloadKind::Post => {
                EventPayload::Post(serde_json::from_value(raw.data).map_err(de::Error::custom)?)
            }
            PayloadKind::Profile => EventPayload::Profile(
                serde_json::from_value(raw.data).map_err(de::Error::custom)?,
            ),
            PayloadKind::Follow => {
                EventPayload::Follow(serde_json::from_value(raw.data).map_err(de::Error::custom)?)
            }
        };
        Ok(TwitterEvent {
            event_type: raw.event_type,
            timestamp: raw.timestamp,
            primary_id: raw.primary_id,
            user: raw.user,
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// Runtime subscription
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    Active,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionSource {
    Config,
    Runtime,
}

/// The engine's current upstream subscription, as exposed over the
/// `getRuntimeSubscription` / `setRuntimeSubscription` RPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSubscriptionState {
    pub channels: Vec<Channel>,
    pub users: Vec<String>,
    pub mode: SubscriptionMode,
    pub source: SubscriptionSource,
    #[serde(rename = "updatedAt")]
    pub updated_at: String,
}

// ---------------------------------------------------------------------------
// Health snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnState {
    Connected,
    Disconnected,
    Reconnecting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub status: ConnState,
    pub endpoint: String,
    pub uptime: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EventSummary {
    pub total: u64,
    pub delivered: u64,
    pub deduped: u64,
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AlertChannelSummary {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterSummary {
    pub users: Vec<String>,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub connection: ConnectionSummary,
    pub events: EventSummary,
    pub alerts: HashMap<String, AlertChannelSummary>,
    pub filters: FilterSummary,
}

// ---------------------------------------------------------------------------
// Dashboard WebSocket protocol
// ---------------------------------------------------------------------------

/// Requests a connected dashboard client may send. Each carries a
/// `request_id` the server echoes back in its `RpcResult` reply so the
/// client can match responses to pending calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    GetRuntimeSubscription {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    SetRuntimeSubscription {
        #[serde(rename = "requestId")]
        request_id: String,
        /// Raw channel names, validated by the engine so invalid values
        /// produce the documented `Invalid channel: <value>` error rather
        /// than a generic deserialization failure.
        channels: Vec<String>,
        users: Vec<String>,
    },
}

/// Outcome of an RPC request, serialized as `{success, data}` on success or
/// `{error}` on failure, matching the ack-callback shape of the dashboard
/// protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcOutcome {
    Success {
        success: bool,
        data: RuntimeSubscriptionState,
    },
    Error {
        error: String,
    },
}

impl RpcOutcome {
    pub fn ok(data: RuntimeSubscriptionState) -> Self {
        RpcOutcome::Success {
            success: true,
            data,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        RpcOutcome::Error {
            error: message.into(),
        }
    }
}

/// Messages the server pushes to connected dashboard clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Event {
        payload: TwitterEvent,
    },
    State {
        events: Vec<TwitterEvent>,
        stats: HealthStatus,
    },
    RuntimeSubscriptionUpdated {
        payload: RuntimeSubscriptionState,
    },
    RpcResult {
        #[serde(rename = "requestId")]
        request_id: String,
        outcome: RpcOutcome,
    },
}
