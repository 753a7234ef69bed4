//! Composable predicate chain deciding whether an event should be
//! delivered to user-facing sinks.
//!
//! `FilterPipeline` takes a `search_query` as an explicit argument to
//! `should_display_event` rather than reaching into a shared store, so the
//! predicate stays pure and testable in isolation.

use std::collections::HashSet;
use std::fmt;
use std::sync::RwLock;

use stream_protocol::{EventPayload, EventType, TwitterEvent};

/// A single filter that can be added to or removed from the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Filter {
    EventType(EventType),
    User(String),
    Keyword(String),
}

/// A snapshot of the pipeline's current configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    pub event_types: Vec<EventType>,
    pub users: Vec<String>,
    pub keywords: Vec<String>,
    pub has_active_filters: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    InvalidKeywordLength(String),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidKeywordLength(keyword) => {
                write!(f, "keyword must be 2-50 characters: {keyword:?}")
            }
        }
    }
}

impl std::error::Error for FilterError {}

const MIN_KEYWORD_LEN: usize = 2;
const MAX_KEYWORD_LEN: usize = 50;

struct State {
    event_types: HashSet<EventType>,
    users: HashSet<String>,
    keywords: Vec<String>,
}

impl State {
    fn default_state() -> Self {
        State {
            event_types: EventType::ALL.into_iter().collect(),
            users: HashSet::new(),
            keywords: Vec::new(),
        }
    }
}

/// Decides per-event whether it should reach display/alert sinks.
pub struct FilterPipeline {
    state: RwLock<State>,
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterPipeline {
    pub fn new() -> Self {
        FilterPipeline {
            state: RwLock::new(State::default_state()),
        }
    }

    /// Pure: identical `(event, search_query)` inputs always yield the
    /// same result, with no observable side effects.
    pub fn should_display_event(&self, event: &TwitterEvent, search_query: Option<&str>) -> bool {
        let state = self.state.read().expect("filter pipeline lock poisoned");

        if !state.event_types.contains(&event.event_type) {
            return false;
        }

        if !state.users.is_empty() {
            let username = event.user.username.to_lowercase();
            if !state.users.contains(&username) {
                return false;
            }
        }

        let needs_text = !state.keywords.is_empty()
            || search_query.is_some_and(|q| !q.trim().is_empty());
        let text = if needs_text {
            searchable_text(event).to_lowercase()
        } else {
            String::new()
        };

        if !state.keywords.is_empty() {
            let matches = state
                .keywords
                .iter()
                .any(|keyword| text.contains(&keyword.to_lowercase()));
            if !matches {
                return false;
            }
        }

        if let Some(query) = search_query {
            let trimmed = query.trim();
            if !trimmed.is_empty() && !text.contains(&trimmed.to_lowercase()) {
                return false;
            }
        }

        true
    }

    /// Add a single filter. Keywords are validated (2-50 chars after
    /// trimming) before being accepted.
    pub fn add_filter(&self, filter: Filter) -> Result<(), FilterError> {
        let mut state = self.state.write().expect("filter pipeline lock poisoned");
        match filter {
            Filter::EventType(event_type) => {
                state.event_types.insert(event_type);
            }
            Filter::User(user) => {
                state.users.insert(user.trim().to_lowercase());
            }
            Filter::Keyword(keyword) => {
                let validated = validate_keyword(&keyword)?;
                let already_present = state
                    .keywords
                    .iter()
                    .any(|existing| existing.eq_ignore_ascii_case(&validated));
                if !already_present {
                    state.keywords.push(validated);
                }
            }
        }
        Ok(())
    }

    pub fn remove_filter(&self, filter: &Filter) {
        let mut state = self.state.write().expect("filter pipeline lock poisoned");
        match filter {
            Filter::EventType(event_type) => {
                state.event_types.remove(event_type);
            }
            Filter::User(user) => {
                state.users.remove(&user.trim().to_lowercase());
            }
            Filter::Keyword(keyword) => {
                state
                    .keywords
                    .retain(|existing| !existing.eq_ignore_ascii_case(keyword.trim()));
            }
        }
    }

    /// Replace the entire user set, as done by `ActiveUsersFetcher` on a
    /// successful refresh or by a runtime subscription change.
    pub fn set_users<I, S>(&self, users: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.write().expect("filter pipeline lock poisoned");
        state.users = users
            .into_iter()
            .map(|u| u.into().trim().to_lowercase())
            .filter(|u| !u.is_empty())
            .collect();
    }

    /// Replace the keyword list wholesale, validating and deduplicating
    /// order-preservingly.
    pub fn set_keywords<I, S>(&self, keywords: I) -> Result<(), FilterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut validated = Vec::new();
        for raw in keywords {
            let raw = raw.into();
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                continue;
            }
            let keyword = validate_keyword(trimmed)?;
            let key = keyword.to_lowercase();
            if seen.insert(key) {
                validated.push(keyword);
            }
        }
        let mut state = self.state.write().expect("filter pipeline lock poisoned");
        state.keywords = validated;
        Ok(())
    }

    /// Reset to the default configuration: all event types, no users, no
    /// keywords.
    pub fn clear_all(&self) {
        let mut state = self.state.write().expect("filter pipeline lock poisoned");
        *state = State::default_state();
    }

    pub fn get_config(&self) -> FilterConfig {
        let state = self.state.read().expect("filter pipeline lock poisoned");
        let is_default_event_types = state.event_types.len() == EventType::ALL.len();
        let has_active_filters =
            !is_default_event_types || !state.users.is_empty() || !state.keywords.is_empty();

        let mut event_types: Vec<EventType> = state.event_types.iter().copied().collect();
        event_types.sort_by_key(|t| EventType::ALL.iter().position(|a| a == t).unwrap());
        let mut users: Vec<String> = state.users.iter().cloned().collect();
        users.sort();

        FilterConfig {
            event_types,
            users,
            keywords: state.keywords.clone(),
            has_active_filters,
        }
    }
}

fn validate_keyword(raw: &str) -> Result<String, FilterError> {
    let trimmed = raw.trim();
    if trimmed.chars().count() < MIN_KEYWORD_LEN || trimmed.chars().count() > MAX_KEYWORD_LEN {
        return Err(FilterError::InvalidKeywordLength(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Derive the text an event is matched against for keyword/free-text
/// filtering. The only semantics a reimplementation must reproduce for
/// filter correctness.
pub fn searchable_text(event: &TwitterEvent) -> String {
    let mut parts = vec![event.user.username.clone(), event.user.display_name.clone()];

    match &event.data {
        EventPayload::Post(post) => {
            if let Some(tweet) = &post.tweet {
                if let Some(body) = &tweet.body {
                    parts.push(body.text.clone());
                }
                if let Some(author) = &tweet.author {
                    parts.push(author.profile.name.clone());
                }
            }
        }
        EventPayload::Profile(profile) => {
            if let Some(user) = &profile.user {
                parts.push(user.profile.name.clone());
                if let Some(description) = &user.profile.description {
                    parts.push(description.text.clone());
                }
            }
        }
        EventPayload::Follow(follow) => {
            if let Some(user) = &follow.user {
                parts.push(user.profile.name.clone());
            }
            if let Some(following) = &follow.following {
                parts.push(following.profile.name.clone());
                if let Some(handle) = &following.handle {
                    parts.push(handle.clone());
                }
            }
        }
    }

    parts.join(" ")
}
