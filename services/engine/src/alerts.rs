//! Alert delivery: formats delivered events into a human-readable message
//! and hands them to every registered `AlertOutput` sink, independently
//! tracking a sent/failed count per sink for the health snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use event_bus::EventBus;
use stream_protocol::{AlertChannelSummary, EventPayload, TwitterEvent};

/// A destination for formatted alert text. Implementors decide how and
/// where the message ends up; failures are recorded but never propagated
/// back to the publisher.
pub trait AlertOutput: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, message: &str) -> Result<(), String>;
}

/// Writes every alert to the tracing log at info level.
pub struct LogAlertOutput {
    name: String,
}

impl LogAlertOutput {
    pub fn new() -> Self {
        LogAlertOutput { name: "log".to_string() }
    }
}

impl Default for LogAlertOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertOutput for LogAlertOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &str) -> Result<(), String> {
        tracing::info!(target: "alerts", "{message}");
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Fans delivered events out to every registered sink. Subscribes itself
/// to the event bus's `alerts` channel at construction time.
pub struct AlertRegistry {
    counters: RwLock<HashMap<String, Arc<Counters>>>,
}

impl AlertRegistry {
    pub fn new(bus: &EventBus<TwitterEvent>, sinks: Vec<Arc<dyn AlertOutput>>) -> Arc<Self> {
        let registry = Arc::new(AlertRegistry {
            counters: RwLock::new(HashMap::new()),
        });

        {
            let mut counters = registry.counters.write().expect("lock poisoned");
            for sink in &sinks {
                counters.insert(sink.name().to_string(), Arc::new(Counters::default()));
            }
        }

        for sink in sinks {
            let counters = Arc::clone(&registry.counters.read().expect("lock poisoned")[sink.name()]);
            bus.subscribe(
                "alerts",
                Box::new(move |event: TwitterEvent| {
                    let message = format_alert_message(&event);
                    match sink.send(&message) {
                        Ok(()) => {
                            counters.sent.fetch_add(1, Ordering::Relaxed);
                            Ok(())
                        }
                        Err(err) => {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                            Err(err.into())
                        }
                    }
                }),
            );
        }

        registry
    }

    pub fn summaries(&self) -> HashMap<String, AlertChannelSummary> {
        self.counters
            .read()
            .expect("lock poisoned")
            .iter()
            .map(|(name, counters)| {
                (
                    name.clone(),
                    AlertChannelSummary {
                        sent: counters.sent.load(Ordering::Relaxed),
                        failed: counters.failed.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

/// Render an event into a single-line alert message.
pub fn format_alert_message(event: &TwitterEvent) -> String {
    let username = &event.user.username;
    match &event.data {
        EventPayload::Post(post) => {
            let text = post
                .tweet
                .as_ref()
                .and_then(|t| t.body.as_ref())
                .map_or("", |b| b.text.as_str());
            format!("@{username} {action}: {text}", action = post.action)
        }
        EventPayload::Profile(profile) => {
            format!("@{username} profile {action}", action = profile.action)
        }
        EventPayload::Follow(follow) => {
            let target = follow
                .following
                .as_ref()
                .and_then(|f| f.handle.as_deref())
                .unwrap_or("someone");
            format!("@{username} {action} {target}", action = follow.action)
        }
    }
}
