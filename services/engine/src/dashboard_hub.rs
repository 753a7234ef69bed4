//! Dashboard WebSocket endpoint: on connect, sends a full `state` snapshot,
//! then streams `event` pushes and answers `getRuntimeSubscription` /
//! `setRuntimeSubscription` RPCs.
//!
//! Outbound messages for every connected client flow through a single
//! `broadcast` channel. RPC replies go out on the same channel tagged with
//! the requester's `requestId`; every other client simply ignores a result
//! whose id it doesn't recognise. This keeps the per-connection logic to a
//! pair of independent read/write loops instead of a per-client mailbox.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use stream_protocol::{ClientMessage, RpcOutcome, ServerMessage, TwitterEvent};

use crate::health::HealthState;
use crate::runtime_subscription;
use crate::sse_client::StreamCore;

const N_RECENT: usize = 100;
const OUTBOUND_CAPACITY: usize = 1024;

pub struct DashboardHub {
    outbound: broadcast::Sender<ServerMessage>,
    recent: Mutex<VecDeque<TwitterEvent>>,
    core: Arc<StreamCore>,
    health: Arc<HealthState>,
}

impl DashboardHub {
    pub fn new(bus: &event_bus::EventBus<TwitterEvent>, core: Arc<StreamCore>, health: Arc<HealthState>) -> Arc<Self> {
        let (outbound, _rx) = broadcast::channel(OUTBOUND_CAPACITY);
        let hub = Arc::new(DashboardHub {
            outbound,
            recent: Mutex::new(VecDeque::with_capacity(N_RECENT)),
            core,
            health,
        });

        let hub_for_sub = Arc::clone(&hub);
        bus.subscribe(
            "events",
            Box::new(move |event: TwitterEvent| {
                hub_for_sub.record_and_broadcast(event);
                Ok(())
            }),
        );

        hub
    }

    /// Inserts at the front (newest first). An event sharing a `primaryId`
    /// with an existing entry replaces it in place instead of appending a
    /// second copy.
    fn record_and_broadcast(&self, event: TwitterEvent) {
        {
            let mut recent = self.recent.lock().expect("lock poisoned");
            let existing = if event.primary_id.is_empty() {
                None
            } else {
                recent.iter().position(|e| e.primary_id == event.primary_id)
            };
            if let Some(existing) = existing {
                recent.remove(existing);
            } else if recent.len() >= N_RECENT {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }
        let _ = self.outbound.send(ServerMessage::Event { payload: event });
    }

    fn recent_events(&self) -> Vec<TwitterEvent> {
        self.recent.lock().expect("lock poisoned").iter().cloned().collect()
    }

    async fn handle_client_message(&self, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::debug!(error = %err, "ignoring unparseable dashboard message");
                return;
            }
        };

        match message {
            ClientMessage::GetRuntimeSubscription { request_id } => {
                let outcome = match runtime_subscription::get_runtime_subscription(Some(&self.core)) {
                    Ok(state) => RpcOutcome::ok(state),
                    Err(err) => RpcOutcome::err(err.to_string()),
                };
                let _ = self.outbound.send(ServerMessage::RpcResult { request_id, outcome });
            }
            ClientMessage::SetRuntimeSubscription { request_id, channels, users } => {
                let outcome = match runtime_subscription::set_runtime_subscription(Some(&self.core), channels, users).await {
                    Ok(state) => {
                        let _ = self
                            .outbound
                            .send(ServerMessage::RuntimeSubscriptionUpdated { payload: state.clone() });
                        RpcOutcome::ok(state)
                    }
                    Err(err) => RpcOutcome::err(err.to_string()),
                };
                let _ = self.outbound.send(ServerMessage::RpcResult { request_id, outcome });
            }
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<DashboardHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<DashboardHub>) {
    let (mut sink, mut stream) = socket.split();
    let mut rx = hub.outbound.subscribe();

    let initial = ServerMessage::State {
        events: hub.recent_events(),
        stats: hub.health.snapshot(),
    };
    if let Ok(text) = serde_json::to_string(&initial) {
        if sink.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let Ok(text) = serde_json::to_string(&message) else { continue };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let hub_for_recv = Arc::clone(&hub);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Text(text) = message {
                hub_for_recv.handle_client_message(&text).await;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedup_cache::DedupCache;
    use event_bus::EventBus;
    use filter_pipeline::FilterPipeline;
    use stream_protocol::Channel;

    fn sample_hub() -> Arc<DashboardHub> {
        let bus: Arc<EventBus<TwitterEvent>> = Arc::new(EventBus::new());
        let dedup = Arc::new(DedupCache::new());
        let filters = Arc::new(FilterPipeline::new());
        let core = StreamCore::new(
            "https://example.com".to_string(),
            "token".to_string(),
            vec![Channel::All],
            dedup,
            Arc::clone(&filters),
            Arc::clone(&bus),
        );
        let alert_bus: EventBus<TwitterEvent> = EventBus::new();
        let alerts = crate::alerts::AlertRegistry::new(&alert_bus, vec![]);
        let health = Arc::new(HealthState { core: Arc::clone(&core), filters, alerts });
        DashboardHub::new(&bus, core, health)
    }

    #[tokio::test]
    async fn recent_events_ring_caps_at_n_recent() {
        let hub = sample_hub();
        for i in 0..(N_RECENT + 10) {
            hub.record_and_broadcast(sample_event(i));
        }
        assert_eq!(hub.recent_events().len(), N_RECENT);
    }

    #[tokio::test]
    async fn recent_events_are_newest_first() {
        let hub = sample_hub();
        hub.record_and_broadcast(sample_event(1));
        hub.record_and_broadcast(sample_event(2));
        let events = hub.recent_events();
        assert_eq!(events[0].primary_id, "t2");
        assert_eq!(events[1].primary_id, "t1");
    }

    #[tokio::test]
    async fn update_with_same_primary_id_replaces_in_place() {
        let hub = sample_hub();
        hub.record_and_broadcast(sample_event(1));
        hub.record_and_broadcast(sample_event(2));
        hub.record_and_broadcast(sample_event(1));
        let events = hub.recent_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].primary_id, "t1");
        assert_eq!(events[1].primary_id, "t2");
    }

    fn sample_event(n: usize) -> TwitterEvent {
        use stream_protocol::{EventPayload, EventType, EventUser, PostData};
        TwitterEvent {
            event_type: EventType::PostCreated,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            primary_id: format!("t{n}"),
            user: EventUser {
                username: "a".to_string(),
                display_name: "a".to_string(),
                user_id: "u1".to_string(),
            },
            data: EventPayload::Post(PostData {
                tweet_id: format!("t{n}"),
                username: "a".to_string(),
                action: "created".to_string(),
                tweet: None,
            }),
        }
    }

    #[tokio::test]
    async fn get_runtime_subscription_rpc_round_trips() {
        let hub = sample_hub();
        hub.handle_client_message(r#"{"type":"get_runtime_subscription","requestId":"r1"}"#).await;
    }
}
