//! Cross-component end-to-end scenarios wiring `DedupCache`, `FilterPipeline`,
//! `EventBus`, `StreamCore`, and the active-users fetcher together the way
//! `Engine::build` does, without requiring a live upstream SSE connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use dedup_cache::DedupCache;
use event_bus::EventBus;
use filter_pipeline::{Filter, FilterPipeline};
use serde_json::json;
use stream_engine::active_users::ActiveUsersFetcher;
use stream_protocol::{Channel, EventPayload, EventType, EventUser, PostData, TwitterEvent};

fn post_event(username: &str, primary_id: &str) -> TwitterEvent {
    TwitterEvent {
        event_type: EventType::PostCreated,
        timestamp: "2026-01-01T00:00:00Z".to_string(),
        primary_id: primary_id.to_string(),
        user: EventUser {
            username: username.to_string(),
            display_name: username.to_string(),
            user_id: "u1".to_string(),
        },
        data: EventPayload::Post(PostData {
            tweet_id: primary_id.to_string(),
            username: username.to_string(),
            action: "created".to_string(),
            tweet: None,
        }),
    }
}

/// Mirrors `StreamCore::process_event`'s pipeline: dedup, then filter, then
/// publish, incrementing the same three counters.
struct Pipeline {
    dedup: Arc<DedupCache>,
    filters: Arc<FilterPipeline>,
    bus: Arc<EventBus<TwitterEvent>>,
    total: AtomicUsize,
    delivered: AtomicUsize,
    deduped: AtomicUsize,
}

impl Pipeline {
    fn new() -> Self {
        Pipeline {
            dedup: Arc::new(DedupCache::new()),
            filters: Arc::new(FilterPipeline::new()),
            bus: Arc::new(EventBus::new()),
            total: AtomicUsize::new(0),
            delivered: AtomicUsize::new(0),
            deduped: AtomicUsize::new(0),
        }
    }

    fn ingest(&self, event: TwitterEvent) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if !event.primary_id.is_empty() && self.dedup.seen(&event.primary_id) {
            self.deduped.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if self.filters.should_display_event(&event, None) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            self.bus.publish("events", event.clone());
            self.bus.publish("alerts", event);
        }
    }
}

#[tokio::test]
async fn scenario_happy_path() {
    let pipeline = Pipeline::new();
    let received = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);
    pipeline.bus.subscribe(
        "events",
        Box::new(move |event: TwitterEvent| {
            received_clone.lock().unwrap().push(event);
            Ok(())
        }),
    );

    pipeline.ingest(post_event("elonmusk", "t1"));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pipeline.total.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.deduped.load(Ordering::SeqCst), 0);
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn scenario_duplicate_event() {
    let pipeline = Pipeline::new();
    let publish_count = Arc::new(AtomicUsize::new(0));
    let publish_count_clone = Arc::clone(&publish_count);
    pipeline.bus.subscribe(
        "events",
        Box::new(move |_| {
            publish_count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    pipeline.ingest(post_event("elonmusk", "t1"));
    pipeline.ingest(post_event("elonmusk", "t1"));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pipeline.total.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.deduped.load(Ordering::SeqCst), 1);
    assert_eq!(publish_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scenario_empty_primary_id_bypasses_dedup() {
    let pipeline = Pipeline::new();
    let publish_count = Arc::new(AtomicUsize::new(0));
    let publish_count_clone = Arc::clone(&publish_count);
    pipeline.bus.subscribe(
        "events",
        Box::new(move |_| {
            publish_count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    pipeline.ingest(post_event("elonmusk", ""));
    pipeline.ingest(post_event("elonmusk", ""));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pipeline.total.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.delivered.load(Ordering::SeqCst), 2);
    assert_eq!(pipeline.deduped.load(Ordering::SeqCst), 0);
    assert_eq!(publish_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn scenario_filter_reject() {
    let pipeline = Pipeline::new();
    pipeline.filters.add_filter(Filter::User("vitalikbuterin".to_string())).unwrap();
    let publish_count = Arc::new(AtomicUsize::new(0));
    let publish_count_clone = Arc::clone(&publish_count);
    pipeline.bus.subscribe(
        "events",
        Box::new(move |_| {
            publish_count_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    pipeline.ingest(post_event("elonmusk", "t1"));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(pipeline.total.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.delivered.load(Ordering::SeqCst), 0);
    assert_eq!(publish_count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_runtime_resubscribe() {
    let dedup = Arc::new(DedupCache::new());
    let filters = Arc::new(FilterPipeline::new());
    let bus: Arc<EventBus<TwitterEvent>> = Arc::new(EventBus::new());
    let core = stream_engine::sse_client::StreamCore::new(
        "https://example.com".to_string(),
        "token".to_string(),
        vec![Channel::All],
        dedup,
        filters,
        bus,
    );

    let before = stream_engine::runtime_subscription::get_runtime_subscription(Some(&core)).unwrap();
    assert_eq!(before.channels, vec![Channel::All]);
    assert!(before.users.is_empty());

    let after = stream_engine::runtime_subscription::set_runtime_subscription(
        Some(&core),
        vec!["tweets".to_string(), "following".to_string()],
        vec!["user1".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(after.channels, vec![Channel::Tweets, Channel::Following]);
    assert_eq!(after.users, vec!["user1".to_string()]);
    assert_eq!(after.source, stream_protocol::SubscriptionSource::Runtime);

    let confirmed = stream_engine::runtime_subscription::get_runtime_subscription(Some(&core)).unwrap();
    assert_eq!(confirmed.channels, after.channels);
}

#[tokio::test]
async fn scenario_active_users_refresh_survives_a_failed_fetch() {
    let call_count = Arc::new(AtomicUsize::new(0));

    async fn handler(State(count): State<Arc<AtomicUsize>>) -> impl IntoResponse {
        let call = count.fetch_add(1, Ordering::SeqCst);
        match call {
            0 => Json(json!(["a", "b"])).into_response(),
            1 => axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response(),
            _ => Json(json!(["c"])).into_response(),
        }
    }

    let router = axum::Router::new().route("/users", get(handler)).with_state(Arc::clone(&call_count));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let filters = Arc::new(FilterPipeline::new());
    let fetcher = ActiveUsersFetcher::new(format!("http://{addr}/users"), filters, Vec::new());

    fetcher.refresh().await;
    assert_eq!(fetcher.cached_users(), vec!["a".to_string(), "b".to_string()]);

    fetcher.refresh().await;
    assert_eq!(fetcher.cached_users(), vec!["a".to_string(), "b".to_string()]);

    fetcher.refresh().await;
    assert_eq!(fetcher.cached_users(), vec!["c".to_string()]);
}
