//! Real-time Twitter activity ingest and fan-out engine.
//!
//! Wiring order mirrors the data's dependency order: dedup cache, then
//! filter pipeline, then event bus, then the `StreamCore` that produces
//! events for both. The dashboard hub and alert registry subscribe to the
//! bus once it and `StreamCore` both exist.

pub mod active_users;
pub mod alerts;
pub mod cli;
pub mod config;
pub mod dashboard_hub;
pub mod health;
pub mod runtime_subscription;
pub mod sse_client;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use config::EngineConfig;
use dashboard_hub::DashboardHub;
use dedup_cache::DedupCache;
use event_bus::EventBus;
use filter_pipeline::{Filter, FilterPipeline};
use health::HealthState;
use stream_protocol::TwitterEvent;

pub struct Engine {
    pub core: Arc<sse_client::StreamCore>,
    pub active_users: Arc<active_users::ActiveUsersFetcher>,
    pub dashboard: Arc<DashboardHub>,
    pub health: Arc<HealthState>,
    pub config: EngineConfig,
}

impl Engine {
    pub fn build(config: EngineConfig) -> Result<Self, filter_pipeline::FilterError> {
        let dedup = Arc::new(DedupCache::new());
        let filters = Arc::new(FilterPipeline::new());
        for user in &config.initial_users {
            filters.add_filter(Filter::User(user.clone())).ok();
        }
        filters.set_keywords(config.initial_keywords.clone())?;

        let bus: Arc<EventBus<TwitterEvent>> = Arc::new(EventBus::new());

        let core = sse_client::StreamCore::new(
            config.upstream_base_url.clone(),
            config.apify_token.clone(),
            config.endpoints.clone(),
            Arc::clone(&dedup),
            Arc::clone(&filters),
            Arc::clone(&bus),
        );

        let active_users = active_users::ActiveUsersFetcher::new(
            config.active_users_base_url.clone(),
            Arc::clone(&filters),
            Vec::new(),
        );

        let sinks: Vec<Arc<dyn alerts::AlertOutput>> = if config.alerts_enabled {
            vec![Arc::new(alerts::LogAlertOutput::new())]
        } else {
            Vec::new()
        };
        let alert_registry = alerts::AlertRegistry::new(&bus, sinks);

        let health = Arc::new(HealthState {
            core: Arc::clone(&core),
            filters: Arc::clone(&filters),
            alerts: alert_registry,
        });

        let dashboard = DashboardHub::new(&bus, Arc::clone(&core), Arc::clone(&health));

        Ok(Engine {
            core,
            active_users,
            dashboard,
            health,
            config,
        })
    }

    pub async fn start(&self) -> Result<(), sse_client::StreamCoreError> {
        self.core.start().await?;
        self.active_users
            .start_periodic_refresh(self.config.active_users_refresh_interval);
        Ok(())
    }

    pub fn router(&self) -> Router {
        let health_routes = Router::new()
            .route("/", get(health::get_root))
            .route("/status", get(health::get_status))
            .with_state(Arc::clone(&self.health));

        let dashboard_routes = Router::new()
            .route("/ws", get(dashboard_hub::ws_handler))
            .with_state(Arc::clone(&self.dashboard));

        health_routes.merge(dashboard_routes)
    }
}
