//! Shared fixtures for router-level tests.

use axum::{Router, response::Response};
use parley_presence::{HubConfig, PresenceHub};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::tests::test_auth_config;
use crate::config::PresenceConfig;
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::test_helpers::test_repository;
use crate::{AppState, build_router};

/// Fresh state: in-memory database, new hub, zeroed metrics.
pub(crate) async fn test_state() -> AppState {
    let repository = test_repository().await;
    let db = Database {
        pool: repository.pool.clone(),
    };
    let presence_config = PresenceConfig {
        outbox_capacity: 16,
        hub: HubConfig::default(),
    };
    AppState {
        repository: Arc::new(repository),
        db: Arc::new(db),
        hub: PresenceHub::spawn(presence_config.hub.clone()),
        auth_config: Arc::new(test_auth_config()),
        presence_config: Arc::new(presence_config),
        metrics: Arc::new(ServerMetrics::new()),
        shutdown: CancellationToken::new(),
    }
}

pub(crate) async fn test_app() -> (Router, AppState) {
    let state = test_state().await;
    let app = build_router(state.clone(), None).unwrap();
    (app, state)
}

/// Create a session for `user_id` and return its cookie token.
pub(crate) async fn login(state: &AppState, user_id: &str) -> String {
    state
        .repository
        .create_session(user_id, Duration::from_secs(3600))
        .await
        .unwrap()
}

pub(crate) async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
