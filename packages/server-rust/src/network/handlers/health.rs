//! Health, liveness, and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Map, Value};

use super::AppState;
use crate::network::HealthState;

/// Detailed node health as JSON.
///
/// Always 200; the `state` field says whether the node is actually serving,
/// so monitoring can tell "up but draining" from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let services: Map<String, Value> = state
        .registry
        .states()
        .into_iter()
        .map(|(name, s)| (name, Value::from(s.as_str())))
        .collect();

    Json(json!({
        "state": state.lifecycle.health_state().as_str(),
        "in_flight": state.lifecycle.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "services": services,
    }))
}

/// Liveness probe: the process answers, nothing else is checked.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 once every phase has run, 503 while starting,
/// draining, or stopped.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.lifecycle.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::network::ShutdownController;
    use crate::service::{Service, ServiceInstance, ServiceRegistry};

    struct Users;

    impl Service for Users {}

    fn test_state() -> AppState {
        AppState {
            lifecycle: Arc::new(ShutdownController::new()),
            registry: Arc::new(ServiceRegistry::new()),
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_reports_state_and_counters() {
        let state = test_state();
        state.lifecycle.set_ready();
        let _guard = state.lifecycle.in_flight_guard();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "ready");
        assert_eq!(json["in_flight"], 1);
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn health_lists_services_with_their_state() {
        let state = test_state();
        state.registry.register("users", ServiceInstance::new(Users)).unwrap();
        state.registry.skip("billing").unwrap();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "starting");
        assert_eq!(json["services"]["users"], "unconfigured");
        assert_eq!(json["services"]["billing"], "skipped");
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = test_state();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);

        state.lifecycle.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.lifecycle.trigger_shutdown();
        assert_eq!(readiness_handler(State(state)).await, StatusCode::SERVICE_UNAVAILABLE);
    }
}
