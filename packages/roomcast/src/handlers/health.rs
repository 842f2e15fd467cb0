use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;

/// Health check endpoint - room and connection counts plus uptime
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.health().await)
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.hub.metrics.snapshot())
}

/// Liveness check - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

/// Readiness check - 503 while the database is unreachable or the hub is shutting down
pub async fn health_ready_handler(State(state): State<AppState>) -> Response {
    let db_ok = state.db.pool.acquire().await.is_ok();
    let accepting = !state.hub.is_shutting_down();

    if db_ok && accepting {
        Json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": if db_ok { "connected" } else { "disconnected" },
                "shutting_down": !accepting,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::test_helpers::test_app_state;

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_empty_hub() {
        let (state, _backend) = test_app_state().await;
        let (status, json) = get_json(crate::router(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["rooms"]["active"], 0);
        assert_eq!(json["rooms"]["members_online"], 0);
        assert_eq!(json["connections"], 0);
    }

    #[tokio::test]
    async fn test_health_after_shutdown() {
        let (state, _backend) = test_app_state().await;
        state.hub.shutdown().await;
        let (_, json) = get_json(crate::router(state), "/health").await;
        assert_eq!(json["status"], "shutting_down");
    }

    #[tokio::test]
    async fn test_live_check() {
        let (state, _backend) = test_app_state().await;
        let (status, json) = get_json(crate::router(state), "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "alive");
    }

    #[tokio::test]
    async fn test_ready_check() {
        let (state, _backend) = test_app_state().await;
        let (status, json) = get_json(crate::router(state.clone()), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ready");

        state.hub.shutdown().await;
        let (status, json) = get_json(crate::router(state), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["shutting_down"], true);
    }

    #[tokio::test]
    async fn test_ready_check_with_closed_pool() {
        let (state, _backend) = test_app_state().await;
        state.db.pool.close().await;
        let (status, json) = get_json(crate::router(state), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["database"], "disconnected");
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let (state, _backend) = test_app_state().await;
        state.hub.metrics.connection_opened();
        let (status, json) = get_json(crate::router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["connections"]["active"], 1);
        assert_eq!(json["connections"]["total"], 1);
    }
}
