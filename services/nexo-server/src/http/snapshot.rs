//! Read-only JSON snapshot routes (C8): `/api/store`, `/api/queue`,
//! `/api/pubsub`, `/api/stream`, plus `/healthz`.

use axum::extract::{OriginalUri, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::dispatch::Brokers;
use crate::http::response::not_found;

#[derive(Clone)]
pub struct AppState {
    pub brokers: std::sync::Arc<Brokers>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/store", get(get_store))
        .route("/api/queue", get(get_queue))
        .route("/api/pubsub", get(get_pubsub))
        .route("/api/stream", get(get_stream))
        .fallback(not_found_route)
        .with_state(state)
}

async fn not_found_route(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    not_found(format!("no route for {uri}"))
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn get_store(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.brokers.kv.snapshot().await)
}

async fn get_queue(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.brokers.queue.snapshot().await)
}

async fn get_pubsub(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.brokers.pubsub.snapshot().await)
}

async fn get_stream(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.brokers.stream.snapshot().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use nexo_protocol::AnyValue;
    use tower::ServiceExt;

    #[tokio::test]
    async fn store_snapshot_reflects_live_kv_state() {
        let brokers = std::sync::Arc::new(Brokers::new());
        brokers.kv.set("k".into(), 0, AnyValue::String("v".into())).await;
        let router = build_router(AppState { brokers });

        let response = router.oneshot(Request::builder().uri("/api/store").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["keys"][0]["key"], "k");
        assert_eq!(value["keys"][0]["value"], "v");
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let brokers = std::sync::Arc::new(Brokers::new());
        let router = build_router(AppState { brokers });
        let response = router.oneshot(Request::builder().uri("/healthz").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn unmatched_route_returns_not_found_envelope() {
        let brokers = std::sync::Arc::new(Brokers::new());
        let router = build_router(AppState { brokers });
        let response = router.oneshot(Request::builder().uri("/api/nope").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["code"], "NOT_FOUND");
    }
}
