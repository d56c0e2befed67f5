//! HTTP API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::protocol::{StreamId, StreamInfo};
use crate::relay::server::AppState;

/// API response wrapper
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Relay status
#[derive(serde::Serialize)]
pub struct RelayStatus {
    pub stream_count: usize,
    pub listener_count: usize,
    pub uptime_seconds: u64,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<ApiResponse<RelayStatus>> {
    let status = RelayStatus {
        stream_count: state.registry.stream_count(),
        listener_count: state.registry.listener_count(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    Json(ApiResponse::ok(status))
}

pub async fn list_streams(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<StreamInfo>>> {
    Json(ApiResponse::ok(state.registry.list()))
}

pub async fn get_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse<StreamInfo>>) {
    let session = id
        .parse::<StreamId>()
        .ok()
        .and_then(|id| state.registry.get(&id));

    match session {
        Some(session) => (StatusCode::OK, Json(ApiResponse::ok(session.info()))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("stream not found: {}", id))),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;

    fn state() -> Arc<AppState> {
        Arc::new(AppState::new(RelayConfig::default()))
    }

    #[tokio::test]
    async fn test_status_counts_streams() {
        let state = state();
        let session = state.registry.open_stream();
        let _sub = session.subscribe();

        let Json(response) = get_status(State(state.clone())).await;
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"]["stream_count"], 1);
        assert_eq!(value["data"]["listener_count"], 1);
        assert!(value.get("error").is_none());
    }

    #[tokio::test]
    async fn test_get_stream() {
        let state = state();
        let session = state.registry.open_stream();

        let (status, Json(response)) =
            get_stream(State(state.clone()), Path(session.id().to_string())).await;
        assert_eq!(status, StatusCode::OK);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["data"]["stream_id"], session.id().as_str());

        let (status, Json(response)) = get_stream(State(state.clone()), Path("missing".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!response.success);

        let Json(list) = list_streams(State(state)).await;
        assert_eq!(list.data.unwrap().len(), 1);
    }
}
