use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use shared::protocol::{PATH_RESET_IS_LOADING, PATH_SERVER, PATH_SERVER_LIST};
use shared::types::{DiscoveryResult, ServerRecord};
use crate::cache_manager::CacheHandle;

#[derive(Clone)]
pub struct AppState {
    pub cache: CacheHandle,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(PATH_SERVER, get(get_server))
        .route(PATH_RESET_IS_LOADING, get(reset_is_loading))
        .route(PATH_SERVER_LIST, get(get_server_list))
        .with_state(state)
}

/// Static record for connectivity checks, touches no network
async fn get_server() -> Json<ServerRecord> {
    tracing::debug!("In method GetServer");
    Json(ServerRecord {
        id: String::new(),
        name: "Test".to_string(),
        level: None,
        mode: None,
        slots: 16,
        players: 10,
    })
}

async fn reset_is_loading(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    tracing::debug!("In method ResetIsLoading");
    state
        .cache
        .reset_loading()
        .await
        .map(|()| Json(vec!["ok".to_string()]))
        .map_err(|e| {
            tracing::error!("Failed to reset loading flag: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_server_list(State(state): State<AppState>) -> Result<Json<DiscoveryResult>, StatusCode> {
    tracing::debug!("In method GetServerList");
    state
        .cache
        .get_server_list()
        .await
        .map(Json)
        .map_err(|e| {
            tracing::error!("Failed to get server list: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use anyhow::{anyhow, Result};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use futures::future::BoxFuture;
    use serde_json::Value;
    use tower::ServiceExt;
    use crate::config::CacheConfig;
    use crate::discovery::Collector;

    struct StaticCollector(Option<DiscoveryResult>);

    impl Collector for StaticCollector {
        fn collect(&self) -> BoxFuture<'_, Result<DiscoveryResult>> {
            Box::pin(async move { self.0.clone().ok_or_else(|| anyhow!("bind failed")) })
        }
    }

    fn app(result: Option<DiscoveryResult>) -> Router {
        let cache = CacheHandle::spawn(Arc::new(StaticCollector(result)), CacheConfig::default());
        router(AppState { cache })
    }

    async fn get(app: Router, path: &str) -> (StatusCode, Option<Value>) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).ok())
    }

    #[tokio::test]
    async fn test_get_server() {
        let (status, body) = get(app(None), PATH_SERVER).await;
        let body = body.unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Name"], "Test");
        assert_eq!(body["Slots"], 16);
        assert_eq!(body["Players"], 10);
    }

    #[tokio::test]
    async fn test_reset_is_loading() {
        let (status, body) = get(app(None), PATH_RESET_IS_LOADING).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.unwrap(), serde_json::json!(["ok"]));
    }

    #[tokio::test]
    async fn test_get_server_list() {
        let result = DiscoveryResult::completed(vec![vec![ServerRecord {
            id: "abc".to_string(),
            name: "CNQReboot Mixed".to_string(),
            level: Some("pelennor_fields".to_string()),
            mode: Some("cnq".to_string()),
            slots: 16,
            players: 7,
        }]]);

        let (status, body) = get(app(Some(result)), PATH_SERVER_LIST).await;
        let body = body.unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["IsLoading"], false);
        assert_eq!(body["Servers"][0][0]["Name"], "CNQReboot Mixed");
        assert_eq!(body["Servers"][0][0]["Level"], "pelennor_fields");
    }

    #[tokio::test]
    async fn test_get_server_list_failure() {
        let (status, _) = get(app(None), PATH_SERVER_LIST).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
