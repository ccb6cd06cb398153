use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::search::SearchError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("search failed: {0}")]
    Search(#[from] SearchError),

    #[error("{0} timed out")]
    Timeout(&'static str),

    /// A document store query failed (connection, pool or IO).
    #[error("document store failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, json!({ "errmsg": "not found" })),
            AppError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, json!({ "errmsg": "unauthorized" }))
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "errmsg": msg })),
            AppError::Search(_) | AppError::Timeout(_) => {
                warn!("downstream unavailable: {}", self);
                (StatusCode::SERVICE_UNAVAILABLE, inner_error())
            }
            AppError::Store(err) => {
                error!("document store failed: {:#}", err);
                (StatusCode::SERVICE_UNAVAILABLE, inner_error())
            }
        };

        (status, Json(body)).into_response()
    }
}

fn inner_error() -> serde_json::Value {
    json!({ "status": "error", "msg": "system inner error" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn render(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_not_found() {
        let (status, body) = render(AppError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "errmsg": "not found" }));
    }

    #[tokio::test]
    async fn test_unauthorized() {
        let (status, body) = render(AppError::Unauthorized).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errmsg"], "unauthorized");
    }

    #[tokio::test]
    async fn test_bad_request_carries_message() {
        let (status, body) = render(AppError::BadRequest("missing field `id`".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errmsg"], "missing field `id`");
    }

    #[tokio::test]
    async fn test_downstream_errors_hide_details() {
        let cases = vec![
            AppError::Search(SearchError::Unavailable("connection refused".into())),
            AppError::Timeout("search index"),
        ];
        for err in cases {
            let (status, body) = render(err).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
            assert_eq!(body, json!({ "status": "error", "msg": "system inner error" }));
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let (status, body) =
            render(AppError::Store(anyhow::anyhow!("pool timed out while waiting"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, json!({ "status": "error", "msg": "system inner error" }));
    }
}
