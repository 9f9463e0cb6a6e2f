use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Mempool error: {0}")]
    Mempool(#[from] prioria_mempool::MempoolError),

    #[error("Chain error: {0}")]
    Chain(#[from] prioria_chain::ChainError),
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        use prioria_mempool::MempoolError;

        let (status, message) = match &self {
            RpcError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            RpcError::Mempool(MempoolError::DuplicateEntry(_)) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            RpcError::Mempool(MempoolError::PoolFull) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            RpcError::Mempool(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            RpcError::Chain(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = json!({
            "error": message
        });

        (status, axum::Json(body)).into_response()
    }
}
