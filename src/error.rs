use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider authentication failed: {0}")]
    Authentication(String),
    #[error("provider request timed out")]
    Timeout,
    #[error("provider unreachable: {0}")]
    Network(#[source] reqwest::Error),
    #[error("provider returned an unreadable body: {0}")]
    InvalidResponse(#[source] reqwest::Error),
    #[error("invalid provider endpoint: {0}")]
    Endpoint(String),
    #[error("payment id {0:?} is not a provider payment id")]
    InvalidPaymentId(String),
}

impl ProviderError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err)
        } else {
            Self::Network(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection pool: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failures that escape a handler. Business declines are not errors and never
/// reach this type.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Provider(ProviderError::Authentication(_)) => (
                StatusCode::BAD_GATEWAY,
                "Payment provider authentication failed",
            ),
            ApiError::Provider(ProviderError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "Payment provider timed out")
            }
            ApiError::Provider(ProviderError::InvalidPaymentId(_)) => {
                (StatusCode::BAD_REQUEST, "Invalid payment id")
            }
            ApiError::Provider(_) => (StatusCode::BAD_GATEWAY, "Payment provider unavailable"),
            ApiError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
        };

        match &self {
            ApiError::Provider(err) => tracing::warn!(?err, "provider_err"),
            ApiError::Store(err) => tracing::error!(?err, "store_err"),
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}
