pub mod app_server;
pub mod controllers;
pub mod error;
pub mod models;

pub use app_server::AppServer;
pub use error::ApiError;

use axum::http::HeaderMap;

/// Header carrying the authenticated account id, supplied by the upstream
/// auth layer. Requests without it are unauthenticated.
pub const ACCOUNT_HEADER: &str = "x-account-id";

/// Extract the caller's account id or reject the request.
pub(crate) fn account_from_headers(headers: &HeaderMap) -> Result<i64, ApiError> {
    headers
        .get(ACCOUNT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| ApiError::bad_request(format!("missing or invalid {} header", ACCOUNT_HEADER)))
}
