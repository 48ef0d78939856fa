use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use crates::domain::repositories::rate_limits::RateLimitStore;
use tracing::warn;

use crate::{axum_http::error_responses::ApiError, usecases::billing_errors::BillingError};

const FORWARDED_FOR: &str = "x-forwarded-for";
const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Clone)]
pub struct RateLimitState {
    pub store: Arc<dyn RateLimitStore>,
    pub scope: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

/// First hop of `x-forwarded-for`, the address the edge proxy saw.
pub fn client_key(headers: &HeaderMap) -> String {
    headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let client = client_key(req.headers());
    let key = format!("{}:{}", state.scope, client);

    let decision = state
        .store
        .check_and_increment(&key, state.max_requests, state.window);

    if !decision.allowed {
        warn!(
            scope = state.scope,
            client = %client,
            retry_after_secs = decision.retry_after_secs,
            "rate_limit: request rejected"
        );
        return ApiError::from(BillingError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        })
        .into_response();
    }

    next.run(req).await
}
