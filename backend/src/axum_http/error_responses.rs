use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{Level, error, warn};

use crate::usecases::billing_errors::BillingError;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// HTTP boundary for use case failures. Renders `{"error":{"code","message"}}`; the message of
/// internal variants is generic and the cause chain only goes to the log.
#[derive(Debug)]
pub struct ApiError(pub BillingError);

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn code(&self) -> &'static str {
        self.0.code()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        ApiError(err)
    }
}

/// Upstream gateway failures are logged as warnings; other 5xx responses as errors.
fn failure_log_level(status: StatusCode) -> Option<Level> {
    if status == StatusCode::BAD_GATEWAY {
        Some(Level::WARN)
    } else if status.is_server_error() {
        Some(Level::ERROR)
    } else {
        None
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match failure_log_level(status) {
            Some(level) if level == Level::WARN => {
                warn!(code = self.code(), error = %self.0.detail(), "http: upstream failure")
            }
            Some(_) => error!(
                code = self.code(),
                status = status.as_u16(),
                error = %self.0.detail(),
                "http: request failed"
            ),
            None => {}
        }

        let retry_after = match &self.0 {
            BillingError::RateLimited { retry_after_secs } => {
                HeaderValue::from_str(&retry_after_secs.to_string()).ok()
            }
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.0.to_string(),
            },
        });

        let mut response = (status, body).into_response();
        if let Some(value) = retry_after {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::{Value, json};

    async fn render(err: BillingError) -> (StatusCode, Option<String>, Value) {
        let response = ApiError::from(err).into_response();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .map(|value| value.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, retry_after, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn renders_structured_error_body() {
        let (status, _, body) = render(BillingError::SubscriptionExists).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], json!("SUBSCRIPTION_EXISTS"));
        assert!(body["error"]["message"].as_str().unwrap().contains("Settings"));
    }

    #[tokio::test]
    async fn internal_errors_do_not_leak_detail() {
        let (status, _, body) =
            render(BillingError::Internal(anyhow::anyhow!("password=hunter2 at db host"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], json!("Unexpected server error."));
    }

    #[tokio::test]
    async fn gateway_failures_render_generic_bad_gateway() {
        let (status, _, body) =
            render(BillingError::GatewayUnavailable(anyhow::anyhow!("api key rzp_live_123 rejected")))
                .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], json!("GATEWAY_ERROR"));
        assert_eq!(body["error"]["message"], json!("Payment gateway request failed."));
    }

    #[test]
    fn bad_gateway_logs_as_warning_and_other_server_errors_as_errors() {
        assert_eq!(failure_log_level(StatusCode::BAD_GATEWAY), Some(Level::WARN));
        assert_eq!(failure_log_level(StatusCode::INTERNAL_SERVER_ERROR), Some(Level::ERROR));
        assert_eq!(failure_log_level(StatusCode::SERVICE_UNAVAILABLE), Some(Level::ERROR));
        assert_eq!(failure_log_level(StatusCode::CONFLICT), None);
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let (status, retry_after, body) =
            render(BillingError::RateLimited { retry_after_secs: 17 }).await;

        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(retry_after.as_deref(), Some("17"));
        assert_eq!(body["error"]["code"], json!("RATE_LIMITED"));
    }
}
