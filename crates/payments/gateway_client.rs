use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Deserializer, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

pub const DEFAULT_API_BASE_URL: &str = "https://api.razorpay.com/v1";

/// Error code the gateway uses for its own internal failures.
const SERVER_ERROR_CODE: &str = "SERVER_ERROR";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway rejected {context} (status {status}, code {code:?}): {description}")]
    Api {
        context: &'static str,
        status: u16,
        code: Option<String>,
        description: String,
    },
    #[error("gateway request failed during {context}: {source}")]
    Transport {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("gateway response for {context} could not be decoded: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

impl GatewayError {
    /// Server-side failures worth exactly one retry.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Api { status, code, .. } => {
                *status >= 500 || code.as_deref() == Some(SERVER_ERROR_CODE)
            }
            _ => false,
        }
    }

    /// The gateway refuses to schedule a cycle-end cancellation when no cycle is running.
    pub fn is_no_billing_cycle(&self) -> bool {
        match self {
            GatewayError::Api { description, .. } => {
                let description = description.to_ascii_lowercase();
                description.contains("no billing cycle")
                    || description.contains("billing cycle is going on")
            }
            _ => false,
        }
    }
}

/// Subscription entity as returned by the REST API and embedded in webhook payloads.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    #[serde(default)]
    pub status: String,
    pub plan_id: Option<String>,
    pub customer_id: Option<String>,
    pub current_start: Option<i64>,
    pub current_end: Option<i64>,
    pub charge_at: Option<i64>,
    pub ended_at: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_nullable_bool")]
    pub has_scheduled_changes: bool,
    #[serde(default, deserialize_with = "deserialize_notes")]
    pub notes: Map<String, Value>,
    pub short_url: Option<String>,
}

impl GatewaySubscription {
    /// `notes.user_id`, stamped on every customer and subscription this service creates.
    pub fn noted_user_id(&self) -> Option<Uuid> {
        self.notes
            .get("user_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    }

    pub fn checkout_url(&self) -> Option<&str> {
        self.short_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayWebhookEvent {
    #[serde(default)]
    pub entity: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    pub event: String,
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default)]
    pub payload: GatewayWebhookPayload,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayWebhookPayload {
    #[serde(default)]
    pub subscription: Option<GatewayEntityWrapper<GatewaySubscription>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEntityWrapper<T> {
    pub entity: T,
}

impl GatewayWebhookEvent {
    pub fn subscription(&self) -> Option<&GatewaySubscription> {
        self.payload
            .subscription
            .as_ref()
            .map(|wrapper| &wrapper.entity)
    }
}

/// Parameters for a new recurring subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubscriptionParams {
    pub plan_id: String,
    pub total_count: u32,
    pub customer_id: String,
    /// Unix seconds after which an unpaid checkout lapses on the gateway side.
    pub expire_by: i64,
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    code: Option<String>,
    description: Option<String>,
    reason: Option<String>,
    field: Option<String>,
}

/// Payment gateway REST client built on reqwest, authenticated with key id + secret.
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    retry_delay: Duration,
}

impl GatewayClient {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            retry_delay,
        }
    }

    async fn request_once<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        context: &'static str,
    ) -> Result<T, GatewayError> {
        let mut request = self
            .http
            .request(method, format!("{}/{}", self.base_url, path))
            .basic_auth(&self.key_id, Some(&self.key_secret));
        if let Some(body) = body {
            request = request.json(body);
        }

        let resp = request
            .send()
            .await
            .map_err(|source| GatewayError::Transport { context, source })?;

        if resp.status().is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|source| GatewayError::Decode { context, source });
        }

        Err(Self::api_error(resp, context).await)
    }

    async fn api_error(resp: reqwest::Response, context: &'static str) -> GatewayError {
        let status = resp.status();
        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);
        let code = details.as_ref().and_then(|d| d.code.clone());
        let description = details
            .as_ref()
            .and_then(|d| d.description.clone())
            .unwrap_or_else(|| status_text(status));

        error!(
            status = %status,
            gateway_error_code = ?code,
            gateway_error_description = %description,
            gateway_error_reason = ?details.as_ref().and_then(|d| d.reason.as_deref()),
            gateway_error_field = ?details.as_ref().and_then(|d| d.field.as_deref()),
            response_body = %body,
            context = %context,
            "gateway api request failed"
        );

        GatewayError::Api {
            context,
            status: status.as_u16(),
            code,
            description,
        }
    }

    /// Sends the request, retrying once after `retry_delay` when the gateway reports a
    /// server-side failure.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        context: &'static str,
    ) -> Result<T, GatewayError> {
        match self.request_once(method.clone(), path, body, context).await {
            Err(err) if err.is_transient() => {
                warn!(
                    context = %context,
                    retry_delay_ms = self.retry_delay.as_millis() as u64,
                    "gateway: transient failure, retrying once"
                );
                tokio::time::sleep(self.retry_delay).await;
                self.request_once(method, path, body, context).await
            }
            other => other,
        }
    }

    /// Creates the customer, or returns the existing one for the same email.
    pub async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String, GatewayError> {
        let body = json!({
            "email": email,
            "fail_existing": 0,
            "notes": { "user_id": user_id.to_string() },
        });

        #[derive(Deserialize)]
        struct CustomerResp {
            id: String,
        }

        let parsed: CustomerResp = self
            .request(Method::POST, "customers", Some(&body), "create customer")
            .await?;
        Ok(parsed.id)
    }

    pub async fn create_subscription(
        &self,
        params: &CreateSubscriptionParams,
    ) -> Result<GatewaySubscription, GatewayError> {
        let body = json!({
            "plan_id": params.plan_id,
            "total_count": params.total_count,
            "quantity": 1,
            "customer_notify": 1,
            "customer_id": params.customer_id,
            "expire_by": params.expire_by,
            "notes": { "user_id": params.user_id.to_string() },
        });

        self.request(
            Method::POST,
            "subscriptions",
            Some(&body),
            "create subscription",
        )
        .await
    }

    pub async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.request(
            Method::GET,
            &format!("subscriptions/{subscription_id}"),
            None,
            "fetch subscription",
        )
        .await
    }

    /// With `at_cycle_end` the subscription stays usable until the current cycle ends.
    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_cycle_end: bool,
    ) -> Result<GatewaySubscription, GatewayError> {
        let body = json!({ "cancel_at_cycle_end": if at_cycle_end { 1 } else { 0 } });

        self.request(
            Method::POST,
            &format!("subscriptions/{subscription_id}/cancel"),
            Some(&body),
            "cancel subscription",
        )
        .await
    }
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_u16().to_string())
}

fn deserialize_nullable_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// The gateway sends `notes` as an object, but as `[]` when nothing was attached.
fn deserialize_notes<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}
