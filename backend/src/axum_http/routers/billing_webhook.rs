use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    middleware::from_fn_with_state,
    routing::post,
};
use crates::{
    domain::{
        repositories::{
            analytics_events::AnalyticsRepository, billing_webhook_events::WebhookEventRepository,
            subscriptions::SubscriptionRepository,
        },
        value_objects::subscriptions::WebhookAckDto,
    },
    payments::webhook_signature::{EVENT_ID_HEADER, SIGNATURE_HEADER},
};
use tracing::info;

use crate::{
    axum_http::{
        error_responses::ApiError,
        rate_limit::{RateLimitState, rate_limit_middleware},
    },
    usecases::billing_webhook::BillingWebhookUseCase,
};

pub fn routes<S, L, A>(
    usecase: Arc<BillingWebhookUseCase<S, L, A>>,
    rate_limit: RateLimitState,
) -> Router
where
    S: SubscriptionRepository + 'static,
    L: WebhookEventRepository + 'static,
    A: AnalyticsRepository + 'static,
{
    Router::new()
        .route("/gateway", post(gateway_webhook::<S, L, A>))
        .route_layer(from_fn_with_state(rate_limit, rate_limit_middleware))
        .with_state(usecase)
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// The body stays raw bytes: the signature covers the exact payload the gateway sent.
pub async fn gateway_webhook<S, L, A>(
    State(usecase): State<Arc<BillingWebhookUseCase<S, L, A>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAckDto>, ApiError>
where
    S: SubscriptionRepository + 'static,
    L: WebhookEventRepository + 'static,
    A: AnalyticsRepository + 'static,
{
    info!(
        body_len = body.len(),
        "billing_webhook: gateway delivery received"
    );
    let ack = usecase
        .handle_webhook(
            &body,
            header_value(&headers, SIGNATURE_HEADER),
            header_value(&headers, EVENT_ID_HEADER),
        )
        .await?;
    Ok(Json(ack))
}
