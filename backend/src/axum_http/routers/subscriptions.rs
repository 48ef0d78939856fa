use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use crates::domain::{
    repositories::{analytics_events::AnalyticsRepository, subscriptions::SubscriptionRepository},
    value_objects::subscriptions::{
        CancelSubscriptionDto, CheckoutSessionDto, CreateCheckoutRequest, CurrentSubscriptionDto,
    },
};
use tracing::warn;

use crate::{
    auth::AuthUser,
    axum_http::error_responses::ApiError,
    usecases::{
        billing_errors::BillingError, checkout::CheckoutUseCase, payment_gateway::PaymentGateway,
        subscriptions::SubscriptionUseCase,
    },
};

pub fn routes<S, A, G>(
    subscriptions_usecase: Arc<SubscriptionUseCase<S, G>>,
    checkout_usecase: Arc<CheckoutUseCase<S, A, G>>,
) -> Router
where
    S: SubscriptionRepository + 'static,
    A: AnalyticsRepository + 'static,
    G: PaymentGateway + 'static,
{
    let account_routes = Router::new()
        .route("/current", get(current_subscription::<S, G>))
        .route("/cancel", post(cancel_subscription::<S, G>))
        .with_state(subscriptions_usecase);

    let checkout_routes = Router::new()
        .route("/checkout", post(create_checkout::<S, A, G>))
        .with_state(checkout_usecase);

    account_routes.merge(checkout_routes)
}

pub async fn current_subscription<S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<S, G>>>,
    auth: AuthUser,
) -> Result<Json<CurrentSubscriptionDto>, ApiError>
where
    S: SubscriptionRepository + 'static,
    G: PaymentGateway + 'static,
{
    let current = subscriptions_usecase
        .current_subscription(auth.user_id)
        .await?;
    Ok(Json(current))
}

pub async fn create_checkout<S, A, G>(
    State(checkout_usecase): State<Arc<CheckoutUseCase<S, A, G>>>,
    auth: AuthUser,
    body: Bytes,
) -> Result<Json<CheckoutSessionDto>, ApiError>
where
    S: SubscriptionRepository + 'static,
    A: AnalyticsRepository + 'static,
    G: PaymentGateway + 'static,
{
    let request = parse_checkout_request(&body)?;
    let session = checkout_usecase
        .create_checkout(auth.user_id, auth.email.as_deref(), request)
        .await?;
    Ok(Json(session))
}

pub async fn cancel_subscription<S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<S, G>>>,
    auth: AuthUser,
) -> Result<Json<CancelSubscriptionDto>, ApiError>
where
    S: SubscriptionRepository + 'static,
    G: PaymentGateway + 'static,
{
    let cancelled = subscriptions_usecase
        .cancel_at_period_end(auth.user_id)
        .await?;
    Ok(Json(cancelled))
}

/// An empty body selects every default, which then fails plan validation.
fn parse_checkout_request(body: &[u8]) -> Result<CreateCheckoutRequest, BillingError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateCheckoutRequest::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        warn!(parse_error = %err, "checkout: request body rejected");
        BillingError::InvalidRequest("Request body must be a JSON object.".to_string())
    })
}
