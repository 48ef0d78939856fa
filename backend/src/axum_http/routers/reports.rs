use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Request, State},
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::get,
};
use crates::domain::{
    repositories::subscriptions::SubscriptionRepository,
    value_objects::subscriptions::{ReportAccessDto, UserSubscriptionModel},
};

use crate::{
    auth::AuthUser,
    axum_http::error_responses::ApiError,
    usecases::{payment_gateway::PaymentGateway, subscriptions::SubscriptionUseCase},
};

/// Premium report endpoints. Everything nested here sits behind `require_pro`.
pub fn routes<S, G>(subscriptions_usecase: Arc<SubscriptionUseCase<S, G>>) -> Router
where
    S: SubscriptionRepository + 'static,
    G: PaymentGateway + 'static,
{
    Router::new()
        .route("/access", get(report_access))
        .route_layer(from_fn_with_state(subscriptions_usecase, require_pro::<S, G>))
}

/// Rejects with `PRO_REQUIRED` unless the caller is pro-entitled; the entitled row is handed to
/// the handler as a request extension.
pub async fn require_pro<S, G>(
    State(subscriptions_usecase): State<Arc<SubscriptionUseCase<S, G>>>,
    auth: AuthUser,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    S: SubscriptionRepository + 'static,
    G: PaymentGateway + 'static,
{
    let subscription = subscriptions_usecase
        .require_pro_entitlement(auth.user_id)
        .await?;
    req.extensions_mut().insert(subscription);
    Ok(next.run(req).await)
}

pub async fn report_access(
    Extension(subscription): Extension<UserSubscriptionModel>,
) -> Json<ReportAccessDto> {
    Json(ReportAccessDto {
        allowed: true,
        plan_type: subscription.plan_type,
    })
}
