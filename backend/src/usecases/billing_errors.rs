use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Invalid plan selected.")]
    InvalidPlan,
    #[error("An email address is required for checkout.")]
    MissingEmail,
    #[error("Invalid webhook signature.")]
    InvalidSignature,
    #[error("Invalid webhook payload.")]
    InvalidPayload,
    #[error("Unable to map gateway subscription to a user.")]
    SubscriptionMappingNotFound,
    #[error("You already have an active subscription. Manage it from Settings.")]
    SubscriptionExists,
    #[error("No gateway subscription found for this user.")]
    NoBillingAccount,
    #[error("Cannot cancel subscription with status: {0}.")]
    SubscriptionNotActive(String),
    #[error(
        "Subscription cannot be cancelled because no billing cycle is active. The subscription may already be cancelled or incomplete."
    )]
    NoBillingCycle,
    #[error("Authentication required.")]
    Unauthorized,
    #[error("A pro subscription is required for this feature.")]
    ProRequired,
    #[error("Too many requests. Retry in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },
    #[error("Unable to start checkout.")]
    CheckoutFailed(#[source] anyhow::Error),
    #[error("Payment gateway request failed.")]
    GatewayUnavailable(#[source] anyhow::Error),
    #[error("Unexpected server error.")]
    Internal(#[from] anyhow::Error),
}

impl BillingError {
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::InvalidRequest(_) => "INVALID_REQUEST",
            BillingError::InvalidPlan => "INVALID_PLAN",
            BillingError::MissingEmail => "MISSING_EMAIL",
            BillingError::InvalidSignature => "INVALID_SIGNATURE",
            BillingError::InvalidPayload => "INVALID_PAYLOAD",
            BillingError::SubscriptionMappingNotFound => "SUBSCRIPTION_MAPPING_NOT_FOUND",
            BillingError::SubscriptionExists => "SUBSCRIPTION_EXISTS",
            BillingError::NoBillingAccount => "NO_BILLING_ACCOUNT",
            BillingError::SubscriptionNotActive(_) => "SUBSCRIPTION_NOT_ACTIVE",
            BillingError::NoBillingCycle => "NO_BILLING_CYCLE",
            BillingError::Unauthorized => "UNAUTHORIZED",
            BillingError::ProRequired => "PRO_REQUIRED",
            BillingError::RateLimited { .. } => "RATE_LIMITED",
            BillingError::CheckoutFailed(_) => "CHECKOUT_FAILED",
            BillingError::GatewayUnavailable(_) => "GATEWAY_ERROR",
            BillingError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            BillingError::InvalidRequest(_)
            | BillingError::InvalidPlan
            | BillingError::MissingEmail
            | BillingError::InvalidSignature
            | BillingError::InvalidPayload
            | BillingError::SubscriptionMappingNotFound
            | BillingError::NoBillingAccount
            | BillingError::SubscriptionNotActive(_)
            | BillingError::NoBillingCycle => StatusCode::BAD_REQUEST,
            BillingError::SubscriptionExists => StatusCode::CONFLICT,
            BillingError::Unauthorized => StatusCode::UNAUTHORIZED,
            BillingError::ProRequired => StatusCode::FORBIDDEN,
            BillingError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            BillingError::CheckoutFailed(_) | BillingError::GatewayUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
            BillingError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message plus underlying cause chain, for logs and the webhook ledger. Never sent to
    /// clients.
    pub fn detail(&self) -> String {
        match self {
            BillingError::CheckoutFailed(source)
            | BillingError::GatewayUnavailable(source)
            | BillingError::Internal(source) => format!("{self}: {source:#}"),
            _ => self.to_string(),
        }
    }
}

pub type UseCaseResult<T> = std::result::Result<T, BillingError>;
