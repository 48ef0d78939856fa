use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::user_subscriptions::{
    UpsertUserSubscriptionEntity, UserSubscriptionEntity,
};
use crate::domain::value_objects::enums::{
    payment_providers::PaymentProvider, plan_types::PlanType,
    subscription_statuses::SubscriptionStatus,
};

/// A user's entitlement record. `id` and `updated_at` are `None` for the implicit free row that
/// stands in for a missing database row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserSubscriptionModel {
    pub id: Option<Uuid>,
    pub user_id: Uuid,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub payment_provider: PaymentProvider,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_plan_id: Option<String>,
    pub billing_metadata: serde_json::Value,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub last_event_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserSubscriptionModel {
    /// The only place the "no row means free" rule lives. Never persisted.
    pub fn implicit_free(user_id: Uuid) -> Self {
        Self {
            id: None,
            user_id,
            plan_type: PlanType::Free,
            status: SubscriptionStatus::Active,
            payment_provider: PaymentProvider::Manual,
            provider_customer_id: None,
            provider_subscription_id: None,
            provider_plan_id: None,
            billing_metadata: serde_json::json!({}),
            current_period_start: None,
            current_period_end: None,
            cancel_at_period_end: false,
            trial_ends_at: None,
            last_event_at: None,
            updated_at: None,
        }
    }

    /// `past_due` still counts: payment retries get a grace period.
    pub fn is_pro_entitled(&self) -> bool {
        self.plan_type == PlanType::Pro && self.status.is_live()
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }
}

impl From<UserSubscriptionEntity> for UserSubscriptionModel {
    fn from(value: UserSubscriptionEntity) -> Self {
        Self {
            id: Some(value.id),
            user_id: value.user_id,
            plan_type: PlanType::from_str(&value.plan_type),
            status: SubscriptionStatus::from_str(&value.status),
            payment_provider: PaymentProvider::from_str(&value.payment_provider)
                .unwrap_or(PaymentProvider::Manual),
            provider_customer_id: value.provider_customer_id,
            provider_subscription_id: value.provider_subscription_id,
            provider_plan_id: value.provider_plan_id,
            billing_metadata: value.billing_metadata,
            current_period_start: value.current_period_start,
            current_period_end: value.current_period_end,
            cancel_at_period_end: value.cancel_at_period_end,
            trial_ends_at: value.trial_ends_at,
            last_event_at: value.last_event_at,
            updated_at: Some(value.updated_at),
        }
    }
}

/// Everything an upsert writes for one user.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertSubscriptionModel {
    pub user_id: Uuid,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub payment_provider: PaymentProvider,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub provider_plan_id: Option<String>,
    pub billing_metadata: serde_json::Value,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub trial_ends_at: Option<DateTime<Utc>>,
    /// Provider-side timestamp of the webhook event this write comes from; `None` for writes
    /// that do not originate from an event (checkout).
    pub last_event_at: Option<DateTime<Utc>>,
}

impl UpsertSubscriptionModel {
    pub fn to_entity(&self, updated_at: DateTime<Utc>) -> UpsertUserSubscriptionEntity {
        UpsertUserSubscriptionEntity {
            user_id: self.user_id,
            plan_type: self.plan_type.to_string(),
            status: self.status.to_string(),
            payment_provider: self.payment_provider.to_string(),
            provider_customer_id: self.provider_customer_id.clone(),
            provider_subscription_id: self.provider_subscription_id.clone(),
            provider_plan_id: self.provider_plan_id.clone(),
            billing_metadata: self.billing_metadata.clone(),
            current_period_start: self.current_period_start,
            current_period_end: self.current_period_end,
            cancel_at_period_end: self.cancel_at_period_end,
            trial_ends_at: self.trial_ends_at,
            last_event_at: self.last_event_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventMerge {
    Apply(UpsertUserSubscriptionEntity),
    Stale,
    Superseded,
}

/// Folds a webhook-derived write into the user's stored row. Callers hold the row lock.
pub fn merge_event_into_row(
    mut incoming: UpsertUserSubscriptionEntity,
    stored: &UserSubscriptionEntity,
) -> EventMerge {
    if let (Some(stored_at), Some(incoming_at)) = (stored.last_event_at, incoming.last_event_at) {
        if incoming_at < stored_at {
            return EventMerge::Stale;
        }
    }

    let incoming_live = SubscriptionStatus::from_str(&incoming.status).is_live();
    let same_subscription = stored.provider_subscription_id == incoming.provider_subscription_id;

    if !same_subscription && stored.provider_subscription_id.is_some() && !incoming_live {
        return EventMerge::Superseded;
    }

    // A user cancellation stays scheduled until the provider reports the subscription ended.
    if same_subscription && stored.cancel_at_period_end && incoming_live {
        incoming.cancel_at_period_end = true;
    }

    if incoming.provider_customer_id.is_none() {
        incoming.provider_customer_id = stored.provider_customer_id.clone();
    }

    if incoming.last_event_at.is_none() {
        incoming.last_event_at = stored.last_event_at;
    }

    EventMerge::Apply(incoming)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    pub plan: Option<String>,
    pub success_path: Option<String>,
    pub cancel_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CheckoutSessionDto {
    pub subscription_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CancelSubscriptionDto {
    pub message: String,
    #[serde(rename = "cancelAtPeriodEnd")]
    pub cancel_at_period_end: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentSubscriptionDto {
    pub subscription: UserSubscriptionModel,
    pub is_pro_entitled: bool,
}

impl From<UserSubscriptionModel> for CurrentSubscriptionDto {
    fn from(subscription: UserSubscriptionModel) -> Self {
        let is_pro_entitled = subscription.is_pro_entitled();
        Self {
            subscription,
            is_pro_entitled,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookAckDto {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate: Option<bool>,
}

impl WebhookAckDto {
    pub fn processed() -> Self {
        Self {
            received: true,
            duplicate: None,
        }
    }

    pub fn duplicate() -> Self {
        Self {
            received: true,
            duplicate: Some(true),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportAccessDto {
    pub allowed: bool,
    pub plan_type: PlanType,
}
