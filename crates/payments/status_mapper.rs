use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::domain::value_objects::{
    enums::{
        payment_providers::PaymentProvider, plan_types::PlanType,
        subscription_statuses::SubscriptionStatus,
    },
    plan_catalog::PlanCatalog,
    subscriptions::UpsertSubscriptionModel,
};

use super::gateway_client::GatewaySubscription;

/// Lifecycle events that carry a subscription entity and drive the subscription row.
pub const SUBSCRIPTION_EVENTS: [&str; 9] = [
    "subscription.authenticated",
    "subscription.activated",
    "subscription.charged",
    "subscription.pending",
    "subscription.halted",
    "subscription.cancelled",
    "subscription.completed",
    "subscription.paused",
    "subscription.resumed",
];

pub fn is_subscription_event(event_type: &str) -> bool {
    SUBSCRIPTION_EVENTS.contains(&event_type)
}

/// Gateway status vocabulary to canonical status. Unrecognised values land on `incomplete`,
/// which never grants entitlement.
pub fn map_gateway_status(raw_status: &str) -> SubscriptionStatus {
    match raw_status.trim().to_ascii_lowercase().as_str() {
        "active" => SubscriptionStatus::Active,
        "pending" | "paused" => SubscriptionStatus::PastDue,
        "halted" => SubscriptionStatus::Unpaid,
        "cancelled" | "completed" | "expired" => SubscriptionStatus::Canceled,
        "created" | "authenticated" => SubscriptionStatus::Incomplete,
        _ => SubscriptionStatus::Incomplete,
    }
}

/// Some events are authoritative about the outcome even when the embedded entity's status
/// lags behind; these win over [`map_gateway_status`].
pub fn forced_status_for_event(event_type: &str) -> Option<SubscriptionStatus> {
    match event_type {
        "subscription.cancelled" | "subscription.completed" => Some(SubscriptionStatus::Canceled),
        "subscription.pending" => Some(SubscriptionStatus::PastDue),
        "subscription.halted" => Some(SubscriptionStatus::Unpaid),
        _ => None,
    }
}

pub fn unix_to_datetime(seconds: Option<i64>) -> Option<DateTime<Utc>> {
    seconds.and_then(|seconds| DateTime::from_timestamp(seconds, 0))
}

pub fn plan_type_for(subscription: &GatewaySubscription, catalog: &PlanCatalog) -> PlanType {
    match subscription.plan_id.as_deref() {
        Some(plan_id) => catalog.plan_type_for(plan_id),
        None => PlanType::Free,
    }
}

/// Raw gateway status and notes, kept on the row for audit. Never read back for decisions.
pub fn billing_metadata(subscription: &GatewaySubscription) -> Value {
    json!({
        "rawStatus": subscription.status,
        "notes": Value::Object(subscription.notes.clone()),
    })
}

pub fn to_upsert_model(
    subscription: &GatewaySubscription,
    user_id: Uuid,
    forced_status: Option<SubscriptionStatus>,
    catalog: &PlanCatalog,
    event_at: Option<DateTime<Utc>>,
) -> UpsertSubscriptionModel {
    UpsertSubscriptionModel {
        user_id,
        plan_type: plan_type_for(subscription, catalog),
        status: forced_status.unwrap_or_else(|| map_gateway_status(&subscription.status)),
        payment_provider: PaymentProvider::Gateway,
        provider_customer_id: subscription.customer_id.clone(),
        provider_subscription_id: Some(subscription.id.clone()),
        provider_plan_id: subscription.plan_id.clone(),
        billing_metadata: billing_metadata(subscription),
        current_period_start: unix_to_datetime(subscription.current_start),
        current_period_end: unix_to_datetime(subscription.current_end),
        cancel_at_period_end: subscription.has_scheduled_changes,
        trial_ends_at: None,
        last_event_at: event_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new("plan_monthly", "plan_annual")
    }

    fn gateway_subscription(status: &str, plan_id: &str) -> GatewaySubscription {
        GatewaySubscription {
            id: "sub_1".to_string(),
            status: status.to_string(),
            plan_id: Some(plan_id.to_string()),
            customer_id: Some("cust_1".to_string()),
            current_start: Some(1_700_000_000),
            current_end: Some(1_702_592_000),
            ..Default::default()
        }
    }

    #[test]
    fn mapping_table_is_total_and_deterministic() {
        let table = [
            ("active", SubscriptionStatus::Active),
            ("pending", SubscriptionStatus::PastDue),
            ("paused", SubscriptionStatus::PastDue),
            ("halted", SubscriptionStatus::Unpaid),
            ("cancelled", SubscriptionStatus::Canceled),
            ("completed", SubscriptionStatus::Canceled),
            ("expired", SubscriptionStatus::Canceled),
            ("created", SubscriptionStatus::Incomplete),
            ("authenticated", SubscriptionStatus::Incomplete),
        ];

        for (raw, expected) in table {
            assert_eq!(map_gateway_status(raw), expected, "raw status {raw}");
            assert_eq!(map_gateway_status(raw), map_gateway_status(raw));
        }
    }

    #[test]
    fn unknown_statuses_never_map_to_active() {
        for raw in ["", "ACTIVE_SOON", "trial", "unknown", "activated"] {
            assert_eq!(map_gateway_status(raw), SubscriptionStatus::Incomplete);
        }
    }

    #[test]
    fn terminal_event_overrides_lagging_active_status() {
        let subscription = gateway_subscription("active", "plan_monthly");
        let model = to_upsert_model(
            &subscription,
            Uuid::new_v4(),
            forced_status_for_event("subscription.cancelled"),
            &catalog(),
            None,
        );

        assert_eq!(model.status, SubscriptionStatus::Canceled);
    }

    #[test]
    fn forced_statuses_per_event() {
        assert_eq!(
            forced_status_for_event("subscription.completed"),
            Some(SubscriptionStatus::Canceled)
        );
        assert_eq!(
            forced_status_for_event("subscription.pending"),
            Some(SubscriptionStatus::PastDue)
        );
        assert_eq!(
            forced_status_for_event("subscription.halted"),
            Some(SubscriptionStatus::Unpaid)
        );
        assert_eq!(forced_status_for_event("subscription.activated"), None);
        assert_eq!(forced_status_for_event("subscription.charged"), None);
    }

    #[test]
    fn upsert_model_carries_gateway_refs_and_periods() {
        let user_id = Uuid::new_v4();
        let mut subscription = gateway_subscription("active", "plan_annual");
        subscription.has_scheduled_changes = true;
        subscription
            .notes
            .insert("user_id".to_string(), json!(user_id.to_string()));

        let model = to_upsert_model(&subscription, user_id, None, &catalog(), None);

        assert_eq!(model.user_id, user_id);
        assert_eq!(model.plan_type, PlanType::Pro);
        assert_eq!(model.status, SubscriptionStatus::Active);
        assert_eq!(model.payment_provider, PaymentProvider::Gateway);
        assert_eq!(model.provider_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(model.provider_customer_id.as_deref(), Some("cust_1"));
        assert_eq!(model.current_period_start, unix_to_datetime(Some(1_700_000_000)));
        assert!(model.cancel_at_period_end);
        assert_eq!(model.billing_metadata["rawStatus"], "active");
        assert_eq!(model.billing_metadata["notes"]["user_id"], user_id.to_string());
    }

    #[test]
    fn plan_outside_allowlist_is_free() {
        let model = to_upsert_model(
            &gateway_subscription("active", "plan_legacy"),
            Uuid::new_v4(),
            None,
            &catalog(),
            None,
        );
        assert_eq!(model.plan_type, PlanType::Free);
    }

    #[test]
    fn only_lifecycle_events_are_recognised() {
        assert!(is_subscription_event("subscription.charged"));
        assert!(!is_subscription_event("payment.captured"));
        assert!(!is_subscription_event("subscription.updated"));
    }
}
