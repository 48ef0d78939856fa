use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{
    entities::user_subscriptions::{UpsertUserSubscriptionEntity, UserSubscriptionEntity},
    value_objects::enums::subscription_statuses::SubscriptionStatus,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// `previous_status` is `None` when the write created the row.
    Applied {
        previous_status: Option<SubscriptionStatus>,
    },
    /// The row already reflects a newer provider event; nothing was written.
    Stale,
    /// The event is for a provider subscription the row has moved away from and would not make
    /// it live; nothing was written.
    Superseded,
}

/// What a checkout saw on the user's row before it went to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObservedRow {
    Missing,
    /// The row may be overwritten while it still points at this provider subscription and is
    /// not live. Webhooks that end the old subscription in the meantime keep it writable.
    Reclaimable {
        provider_subscription_id: Option<String>,
    },
}

impl ObservedRow {
    pub fn from_row(row: Option<&UserSubscriptionEntity>) -> Self {
        match row {
            None => ObservedRow::Missing,
            Some(row) => ObservedRow::Reclaimable {
                provider_subscription_id: row.provider_subscription_id.clone(),
            },
        }
    }

    pub fn still_holds(&self, current: Option<&UserSubscriptionEntity>) -> bool {
        match (self, current) {
            (ObservedRow::Missing, None) => true,
            (
                ObservedRow::Reclaimable {
                    provider_subscription_id,
                },
                Some(row),
            ) => {
                row.provider_subscription_id == *provider_subscription_id
                    && !SubscriptionStatus::from_str(&row.status).is_live()
            }
            _ => false,
        }
    }
}

/// Single-row-per-user entitlement store.
#[automock]
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<UserSubscriptionEntity>>;

    /// Looks up by provider subscription id first, then by provider customer id.
    async fn find_by_provider_refs(
        &self,
        payment_provider: String,
        provider_subscription_id: Option<String>,
        provider_customer_id: Option<String>,
    ) -> Result<Option<UserSubscriptionEntity>>;

    /// Upsert keyed by user. The incoming write is folded into the stored row with
    /// `merge_event_into_row` while the row is locked.
    async fn upsert_from_event(&self, entity: UpsertUserSubscriptionEntity)
    -> Result<UpsertOutcome>;

    /// Checkout write. Returns `false` when the row no longer matches `observed`.
    async fn upsert_if_unchanged(
        &self,
        entity: UpsertUserSubscriptionEntity,
        observed: ObservedRow,
    ) -> Result<bool>;

    async fn mark_cancel_at_period_end(&self, user_id: Uuid) -> Result<()>;
}
