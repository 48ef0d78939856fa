use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::user_subscriptions},
};
use domain::{
    entities::user_subscriptions::{UpsertUserSubscriptionEntity, UserSubscriptionEntity},
    repositories::subscriptions::{ObservedRow, SubscriptionRepository, UpsertOutcome},
    value_objects::{
        enums::subscription_statuses::SubscriptionStatus,
        subscriptions::{EventMerge, merge_event_into_row},
    },
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<UserSubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = user_subscriptions::table
            .filter(user_subscriptions::user_id.eq(user_id))
            .select(UserSubscriptionEntity::as_select())
            .first::<UserSubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_provider_refs(
        &self,
        payment_provider: String,
        provider_subscription_id: Option<String>,
        provider_customer_id: Option<String>,
    ) -> Result<Option<UserSubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        if let Some(provider_subscription_id) = provider_subscription_id {
            let by_subscription = user_subscriptions::table
                .filter(user_subscriptions::payment_provider.eq(&payment_provider))
                .filter(user_subscriptions::provider_subscription_id.eq(provider_subscription_id))
                .select(UserSubscriptionEntity::as_select())
                .first::<UserSubscriptionEntity>(&mut conn)
                .optional()?;

            if by_subscription.is_some() {
                return Ok(by_subscription);
            }
        }

        let Some(provider_customer_id) = provider_customer_id else {
            return Ok(None);
        };

        let by_customer = user_subscriptions::table
            .filter(user_subscriptions::payment_provider.eq(&payment_provider))
            .filter(user_subscriptions::provider_customer_id.eq(provider_customer_id))
            .order(user_subscriptions::updated_at.desc())
            .select(UserSubscriptionEntity::as_select())
            .first::<UserSubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(by_customer)
    }

    async fn upsert_from_event(
        &self,
        entity: UpsertUserSubscriptionEntity,
    ) -> Result<UpsertOutcome> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let outcome = conn.transaction::<UpsertOutcome, diesel::result::Error, _>(|conn| {
            let inserted = insert_into(user_subscriptions::table)
                .values(&entity)
                .on_conflict(user_subscriptions::user_id)
                .do_nothing()
                .execute(conn)?;

            if inserted == 1 {
                return Ok(UpsertOutcome::Applied {
                    previous_status: None,
                });
            }

            // The row exists now; the lock serialises concurrent webhooks for this user so the
            // merge and the write see the same row.
            let stored = user_subscriptions::table
                .filter(user_subscriptions::user_id.eq(entity.user_id))
                .select(UserSubscriptionEntity::as_select())
                .for_update()
                .first::<UserSubscriptionEntity>(conn)?;

            let merged = match merge_event_into_row(entity, &stored) {
                EventMerge::Apply(merged) => merged,
                EventMerge::Stale => return Ok(UpsertOutcome::Stale),
                EventMerge::Superseded => return Ok(UpsertOutcome::Superseded),
            };

            update(user_subscriptions::table.filter(user_subscriptions::user_id.eq(stored.user_id)))
                .set(&merged)
                .execute(conn)?;

            Ok(UpsertOutcome::Applied {
                previous_status: Some(SubscriptionStatus::from_str(&stored.status)),
            })
        })?;

        Ok(outcome)
    }

    async fn upsert_if_unchanged(
        &self,
        entity: UpsertUserSubscriptionEntity,
        observed: ObservedRow,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let affected = match observed {
            ObservedRow::Missing => insert_into(user_subscriptions::table)
                .values(&entity)
                .on_conflict(user_subscriptions::user_id)
                .do_nothing()
                .execute(&mut conn)?,
            ObservedRow::Reclaimable {
                provider_subscription_id,
            } => {
                let live_statuses: Vec<&str> = SubscriptionStatus::LIVE
                    .iter()
                    .map(SubscriptionStatus::as_str)
                    .collect();

                update(
                    user_subscriptions::table
                        .filter(user_subscriptions::user_id.eq(entity.user_id))
                        .filter(
                            user_subscriptions::provider_subscription_id
                                .is_not_distinct_from(provider_subscription_id),
                        )
                        .filter(user_subscriptions::status.ne_all(live_statuses)),
                )
                .set(&entity)
                .execute(&mut conn)?
            }
        };

        Ok(affected == 1)
    }

    async fn mark_cancel_at_period_end(&self, user_id: Uuid) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let affected = update(
            user_subscriptions::table.filter(user_subscriptions::user_id.eq(user_id)),
        )
        .set((
            user_subscriptions::cancel_at_period_end.eq(true),
            user_subscriptions::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

        if affected == 0 {
            bail!("no subscription row for user {}", user_id);
        }

        Ok(())
    }
}
