use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use diesel::{
    RunQueryDsl, insert_into,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    update,
};
use std::sync::Arc;
use tracing::info;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::billing_webhook_events},
};
use domain::{
    entities::billing_webhook_events::InsertBillingWebhookEventEntity,
    repositories::billing_webhook_events::WebhookEventRepository,
};

pub struct BillingWebhookEventPostgres {
    db_pool: Arc<PgPoolSquad>,
    reservation_lease: Duration,
}

impl BillingWebhookEventPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>, reservation_lease: Duration) -> Self {
        Self {
            db_pool,
            reservation_lease,
        }
    }
}

#[async_trait]
impl WebhookEventRepository for BillingWebhookEventPostgres {
    async fn reserve(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<bool> {
        let mut conn = Arc::clone(&self.db_pool).get()?;
        let now = Utc::now();

        let insert_entity = InsertBillingWebhookEventEntity {
            provider: provider.to_string(),
            event_id: event_id.to_string(),
            event_type: event_type.to_string(),
            payload,
            processed: false,
            attempts: 1,
            reserved_at: now,
        };

        match insert_into(billing_webhook_events::table)
            .values(&insert_entity)
            .execute(&mut conn)
        {
            Ok(_) => Ok(true),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                // Seen before. Only a failed attempt, or one whose lease ran out without
                // finishing, may be taken over by this delivery.
                let lease_cutoff = now - self.reservation_lease;
                let reclaimed = update(
                    billing_webhook_events::table
                        .filter(billing_webhook_events::provider.eq(provider))
                        .filter(billing_webhook_events::event_id.eq(event_id))
                        .filter(billing_webhook_events::processed.eq(false))
                        .filter(
                            billing_webhook_events::error_message
                                .is_not_null()
                                .or(billing_webhook_events::reserved_at.lt(lease_cutoff)),
                        ),
                )
                .set((
                    billing_webhook_events::error_message.eq(None::<String>),
                    billing_webhook_events::reserved_at.eq(now),
                    billing_webhook_events::attempts.eq(billing_webhook_events::attempts + 1),
                ))
                .execute(&mut conn)?;

                if reclaimed > 0 {
                    info!(
                        provider,
                        event_id,
                        "billing_webhook_events: reclaimed reservation for redelivered event"
                    );
                }

                Ok(reclaimed > 0)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn mark_processed(&self, provider: &str, event_id: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(
            billing_webhook_events::table
                .filter(billing_webhook_events::provider.eq(provider))
                .filter(billing_webhook_events::event_id.eq(event_id)),
        )
        .set((
            billing_webhook_events::processed.eq(true),
            billing_webhook_events::processed_at.eq(Some(Utc::now())),
            billing_webhook_events::error_message.eq(None::<String>),
        ))
        .execute(&mut conn)?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        provider: &str,
        event_id: &str,
        error_message: &str,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        update(
            billing_webhook_events::table
                .filter(billing_webhook_events::provider.eq(provider))
                .filter(billing_webhook_events::event_id.eq(event_id)),
        )
        .set((
            billing_webhook_events::processed.eq(false),
            billing_webhook_events::error_message.eq(Some(error_message)),
        ))
        .execute(&mut conn)?;

        Ok(())
    }
}
