use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::infra::db::postgres::schema::billing_webhook_events;

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = billing_webhook_events)]
pub struct InsertBillingWebhookEventEntity {
    pub provider: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub attempts: i32,
    pub reserved_at: DateTime<Utc>,
}
