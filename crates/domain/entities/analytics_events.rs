use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::db::postgres::schema::analytics_events;

#[derive(Debug, Clone, PartialEq, Insertable)]
#[diesel(table_name = analytics_events)]
pub struct InsertAnalyticsEventEntity {
    pub user_id: Option<Uuid>,
    pub event_name: String,
    pub event_props: serde_json::Value,
}
