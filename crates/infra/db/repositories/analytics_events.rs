use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, insert_into};
use std::sync::Arc;

use crate::{
    domain,
    infra::db::postgres::{postgres_connection::PgPoolSquad, schema::analytics_events},
};
use domain::{
    entities::analytics_events::InsertAnalyticsEventEntity,
    repositories::analytics_events::AnalyticsRepository,
};

pub struct AnalyticsEventPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl AnalyticsEventPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl AnalyticsRepository for AnalyticsEventPostgres {
    async fn track(&self, event: InsertAnalyticsEventEntity) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        insert_into(analytics_events::table)
            .values(&event)
            .execute(&mut conn)?;

        Ok(())
    }
}
