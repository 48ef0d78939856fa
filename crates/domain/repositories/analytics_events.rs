use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::entities::analytics_events::InsertAnalyticsEventEntity;

#[automock]
#[async_trait]
pub trait AnalyticsRepository: Send + Sync {
    async fn track(&self, event: InsertAnalyticsEventEntity) -> Result<()>;
}
