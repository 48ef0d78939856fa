use crates::domain::{
    entities::analytics_events::InsertAnalyticsEventEntity,
    repositories::analytics_events::AnalyticsRepository,
    value_objects::enums::analytics_event_names::AnalyticsEventName,
};
use tracing::warn;
use uuid::Uuid;

/// Records a product analytics event. Failures are logged and swallowed.
pub async fn track_best_effort<A>(
    analytics_repo: &A,
    user_id: Option<Uuid>,
    event_name: AnalyticsEventName,
    event_props: serde_json::Value,
) where
    A: AnalyticsRepository + ?Sized,
{
    let event = InsertAnalyticsEventEntity {
        user_id,
        event_name: event_name.to_string(),
        event_props,
    };

    if let Err(err) = analytics_repo.track(event).await {
        warn!(
            user_id = ?user_id,
            event_name = %event_name,
            error = ?err,
            "analytics: failed to record event"
        );
    }
}
