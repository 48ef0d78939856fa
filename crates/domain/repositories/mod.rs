pub mod analytics_events;
pub mod billing_webhook_events;
pub mod rate_limits;
pub mod subscriptions;
