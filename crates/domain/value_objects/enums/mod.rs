pub mod analytics_event_names;
pub mod billing_plans;
pub mod payment_providers;
pub mod plan_types;
pub mod subscription_statuses;
