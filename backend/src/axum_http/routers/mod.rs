pub mod billing_webhook;
pub mod reports;
pub mod subscriptions;
