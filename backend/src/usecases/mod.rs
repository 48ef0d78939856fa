pub mod analytics;
pub mod billing_errors;
pub mod billing_webhook;
pub mod checkout;
pub mod payment_gateway;
pub mod subscriptions;
