use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

/// Idempotency ledger for inbound provider events, keyed by `(provider, event_id)`.
#[automock]
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// `true` when the caller owns this delivery and should process it: either the first time
    /// the event is seen, or a redelivery of an event whose earlier attempt failed or whose
    /// reservation lease expired. `false` for a duplicate that must be acknowledged untouched.
    async fn reserve(
        &self,
        provider: &str,
        event_id: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Result<bool>;

    async fn mark_processed(&self, provider: &str, event_id: &str) -> Result<()>;

    async fn mark_failed(&self, provider: &str, event_id: &str, error_message: &str)
    -> Result<()>;
}
