use std::sync::Arc;

use chrono::Utc;
use crates::{
    domain::{
        repositories::{
            analytics_events::AnalyticsRepository, billing_webhook_events::WebhookEventRepository,
            subscriptions::{SubscriptionRepository, UpsertOutcome},
        },
        value_objects::{
            enums::{
                analytics_event_names::AnalyticsEventName, payment_providers::PaymentProvider,
                plan_types::PlanType, subscription_statuses::SubscriptionStatus,
            },
            plan_catalog::PlanCatalog,
            subscriptions::WebhookAckDto,
        },
    },
    payments::{
        gateway_client::{GatewaySubscription, GatewayWebhookEvent},
        status_mapper, webhook_signature,
    },
};
use serde_json::json;
use tracing::{error, info, warn};

use super::{
    analytics::track_best_effort,
    billing_errors::{BillingError, UseCaseResult},
};

pub const LEDGER_ERROR_MESSAGE_LIMIT: usize = 1000;
const ACTIVATED_EVENT: &str = "subscription.activated";

pub fn truncate_for_ledger(message: &str) -> String {
    message.chars().take(LEDGER_ERROR_MESSAGE_LIMIT).collect()
}

/// Reconciles gateway lifecycle webhooks into the subscription store.
pub struct BillingWebhookUseCase<S, L, A>
where
    S: SubscriptionRepository + 'static,
    L: WebhookEventRepository + 'static,
    A: AnalyticsRepository + 'static,
{
    subscription_repo: Arc<S>,
    ledger_repo: Arc<L>,
    analytics_repo: Arc<A>,
    plan_catalog: PlanCatalog,
    webhook_secret: String,
}

impl<S, L, A> BillingWebhookUseCase<S, L, A>
where
    S: SubscriptionRepository + 'static,
    L: WebhookEventRepository + 'static,
    A: AnalyticsRepository + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        ledger_repo: Arc<L>,
        analytics_repo: Arc<A>,
        plan_catalog: PlanCatalog,
        webhook_secret: String,
    ) -> Self {
        Self {
            subscription_repo,
            ledger_repo,
            analytics_repo,
            plan_catalog,
            webhook_secret,
        }
    }

    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
        event_id_header: Option<&str>,
    ) -> UseCaseResult<WebhookAckDto> {
        let provider = PaymentProvider::Gateway.as_str();
        let event_id = webhook_signature::webhook_event_id(raw_body, event_id_header);

        webhook_signature::verify_signature(&self.webhook_secret, raw_body, signature).map_err(
            |err| {
                warn!(
                    security = true,
                    event_id = %event_id,
                    reason = %err,
                    "billing_webhook: signature verification failed"
                );
                BillingError::InvalidSignature
            },
        )?;

        let payload: serde_json::Value = serde_json::from_slice(raw_body).map_err(|err| {
            warn!(event_id = %event_id, parse_error = %err, "billing_webhook: body is not json");
            BillingError::InvalidPayload
        })?;
        let event: GatewayWebhookEvent =
            serde_json::from_value(payload.clone()).map_err(|err| {
                warn!(event_id = %event_id, parse_error = %err, "billing_webhook: unexpected event shape");
                BillingError::InvalidPayload
            })?;

        let reserved = self
            .ledger_repo
            .reserve(provider, &event_id, &event.event, payload)
            .await
            .map_err(|err| {
                error!(event_id = %event_id, db_error = ?err, "billing_webhook: failed to reserve event");
                BillingError::Internal(err)
            })?;

        if !reserved {
            info!(
                event_id = %event_id,
                event_type = %event.event,
                "billing_webhook: duplicate delivery acknowledged"
            );
            return Ok(WebhookAckDto::duplicate());
        }

        match self.apply_event(&event_id, &event).await {
            Ok(()) => {
                if let Err(err) = self.ledger_repo.mark_processed(provider, &event_id).await {
                    warn!(
                        event_id = %event_id,
                        db_error = ?err,
                        "billing_webhook: failed to mark event processed"
                    );
                }
                Ok(WebhookAckDto::processed())
            }
            Err(err) => {
                error!(
                    event_id = %event_id,
                    event_type = %event.event,
                    error = %err.detail(),
                    "billing_webhook: processing failed"
                );
                let message = truncate_for_ledger(&err.detail());
                if let Err(ledger_err) = self
                    .ledger_repo
                    .mark_failed(provider, &event_id, &message)
                    .await
                {
                    warn!(
                        event_id = %event_id,
                        db_error = ?ledger_err,
                        "billing_webhook: failed to mark event failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn apply_event(&self, event_id: &str, event: &GatewayWebhookEvent) -> UseCaseResult<()> {
        if !status_mapper::is_subscription_event(&event.event) {
            info!(event_id, event_type = %event.event, "billing_webhook: ignoring non-subscription event");
            return Ok(());
        }

        let Some(subscription) = event.subscription() else {
            info!(event_id, event_type = %event.event, "billing_webhook: event carries no subscription");
            return Ok(());
        };

        let by_provider_refs = self
            .subscription_repo
            .find_by_provider_refs(
                PaymentProvider::Gateway.to_string(),
                Some(subscription.id.clone()),
                subscription.customer_id.clone(),
            )
            .await
            .map_err(|err| {
                error!(event_id, db_error = ?err, "billing_webhook: provider ref lookup failed");
                BillingError::Internal(err)
            })?;

        let user_id = match subscription
            .noted_user_id()
            .or(by_provider_refs.as_ref().map(|row| row.user_id))
        {
            Some(user_id) => user_id,
            None => {
                warn!(
                    event_id,
                    provider_subscription_id = %subscription.id,
                    "billing_webhook: subscription cannot be attributed to a user"
                );
                return Err(BillingError::SubscriptionMappingNotFound);
            }
        };

        let model = status_mapper::to_upsert_model(
            subscription,
            user_id,
            status_mapper::forced_status_for_event(&event.event),
            &self.plan_catalog,
            status_mapper::unix_to_datetime(event.created_at),
        );

        let outcome = self
            .subscription_repo
            .upsert_from_event(model.to_entity(Utc::now()))
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "billing_webhook: subscription upsert failed");
                BillingError::Internal(err)
            })?;

        let previous_status = match outcome {
            UpsertOutcome::Applied { previous_status } => previous_status,
            UpsertOutcome::Stale => {
                info!(
                    event_id,
                    %user_id,
                    event_type = %event.event,
                    "billing_webhook: older than last applied event, skipped"
                );
                return Ok(());
            }
            UpsertOutcome::Superseded => {
                info!(
                    event_id,
                    %user_id,
                    provider_subscription_id = %subscription.id,
                    status = %model.status,
                    "billing_webhook: ignoring event for superseded subscription"
                );
                return Ok(());
            }
        };

        info!(
            event_id,
            %user_id,
            event_type = %event.event,
            plan_type = %model.plan_type,
            status = %model.status,
            "billing_webhook: subscription reconciled"
        );

        self.emit_analytics(event, subscription, user_id, model.plan_type, model.status, previous_status)
            .await;

        Ok(())
    }

    async fn emit_analytics(
        &self,
        event: &GatewayWebhookEvent,
        subscription: &GatewaySubscription,
        user_id: uuid::Uuid,
        plan_type: PlanType,
        status: SubscriptionStatus,
        previous_status: Option<SubscriptionStatus>,
    ) {
        let provider = PaymentProvider::Gateway.as_str();

        if event.event == ACTIVATED_EVENT {
            track_best_effort(
                self.analytics_repo.as_ref(),
                Some(user_id),
                AnalyticsEventName::CheckoutCompleted,
                json!({
                    "provider": provider,
                    "providerSubscriptionId": subscription.id,
                }),
            )
            .await;
        }

        let newly_entitled = plan_type == PlanType::Pro
            && matches!(status, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
            && previous_status != Some(status);

        if newly_entitled {
            track_best_effort(
                self.analytics_repo.as_ref(),
                Some(user_id),
                AnalyticsEventName::ProEntitlementActivated,
                json!({
                    "provider": provider,
                    "providerSubscriptionId": subscription.id,
                    "status": status.as_str(),
                }),
            )
            .await;
        }
    }
}
