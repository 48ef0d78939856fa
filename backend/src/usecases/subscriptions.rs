use std::sync::Arc;

use anyhow::anyhow;
use crates::domain::{
    repositories::subscriptions::SubscriptionRepository,
    value_objects::{
        enums::payment_providers::PaymentProvider,
        subscriptions::{CancelSubscriptionDto, CurrentSubscriptionDto, UserSubscriptionModel},
    },
};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    billing_errors::{BillingError, UseCaseResult},
    payment_gateway::PaymentGateway,
};

pub const CANCEL_AT_PERIOD_END_MESSAGE: &str =
    "Your subscription will cancel at the end of the current billing cycle.";

pub struct SubscriptionUseCase<S, G>
where
    S: SubscriptionRepository + 'static,
    G: PaymentGateway + 'static,
{
    subscription_repo: Arc<S>,
    gateway: Arc<G>,
}

impl<S, G> SubscriptionUseCase<S, G>
where
    S: SubscriptionRepository + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(subscription_repo: Arc<S>, gateway: Arc<G>) -> Self {
        Self {
            subscription_repo,
            gateway,
        }
    }

    /// The user's row, or the implicit free row when none exists yet.
    pub async fn get_user_subscription(
        &self,
        user_id: Uuid,
    ) -> UseCaseResult<UserSubscriptionModel> {
        let subscription = self
            .subscription_repo
            .find_by_user_id(user_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    db_error = ?err,
                    "subscriptions: failed to load subscription"
                );
                BillingError::Internal(err)
            })?;

        Ok(match subscription {
            Some(entity) => UserSubscriptionModel::from(entity),
            None => UserSubscriptionModel::implicit_free(user_id),
        })
    }

    pub async fn current_subscription(&self, user_id: Uuid) -> UseCaseResult<CurrentSubscriptionDto> {
        let subscription = self.get_user_subscription(user_id).await?;
        info!(
            %user_id,
            plan_type = %subscription.plan_type,
            status = %subscription.status,
            persisted = subscription.is_persisted(),
            "subscriptions: current subscription loaded"
        );
        Ok(CurrentSubscriptionDto::from(subscription))
    }

    pub async fn is_pro_entitled(&self, user_id: Uuid) -> UseCaseResult<bool> {
        Ok(self.get_user_subscription(user_id).await?.is_pro_entitled())
    }

    pub async fn require_pro_entitlement(
        &self,
        user_id: Uuid,
    ) -> UseCaseResult<UserSubscriptionModel> {
        let subscription = self.get_user_subscription(user_id).await?;
        if !subscription.is_pro_entitled() {
            info!(
                %user_id,
                plan_type = %subscription.plan_type,
                status = %subscription.status,
                "subscriptions: pro entitlement required"
            );
            return Err(BillingError::ProRequired);
        }
        Ok(subscription)
    }

    /// Asks the gateway to stop renewing at the end of the current cycle. The status itself is
    /// left for the gateway's lifecycle webhook to change.
    pub async fn cancel_at_period_end(&self, user_id: Uuid) -> UseCaseResult<CancelSubscriptionDto> {
        let subscription = self.get_user_subscription(user_id).await?;

        let provider_subscription_id = match (
            subscription.payment_provider,
            subscription.provider_subscription_id.as_deref(),
        ) {
            (PaymentProvider::Gateway, Some(id)) if !id.is_empty() => id.to_string(),
            _ => {
                info!(%user_id, "subscriptions: cancel requested without billing account");
                return Err(BillingError::NoBillingAccount);
            }
        };

        if !subscription.status.is_live() {
            info!(
                %user_id,
                status = %subscription.status,
                "subscriptions: cancel requested for non-live subscription"
            );
            return Err(BillingError::SubscriptionNotActive(
                subscription.status.to_string(),
            ));
        }

        self.gateway
            .cancel_subscription(&provider_subscription_id, true)
            .await
            .map_err(|err| {
                if err.is_no_billing_cycle() {
                    warn!(
                        %user_id,
                        provider_subscription_id = %provider_subscription_id,
                        gateway_error = %err,
                        "subscriptions: gateway reports no billing cycle to cancel"
                    );
                    BillingError::NoBillingCycle
                } else {
                    error!(
                        %user_id,
                        provider_subscription_id = %provider_subscription_id,
                        gateway_error = ?err,
                        "subscriptions: gateway cancel failed"
                    );
                    BillingError::GatewayUnavailable(anyhow!(err))
                }
            })?;

        self.subscription_repo
            .mark_cancel_at_period_end(user_id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    db_error = ?err,
                    "subscriptions: failed to flag cancel_at_period_end"
                );
                BillingError::Internal(err)
            })?;

        info!(
            %user_id,
            provider_subscription_id = %provider_subscription_id,
            "subscriptions: cancel at period end scheduled"
        );

        Ok(CancelSubscriptionDto {
            message: CANCEL_AT_PERIOD_END_MESSAGE.to_string(),
            cancel_at_period_end: true,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::subscription_row;
    use super::*;
    use crate::usecases::payment_gateway::MockPaymentGateway;
    use crates::{
        domain::{
            repositories::subscriptions::MockSubscriptionRepository,
            value_objects::enums::{
                plan_types::PlanType, subscription_statuses::SubscriptionStatus,
            },
        },
        payments::gateway_client::{GatewayError, GatewaySubscription},
    };
    use mockall::predicate::eq;

    fn usecase(
        subscription_repo: MockSubscriptionRepository,
        gateway: MockPaymentGateway,
    ) -> SubscriptionUseCase<MockSubscriptionRepository, MockPaymentGateway> {
        SubscriptionUseCase::new(Arc::new(subscription_repo), Arc::new(gateway))
    }

    fn repo_returning(
        user_id: Uuid,
        row: Option<crates::domain::entities::user_subscriptions::UserSubscriptionEntity>,
    ) -> MockSubscriptionRepository {
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .with(eq(user_id))
            .returning(move |_| Ok(row.clone()));
        subscription_repo
    }

    #[tokio::test]
    async fn missing_row_defaults_to_free_without_error() {
        let user_id = Uuid::new_v4();
        let usecase = usecase(repo_returning(user_id, None), MockPaymentGateway::new());

        let subscription = usecase.get_user_subscription(user_id).await.unwrap();

        assert_eq!(subscription.plan_type, PlanType::Free);
        assert!(!subscription.is_persisted());
        assert!(!usecase.is_pro_entitled(user_id).await.unwrap());
    }

    #[tokio::test]
    async fn past_due_pro_keeps_entitlement() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(user_id, PlanType::Pro, SubscriptionStatus::PastDue, Some("sub_1"));
        let usecase = usecase(repo_returning(user_id, Some(row)), MockPaymentGateway::new());

        assert!(usecase.is_pro_entitled(user_id).await.unwrap());
        assert!(usecase.require_pro_entitlement(user_id).await.is_ok());
    }

    #[tokio::test]
    async fn canceled_pro_is_refused() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(user_id, PlanType::Pro, SubscriptionStatus::Canceled, Some("sub_1"));
        let usecase = usecase(repo_returning(user_id, Some(row)), MockPaymentGateway::new());

        let err = usecase.require_pro_entitlement(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::ProRequired));
    }

    #[tokio::test]
    async fn lookup_failure_is_internal() {
        let user_id = Uuid::new_v4();
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .returning(|_| Err(anyhow!("pool timed out")));
        let usecase = usecase(subscription_repo, MockPaymentGateway::new());

        let err = usecase.current_subscription(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::Internal(_)));
    }

    #[tokio::test]
    async fn cancel_schedules_period_end_and_flags_row() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(user_id, PlanType::Pro, SubscriptionStatus::Active, Some("sub_1"));
        let mut subscription_repo = repo_returning(user_id, Some(row));
        subscription_repo
            .expect_mark_cancel_at_period_end()
            .with(eq(user_id))
            .times(1)
            .returning(|_| Ok(()));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_cancel_subscription()
            .times(1)
            .returning(|subscription_id, at_cycle_end| {
                assert_eq!(subscription_id, "sub_1");
                assert!(at_cycle_end);
                Ok(GatewaySubscription {
                    id: "sub_1".to_string(),
                    status: "active".to_string(),
                    has_scheduled_changes: true,
                    ..Default::default()
                })
            });

        let dto = usecase(subscription_repo, gateway)
            .cancel_at_period_end(user_id)
            .await
            .unwrap();

        assert!(dto.cancel_at_period_end);
        assert_eq!(dto.message, CANCEL_AT_PERIOD_END_MESSAGE);
    }

    #[tokio::test]
    async fn cancel_without_gateway_subscription_is_no_billing_account() {
        let user_id = Uuid::new_v4();
        let usecase = usecase(repo_returning(user_id, None), MockPaymentGateway::new());

        let err = usecase.cancel_at_period_end(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::NoBillingAccount));
    }

    #[tokio::test]
    async fn cancel_of_non_live_subscription_is_refused() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(user_id, PlanType::Pro, SubscriptionStatus::Canceled, Some("sub_1"));
        let usecase = usecase(repo_returning(user_id, Some(row)), MockPaymentGateway::new());

        let err = usecase.cancel_at_period_end(user_id).await.unwrap_err();
        assert!(matches!(err, BillingError::SubscriptionNotActive(status) if status == "canceled"));
    }

    #[tokio::test]
    async fn gateway_billing_cycle_rejection_maps_to_no_billing_cycle() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(user_id, PlanType::Pro, SubscriptionStatus::Active, Some("sub_1"));
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_cancel_subscription().returning(|_, _| {
            Err(GatewayError::Api {
                context: "cancel subscription",
                status: 400,
                code: Some("BAD_REQUEST_ERROR".to_string()),
                description: "Subscription cannot be cancelled since no billing cycle is going on"
                    .to_string(),
            })
        });

        let err = usecase(repo_returning(user_id, Some(row)), gateway)
            .cancel_at_period_end(user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NoBillingCycle));
    }

    #[tokio::test]
    async fn other_gateway_rejection_is_gateway_error_and_row_untouched() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(user_id, PlanType::Pro, SubscriptionStatus::Active, Some("sub_1"));
        let mut subscription_repo = repo_returning(user_id, Some(row));
        subscription_repo.expect_mark_cancel_at_period_end().never();

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_cancel_subscription().returning(|_, _| {
            Err(GatewayError::Api {
                context: "cancel subscription",
                status: 400,
                code: Some("BAD_REQUEST_ERROR".to_string()),
                description: "The id provided does not exist".to_string(),
            })
        });

        let err = usecase(subscription_repo, gateway)
            .cancel_at_period_end(user_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "GATEWAY_ERROR");
    }
}
