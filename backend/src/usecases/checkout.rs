use std::{sync::Arc, time::Duration as StdDuration};

use anyhow::anyhow;
use chrono::{Duration, Utc};
use crates::{
    domain::{
        repositories::{
            analytics_events::AnalyticsRepository,
            subscriptions::{ObservedRow, SubscriptionRepository},
        },
        value_objects::{
            enums::{
                analytics_event_names::AnalyticsEventName, billing_plans::BillingPlan,
                payment_providers::PaymentProvider, subscription_statuses::SubscriptionStatus,
            },
            plan_catalog::PlanCatalog,
            subscriptions::{CheckoutSessionDto, CreateCheckoutRequest, UserSubscriptionModel},
        },
    },
    payments::{
        gateway_client::{CreateSubscriptionParams, GatewaySubscription},
        status_mapper,
    },
};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{
    analytics::track_best_effort,
    billing_errors::{BillingError, UseCaseResult},
    payment_gateway::PaymentGateway,
};

pub const DEFAULT_SUCCESS_PATH: &str = "/settings?upgraded=1";
pub const DEFAULT_CANCEL_PATH: &str = "/pricing?canceled=1";

/// What to do with a previous, unfinished checkout before starting a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimDecision {
    /// Never paid: cancel it on the gateway, then continue.
    CancelThenAllow,
    /// Already over on the gateway side.
    Allow,
    /// Might still complete.
    Refuse,
}

pub fn reclaim_decision(gateway_status: &str) -> ReclaimDecision {
    match gateway_status.trim().to_ascii_lowercase().as_str() {
        "created" => ReclaimDecision::CancelThenAllow,
        "expired" | "cancelled" | "completed" => ReclaimDecision::Allow,
        _ => ReclaimDecision::Refuse,
    }
}

/// Redirect targets must stay on this site: root-relative, and not protocol-relative.
pub fn validate_redirect_path(value: Option<&str>, default: &str, field_name: &str) -> UseCaseResult<String> {
    let path = value
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .unwrap_or(default);

    if !path.starts_with('/') || path.starts_with("//") {
        return Err(BillingError::InvalidRequest(format!(
            "{field_name} must be a root-relative path starting with \"/\"."
        )));
    }

    Ok(path.to_string())
}

pub struct CheckoutUseCase<S, A, G>
where
    S: SubscriptionRepository + 'static,
    A: AnalyticsRepository + 'static,
    G: PaymentGateway + 'static,
{
    subscription_repo: Arc<S>,
    analytics_repo: Arc<A>,
    gateway: Arc<G>,
    plan_catalog: PlanCatalog,
    checkout_expiry: Duration,
    checkout_url_retry_delay: StdDuration,
}

impl<S, A, G> CheckoutUseCase<S, A, G>
where
    S: SubscriptionRepository + 'static,
    A: AnalyticsRepository + 'static,
    G: PaymentGateway + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        analytics_repo: Arc<A>,
        gateway: Arc<G>,
        plan_catalog: PlanCatalog,
        checkout_expiry: Duration,
        checkout_url_retry_delay: StdDuration,
    ) -> Self {
        Self {
            subscription_repo,
            analytics_repo,
            gateway,
            plan_catalog,
            checkout_expiry,
            checkout_url_retry_delay,
        }
    }

    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        request: CreateCheckoutRequest,
    ) -> UseCaseResult<CheckoutSessionDto> {
        let plan = request
            .plan
            .as_deref()
            .and_then(BillingPlan::from_str)
            .ok_or(BillingError::InvalidPlan)?;
        validate_redirect_path(request.success_path.as_deref(), DEFAULT_SUCCESS_PATH, "successPath")?;
        validate_redirect_path(request.cancel_path.as_deref(), DEFAULT_CANCEL_PATH, "cancelPath")?;
        let email = email
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(BillingError::MissingEmail)?;

        info!(%user_id, plan = %plan, "checkout: starting checkout");

        let existing_row = self
            .subscription_repo
            .find_by_user_id(user_id)
            .await
            .map_err(|err| {
                error!(%user_id, db_error = ?err, "checkout: failed to load existing subscription");
                BillingError::Internal(err)
            })?;
        let observed = ObservedRow::from_row(existing_row.as_ref());

        let reused_customer_id = match existing_row.map(UserSubscriptionModel::from) {
            Some(row) => self.clear_previous_attempt(&row).await?,
            None => None,
        };

        let customer_id = match reused_customer_id {
            Some(customer_id) => {
                info!(%user_id, customer_id = %customer_id, "checkout: reusing gateway customer");
                customer_id
            }
            None => self
                .gateway
                .create_customer(email, user_id)
                .await
                .map_err(|err| {
                    error!(%user_id, gateway_error = ?err, "checkout: failed to create gateway customer");
                    BillingError::CheckoutFailed(anyhow!(err))
                })?,
        };

        let provider_plan_id = self.plan_catalog.provider_plan_id(plan).to_string();
        let params = CreateSubscriptionParams {
            plan_id: provider_plan_id.clone(),
            total_count: plan.total_count(),
            customer_id: customer_id.clone(),
            expire_by: (Utc::now() + self.checkout_expiry).timestamp(),
            user_id,
        };

        let created = self
            .gateway
            .create_subscription(params)
            .await
            .map_err(|err| {
                error!(%user_id, gateway_error = ?err, "checkout: failed to create gateway subscription");
                BillingError::CheckoutFailed(anyhow!(err))
            })?;

        let (subscription, url) = self.wait_for_checkout_url(user_id, created).await?;

        let mut model = status_mapper::to_upsert_model(
            &subscription,
            user_id,
            None,
            &self.plan_catalog,
            None,
        );
        if model.provider_customer_id.is_none() {
            model.provider_customer_id = Some(customer_id);
        }

        let applied = self
            .subscription_repo
            .upsert_if_unchanged(model.to_entity(Utc::now()), observed)
            .await;

        match applied {
            Ok(true) => {}
            Ok(false) => {
                if !self.row_already_tracks(user_id, &subscription.id).await {
                    self.cancel_orphan(user_id, &subscription.id).await;
                    return Err(BillingError::SubscriptionExists);
                }
            }
            Err(err) => {
                error!(%user_id, db_error = ?err, "checkout: failed to persist checkout subscription");
                self.cancel_orphan(user_id, &subscription.id).await;
                return Err(BillingError::Internal(err));
            }
        }

        track_best_effort(
            self.analytics_repo.as_ref(),
            Some(user_id),
            AnalyticsEventName::CheckoutStarted,
            json!({
                "provider": PaymentProvider::Gateway.as_str(),
                "plan": plan.as_str(),
                "providerPlanId": provider_plan_id,
                "providerSubscriptionId": subscription.id,
            }),
        )
        .await;

        info!(
            %user_id,
            provider_subscription_id = %subscription.id,
            "checkout: checkout created"
        );

        Ok(CheckoutSessionDto {
            subscription_id: subscription.id,
            url,
        })
    }

    /// Decides whether the user's current row blocks a new checkout. Returns the gateway
    /// customer id worth reusing when it does not.
    async fn clear_previous_attempt(
        &self,
        row: &UserSubscriptionModel,
    ) -> UseCaseResult<Option<String>> {
        let user_id = row.user_id;

        if row.status.is_live() {
            info!(%user_id, status = %row.status, "checkout: live subscription already exists");
            return Err(BillingError::SubscriptionExists);
        }

        let reusable_customer_id = match row.payment_provider {
            PaymentProvider::Gateway => row.provider_customer_id.clone(),
            PaymentProvider::Manual => None,
        };

        if row.status != SubscriptionStatus::Incomplete {
            return Ok(reusable_customer_id);
        }

        let Some(previous_subscription_id) = row.provider_subscription_id.as_deref() else {
            info!(%user_id, "checkout: reclaiming incomplete row without gateway subscription");
            return Ok(reusable_customer_id);
        };

        let previous = self
            .gateway
            .fetch_subscription(previous_subscription_id)
            .await
            .map_err(|err| {
                // Unknown state on the gateway side: refuse rather than risk two live subscriptions.
                warn!(
                    %user_id,
                    provider_subscription_id = %previous_subscription_id,
                    gateway_error = ?err,
                    "checkout: could not verify previous checkout"
                );
                BillingError::SubscriptionExists
            })?;

        match reclaim_decision(&previous.status) {
            ReclaimDecision::CancelThenAllow => {
                self.gateway
                    .cancel_subscription(previous_subscription_id, false)
                    .await
                    .map_err(|err| {
                        warn!(
                            %user_id,
                            provider_subscription_id = %previous_subscription_id,
                            gateway_error = ?err,
                            "checkout: could not cancel abandoned checkout"
                        );
                        BillingError::SubscriptionExists
                    })?;
                info!(
                    %user_id,
                    provider_subscription_id = %previous_subscription_id,
                    "checkout: cancelled abandoned checkout"
                );
                Ok(reusable_customer_id)
            }
            ReclaimDecision::Allow => {
                info!(
                    %user_id,
                    provider_subscription_id = %previous_subscription_id,
                    gateway_status = %previous.status,
                    "checkout: previous checkout already ended on gateway"
                );
                Ok(reusable_customer_id)
            }
            ReclaimDecision::Refuse => {
                info!(
                    %user_id,
                    provider_subscription_id = %previous_subscription_id,
                    gateway_status = %previous.status,
                    "checkout: previous checkout still in progress"
                );
                Err(BillingError::SubscriptionExists)
            }
        }
    }

    /// The gateway sometimes returns a new subscription before its hosted page link exists.
    async fn wait_for_checkout_url(
        &self,
        user_id: Uuid,
        created: GatewaySubscription,
    ) -> UseCaseResult<(GatewaySubscription, String)> {
        if let Some(url) = created.checkout_url() {
            let url = url.to_string();
            return Ok((created, url));
        }

        info!(
            %user_id,
            provider_subscription_id = %created.id,
            "checkout: checkout link not ready, refetching once"
        );
        tokio::time::sleep(self.checkout_url_retry_delay).await;

        let refetched = self
            .gateway
            .fetch_subscription(&created.id)
            .await
            .map_err(|err| {
                error!(
                    %user_id,
                    provider_subscription_id = %created.id,
                    gateway_error = ?err,
                    "checkout: failed to refetch gateway subscription"
                );
                BillingError::CheckoutFailed(anyhow!(err))
            })?;

        match refetched.checkout_url() {
            Some(url) => {
                let url = url.to_string();
                Ok((refetched, url))
            }
            None => {
                error!(
                    %user_id,
                    provider_subscription_id = %created.id,
                    "checkout: gateway did not issue a checkout link"
                );
                Err(BillingError::CheckoutFailed(anyhow!(
                    "gateway subscription {} has no checkout link",
                    created.id
                )))
            }
        }
    }

    /// Called when the checkout write lost to a concurrent writer. A webhook for the new
    /// subscription may already have recorded it, in which case the checkout stands.
    async fn row_already_tracks(&self, user_id: Uuid, new_subscription_id: &str) -> bool {
        match self.subscription_repo.find_by_user_id(user_id).await {
            Ok(Some(row)) if row.provider_subscription_id.as_deref() == Some(new_subscription_id) => {
                info!(
                    %user_id,
                    provider_subscription_id = %new_subscription_id,
                    status = %row.status,
                    "checkout: webhook recorded the new subscription first"
                );
                true
            }
            Ok(current) => {
                warn!(
                    %user_id,
                    provider_subscription_id = %new_subscription_id,
                    current_provider_subscription_id = ?current.as_ref().and_then(|row| row.provider_subscription_id.as_deref()),
                    current_status = ?current.as_ref().map(|row| row.status.as_str()),
                    "checkout: subscription row changed concurrently"
                );
                false
            }
            Err(err) => {
                warn!(
                    %user_id,
                    db_error = ?err,
                    "checkout: subscription row changed concurrently and could not be re-read"
                );
                false
            }
        }
    }

    async fn cancel_orphan(&self, user_id: Uuid, subscription_id: &str) {
        if let Err(err) = self.gateway.cancel_subscription(subscription_id, false).await {
            warn!(
                %user_id,
                provider_subscription_id = %subscription_id,
                gateway_error = ?err,
                "checkout: failed to cancel orphaned gateway subscription"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::{
        payment_gateway::MockPaymentGateway,
        subscriptions::test_support::{InMemorySubscriptions, subscription_row},
    };
    use crates::{
        domain::{
            entities::user_subscriptions::UpsertUserSubscriptionEntity,
            repositories::{
                analytics_events::MockAnalyticsRepository,
                subscriptions::{MockSubscriptionRepository, UpsertOutcome},
            },
            value_objects::enums::plan_types::PlanType,
        },
        payments::gateway_client::GatewayError,
    };
    use mockall::predicate::eq;
    use std::sync::Mutex;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new("plan_monthly", "plan_annual")
    }

    fn usecase(
        subscription_repo: MockSubscriptionRepository,
        analytics_repo: MockAnalyticsRepository,
        gateway: MockPaymentGateway,
    ) -> CheckoutUseCase<MockSubscriptionRepository, MockAnalyticsRepository, MockPaymentGateway>
    {
        CheckoutUseCase::new(
            Arc::new(subscription_repo),
            Arc::new(analytics_repo),
            Arc::new(gateway),
            catalog(),
            Duration::seconds(1800),
            StdDuration::ZERO,
        )
    }

    fn monthly_request() -> CreateCheckoutRequest {
        CreateCheckoutRequest {
            plan: Some("monthly".to_string()),
            ..Default::default()
        }
    }

    fn created_subscription(id: &str, short_url: Option<&str>) -> GatewaySubscription {
        GatewaySubscription {
            id: id.to_string(),
            status: "created".to_string(),
            plan_id: Some("plan_monthly".to_string()),
            customer_id: Some("cust_1".to_string()),
            short_url: short_url.map(str::to_string),
            ..Default::default()
        }
    }

    /// The write a gateway webhook makes for `subscription_id`.
    fn webhook_write(
        user_id: Uuid,
        subscription_id: &str,
        gateway_status: &str,
        forced_status: Option<SubscriptionStatus>,
    ) -> UpsertUserSubscriptionEntity {
        let subscription = GatewaySubscription {
            id: subscription_id.to_string(),
            status: gateway_status.to_string(),
            plan_id: Some("plan_monthly".to_string()),
            customer_id: Some("cust_1".to_string()),
            ..Default::default()
        };
        status_mapper::to_upsert_model(&subscription, user_id, forced_status, &catalog(), Some(Utc::now()))
            .to_entity(Utc::now())
    }

    fn accepting_analytics() -> MockAnalyticsRepository {
        let mut analytics_repo = MockAnalyticsRepository::new();
        analytics_repo.expect_track().returning(|_| Ok(()));
        analytics_repo
    }

    #[test]
    fn reclaim_decisions_by_gateway_status() {
        assert_eq!(reclaim_decision("created"), ReclaimDecision::CancelThenAllow);
        assert_eq!(reclaim_decision("expired"), ReclaimDecision::Allow);
        assert_eq!(reclaim_decision("cancelled"), ReclaimDecision::Allow);
        assert_eq!(reclaim_decision("completed"), ReclaimDecision::Allow);
        assert_eq!(reclaim_decision("authenticated"), ReclaimDecision::Refuse);
        assert_eq!(reclaim_decision("active"), ReclaimDecision::Refuse);
        assert_eq!(reclaim_decision("something_new"), ReclaimDecision::Refuse);
    }

    #[test]
    fn redirect_paths_must_be_root_relative() {
        assert_eq!(
            validate_redirect_path(None, DEFAULT_SUCCESS_PATH, "successPath").unwrap(),
            DEFAULT_SUCCESS_PATH
        );
        assert!(validate_redirect_path(Some("/billing/done"), DEFAULT_SUCCESS_PATH, "successPath").is_ok());
        assert!(validate_redirect_path(Some("https://evil.example"), DEFAULT_SUCCESS_PATH, "successPath").is_err());
        assert!(validate_redirect_path(Some("//evil.example"), DEFAULT_SUCCESS_PATH, "successPath").is_err());
    }

    #[tokio::test]
    async fn first_checkout_creates_customer_subscription_and_row() {
        let user_id = Uuid::new_v4();

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .with(eq(user_id))
            .returning(|_| Ok(None));
        subscription_repo
            .expect_upsert_if_unchanged()
            .withf(move |entity, observed| {
                entity.user_id == user_id
                    && entity.status == "incomplete"
                    && entity.plan_type == "pro"
                    && entity.provider_subscription_id.as_deref() == Some("sub_new")
                    && entity.last_event_at.is_none()
                    && *observed == ObservedRow::Missing
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .times(1)
            .returning(move |email, customer_user_id| {
                assert_eq!(email, "user@example.com");
                assert_eq!(customer_user_id, user_id);
                Ok("cust_1".to_string())
            });
        gateway
            .expect_create_subscription()
            .withf(move |params| {
                params.plan_id == "plan_monthly"
                    && params.total_count == 120
                    && params.customer_id == "cust_1"
                    && params.user_id == user_id
                    && params.expire_by > Utc::now().timestamp()
            })
            .times(1)
            .returning(|_| Ok(created_subscription("sub_new", Some("https://rzp.io/i/abc"))));

        let mut analytics_repo = MockAnalyticsRepository::new();
        analytics_repo
            .expect_track()
            .withf(|event| event.event_name == "checkout_started")
            .times(1)
            .returning(|_| Ok(()));

        let dto = usecase(subscription_repo, analytics_repo, gateway)
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap();

        assert_eq!(dto.subscription_id, "sub_new");
        assert_eq!(dto.url, "https://rzp.io/i/abc");
    }

    #[tokio::test]
    async fn live_subscription_conflicts_without_gateway_calls() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(user_id, PlanType::Pro, SubscriptionStatus::Active, Some("sub_1"));

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .returning(move |_| Ok(Some(row.clone())));
        subscription_repo.expect_upsert_if_unchanged().never();

        let err = usecase(subscription_repo, MockAnalyticsRepository::new(), MockPaymentGateway::new())
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionExists));
        assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn abandoned_checkout_is_cancelled_and_replaced() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(
            user_id,
            PlanType::Pro,
            SubscriptionStatus::Incomplete,
            Some("sub_old"),
        );

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .returning(move |_| Ok(Some(row.clone())));
        subscription_repo
            .expect_upsert_if_unchanged()
            .withf(move |entity, observed| {
                entity.user_id == user_id
                    && entity.provider_subscription_id.as_deref() == Some("sub_new")
                    && *observed
                        == ObservedRow::Reclaimable {
                            provider_subscription_id: Some("sub_old".to_string()),
                        }
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_fetch_subscription()
            .times(1)
            .returning(|subscription_id| {
                assert_eq!(subscription_id, "sub_old");
                Ok(created_subscription("sub_old", Some("https://rzp.io/i/old")))
            });
        gateway
            .expect_cancel_subscription()
            .times(1)
            .returning(|subscription_id, at_cycle_end| {
                assert_eq!(subscription_id, "sub_old");
                assert!(!at_cycle_end);
                Ok(GatewaySubscription {
                    id: "sub_old".to_string(),
                    status: "cancelled".to_string(),
                    ..Default::default()
                })
            });
        gateway.expect_create_customer().never();
        gateway
            .expect_create_subscription()
            .withf(|params| params.customer_id == "cust_1")
            .times(1)
            .returning(|_| Ok(created_subscription("sub_new", Some("https://rzp.io/i/new"))));

        let dto = usecase(subscription_repo, accepting_analytics(), gateway)
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap();

        assert_eq!(dto.subscription_id, "sub_new");
    }

    #[tokio::test]
    async fn progressed_previous_checkout_is_refused() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(
            user_id,
            PlanType::Pro,
            SubscriptionStatus::Incomplete,
            Some("sub_old"),
        );

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .returning(move |_| Ok(Some(row.clone())));

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_fetch_subscription().returning(|_| {
            Ok(GatewaySubscription {
                id: "sub_old".to_string(),
                status: "authenticated".to_string(),
                ..Default::default()
            })
        });
        gateway.expect_cancel_subscription().never();
        gateway.expect_create_subscription().never();

        let err = usecase(subscription_repo, MockAnalyticsRepository::new(), gateway)
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionExists));
    }

    #[tokio::test]
    async fn unreachable_gateway_during_reclaim_fails_closed() {
        let user_id = Uuid::new_v4();
        let row = subscription_row(
            user_id,
            PlanType::Pro,
            SubscriptionStatus::Incomplete,
            Some("sub_old"),
        );

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .returning(move |_| Ok(Some(row.clone())));

        let mut gateway = MockPaymentGateway::new();
        gateway.expect_fetch_subscription().returning(|_| {
            Err(GatewayError::Api {
                context: "fetch subscription",
                status: 503,
                code: Some("SERVER_ERROR".to_string()),
                description: "Service unavailable".to_string(),
            })
        });
        gateway.expect_create_subscription().never();

        let err = usecase(subscription_repo, MockAnalyticsRepository::new(), gateway)
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionExists));
    }

    #[tokio::test]
    async fn missing_checkout_link_is_refetched_once() {
        let user_id = Uuid::new_v4();

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo.expect_find_by_user_id().returning(|_| Ok(None));
        subscription_repo
            .expect_upsert_if_unchanged()
            .returning(|_, _| Ok(true));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .returning(|_, _| Ok("cust_1".to_string()));
        gateway
            .expect_create_subscription()
            .returning(|_| Ok(created_subscription("sub_new", None)));
        gateway
            .expect_fetch_subscription()
            .times(1)
            .returning(|_| Ok(created_subscription("sub_new", Some("https://rzp.io/i/late"))));

        let dto = usecase(subscription_repo, accepting_analytics(), gateway)
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap();

        assert_eq!(dto.url, "https://rzp.io/i/late");
    }

    #[tokio::test]
    async fn checkout_link_never_issued_is_checkout_failed() {
        let user_id = Uuid::new_v4();

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo.expect_find_by_user_id().returning(|_| Ok(None));
        subscription_repo.expect_upsert_if_unchanged().never();

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .returning(|_, _| Ok("cust_1".to_string()));
        gateway
            .expect_create_subscription()
            .returning(|_| Ok(created_subscription("sub_new", None)));
        gateway
            .expect_fetch_subscription()
            .times(1)
            .returning(|_| Ok(created_subscription("sub_new", None)));

        let err = usecase(subscription_repo, MockAnalyticsRepository::new(), gateway)
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "CHECKOUT_FAILED");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn lost_race_cancels_new_subscription_and_conflicts() {
        let user_id = Uuid::new_v4();

        let mut subscription_repo = MockSubscriptionRepository::new();
        let racing_row =
            subscription_row(user_id, PlanType::Pro, SubscriptionStatus::Incomplete, Some("sub_other"));
        let mut lookups = 0;
        subscription_repo
            .expect_find_by_user_id()
            .times(2)
            .returning(move |_| {
                lookups += 1;
                if lookups == 1 {
                    Ok(None)
                } else {
                    Ok(Some(racing_row.clone()))
                }
            });
        subscription_repo
            .expect_upsert_if_unchanged()
            .returning(|_, _| Ok(false));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_customer()
            .returning(|_, _| Ok("cust_1".to_string()));
        gateway
            .expect_create_subscription()
            .returning(|_| Ok(created_subscription("sub_new", Some("https://rzp.io/i/abc"))));
        gateway
            .expect_cancel_subscription()
            .times(1)
            .returning(|subscription_id, _| {
                assert_eq!(subscription_id, "sub_new");
                Ok(GatewaySubscription::default())
            });

        let err = usecase(subscription_repo, MockAnalyticsRepository::new(), gateway)
            .create_checkout(user_id, Some("user@example.com"), monthly_request())
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionExists));
    }

    #[tokio::test]
    async fn reclaim_survives_cancel_webhook_for_abandoned_checkout() {
        let user_id = Uuid::new_v4();
        let store = Arc::new(InMemorySubscriptions::with_row(subscription_row(
            user_id,
            PlanType::Pro,
            SubscriptionStatus::Incomplete,
            Some("sub_old"),
        )));
        let cancelled = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_fetch_subscription()
            .times(1)
            .returning(|_| Ok(created_subscription("sub_old", Some("https://rzp.io/i/old"))));
        let webhook_store = Arc::clone(&store);
        let cancel_log = Arc::clone(&cancelled);
        gateway
            .expect_cancel_subscription()
            .returning(move |subscription_id, _| {
                cancel_log.lock().unwrap().push(subscription_id.to_string());
                // The cancellation webhook for the old checkout lands before the checkout write.
                let outcome = webhook_store.apply_event_write(webhook_write(
                    user_id,
                    subscription_id,
                    "cancelled",
                    Some(SubscriptionStatus::Canceled),
                ));
                assert!(matches!(outcome, UpsertOutcome::Applied { .. }));
                Ok(GatewaySubscription {
                    id: subscription_id.to_string(),
                    status: "cancelled".to_string(),
                    ..Default::default()
                })
            });
        gateway.expect_create_customer().never();
        gateway
            .expect_create_subscription()
            .times(1)
            .returning(|_| Ok(created_subscription("sub_new", Some("https://rzp.io/i/new"))));

        let dto = CheckoutUseCase::new(
            Arc::clone(&store),
            Arc::new(accepting_analytics()),
            Arc::new(gateway),
            catalog(),
            Duration::seconds(1800),
            StdDuration::ZERO,
        )
        .create_checkout(user_id, Some("user@example.com"), monthly_request())
        .await
        .unwrap();

        assert_eq!(dto.subscription_id, "sub_new");
        assert_eq!(cancelled.lock().unwrap().as_slice(), ["sub_old".to_string()]);
        let row = store.row(user_id).unwrap();
        assert_eq!(row.provider_subscription_id.as_deref(), Some("sub_new"));
        assert_eq!(row.status, "incomplete");
    }

    #[tokio::test]
    async fn checkout_stands_when_webhook_recorded_new_subscription_first() {
        let user_id = Uuid::new_v4();
        let store = Arc::new(InMemorySubscriptions::with_row(subscription_row(
            user_id,
            PlanType::Pro,
            SubscriptionStatus::Incomplete,
            Some("sub_old"),
        )));
        let cancelled = Arc::new(Mutex::new(Vec::<String>::new()));

        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_fetch_subscription()
            .times(1)
            .returning(|_| Ok(created_subscription("sub_old", Some("https://rzp.io/i/old"))));
        let cancel_log = Arc::clone(&cancelled);
        gateway
            .expect_cancel_subscription()
            .returning(move |subscription_id, _| {
                cancel_log.lock().unwrap().push(subscription_id.to_string());
                Ok(GatewaySubscription::default())
            });
        let webhook_store = Arc::clone(&store);
        gateway
            .expect_create_subscription()
            .times(1)
            .returning(move |_| {
                // The user pays fast enough for the activation webhook to beat the checkout write.
                webhook_store.apply_event_write(webhook_write(user_id, "sub_new", "active", None));
                Ok(created_subscription("sub_new", Some("https://rzp.io/i/new")))
            });

        let dto = CheckoutUseCase::new(
            Arc::clone(&store),
            Arc::new(accepting_analytics()),
            Arc::new(gateway),
            catalog(),
            Duration::seconds(1800),
            StdDuration::ZERO,
        )
        .create_checkout(user_id, Some("user@example.com"), monthly_request())
        .await
        .unwrap();

        assert_eq!(dto.subscription_id, "sub_new");
        assert_eq!(cancelled.lock().unwrap().as_slice(), ["sub_old".to_string()]);
        let row = store.row(user_id).unwrap();
        assert_eq!(row.provider_subscription_id.as_deref(), Some("sub_new"));
        assert_eq!(row.status, "active");
    }

    #[tokio::test]
    async fn input_validation_happens_before_any_lookup() {
        let user_id = Uuid::new_v4();

        let invalid_plan = usecase(
            MockSubscriptionRepository::new(),
            MockAnalyticsRepository::new(),
            MockPaymentGateway::new(),
        )
        .create_checkout(
            user_id,
            Some("user@example.com"),
            CreateCheckoutRequest {
                plan: Some("weekly".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(invalid_plan, BillingError::InvalidPlan));

        let bad_path = usecase(
            MockSubscriptionRepository::new(),
            MockAnalyticsRepository::new(),
            MockPaymentGateway::new(),
        )
        .create_checkout(
            user_id,
            Some("user@example.com"),
            CreateCheckoutRequest {
                plan: Some("annual".to_string()),
                cancel_path: Some("//evil.example".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(bad_path.code(), "INVALID_REQUEST");

        let no_email = usecase(
            MockSubscriptionRepository::new(),
            MockAnalyticsRepository::new(),
            MockPaymentGateway::new(),
        )
        .create_checkout(user_id, Some("  "), monthly_request())
        .await
        .unwrap_err();
        assert!(matches!(no_email, BillingError::MissingEmail));
    }
}
