use async_trait::async_trait;
use crates::payments::gateway_client::{
    CreateSubscriptionParams, GatewayClient, GatewayError, GatewaySubscription,
};
use uuid::Uuid;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String, GatewayError>;

    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> Result<GatewaySubscription, GatewayError>;

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError>;

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_cycle_end: bool,
    ) -> Result<GatewaySubscription, GatewayError>;
}

#[async_trait]
impl PaymentGateway for GatewayClient {
    async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String, GatewayError> {
        self.create_customer(email, user_id).await
    }

    async fn create_subscription(
        &self,
        params: CreateSubscriptionParams,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.create_subscription(&params).await
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.fetch_subscription(subscription_id).await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_cycle_end: bool,
    ) -> Result<GatewaySubscription, GatewayError> {
        self.cancel_subscription(subscription_id, at_cycle_end).await
    }
}
