use crate::{
    auth::AuthConfig,
    axum_http::{
        default_routers,
        rate_limit::RateLimitState,
        routers::{billing_webhook, reports, subscriptions},
    },
    config::config_model::DotEnvyConfig,
    usecases::{
        billing_webhook::BillingWebhookUseCase, checkout::CheckoutUseCase,
        subscriptions::SubscriptionUseCase,
    },
};
use anyhow::Result;
use axum::{
    Extension, Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    infra::{
        db::{
            postgres::postgres_connection::PgPoolSquad,
            repositories::{
                analytics_events::AnalyticsEventPostgres,
                billing_webhook_events::BillingWebhookEventPostgres,
                subscriptions::SubscriptionPostgres,
            },
        },
        rate_limit::in_memory::InMemoryRateLimitStore,
    },
    payments::gateway_client::GatewayClient,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let subscription_repo = Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool)));
    let analytics_repo = Arc::new(AnalyticsEventPostgres::new(Arc::clone(&db_pool)));
    let ledger_repo = Arc::new(BillingWebhookEventPostgres::new(
        Arc::clone(&db_pool),
        chrono::Duration::seconds(config.webhook.ledger_lease_seconds),
    ));
    let gateway = Arc::new(GatewayClient::new(
        config.gateway.api_base_url.clone(),
        config.gateway.key_id.clone(),
        config.gateway.key_secret.clone(),
        config.gateway.retry_delay(),
    ));

    let subscriptions_usecase = Arc::new(SubscriptionUseCase::new(
        Arc::clone(&subscription_repo),
        Arc::clone(&gateway),
    ));
    let checkout_usecase = Arc::new(CheckoutUseCase::new(
        Arc::clone(&subscription_repo),
        Arc::clone(&analytics_repo),
        Arc::clone(&gateway),
        config.gateway.plan_catalog(),
        chrono::Duration::seconds(config.checkout.expiry_seconds),
        config.gateway.retry_delay(),
    ));
    let webhook_usecase = Arc::new(BillingWebhookUseCase::new(
        subscription_repo,
        ledger_repo,
        analytics_repo,
        config.gateway.plan_catalog(),
        config.gateway.webhook_secret.clone(),
    ));
    let webhook_rate_limit = RateLimitState {
        store: Arc::new(InMemoryRateLimitStore::new()),
        scope: "billing_webhook",
        max_requests: config.webhook.rate_limit_max,
        window: Duration::from_secs(config.webhook.rate_limit_window_seconds),
    };

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/subscriptions",
            subscriptions::routes(Arc::clone(&subscriptions_usecase), checkout_usecase),
        )
        .nest(
            "/api/v1/webhooks",
            billing_webhook::routes(webhook_usecase, webhook_rate_limit),
        )
        .nest("/api/v1/reports", reports::routes(subscriptions_usecase))
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(Extension(Arc::new(AuthConfig {
            jwt_secret: config.supabase.jwt_secret.clone(),
        })))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([AUTHORIZATION, CONTENT_TYPE])
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
