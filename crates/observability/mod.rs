mod alert_layer;
mod config;
mod dispatcher;
mod webhook_sink;

use alert_layer::AlertLayer;
use anyhow::Result;
use config::ObservabilityConfig;
use dispatcher::AlertDispatcher;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};
use webhook_sink::WebhookAlertSink;

/// Installs the global subscriber: env-filtered fmt output plus, when `ALERT_WEBHOOK_URL` is set,
/// a layer forwarding events at or above `ALERT_MIN_LEVEL` to that webhook.
///
/// Must be called from inside a tokio runtime because the alert dispatcher spawns its worker.
pub fn init_observability(component: &str) -> Result<()> {
    let mut config = ObservabilityConfig::from_env(component);

    let alert_layer = match config.alert.as_ref() {
        Some(alert) => match WebhookAlertSink::new(alert.webhook_url.clone()) {
            Ok(sink) => {
                let dispatcher = AlertDispatcher::spawn(vec![Arc::new(sink)]);
                Some(
                    AlertLayer::new(dispatcher, config.service_context.clone())
                        .with_filter(LevelFilter::from_level(alert.min_level)),
                )
            }
            Err(err) => {
                config
                    .warnings
                    .push(format!("alert sink could not be built; alerts disabled ({err})"));
                None
            }
        },
        None => None,
    };
    let alerts_enabled = alert_layer.is_some();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339());

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(alert_layer)
        .with(env_filter)
        .try_init()?;

    for warning in &config.warnings {
        warn!(
            service = %config.service_context.service_name,
            environment = %config.service_context.environment,
            warning = %warning,
            "observability: config warning"
        );
    }

    info!(
        service = %config.service_context.service_name,
        environment = %config.service_context.environment,
        component = %config.service_context.component,
        alerts_enabled,
        "observability: tracing initialised"
    );

    Ok(())
}
