use std::time::Duration;

use crates::domain::value_objects::plan_catalog::PlanCatalog;

#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub backend_server: BackendServer,
    pub database: Database,
    pub supabase: Supabase,
    pub gateway: Gateway,
    pub checkout: Checkout,
    pub webhook: Webhook,
}

#[derive(Debug, Clone)]
pub struct BackendServer {
    pub port: u16,
    pub body_limit: u64,
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct Supabase {
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct Gateway {
    pub api_base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub plan_pro_monthly: String,
    pub plan_pro_annual: String,
    pub retry_delay_ms: u64,
}

impl Gateway {
    pub fn plan_catalog(&self) -> PlanCatalog {
        PlanCatalog::new(self.plan_pro_monthly.clone(), self.plan_pro_annual.clone())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone)]
pub struct Checkout {
    pub expiry_seconds: i64,
}

#[derive(Debug, Clone)]
pub struct Webhook {
    pub rate_limit_max: u32,
    pub rate_limit_window_seconds: u64,
    pub ledger_lease_seconds: i64,
}
