use std::{fmt::Display, str::FromStr};

use anyhow::{Context, Result};
use crates::payments::gateway_client::DEFAULT_API_BASE_URL;

use super::config_model::{
    BackendServer, Checkout, Database, DotEnvyConfig, Gateway, Supabase, Webhook,
};

pub fn load() -> Result<DotEnvyConfig> {
    dotenvy::dotenv().ok();
    load_from(|key| std::env::var(key).ok())
}

pub fn load_from(lookup: impl Fn(&str) -> Option<String>) -> Result<DotEnvyConfig> {
    let env = EnvReader { lookup };

    let backend_server = BackendServer {
        port: env.parse("SERVER_PORT_BACKEND")?,
        body_limit: env.parse("SERVER_BODY_LIMIT")?,
        timeout: env.parse("SERVER_TIMEOUT")?,
    };

    let database = Database {
        url: env.required("DATABASE_URL")?,
        pool_size: env.parse_or("DATABASE_POOL_SIZE", 10)?,
    };

    let supabase = Supabase {
        jwt_secret: env.required("SUPABASE_JWT_SECRET")?,
    };

    let gateway = Gateway {
        api_base_url: env
            .optional("GATEWAY_API_BASE_URL")
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
        key_id: env.required("GATEWAY_KEY_ID")?,
        key_secret: env.required("GATEWAY_KEY_SECRET")?,
        webhook_secret: env.required("GATEWAY_WEBHOOK_SECRET")?,
        plan_pro_monthly: env.required("GATEWAY_PLAN_PRO_MONTHLY")?,
        plan_pro_annual: env.required("GATEWAY_PLAN_PRO_ANNUAL")?,
        retry_delay_ms: env.parse_or("GATEWAY_RETRY_DELAY_MS", 1000)?,
    };

    let checkout = Checkout {
        expiry_seconds: env.parse_or("CHECKOUT_EXPIRY_SECONDS", 1800)?,
    };

    let webhook = Webhook {
        rate_limit_max: env.parse_or("WEBHOOK_RATE_LIMIT_MAX", 120)?,
        rate_limit_window_seconds: env.parse_or("WEBHOOK_RATE_LIMIT_WINDOW_SECONDS", 60)?,
        ledger_lease_seconds: env.parse_or("WEBHOOK_LEDGER_LEASE_SECONDS", 300)?,
    };

    Ok(DotEnvyConfig {
        backend_server,
        database,
        supabase,
        gateway,
        checkout,
        webhook,
    })
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key)
            .with_context(|| format!("{key} is invalid"))
    }

    fn parse<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.required(key)?;
        raw.parse::<T>()
            .map_err(|err| anyhow::anyhow!("{key} is invalid: {err}"))
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(key) {
            Some(_) => self.parse(key),
            None => Ok(default),
        }
    }
}
