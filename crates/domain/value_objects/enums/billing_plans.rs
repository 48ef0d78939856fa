use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Plan selector accepted by the checkout endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BillingPlan {
    Monthly,
    Annual,
}

impl BillingPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPlan::Monthly => "monthly",
            BillingPlan::Annual => "annual",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "monthly" => Some(BillingPlan::Monthly),
            "annual" => Some(BillingPlan::Annual),
            _ => None,
        }
    }

    /// Number of billing cycles the provider subscription is created with.
    pub fn total_count(&self) -> u32 {
        match self {
            BillingPlan::Monthly => 120,
            BillingPlan::Annual => 10,
        }
    }
}

impl Display for BillingPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
