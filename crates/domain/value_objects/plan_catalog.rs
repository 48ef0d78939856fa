use super::enums::{billing_plans::BillingPlan, plan_types::PlanType};

/// Closed set of provider plan ids that grant the pro plan. Anything outside it maps to free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    monthly_plan_id: String,
    annual_plan_id: String,
}

impl PlanCatalog {
    pub fn new(monthly_plan_id: impl Into<String>, annual_plan_id: impl Into<String>) -> Self {
        Self {
            monthly_plan_id: monthly_plan_id.into(),
            annual_plan_id: annual_plan_id.into(),
        }
    }

    pub fn provider_plan_id(&self, plan: BillingPlan) -> &str {
        match plan {
            BillingPlan::Monthly => &self.monthly_plan_id,
            BillingPlan::Annual => &self.annual_plan_id,
        }
    }

    pub fn billing_plan_for(&self, provider_plan_id: &str) -> Option<BillingPlan> {
        if provider_plan_id == self.annual_plan_id {
            Some(BillingPlan::Annual)
        } else if provider_plan_id == self.monthly_plan_id {
            Some(BillingPlan::Monthly)
        } else {
            None
        }
    }

    pub fn plan_type_for(&self, provider_plan_id: &str) -> PlanType {
        match self.billing_plan_for(provider_plan_id) {
            Some(_) => PlanType::Pro,
            None => PlanType::Free,
        }
    }
}
