use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticsEventName {
    CheckoutStarted,
    CheckoutCompleted,
    ProEntitlementActivated,
}

impl AnalyticsEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsEventName::CheckoutStarted => "checkout_started",
            AnalyticsEventName::CheckoutCompleted => "checkout_completed",
            AnalyticsEventName::ProEntitlementActivated => "pro_entitlement_activated",
        }
    }
}

impl Display for AnalyticsEventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
