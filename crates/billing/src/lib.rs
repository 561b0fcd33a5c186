//! WasteWise billing
//!
//! Plan catalog, subscription lifecycle and the usage ledger that enforces
//! plan quotas for pickups, waste weight and driver seats.

pub mod error;
pub mod ledger;
pub mod plans;
pub mod subscriptions;

pub use error::{BillingError, BillingResult};
pub use ledger::{
    apply_delta, LedgerViolation, PlanLimits, QuotaDimension, UsageCounters, UsageDelta,
    UsageLedger, UsageSnapshot,
};
pub use plans::{NewPlan, PlanCatalog, PlanUpdate};
pub use subscriptions::{check_eligibility, compute_end_date, SubscriptionDetails, SubscriptionService};
