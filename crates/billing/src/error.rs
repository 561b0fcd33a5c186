//! Billing error types

use thiserror::Error;
use uuid::Uuid;

use crate::ledger::QuotaDimension;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("No active subscription found. Please subscribe to a plan.")]
    NoActiveSubscription,

    #[error("Subscription {0} is not active")]
    SubscriptionInactive(Uuid),

    #[error("Subscription {0} has expired")]
    SubscriptionExpired(Uuid),

    #[error("{0} limit exceeded")]
    QuotaExceeded(QuotaDimension),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Usage record not found for subscription {0}")]
    LedgerNotFound(Uuid),

    #[error("Plan not found or inactive: {0}")]
    PlanNotFound(Uuid),

    #[error("Organization not found: {0}")]
    OrganizationNotFound(Uuid),

    #[error("Organization already has an active subscription")]
    AlreadySubscribed,

    #[error("Subscription is already cancelled")]
    AlreadyCancelled,

    #[error("Plan {0} is still referenced by subscriptions")]
    PlanInUse(Uuid),

    #[error("Organization exceeds {dimension} for this plan ({actual} > {limit})")]
    ExceedsPlanScale {
        dimension: &'static str,
        actual: i32,
        limit: i32,
    },

    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

/// Postgres SQLSTATE for unique_violation
pub(crate) const UNIQUE_VIOLATION: &str = "23505";
/// Postgres SQLSTATE for foreign_key_violation
pub(crate) const FOREIGN_KEY_VIOLATION: &str = "23503";

/// SQLSTATE of a database error, if the error came from Postgres
pub(crate) fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_error_names_dimension() {
        let err = BillingError::QuotaExceeded(QuotaDimension::Pickups);
        assert_eq!(err.to_string(), "pickups limit exceeded");

        let err = BillingError::QuotaExceeded(QuotaDimension::WasteWeight);
        assert_eq!(err.to_string(), "waste_weight limit exceeded");
    }

    #[test]
    fn test_row_not_found_maps_to_database() {
        let err: BillingError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, BillingError::Database(_)));
        assert_eq!(sqlstate(&sqlx::Error::RowNotFound), None);
    }
}
