//! Dispatch error types

use thiserror::Error;
use wastewise_billing::BillingError;
use wastewise_shared::types::PickupStatus;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Subscription or quota failure raised by the billing core
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: PickupStatus, to: PickupStatus },

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Database(err.to_string())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;
    use wastewise_billing::QuotaDimension;

    #[test]
    fn test_transition_message_names_both_states() {
        let err = DispatchError::InvalidTransition {
            from: PickupStatus::Completed,
            to: PickupStatus::InProgress,
        };
        assert_eq!(err.to_string(), "Invalid transition from COMPLETED to IN_PROGRESS");
    }

    #[test]
    fn test_billing_errors_pass_through() {
        let err: DispatchError = BillingError::QuotaExceeded(QuotaDimension::WasteWeight).into();
        assert_eq!(err.to_string(), "waste_weight limit exceeded");
        assert!(matches!(err, DispatchError::Billing(_)));
    }
}
