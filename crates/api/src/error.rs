//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use wastewise_billing::BillingError;
use wastewise_dispatch::DispatchError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("{0}")]
    InvalidState(String),

    // Resource errors
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),

    // Subscription gate
    #[error("{0}")]
    NoActiveSubscription(String),
    #[error("{0}")]
    SubscriptionExpired(String),
    #[error("{0}")]
    SubscriptionInactive(String),
    #[error("{0}")]
    QuotaExceeded(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", msg.clone()),
            ApiError::InvalidState(msg) => (StatusCode::BAD_REQUEST, "INVALID_STATE", msg.clone()),

            // Resources
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Subscription gate
            ApiError::NoActiveSubscription(msg) => (StatusCode::FORBIDDEN, "NO_ACTIVE_SUBSCRIPTION", msg.clone()),
            ApiError::SubscriptionExpired(msg) => (StatusCode::FORBIDDEN, "SUBSCRIPTION_EXPIRED", msg.clone()),
            ApiError::SubscriptionInactive(msg) => (StatusCode::FORBIDDEN, "SUBSCRIPTION_INACTIVE", msg.clone()),
            ApiError::QuotaExceeded(msg) => (StatusCode::FORBIDDEN, "QUOTA_EXCEEDED", msg.clone()),

            // Internal
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let message = err.to_string();
        match err {
            BillingError::NoActiveSubscription => ApiError::NoActiveSubscription(message),
            BillingError::SubscriptionExpired(_) => ApiError::SubscriptionExpired(message),
            BillingError::SubscriptionInactive(_) => ApiError::SubscriptionInactive(message),
            BillingError::QuotaExceeded(_) => ApiError::QuotaExceeded(message),
            BillingError::SubscriptionNotFound(_)
            | BillingError::LedgerNotFound(_)
            | BillingError::PlanNotFound(_)
            | BillingError::OrganizationNotFound(_) => ApiError::NotFound(message),
            BillingError::AlreadySubscribed
            | BillingError::AlreadyCancelled
            | BillingError::PlanInUse(_)
            | BillingError::AlreadyExists(_) => ApiError::Conflict(message),
            BillingError::ExceedsPlanScale { .. } | BillingError::InvalidInput(_) => {
                ApiError::Validation(message)
            }
            BillingError::Database(details) => {
                tracing::error!(error = %details, "Billing database error");
                ApiError::Database(details)
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        let message = err.to_string();
        match err {
            DispatchError::Billing(billing) => billing.into(),
            DispatchError::InvalidTransition { .. } | DispatchError::InvalidState(_) => {
                ApiError::InvalidState(message)
            }
            DispatchError::Forbidden(_) => ApiError::Forbidden(message),
            DispatchError::NotFound(_) => ApiError::NotFound(message),
            DispatchError::Validation(_) => ApiError::Validation(message),
            DispatchError::Database(details) => {
                tracing::error!(error = %details, "Dispatch database error");
                ApiError::Database(details)
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use wastewise_billing::QuotaDimension;
    use wastewise_shared::types::PickupStatus;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_billing_error_statuses() {
        assert_eq!(status_of(BillingError::NoActiveSubscription), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(BillingError::SubscriptionExpired(Uuid::new_v4())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(BillingError::QuotaExceeded(QuotaDimension::Pickups)),
            StatusCode::FORBIDDEN
        );
        assert_eq!(status_of(BillingError::AlreadySubscribed), StatusCode::CONFLICT);
        assert_eq!(status_of(BillingError::AlreadyCancelled), StatusCode::CONFLICT);
        assert_eq!(
            status_of(BillingError::PlanNotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(BillingError::InvalidInput("bad".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_dispatch_error_statuses() {
        assert_eq!(
            status_of(DispatchError::InvalidTransition {
                from: PickupStatus::Completed,
                to: PickupStatus::Cancelled,
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DispatchError::InvalidState("in progress".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(DispatchError::Forbidden("not yours".to_string())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(DispatchError::Validation("reason".to_string())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(DispatchError::Billing(BillingError::QuotaExceeded(
                QuotaDimension::Drivers
            ))),
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn test_database_details_are_not_returned() {
        let response = ApiError::Database("relation \"pickups\" does not exist".to_string())
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert_eq!(body["error"]["message"], "Database error");
    }

    #[tokio::test]
    async fn test_quota_body_names_dimension() {
        let response: Response =
            ApiError::from(BillingError::QuotaExceeded(QuotaDimension::WasteWeight)).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "QUOTA_EXCEEDED");
        assert_eq!(body["error"]["message"], "waste_weight limit exceeded");
    }
}
