//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
    pub pool_size: u32,
    pub idle_connections: usize,
}

/// Health check with database connectivity and pool occupancy
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database_up = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let (status_code, status) = if database_up {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            database: status,
            pool_size: state.pool.size(),
            idle_connections: state.pool.num_idle(),
        }),
    )
}

/// Liveness probe, 200 while the process serves requests
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: the schema must be migrated, not just the database reachable
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match sqlx::query("SELECT 1 FROM subscription_plans LIMIT 1")
        .execute(&state.pool)
        .await
    {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
