//! Administrator diagnostics

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Serialize;
use wastewise_billing::LedgerViolation;

use crate::{
    auth::{require_permission, AuthUser, Permission},
    error::ApiResult,
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct InvariantReport {
    pub healthy: bool,
    pub violation_count: usize,
    pub violations: Vec<LedgerViolation>,
}

/// Ledgers over a non-zero plan limit or below zero
pub async fn check_usage_invariants(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<InvariantReport>> {
    require_permission(&auth_user, Permission::UsageAdmin)?;

    let violations = state.ledger.check_invariants().await?;
    Ok(Json(InvariantReport {
        healthy: violations.is_empty(),
        violation_count: violations.len(),
        violations,
    }))
}
