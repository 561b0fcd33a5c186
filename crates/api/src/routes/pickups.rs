//! Pickup lifecycle routes

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;
use wastewise_dispatch::{
    AssignDriverRequest, CancelPickupRequest, CompletePickupRequest, CreatePickupRequest,
    PickupFilter, RejectPickupRequest, ReschedulePickupRequest,
};
use wastewise_shared::types::{
    grams_to_kg, AssignmentStatus, Pickup, PickupAssignment, PickupStatus, WasteType,
};

use crate::{
    auth::{require_permission, AuthUser, Permission},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub(crate) fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct PickupResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub waste_type: WasteType,
    /// Weight in kg; the measured weight once completed
    pub waste_weight: f64,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: PickupStatus,
    pub scheduled_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Pickup> for PickupResponse {
    fn from(pickup: Pickup) -> Self {
        Self {
            id: pickup.id,
            organization_id: pickup.organization_id,
            subscription_id: pickup.subscription_id,
            waste_type: pickup.waste_type,
            waste_weight: grams_to_kg(pickup.waste_weight_grams),
            address: pickup.address,
            latitude: pickup.latitude,
            longitude: pickup.longitude,
            status: pickup.status,
            scheduled_at: pickup.scheduled_at.map(format_timestamp),
            completed_at: pickup.completed_at.map(format_timestamp),
            created_at: format_timestamp(pickup.created_at),
            updated_at: format_timestamp(pickup.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub pickup_id: Uuid,
    pub driver_id: Uuid,
    pub status: AssignmentStatus,
    pub assigned_at: String,
}

impl From<PickupAssignment> for AssignmentResponse {
    fn from(assignment: PickupAssignment) -> Self {
        Self {
            id: assignment.id,
            pickup_id: assignment.pickup_id,
            driver_id: assignment.driver_id,
            status: assignment.status,
            assigned_at: format_timestamp(assignment.assigned_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PickupListResponse {
    pub pickups: Vec<PickupResponse>,
    pub total: usize,
}

// =============================================================================
// Handlers
// =============================================================================

/// Create a pickup for the caller's organization
pub async fn create_pickup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreatePickupRequest>,
) -> ApiResult<(StatusCode, Json<PickupResponse>)> {
    require_permission(&auth_user, Permission::PickupCreate)?;
    let org_id = auth_user
        .org_id
        .ok_or_else(|| ApiError::Validation("Organization context is required".to_string()))?;
    let actor = auth_user.actor()?;

    let pickup = state.pickups.create(&actor, org_id, req).await?;
    Ok((StatusCode::CREATED, Json(pickup.into())))
}

/// List pickups visible to the caller
pub async fn list_pickups(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(filter): Query<PickupFilter>,
) -> ApiResult<Json<PickupListResponse>> {
    require_permission(&auth_user, Permission::PickupView)?;

    let pickups = state.pickups.list(auth_user.scope()?, filter).await?;
    let pickups: Vec<PickupResponse> = pickups.into_iter().map(Into::into).collect();
    Ok(Json(PickupListResponse {
        total: pickups.len(),
        pickups,
    }))
}

pub async fn get_pickup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(pickup_id): Path<Uuid>,
) -> ApiResult<Json<PickupResponse>> {
    require_permission(&auth_user, Permission::PickupView)?;

    let pickup = state.pickups.get(auth_user.scope()?, pickup_id).await?;
    Ok(Json(pickup.into()))
}

pub async fn assign_driver(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(pickup_id): Path<Uuid>,
    Json(req): Json<AssignDriverRequest>,
) -> ApiResult<Json<AssignmentResponse>> {
    require_permission(&auth_user, Permission::PickupAssign)?;

    let assignment = state
        .pickups
        .assign_driver(&auth_user.actor()?, pickup_id, req.driver_id)
        .await?;
    Ok(Json(assignment.into()))
}

pub async fn cancel_pickup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(pickup_id): Path<Uuid>,
    Json(req): Json<CancelPickupRequest>,
) -> ApiResult<Json<PickupResponse>> {
    require_permission(&auth_user, Permission::PickupCancel)?;

    let pickup = state
        .pickups
        .cancel(&auth_user.actor()?, pickup_id, req)
        .await?;
    Ok(Json(pickup.into()))
}

pub async fn reschedule_pickup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(pickup_id): Path<Uuid>,
    Json(req): Json<ReschedulePickupRequest>,
) -> ApiResult<Json<PickupResponse>> {
    require_permission(&auth_user, Permission::PickupReschedule)?;

    let pickup = state
        .pickups
        .reschedule(&auth_user.actor()?, pickup_id, req)
        .await?;
    Ok(Json(pickup.into()))
}

pub async fn accept_pickup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(pickup_id): Path<Uuid>,
) -> ApiResult<Json<PickupResponse>> {
    require_permission(&auth_user, Permission::PickupAccept)?;

    let pickup = state.pickups.accept(&auth_user.actor()?, pickup_id).await?;
    Ok(Json(pickup.into()))
}

pub async fn reject_pickup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(pickup_id): Path<Uuid>,
    Json(req): Json<RejectPickupRequest>,
) -> ApiResult<Json<PickupResponse>> {
    require_permission(&auth_user, Permission::PickupReject)?;

    let pickup = state
        .pickups
        .reject(&auth_user.actor()?, pickup_id, req)
        .await?;
    Ok(Json(pickup.into()))
}

pub async fn complete_pickup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(pickup_id): Path<Uuid>,
    Json(req): Json<CompletePickupRequest>,
) -> ApiResult<Json<PickupResponse>> {
    require_permission(&auth_user, Permission::PickupComplete)?;

    let pickup = state
        .pickups
        .complete(&auth_user.actor()?, pickup_id, req)
        .await?;
    Ok(Json(pickup.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_pickup_response_reports_kg_and_rfc3339() {
        let created = datetime!(2026-10-01 08:00 UTC);
        let pickup = Pickup {
            id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            subscription_id: None,
            waste_type: WasteType::Organic,
            waste_weight_grams: 7_250,
            address: "12 Harbour Road".to_string(),
            latitude: 6.5,
            longitude: 3.4,
            status: PickupStatus::Pending,
            scheduled_at: Some(datetime!(2026-10-02 09:30 UTC)),
            completed_at: None,
            created_at: created,
            updated_at: created,
        };

        let response = PickupResponse::from(pickup);
        assert_eq!(response.waste_weight, 7.25);
        assert_eq!(response.scheduled_at.as_deref(), Some("2026-10-02T09:30:00Z"));
        assert_eq!(response.created_at, "2026-10-01T08:00:00Z");

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["waste_type"], "ORGANIC");
        assert!(json["completed_at"].is_null());
    }
}
