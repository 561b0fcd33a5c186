//! Subscription lifecycle and usage routes for the caller's organization

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wastewise_billing::{PlanLimits, UsageSnapshot};
use wastewise_shared::types::{grams_to_kg, Subscription, SubscriptionStatus};

use super::pickups::format_timestamp;
use super::plans::PlanResponse;
use crate::{
    auth::{require_permission, AuthUser, Permission},
    error::ApiResult,
    state::AppState,
};

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub plan_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct UpgradeRequest {
    pub new_plan_id: Uuid,
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub status: SubscriptionStatus,
    pub start_date: String,
    pub end_date: String,
    pub auto_renew: bool,
    pub cancelled_at: Option<String>,
    pub upgraded_from_id: Option<Uuid>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id,
            organization_id: sub.organization_id,
            plan_id: sub.plan_id,
            status: sub.status,
            start_date: format_timestamp(sub.start_date),
            end_date: format_timestamp(sub.end_date),
            auto_renew: sub.auto_renew,
            cancelled_at: sub.cancelled_at.map(format_timestamp),
            upgraded_from_id: sub.upgraded_from_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MySubscriptionResponse {
    pub subscription: SubscriptionResponse,
    pub plan: PlanResponse,
}

/// Ledger counters against plan limits; weights in kg, 0 limit = unlimited
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub subscription_id: Uuid,
    pub pickups_used: i32,
    pub pickup_limit: i32,
    pub waste_weight_used: f64,
    pub waste_weight_limit: f64,
    pub drivers_used: i32,
    pub driver_limit: i32,
    pub last_reset_at: String,
    pub updated_at: String,
}

impl From<UsageSnapshot> for UsageResponse {
    fn from(snapshot: UsageSnapshot) -> Self {
        let PlanLimits {
            pickup_limit,
            waste_weight_limit_grams,
            driver_limit,
        } = snapshot.limits;

        Self {
            subscription_id: snapshot.subscription_id,
            pickups_used: snapshot.counters.pickups_used,
            pickup_limit,
            waste_weight_used: grams_to_kg(snapshot.counters.waste_weight_used_grams),
            waste_weight_limit: grams_to_kg(waste_weight_limit_grams),
            drivers_used: snapshot.counters.drivers_used,
            driver_limit,
            last_reset_at: format_timestamp(snapshot.last_reset_at),
            updated_at: format_timestamp(snapshot.updated_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DriverSeatResponse {
    pub released: bool,
    pub usage: Option<UsageResponse>,
}

// =============================================================================
// Handlers
// =============================================================================

pub async fn subscribe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionResponse>)> {
    require_permission(&auth_user, Permission::SubscriptionView)?;
    let org_id = auth_user.require_org()?;

    let subscription = state
        .subscriptions
        .subscribe(auth_user.user_id, org_id, req.plan_id)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription.into())))
}

/// Most recent subscription of the caller's organization, whatever its status
pub async fn my_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<MySubscriptionResponse>> {
    require_permission(&auth_user, Permission::SubscriptionView)?;
    let org_id = auth_user.require_org()?;

    let details = state.subscriptions.get_current(org_id).await?;
    Ok(Json(MySubscriptionResponse {
        subscription: details.subscription.into(),
        plan: details.plan.into(),
    }))
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionResponse>> {
    require_permission(&auth_user, Permission::SubscriptionView)?;
    let org_id = auth_user.require_org()?;

    let subscription = state
        .subscriptions
        .cancel(auth_user.user_id, org_id)
        .await?;
    Ok(Json(subscription.into()))
}

pub async fn upgrade_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<UpgradeRequest>,
) -> ApiResult<(StatusCode, Json<SubscriptionResponse>)> {
    require_permission(&auth_user, Permission::SubscriptionView)?;
    let org_id = auth_user.require_org()?;

    let subscription = state
        .subscriptions
        .upgrade(auth_user.user_id, org_id, req.new_plan_id)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription.into())))
}

pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UsageResponse>> {
    require_permission(&auth_user, Permission::SubscriptionView)?;
    let org_id = auth_user.require_org()?;

    let snapshot = state.subscriptions.get_usage(org_id).await?;
    Ok(Json(snapshot.into()))
}

/// Reserve one driver seat on the organization's active subscription
pub async fn claim_driver_seat(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UsageResponse>> {
    require_permission(&auth_user, Permission::SubscriptionView)?;
    let org_id = auth_user.require_org()?;

    let snapshot = state.ledger.claim_driver_seat(org_id).await?;
    Ok(Json(snapshot.into()))
}

/// Give one driver seat back; a no-op without an active subscription
pub async fn release_driver_seat(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<DriverSeatResponse>> {
    require_permission(&auth_user, Permission::SubscriptionView)?;
    let org_id = auth_user.require_org()?;

    let snapshot = state.ledger.release_driver_seat(org_id).await?;
    Ok(Json(DriverSeatResponse {
        released: snapshot.is_some(),
        usage: snapshot.map(Into::into),
    }))
}
