//! Subscription plan catalog routes

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wastewise_billing::{NewPlan, PlanUpdate};
use wastewise_shared::types::{
    checked_kg_to_grams, grams_to_kg, BillingCycle, CategoryType, PricingModel, SubscriptionPlan,
};

use super::pickups::format_timestamp;
use crate::{
    auth::{require_permission, AuthUser, Permission},
    error::{ApiError, ApiResult},
    state::AppState,
};

fn default_true() -> bool {
    true
}

fn weight_limit_grams(kg: f64) -> ApiResult<i64> {
    checked_kg_to_grams(kg).ok_or_else(|| {
        ApiError::Validation("waste_weight_limit must be a finite number in range".to_string())
    })
}

// =============================================================================
// Request Types
// =============================================================================

/// New plan; `waste_weight_limit` in kg, limits of 0 mean unlimited
#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    pub description: Option<String>,
    pub category_type: CategoryType,
    pub pricing_model: PricingModel,
    pub price_cents: i64,
    pub billing_cycle: BillingCycle,
    pub max_units: Option<i32>,
    pub max_members: Option<i32>,
    #[serde(default)]
    pub pickup_limit: i32,
    #[serde(default)]
    pub waste_weight_limit: f64,
    #[serde(default)]
    pub driver_limit: i32,
    #[serde(default = "default_true")]
    pub is_visible: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl TryFrom<CreatePlanRequest> for NewPlan {
    type Error = ApiError;

    fn try_from(req: CreatePlanRequest) -> Result<Self, Self::Error> {
        Ok(NewPlan {
            waste_weight_limit_grams: weight_limit_grams(req.waste_weight_limit)?,
            name: req.name,
            description: req.description,
            category_type: req.category_type,
            pricing_model: req.pricing_model,
            price_cents: req.price_cents,
            billing_cycle: req.billing_cycle,
            max_units: req.max_units,
            max_members: req.max_members,
            pickup_limit: req.pickup_limit,
            driver_limit: req.driver_limit,
            is_visible: req.is_visible,
            is_active: req.is_active,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePlanRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_type: Option<CategoryType>,
    pub pricing_model: Option<PricingModel>,
    pub price_cents: Option<i64>,
    pub billing_cycle: Option<BillingCycle>,
    pub max_units: Option<i32>,
    pub max_members: Option<i32>,
    pub pickup_limit: Option<i32>,
    pub waste_weight_limit: Option<f64>,
    pub driver_limit: Option<i32>,
    pub is_visible: Option<bool>,
    pub is_active: Option<bool>,
}

impl TryFrom<UpdatePlanRequest> for PlanUpdate {
    type Error = ApiError;

    fn try_from(req: UpdatePlanRequest) -> Result<Self, Self::Error> {
        Ok(PlanUpdate {
            waste_weight_limit_grams: req.waste_weight_limit.map(weight_limit_grams).transpose()?,
            name: req.name,
            description: req.description,
            category_type: req.category_type,
            pricing_model: req.pricing_model,
            price_cents: req.price_cents,
            billing_cycle: req.billing_cycle,
            max_units: req.max_units,
            max_members: req.max_members,
            pickup_limit: req.pickup_limit,
            driver_limit: req.driver_limit,
            is_visible: req.is_visible,
            is_active: req.is_active,
        })
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category_type: CategoryType,
    pub pricing_model: PricingModel,
    pub price_cents: i64,
    pub billing_cycle: BillingCycle,
    pub max_units: Option<i32>,
    pub max_members: Option<i32>,
    pub pickup_limit: i32,
    pub waste_weight_limit: f64,
    pub driver_limit: i32,
    pub is_visible: bool,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<SubscriptionPlan> for PlanResponse {
    fn from(plan: SubscriptionPlan) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            description: plan.description,
            category_type: plan.category_type,
            pricing_model: plan.pricing_model,
            price_cents: plan.price_cents,
            billing_cycle: plan.billing_cycle,
            max_units: plan.max_units,
            max_members: plan.max_members,
            pickup_limit: plan.pickup_limit,
            waste_weight_limit: grams_to_kg(plan.waste_weight_limit_grams),
            driver_limit: plan.driver_limit,
            is_visible: plan.is_visible,
            is_active: plan.is_active,
            created_at: format_timestamp(plan.created_at),
            updated_at: format_timestamp(plan.updated_at),
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Visible, active plans; open to any authenticated caller
pub async fn list_plans(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<PlanResponse>>> {
    let plans = state.plans.list_plans().await?;
    Ok(Json(plans.into_iter().map(Into::into).collect()))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Extension(_auth_user): Extension<AuthUser>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<Json<PlanResponse>> {
    let plan = state.plans.get_plan(plan_id).await?;
    Ok(Json(plan.into()))
}

pub async fn create_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreatePlanRequest>,
) -> ApiResult<(StatusCode, Json<PlanResponse>)> {
    require_permission(&auth_user, Permission::SubscriptionManage)?;

    let plan = state
        .plans
        .create_plan(auth_user.user_id, req.try_into()?)
        .await?;
    Ok((StatusCode::CREATED, Json(plan.into())))
}

pub async fn update_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(plan_id): Path<Uuid>,
    Json(req): Json<UpdatePlanRequest>,
) -> ApiResult<Json<PlanResponse>> {
    require_permission(&auth_user, Permission::SubscriptionManage)?;

    let plan = state
        .plans
        .update_plan(auth_user.user_id, plan_id, req.try_into()?)
        .await?;
    Ok(Json(plan.into()))
}

pub async fn delete_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&auth_user, Permission::SubscriptionManage)?;

    state.plans.delete_plan(auth_user.user_id, plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
