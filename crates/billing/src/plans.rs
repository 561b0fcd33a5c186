//! Subscription plan catalog
//!
//! Plans carry pricing and the three quota ceilings the usage ledger enforces.
//! A plan cannot be deleted while any subscription still references it.

use std::sync::Arc;

use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use wastewise_shared::audit::{action, AuditEntry, AuditSink};
use wastewise_shared::types::{BillingCycle, CategoryType, PricingModel, SubscriptionPlan};

use crate::error::{sqlstate, BillingError, BillingResult, FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION};

pub(crate) const PLAN_COLUMNS: &str = "id, name, description, category_type, pricing_model, \
     price_cents, billing_cycle, max_units, max_members, pickup_limit, \
     waste_weight_limit_grams, driver_limit, is_visible, is_active, created_at, updated_at";

/// Fields of a new plan. Weight limits are in grams.
#[derive(Debug, Clone)]
pub struct NewPlan {
    pub name: String,
    pub description: Option<String>,
    pub category_type: CategoryType,
    pub pricing_model: PricingModel,
    pub price_cents: i64,
    pub billing_cycle: BillingCycle,
    pub max_units: Option<i32>,
    pub max_members: Option<i32>,
    pub pickup_limit: i32,
    pub waste_weight_limit_grams: i64,
    pub driver_limit: i32,
    pub is_visible: bool,
    pub is_active: bool,
}

/// Partial plan update; `None` leaves the column unchanged
#[derive(Debug, Clone, Default)]
pub struct PlanUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_type: Option<CategoryType>,
    pub pricing_model: Option<PricingModel>,
    pub price_cents: Option<i64>,
    pub billing_cycle: Option<BillingCycle>,
    pub max_units: Option<i32>,
    pub max_members: Option<i32>,
    pub pickup_limit: Option<i32>,
    pub waste_weight_limit_grams: Option<i64>,
    pub driver_limit: Option<i32>,
    pub is_visible: Option<bool>,
    pub is_active: Option<bool>,
}

fn check_name(name: &str) -> BillingResult<()> {
    let len = name.trim().chars().count();
    if len == 0 || len > 100 {
        return Err(BillingError::InvalidInput(
            "Plan name must be between 1 and 100 characters".to_string(),
        ));
    }
    Ok(())
}

fn check_non_negative(field: &str, value: Option<i64>) -> BillingResult<()> {
    match value {
        Some(v) if v < 0 => Err(BillingError::InvalidInput(format!(
            "{} must not be negative",
            field
        ))),
        _ => Ok(()),
    }
}

impl NewPlan {
    pub fn validate(&self) -> BillingResult<()> {
        check_name(&self.name)?;
        check_non_negative("price_cents", Some(self.price_cents))?;
        check_non_negative("max_units", self.max_units.map(i64::from))?;
        check_non_negative("max_members", self.max_members.map(i64::from))?;
        check_non_negative("pickup_limit", Some(i64::from(self.pickup_limit)))?;
        check_non_negative("waste_weight_limit", Some(self.waste_weight_limit_grams))?;
        check_non_negative("driver_limit", Some(i64::from(self.driver_limit)))?;
        Ok(())
    }
}

impl PlanUpdate {
    pub fn validate(&self) -> BillingResult<()> {
        if let Some(name) = &self.name {
            check_name(name)?;
        }
        check_non_negative("price_cents", self.price_cents)?;
        check_non_negative("max_units", self.max_units.map(i64::from))?;
        check_non_negative("max_members", self.max_members.map(i64::from))?;
        check_non_negative("pickup_limit", self.pickup_limit.map(i64::from))?;
        check_non_negative("waste_weight_limit", self.waste_weight_limit_grams)?;
        check_non_negative("driver_limit", self.driver_limit.map(i64::from))?;
        Ok(())
    }
}

/// Active plan by id, read on the caller's connection
pub(crate) async fn fetch_active_plan(
    conn: &mut PgConnection,
    plan_id: Uuid,
) -> BillingResult<SubscriptionPlan> {
    let plan: Option<SubscriptionPlan> = sqlx::query_as(&format!(
        "SELECT {} FROM subscription_plans WHERE id = $1 AND is_active = TRUE",
        PLAN_COLUMNS
    ))
    .bind(plan_id)
    .fetch_optional(&mut *conn)
    .await?;

    plan.ok_or(BillingError::PlanNotFound(plan_id))
}

/// Plan catalog service
pub struct PlanCatalog {
    pool: PgPool,
    audit: Arc<dyn AuditSink>,
}

impl PlanCatalog {
    pub fn new(pool: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self { pool, audit }
    }

    pub async fn create_plan(&self, actor_id: Uuid, plan: NewPlan) -> BillingResult<SubscriptionPlan> {
        plan.validate()?;

        let result: Result<SubscriptionPlan, sqlx::Error> = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscription_plans (
                id, name, description, category_type, pricing_model, price_cents,
                billing_cycle, max_units, max_members, pickup_limit,
                waste_weight_limit_grams, driver_limit, is_visible, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(plan.name.trim())
        .bind(&plan.description)
        .bind(plan.category_type)
        .bind(plan.pricing_model)
        .bind(plan.price_cents)
        .bind(plan.billing_cycle)
        .bind(plan.max_units)
        .bind(plan.max_members)
        .bind(plan.pickup_limit)
        .bind(plan.waste_weight_limit_grams)
        .bind(plan.driver_limit)
        .bind(plan.is_visible)
        .bind(plan.is_active)
        .fetch_one(&self.pool)
        .await;

        let created = match result {
            Ok(created) => created,
            Err(e) if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) => {
                return Err(BillingError::AlreadyExists(format!(
                    "plan named '{}'",
                    plan.name.trim()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(plan_id = %created.id, name = %created.name, "Subscription plan created");
        self.audit.record(AuditEntry::new(
            actor_id,
            action::PLAN_CREATED,
            None,
            json!({ "plan_id": created.id, "name": created.name }),
        ));

        Ok(created)
    }

    /// Plans offered to organizations: visible and active
    pub async fn list_plans(&self) -> BillingResult<Vec<SubscriptionPlan>> {
        let plans: Vec<SubscriptionPlan> = sqlx::query_as(&format!(
            "SELECT {} FROM subscription_plans WHERE is_visible = TRUE AND is_active = TRUE ORDER BY price_cents, name",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    pub async fn get_plan(&self, plan_id: Uuid) -> BillingResult<SubscriptionPlan> {
        let plan: Option<SubscriptionPlan> = sqlx::query_as(&format!(
            "SELECT {} FROM subscription_plans WHERE id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or(BillingError::PlanNotFound(plan_id))
    }

    pub async fn update_plan(
        &self,
        actor_id: Uuid,
        plan_id: Uuid,
        update: PlanUpdate,
    ) -> BillingResult<SubscriptionPlan> {
        update.validate()?;

        let result: Result<Option<SubscriptionPlan>, sqlx::Error> = sqlx::query_as(&format!(
            r#"
            UPDATE subscription_plans SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                category_type = COALESCE($4, category_type),
                pricing_model = COALESCE($5, pricing_model),
                price_cents = COALESCE($6, price_cents),
                billing_cycle = COALESCE($7, billing_cycle),
                max_units = COALESCE($8, max_units),
                max_members = COALESCE($9, max_members),
                pickup_limit = COALESCE($10, pickup_limit),
                waste_weight_limit_grams = COALESCE($11, waste_weight_limit_grams),
                driver_limit = COALESCE($12, driver_limit),
                is_visible = COALESCE($13, is_visible),
                is_active = COALESCE($14, is_active),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.description)
        .bind(update.category_type)
        .bind(update.pricing_model)
        .bind(update.price_cents)
        .bind(update.billing_cycle)
        .bind(update.max_units)
        .bind(update.max_members)
        .bind(update.pickup_limit)
        .bind(update.waste_weight_limit_grams)
        .bind(update.driver_limit)
        .bind(update.is_visible)
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await;

        let updated = match result {
            Ok(Some(updated)) => updated,
            Ok(None) => return Err(BillingError::PlanNotFound(plan_id)),
            Err(e) if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) => {
                return Err(BillingError::AlreadyExists("plan with that name".to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(plan_id = %plan_id, "Subscription plan updated");
        self.audit.record(AuditEntry::new(
            actor_id,
            action::PLAN_UPDATED,
            None,
            json!({ "plan_id": plan_id }),
        ));

        Ok(updated)
    }

    pub async fn delete_plan(&self, actor_id: Uuid, plan_id: Uuid) -> BillingResult<()> {
        let result = sqlx::query("DELETE FROM subscription_plans WHERE id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => return Err(BillingError::PlanNotFound(plan_id)),
            Ok(_) => {}
            Err(e) if sqlstate(&e).as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
                return Err(BillingError::PlanInUse(plan_id));
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(plan_id = %plan_id, "Subscription plan deleted");
        self.audit.record(AuditEntry::new(
            actor_id,
            action::PLAN_DELETED,
            None,
            json!({ "plan_id": plan_id }),
        ));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_plan() -> NewPlan {
        NewPlan {
            name: "Household Basic".to_string(),
            description: None,
            category_type: CategoryType::Household,
            pricing_model: PricingModel::Fixed,
            price_cents: 1_999,
            billing_cycle: BillingCycle::Monthly,
            max_units: None,
            max_members: Some(6),
            pickup_limit: 4,
            waste_weight_limit_grams: 100_000,
            driver_limit: 0,
            is_visible: true,
            is_active: true,
        }
    }

    #[test]
    fn test_valid_plan_passes() {
        assert!(basic_plan().validate().is_ok());
    }

    #[test]
    fn test_blank_name_rejected() {
        let plan = NewPlan {
            name: "   ".to_string(),
            ..basic_plan()
        };
        assert!(matches!(plan.validate(), Err(BillingError::InvalidInput(_))));
    }

    #[test]
    fn test_negative_limits_rejected() {
        let plan = NewPlan {
            pickup_limit: -1,
            ..basic_plan()
        };
        assert!(matches!(plan.validate(), Err(BillingError::InvalidInput(_))));

        let plan = NewPlan {
            price_cents: -5,
            ..basic_plan()
        };
        assert!(matches!(plan.validate(), Err(BillingError::InvalidInput(_))));
    }

    #[test]
    fn test_partial_update_only_checks_present_fields() {
        assert!(PlanUpdate::default().validate().is_ok());

        let update = PlanUpdate {
            waste_weight_limit_grams: Some(-1),
            ..Default::default()
        };
        let err = update.validate().unwrap_err();
        assert!(err.to_string().contains("waste_weight_limit"));
    }
}
