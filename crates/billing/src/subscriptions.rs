//! Subscription lifecycle
//!
//! Binds organizations to plans and owns the ACTIVE / EXPIRED / CANCELLED
//! transitions. Every lifecycle mutation for one organization takes locks in
//! the same order:
//!
//! 1. the organization row (`FOR NO KEY UPDATE`, so pickup inserts that only
//!    need a key-share lock on the organization are not blocked),
//! 2. the usage ledger row of the active subscription (`FOR UPDATE`),
//! 3. the active subscription row itself, re-checked to still be ACTIVE.
//!
//! Taking the ledger lock before the subscription lock matches the order used
//! by ledger reservations, which lock the ledger and may then flip an expired
//! subscription on a separate connection.

use std::sync::Arc;

use serde_json::json;
use sqlx::{PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;
use wastewise_shared::audit::{action, AuditEntry, AuditSink};
use wastewise_shared::types::{
    BillingCycle, CategoryType, Organization, Subscription, SubscriptionPlan, SubscriptionStatus,
};

use crate::error::{sqlstate, BillingError, BillingResult, UNIQUE_VIOLATION};
use crate::ledger::{UsageLedger, UsageSnapshot};
use crate::plans::{fetch_active_plan, PLAN_COLUMNS};

pub(crate) const SUBSCRIPTION_COLUMNS: &str = "id, organization_id, plan_id, start_date, end_date, \
     status, auto_renew, cancelled_at, upgraded_from_id, created_at, updated_at";

/// Subscription together with the plan it is bound to
#[derive(Debug, Clone)]
pub struct SubscriptionDetails {
    pub subscription: Subscription,
    pub plan: SubscriptionPlan,
}

/// End of the window that starts at `start`
pub fn compute_end_date(start: OffsetDateTime, cycle: BillingCycle) -> OffsetDateTime {
    start + cycle.period()
}

/// Check the organization's declared scale against the plan's ceilings.
/// Only APARTMENT (units) and HOUSEHOLD (members) plans are scale-limited.
pub fn check_eligibility(org: &Organization, plan: &SubscriptionPlan) -> BillingResult<()> {
    let (dimension, actual, limit) = match plan.category_type {
        CategoryType::Apartment => ("units", org.total_units, plan.max_units),
        CategoryType::Household => ("members", org.total_members, plan.max_members),
        _ => return Ok(()),
    };

    match limit {
        Some(limit) if limit > 0 && actual > limit => Err(BillingError::ExceedsPlanScale {
            dimension,
            actual,
            limit,
        }),
        _ => Ok(()),
    }
}

/// Flip an ACTIVE subscription to EXPIRED, committed on its own connection.
/// Returns whether this call performed the flip.
pub(crate) async fn mark_expired(pool: &PgPool, subscription_id: Uuid) -> BillingResult<bool> {
    let result = sqlx::query(
        "UPDATE subscriptions SET status = 'EXPIRED', updated_at = NOW() WHERE id = $1 AND status = 'ACTIVE'",
    )
    .bind(subscription_id)
    .execute(pool)
    .await?;

    let flipped = result.rows_affected() > 0;
    if flipped {
        tracing::info!(subscription_id = %subscription_id, "Subscription expired");
    }
    Ok(flipped)
}

async fn lock_organization(conn: &mut PgConnection, org_id: Uuid) -> BillingResult<Organization> {
    let org: Option<Organization> = sqlx::query_as(
        r#"
        SELECT id, name, total_units, total_members, created_at, updated_at
        FROM organizations
        WHERE id = $1
        FOR NO KEY UPDATE
        "#,
    )
    .bind(org_id)
    .fetch_optional(&mut *conn)
    .await?;

    org.ok_or(BillingError::OrganizationNotFound(org_id))
}

/// Lock the ledger and then the row of the organization's ACTIVE subscription.
/// The organization row must already be locked by the caller.
async fn lock_active(conn: &mut PgConnection, org_id: Uuid) -> BillingResult<Option<Subscription>> {
    let ledger: Option<(Uuid,)> = sqlx::query_as(
        r#"
        SELECT u.subscription_id
        FROM subscription_usage u
        JOIN subscriptions s ON s.id = u.subscription_id
        WHERE s.organization_id = $1 AND s.status = 'ACTIVE'
        FOR UPDATE OF u
        "#,
    )
    .bind(org_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some((subscription_id,)) = ledger else {
        return Ok(None);
    };

    // An expiry flip may have landed between the two statements.
    let subscription: Option<Subscription> = sqlx::query_as(&format!(
        "SELECT {} FROM subscriptions WHERE id = $1 AND status = 'ACTIVE' FOR NO KEY UPDATE",
        SUBSCRIPTION_COLUMNS
    ))
    .bind(subscription_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(subscription)
}

async fn set_status(
    conn: &mut PgConnection,
    subscription_id: Uuid,
    status: SubscriptionStatus,
) -> BillingResult<Subscription> {
    let cancelled = status == SubscriptionStatus::Cancelled;
    let subscription: Subscription = sqlx::query_as(&format!(
        r#"
        UPDATE subscriptions
        SET status = $2,
            cancelled_at = CASE WHEN $3 THEN NOW() ELSE cancelled_at END,
            auto_renew = CASE WHEN $3 THEN FALSE ELSE auto_renew END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {}
        "#,
        SUBSCRIPTION_COLUMNS
    ))
    .bind(subscription_id)
    .bind(status)
    .bind(cancelled)
    .fetch_one(&mut *conn)
    .await?;

    Ok(subscription)
}

/// Insert an ACTIVE subscription and its zeroed ledger
async fn insert_active(
    conn: &mut PgConnection,
    org_id: Uuid,
    plan: &SubscriptionPlan,
    upgraded_from_id: Option<Uuid>,
) -> BillingResult<Subscription> {
    let start = OffsetDateTime::now_utc();
    let end = compute_end_date(start, plan.billing_cycle);

    let result: Result<Subscription, sqlx::Error> = sqlx::query_as(&format!(
        r#"
        INSERT INTO subscriptions (
            id, organization_id, plan_id, start_date, end_date, status, auto_renew, upgraded_from_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7)
        RETURNING {}
        "#,
        SUBSCRIPTION_COLUMNS
    ))
    .bind(Uuid::new_v4())
    .bind(org_id)
    .bind(plan.id)
    .bind(start)
    .bind(end)
    .bind(SubscriptionStatus::Active)
    .bind(upgraded_from_id)
    .fetch_one(&mut *conn)
    .await;

    let subscription = match result {
        Ok(subscription) => subscription,
        Err(e) if sqlstate(&e).as_deref() == Some(UNIQUE_VIOLATION) => {
            return Err(BillingError::AlreadySubscribed);
        }
        Err(e) => return Err(e.into()),
    };

    sqlx::query(
        r#"
        INSERT INTO subscription_usage (id, subscription_id, pickups_used, waste_weight_used_grams, drivers_used)
        VALUES ($1, $2, 0, 0, 0)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(subscription.id)
    .execute(&mut *conn)
    .await?;

    Ok(subscription)
}

/// Subscription lifecycle service
pub struct SubscriptionService {
    pool: PgPool,
    ledger: UsageLedger,
    audit: Arc<dyn AuditSink>,
}

impl SubscriptionService {
    pub fn new(pool: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            ledger: UsageLedger::new(pool.clone()),
            pool,
            audit,
        }
    }

    /// Bind the organization to `plan_id` for one billing window
    pub async fn subscribe(
        &self,
        actor_id: Uuid,
        org_id: Uuid,
        plan_id: Uuid,
    ) -> BillingResult<Subscription> {
        let mut tx = self.pool.begin().await?;

        let org = lock_organization(&mut tx, org_id).await?;
        let plan = fetch_active_plan(&mut tx, plan_id).await?;
        check_eligibility(&org, &plan)?;

        if let Some(current) = lock_active(&mut tx, org_id).await? {
            if !current.is_expired_at(OffsetDateTime::now_utc()) {
                return Err(BillingError::AlreadySubscribed);
            }
            // Lapsed but never observed; retire it in this transaction.
            set_status(&mut tx, current.id, SubscriptionStatus::Expired).await?;
            tracing::info!(subscription_id = %current.id, "Subscription expired");
        }

        let subscription = insert_active(&mut tx, org_id, &plan, None).await?;
        tx.commit().await?;

        tracing::info!(
            org_id = %org_id,
            subscription_id = %subscription.id,
            plan_id = %plan.id,
            end_date = %subscription.end_date,
            "Subscription created"
        );
        self.audit.record(AuditEntry::new(
            actor_id,
            action::SUBSCRIPTION_CREATED,
            Some(org_id),
            json!({ "subscription_id": subscription.id, "plan_id": plan.id }),
        ));

        Ok(subscription)
    }

    /// Cancel the organization's active subscription
    pub async fn cancel(&self, actor_id: Uuid, org_id: Uuid) -> BillingResult<Subscription> {
        let mut tx = self.pool.begin().await?;
        lock_organization(&mut tx, org_id).await?;

        let Some(current) = lock_active(&mut tx, org_id).await? else {
            drop(tx);
            return match self.latest(org_id).await? {
                Some(latest) if latest.status == SubscriptionStatus::Cancelled => {
                    Err(BillingError::AlreadyCancelled)
                }
                _ => Err(BillingError::NoActiveSubscription),
            };
        };

        let cancelled = set_status(&mut tx, current.id, SubscriptionStatus::Cancelled).await?;
        tx.commit().await?;

        tracing::info!(
            org_id = %org_id,
            subscription_id = %cancelled.id,
            "Subscription cancelled"
        );
        self.audit.record(AuditEntry::new(
            actor_id,
            action::SUBSCRIPTION_CANCELLED,
            Some(org_id),
            json!({ "subscription_id": cancelled.id }),
        ));

        Ok(cancelled)
    }

    /// Replace the active subscription with a new one on `new_plan_id`.
    /// The old subscription is marked EXPIRED and usage starts from zero.
    pub async fn upgrade(
        &self,
        actor_id: Uuid,
        org_id: Uuid,
        new_plan_id: Uuid,
    ) -> BillingResult<Subscription> {
        let mut tx = self.pool.begin().await?;
        let org = lock_organization(&mut tx, org_id).await?;

        let current = lock_active(&mut tx, org_id)
            .await?
            .ok_or(BillingError::NoActiveSubscription)?;

        if current.is_expired_at(OffsetDateTime::now_utc()) {
            set_status(&mut tx, current.id, SubscriptionStatus::Expired).await?;
            tx.commit().await?;
            tracing::info!(subscription_id = %current.id, "Subscription expired");
            return Err(BillingError::SubscriptionExpired(current.id));
        }

        if current.plan_id == new_plan_id {
            return Err(BillingError::InvalidInput(
                "Organization is already on this plan".to_string(),
            ));
        }

        let plan = fetch_active_plan(&mut tx, new_plan_id).await?;
        check_eligibility(&org, &plan)?;

        set_status(&mut tx, current.id, SubscriptionStatus::Expired).await?;
        let upgraded = insert_active(&mut tx, org_id, &plan, Some(current.id)).await?;
        tx.commit().await?;

        tracing::info!(
            org_id = %org_id,
            old_subscription_id = %current.id,
            subscription_id = %upgraded.id,
            plan_id = %plan.id,
            "Subscription upgraded"
        );
        self.audit.record(AuditEntry::new(
            actor_id,
            action::SUBSCRIPTION_UPGRADED,
            Some(org_id),
            json!({
                "old_subscription_id": current.id,
                "subscription_id": upgraded.id,
                "old_plan_id": current.plan_id,
                "plan_id": plan.id,
            }),
        ));

        Ok(upgraded)
    }

    /// The organization's ACTIVE subscription, without an expiry check
    pub async fn get_active(&self, org_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE organization_id = $1 AND status = 'ACTIVE'",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }

    /// The organization's ACTIVE subscription, expiring it when its window has passed
    pub async fn require_active(&self, org_id: Uuid) -> BillingResult<Subscription> {
        let subscription = self
            .get_active(org_id)
            .await?
            .ok_or(BillingError::NoActiveSubscription)?;

        if subscription.is_expired_at(OffsetDateTime::now_utc()) {
            mark_expired(&self.pool, subscription.id).await?;
            return Err(BillingError::SubscriptionExpired(subscription.id));
        }

        Ok(subscription)
    }

    /// Most recent subscription of any status, with its plan
    pub async fn get_current(&self, org_id: Uuid) -> BillingResult<SubscriptionDetails> {
        let subscription = self
            .latest(org_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(format!("organization {}", org_id)))?;

        let plan: SubscriptionPlan = sqlx::query_as(&format!(
            "SELECT {} FROM subscription_plans WHERE id = $1",
            PLAN_COLUMNS
        ))
        .bind(subscription.plan_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(SubscriptionDetails { subscription, plan })
    }

    /// Ledger snapshot of the most recent subscription
    pub async fn get_usage(&self, org_id: Uuid) -> BillingResult<UsageSnapshot> {
        let subscription = self
            .latest(org_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(format!("organization {}", org_id)))?;

        self.ledger.snapshot(subscription.id).await
    }

    async fn latest(&self, org_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE organization_id = $1 ORDER BY created_at DESC LIMIT 1",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use wastewise_shared::types::PricingModel;

    fn org(units: i32, members: i32) -> Organization {
        let now = OffsetDateTime::now_utc();
        Organization {
            id: Uuid::new_v4(),
            name: "Green Towers".to_string(),
            total_units: units,
            total_members: members,
            created_at: now,
            updated_at: now,
        }
    }

    fn plan(category: CategoryType, max_units: Option<i32>, max_members: Option<i32>) -> SubscriptionPlan {
        let now = OffsetDateTime::now_utc();
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "Plan".to_string(),
            description: None,
            category_type: category,
            pricing_model: PricingModel::Fixed,
            price_cents: 0,
            billing_cycle: BillingCycle::Monthly,
            max_units,
            max_members,
            pickup_limit: 0,
            waste_weight_limit_grams: 0,
            driver_limit: 0,
            is_visible: true,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_end_date_follows_billing_cycle() {
        let start = datetime!(2026-01-31 12:00 UTC);
        assert_eq!(
            compute_end_date(start, BillingCycle::Monthly),
            datetime!(2026-03-02 12:00 UTC)
        );
        assert_eq!(
            compute_end_date(start, BillingCycle::Yearly),
            datetime!(2027-01-31 12:00 UTC)
        );
    }

    #[test]
    fn test_apartment_plan_checks_units() {
        let plan = plan(CategoryType::Apartment, Some(50), Some(1));
        assert!(check_eligibility(&org(50, 400), &plan).is_ok());

        let err = check_eligibility(&org(51, 0), &plan).unwrap_err();
        assert!(matches!(
            err,
            BillingError::ExceedsPlanScale {
                dimension: "units",
                actual: 51,
                limit: 50
            }
        ));
    }

    #[test]
    fn test_household_plan_checks_members() {
        let plan = plan(CategoryType::Household, Some(1), Some(4));
        assert!(check_eligibility(&org(99, 4), &plan).is_ok());
        assert!(check_eligibility(&org(0, 5), &plan).is_err());
    }

    #[test]
    fn test_missing_or_zero_ceiling_is_not_checked() {
        assert!(check_eligibility(&org(1_000, 0), &plan(CategoryType::Apartment, None, None)).is_ok());
        assert!(check_eligibility(&org(1_000, 0), &plan(CategoryType::Apartment, Some(0), None)).is_ok());
    }

    #[test]
    fn test_other_categories_have_no_scale_check() {
        let plan = plan(CategoryType::Commercial, Some(1), Some(1));
        assert!(check_eligibility(&org(500, 500), &plan).is_ok());
    }
}
