//! Usage ledger
//!
//! Per-subscription counters for pickups, waste weight and driver seats, and
//! the only code allowed to change them. Every adjustment runs on the caller's
//! connection so it commits or rolls back together with the caller's other
//! writes:
//!
//! 1. `SELECT ... FOR UPDATE` on the `subscription_usage` row. This lock is the
//!    serialisation point for every reservation against one subscription.
//! 2. Re-read the owning subscription and its plan limits under that lock.
//! 3. Compute the new counters in memory and compare them with the limits.
//! 4. Write the counters only when no limit is exceeded, so a refused
//!    reservation never produces a row version that could be committed.
//!
//! Lifecycle operations that change a subscription's status take the same
//! ledger lock first (see `subscriptions`), so a reservation can never be
//! counted against a subscription that is being upgraded or cancelled.

use serde::Serialize;
use sqlx::{FromRow, PgConnection, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;
use wastewise_shared::types::{SubscriptionPlan, SubscriptionStatus, SubscriptionUsage};

use crate::error::{BillingError, BillingResult};
use crate::subscriptions::mark_expired;

pub(crate) const USAGE_COLUMNS: &str = "id, subscription_id, pickups_used, waste_weight_used_grams, \
     drivers_used, last_reset_at, updated_at";

/// One of the independently tracked quota dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDimension {
    Pickups,
    WasteWeight,
    Drivers,
}

impl std::fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pickups => write!(f, "pickups"),
            Self::WasteWeight => write!(f, "waste_weight"),
            Self::Drivers => write!(f, "drivers"),
        }
    }
}

/// Signed change to apply to a ledger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub pickups: i32,
    pub weight_grams: i64,
    pub drivers: i32,
}

impl UsageDelta {
    /// One pickup carrying `weight_grams` of declared waste
    pub fn pickup(weight_grams: i64) -> Self {
        Self {
            pickups: 1,
            weight_grams,
            drivers: 0,
        }
    }

    pub fn driver_seat() -> Self {
        Self {
            pickups: 0,
            weight_grams: 0,
            drivers: 1,
        }
    }

    pub fn negate(self) -> Self {
        Self {
            pickups: -self.pickups,
            weight_grams: -self.weight_grams,
            drivers: -self.drivers,
        }
    }

    /// A delta that can only move counters toward zero
    pub fn is_release(&self) -> bool {
        self.pickups <= 0 && self.weight_grams <= 0 && self.drivers <= 0
    }
}

/// Quota ceilings of a plan (0 = unlimited)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, FromRow)]
pub struct PlanLimits {
    pub pickup_limit: i32,
    pub waste_weight_limit_grams: i64,
    pub driver_limit: i32,
}

impl From<&SubscriptionPlan> for PlanLimits {
    fn from(plan: &SubscriptionPlan) -> Self {
        Self {
            pickup_limit: plan.pickup_limit,
            waste_weight_limit_grams: plan.waste_weight_limit_grams,
            driver_limit: plan.driver_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub pickups_used: i32,
    pub waste_weight_used_grams: i64,
    pub drivers_used: i32,
}

impl UsageCounters {
    /// Counters after `delta`; releases never take a counter below zero.
    /// Fails with the dimension whose counter would overflow.
    pub fn apply(&self, delta: UsageDelta) -> Result<Self, QuotaDimension> {
        Ok(Self {
            pickups_used: self
                .pickups_used
                .checked_add(delta.pickups)
                .ok_or(QuotaDimension::Pickups)?
                .max(0),
            waste_weight_used_grams: self
                .waste_weight_used_grams
                .checked_add(delta.weight_grams)
                .ok_or(QuotaDimension::WasteWeight)?
                .max(0),
            drivers_used: self
                .drivers_used
                .checked_add(delta.drivers)
                .ok_or(QuotaDimension::Drivers)?
                .max(0),
        })
    }

    /// First dimension above its non-zero limit, in pickups/weight/drivers order
    pub fn exceeded(&self, limits: &PlanLimits) -> Option<QuotaDimension> {
        if limits.pickup_limit > 0 && self.pickups_used > limits.pickup_limit {
            return Some(QuotaDimension::Pickups);
        }
        if limits.waste_weight_limit_grams > 0
            && self.waste_weight_used_grams > limits.waste_weight_limit_grams
        {
            return Some(QuotaDimension::WasteWeight);
        }
        if limits.driver_limit > 0 && self.drivers_used > limits.driver_limit {
            return Some(QuotaDimension::Drivers);
        }
        None
    }
}

impl From<&SubscriptionUsage> for UsageCounters {
    fn from(usage: &SubscriptionUsage) -> Self {
        Self {
            pickups_used: usage.pickups_used,
            waste_weight_used_grams: usage.waste_weight_used_grams,
            drivers_used: usage.drivers_used,
        }
    }
}

/// Compute the counters after `delta`, refusing when a limit would be exceeded
/// or a counter would overflow. Releases are never refused for limits.
pub fn apply_delta(
    current: UsageCounters,
    delta: UsageDelta,
    limits: &PlanLimits,
) -> Result<UsageCounters, QuotaDimension> {
    let next = current.apply(delta)?;
    if delta.is_release() {
        return Ok(next);
    }
    match next.exceeded(limits) {
        Some(dimension) => Err(dimension),
        None => Ok(next),
    }
}

/// Ledger state as seen by the caller's transaction
#[derive(Debug, Clone)]
pub struct UsageSnapshot {
    pub subscription_id: Uuid,
    pub counters: UsageCounters,
    pub limits: PlanLimits,
    pub last_reset_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A ledger that breaks a plan limit or went negative
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LedgerViolation {
    pub subscription_id: Uuid,
    pub organization_id: Uuid,
    pub pickups_used: i32,
    pub pickup_limit: i32,
    pub waste_weight_used_grams: i64,
    pub waste_weight_limit_grams: i64,
    pub drivers_used: i32,
    pub driver_limit: i32,
}

#[derive(Debug, FromRow)]
struct LedgerSubscriptionRow {
    status: SubscriptionStatus,
    end_date: OffsetDateTime,
    pickup_limit: i32,
    waste_weight_limit_grams: i64,
    driver_limit: i32,
}

/// Quota authority for subscriptions
#[derive(Clone)]
pub struct UsageLedger {
    pool: PgPool,
}

impl UsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reserve quota on `conn`. Visible to others only once the caller commits.
    pub async fn reserve(
        &self,
        conn: &mut PgConnection,
        subscription_id: Uuid,
        delta: UsageDelta,
    ) -> BillingResult<UsageSnapshot> {
        self.adjust(conn, subscription_id, delta)
            .await?
            .ok_or(BillingError::LedgerNotFound(subscription_id))
    }

    /// Release a previous reservation (`delta` is the reserved amount).
    /// Returns `Ok(None)` when the ledger no longer exists.
    pub async fn release(
        &self,
        conn: &mut PgConnection,
        subscription_id: Uuid,
        delta: UsageDelta,
    ) -> BillingResult<Option<UsageSnapshot>> {
        self.adjust(conn, subscription_id, delta.negate()).await
    }

    async fn adjust(
        &self,
        conn: &mut PgConnection,
        subscription_id: Uuid,
        delta: UsageDelta,
    ) -> BillingResult<Option<UsageSnapshot>> {
        let usage: Option<SubscriptionUsage> = sqlx::query_as(&format!(
            "SELECT {} FROM subscription_usage WHERE subscription_id = $1 FOR UPDATE",
            USAGE_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(usage) = usage else {
            tracing::debug!(subscription_id = %subscription_id, "No usage ledger for subscription");
            return Ok(None);
        };

        let subscription: LedgerSubscriptionRow = sqlx::query_as(
            r#"
            SELECT s.status, s.end_date, p.pickup_limit, p.waste_weight_limit_grams, p.driver_limit
            FROM subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;

        if subscription.status != SubscriptionStatus::Active {
            return Err(BillingError::SubscriptionInactive(subscription_id));
        }

        if OffsetDateTime::now_utc() > subscription.end_date {
            // Committed on its own connection: the caller rolls back on this error.
            mark_expired(&self.pool, subscription_id).await?;
            return Err(BillingError::SubscriptionExpired(subscription_id));
        }

        let limits = PlanLimits {
            pickup_limit: subscription.pickup_limit,
            waste_weight_limit_grams: subscription.waste_weight_limit_grams,
            driver_limit: subscription.driver_limit,
        };

        let next = apply_delta(UsageCounters::from(&usage), delta, &limits).map_err(|dimension| {
            tracing::info!(
                subscription_id = %subscription_id,
                dimension = %dimension,
                pickups_used = usage.pickups_used,
                waste_weight_used_grams = usage.waste_weight_used_grams,
                drivers_used = usage.drivers_used,
                "Reservation refused, quota exceeded"
            );
            BillingError::QuotaExceeded(dimension)
        })?;

        let updated: SubscriptionUsage = sqlx::query_as(&format!(
            r#"
            UPDATE subscription_usage
            SET pickups_used = $2, waste_weight_used_grams = $3, drivers_used = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            USAGE_COLUMNS
        ))
        .bind(usage.id)
        .bind(next.pickups_used)
        .bind(next.waste_weight_used_grams)
        .bind(next.drivers_used)
        .fetch_one(&mut *conn)
        .await?;

        tracing::debug!(
            subscription_id = %subscription_id,
            pickups_used = updated.pickups_used,
            waste_weight_used_grams = updated.waste_weight_used_grams,
            drivers_used = updated.drivers_used,
            "Usage ledger adjusted"
        );

        Ok(Some(UsageSnapshot {
            subscription_id,
            counters: UsageCounters::from(&updated),
            limits,
            last_reset_at: updated.last_reset_at,
            updated_at: updated.updated_at,
        }))
    }

    /// Unlocked read of a ledger and its plan limits
    pub async fn snapshot(&self, subscription_id: Uuid) -> BillingResult<UsageSnapshot> {
        let usage: SubscriptionUsage = sqlx::query_as(&format!(
            "SELECT {} FROM subscription_usage WHERE subscription_id = $1",
            USAGE_COLUMNS
        ))
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BillingError::LedgerNotFound(subscription_id))?;

        let limits: PlanLimits = sqlx::query_as(
            r#"
            SELECT p.pickup_limit, p.waste_weight_limit_grams, p.driver_limit
            FROM subscriptions s
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE s.id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageSnapshot {
            subscription_id,
            counters: UsageCounters::from(&usage),
            limits,
            last_reset_at: usage.last_reset_at,
            updated_at: usage.updated_at,
        })
    }

    /// Reserve one driver seat on the organization's active subscription
    pub async fn claim_driver_seat(&self, org_id: Uuid) -> BillingResult<UsageSnapshot> {
        let subscription_id = self
            .active_subscription_id(org_id)
            .await?
            .ok_or(BillingError::NoActiveSubscription)?;

        let mut tx = self.pool.begin().await?;
        let snapshot = self
            .reserve(&mut tx, subscription_id, UsageDelta::driver_seat())
            .await?;
        tx.commit().await?;

        tracing::info!(
            org_id = %org_id,
            subscription_id = %subscription_id,
            drivers_used = snapshot.counters.drivers_used,
            "Driver seat claimed"
        );
        Ok(snapshot)
    }

    /// Give back one driver seat. No-op when there is no active subscription.
    pub async fn release_driver_seat(&self, org_id: Uuid) -> BillingResult<Option<UsageSnapshot>> {
        let Some(subscription_id) = self.active_subscription_id(org_id).await? else {
            return Ok(None);
        };

        let mut tx = self.pool.begin().await?;
        let snapshot = self
            .release(&mut tx, subscription_id, UsageDelta::driver_seat())
            .await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    /// Ledgers whose counters break a non-zero plan limit or are negative
    pub async fn check_invariants(&self) -> BillingResult<Vec<LedgerViolation>> {
        let violations: Vec<LedgerViolation> = sqlx::query_as(
            r#"
            SELECT s.id AS subscription_id, s.organization_id,
                   u.pickups_used, p.pickup_limit,
                   u.waste_weight_used_grams, p.waste_weight_limit_grams,
                   u.drivers_used, p.driver_limit
            FROM subscription_usage u
            JOIN subscriptions s ON s.id = u.subscription_id
            JOIN subscription_plans p ON p.id = s.plan_id
            WHERE (p.pickup_limit > 0 AND u.pickups_used > p.pickup_limit)
               OR (p.waste_weight_limit_grams > 0 AND u.waste_weight_used_grams > p.waste_weight_limit_grams)
               OR (p.driver_limit > 0 AND u.drivers_used > p.driver_limit)
               OR u.pickups_used < 0
               OR u.waste_weight_used_grams < 0
               OR u.drivers_used < 0
            ORDER BY s.organization_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        if !violations.is_empty() {
            tracing::warn!(count = violations.len(), "Usage ledger invariant violations found");
        }
        Ok(violations)
    }

    async fn active_subscription_id(&self, org_id: Uuid) -> BillingResult<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM subscriptions WHERE organization_id = $1 AND status = 'ACTIVE'",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }
}
