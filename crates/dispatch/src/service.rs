//! Pickup lifecycle service
//!
//! Each mutating operation runs in one transaction that starts by locking the
//! pickup row, so concurrent requests never compute a transition from a stale
//! status. Creation reserves quota on the same transaction as the insert and
//! cancellation releases it inside a savepoint, so a failed release never
//! blocks the cancellation. Audit entries are recorded after commit.

use std::sync::Arc;

use serde_json::json;
use sqlx::{Connection, PgConnection, PgPool, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;
use wastewise_billing::{SubscriptionService, UsageDelta, UsageLedger};
use wastewise_shared::audit::{action, AuditEntry, AuditSink};
use wastewise_shared::types::{
    grams_to_kg, AssignmentStatus, Pickup, PickupAssignment, PickupStatus,
};

use crate::error::{DispatchError, DispatchResult};
use crate::requests::{
    CancelPickupRequest, CompletePickupRequest, CreatePickupRequest, PickupFilter,
    RejectPickupRequest, ReschedulePickupRequest,
};
use crate::scope::{Actor, ViewerScope};
use crate::state_machine;

const PICKUP_COLUMNS: &str = "id, organization_id, subscription_id, waste_type, waste_weight_grams, \
     address, latitude, longitude, status, scheduled_at, completed_at, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str =
    "id, pickup_id, driver_id, status, assigned_at, created_at, updated_at";

async fn lock_pickup(conn: &mut PgConnection, pickup_id: Uuid) -> DispatchResult<Pickup> {
    let pickup: Option<Pickup> = sqlx::query_as(&format!(
        "SELECT {} FROM pickups WHERE id = $1 FOR UPDATE",
        PICKUP_COLUMNS
    ))
    .bind(pickup_id)
    .fetch_optional(&mut *conn)
    .await?;

    pickup.ok_or_else(|| DispatchError::NotFound(format!("Pickup {}", pickup_id)))
}

async fn current_assignment(
    conn: &mut PgConnection,
    pickup_id: Uuid,
) -> DispatchResult<Option<PickupAssignment>> {
    let assignment: Option<PickupAssignment> = sqlx::query_as(&format!(
        "SELECT {} FROM pickup_assignments WHERE pickup_id = $1",
        ASSIGNMENT_COLUMNS
    ))
    .bind(pickup_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(assignment)
}

async fn set_pickup_status(
    conn: &mut PgConnection,
    pickup_id: Uuid,
    status: PickupStatus,
) -> DispatchResult<Pickup> {
    let pickup: Pickup = sqlx::query_as(&format!(
        "UPDATE pickups SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        PICKUP_COLUMNS
    ))
    .bind(pickup_id)
    .bind(status)
    .fetch_one(&mut *conn)
    .await?;
    Ok(pickup)
}

async fn set_assignment_status(
    conn: &mut PgConnection,
    assignment_id: Uuid,
    status: AssignmentStatus,
) -> DispatchResult<()> {
    sqlx::query("UPDATE pickup_assignments SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(assignment_id)
        .bind(status)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn require_manager(actor: &Actor, pickup: &Pickup) -> DispatchResult<()> {
    if actor.scope.manages(pickup) {
        Ok(())
    } else {
        Err(DispatchError::Forbidden(
            "Only an administrator or the owning organization can manage this pickup".to_string(),
        ))
    }
}

/// The current assignment, when it names the acting driver
fn require_assigned_driver(
    actor: &Actor,
    assignment: Option<PickupAssignment>,
) -> DispatchResult<PickupAssignment> {
    match (actor.scope, assignment) {
        (ViewerScope::Driver(driver_id), Some(assignment)) if assignment.driver_id == driver_id => {
            Ok(assignment)
        }
        _ => Err(DispatchError::Forbidden(
            "You are not assigned to this pickup".to_string(),
        )),
    }
}

/// Pickup lifecycle and assignment workflow
pub struct PickupService {
    pool: PgPool,
    ledger: UsageLedger,
    subscriptions: SubscriptionService,
    audit: Arc<dyn AuditSink>,
}

impl PickupService {
    pub fn new(pool: PgPool, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            ledger: UsageLedger::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone(), audit.clone()),
            pool,
            audit,
        }
    }

    /// Create a PENDING pickup, reserving one pickup and its declared weight
    pub async fn create(
        &self,
        actor: &Actor,
        org_id: Uuid,
        request: CreatePickupRequest,
    ) -> DispatchResult<Pickup> {
        let input = request.validate()?;
        let subscription = self.subscriptions.require_active(org_id).await?;

        let mut tx = self.pool.begin().await?;

        let usage = self
            .ledger
            .reserve(&mut tx, subscription.id, UsageDelta::pickup(input.waste_weight_grams))
            .await?;

        let pickup: Pickup = sqlx::query_as(&format!(
            r#"
            INSERT INTO pickups (
                id, organization_id, subscription_id, waste_type, waste_weight_grams,
                address, latitude, longitude, status, scheduled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            PICKUP_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(org_id)
        .bind(subscription.id)
        .bind(input.waste_type)
        .bind(input.waste_weight_grams)
        .bind(&input.address)
        .bind(input.latitude)
        .bind(input.longitude)
        .bind(PickupStatus::Pending)
        .bind(input.scheduled_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            pickup_id = %pickup.id,
            org_id = %org_id,
            subscription_id = %subscription.id,
            waste_weight_grams = pickup.waste_weight_grams,
            pickups_used = usage.counters.pickups_used,
            "Pickup created"
        );
        self.audit.record(AuditEntry::new(
            actor.id,
            action::PICKUP_CREATED,
            Some(org_id),
            json!({
                "pickup_id": pickup.id,
                "subscription_id": subscription.id,
                "waste_type": pickup.waste_type,
                "waste_weight": grams_to_kg(pickup.waste_weight_grams),
            }),
        ));

        Ok(pickup)
    }

    /// Pickups visible to `scope`, newest first
    pub async fn list(&self, scope: ViewerScope, filter: PickupFilter) -> DispatchResult<Vec<Pickup>> {
        let mut builder = QueryBuilder::new(format!("SELECT {} FROM pickups p", PICKUP_COLUMNS));
        scope.visible_set(&mut builder);

        if let Some(status) = filter.status {
            builder.push(" AND p.status = ");
            builder.push_bind(status);
        }

        builder.push(" ORDER BY p.created_at DESC");

        let pickups: Vec<Pickup> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(pickups)
    }

    pub async fn get(&self, scope: ViewerScope, pickup_id: Uuid) -> DispatchResult<Pickup> {
        let pickup: Option<Pickup> = sqlx::query_as(&format!(
            "SELECT {} FROM pickups WHERE id = $1",
            PICKUP_COLUMNS
        ))
        .bind(pickup_id)
        .fetch_optional(&self.pool)
        .await?;

        let pickup = pickup.ok_or_else(|| DispatchError::NotFound(format!("Pickup {}", pickup_id)))?;

        let driver: Option<(Uuid,)> =
            sqlx::query_as("SELECT driver_id FROM pickup_assignments WHERE pickup_id = $1")
                .bind(pickup_id)
                .fetch_optional(&self.pool)
                .await?;

        if !scope.can_view(&pickup, driver.map(|(id,)| id)) {
            return Err(DispatchError::Forbidden(
                "You do not have access to this pickup".to_string(),
            ));
        }

        Ok(pickup)
    }

    /// Bind `driver_id` to a PENDING pickup
    pub async fn assign_driver(
        &self,
        actor: &Actor,
        pickup_id: Uuid,
        driver_id: Uuid,
    ) -> DispatchResult<PickupAssignment> {
        let mut tx = self.pool.begin().await?;
        let pickup = lock_pickup(&mut tx, pickup_id).await?;
        require_manager(actor, &pickup)?;
        let next = state_machine::check_assignable(pickup.status)?;

        let assignment: PickupAssignment = sqlx::query_as(&format!(
            r#"
            INSERT INTO pickup_assignments (id, pickup_id, driver_id, status)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(pickup_id)
        .bind(driver_id)
        .bind(AssignmentStatus::Assigned)
        .fetch_one(&mut *tx)
        .await?;

        set_pickup_status(&mut tx, pickup_id, next).await?;
        tx.commit().await?;

        tracing::info!(pickup_id = %pickup_id, driver_id = %driver_id, "Driver assigned to pickup");
        self.audit.record(AuditEntry::new(
            actor.id,
            action::PICKUP_ASSIGNED,
            Some(pickup.organization_id),
            json!({ "pickup_id": pickup_id, "driver_id": driver_id }),
        ));

        Ok(assignment)
    }

    /// Cancel a pickup that has not started and give back its quota
    pub async fn cancel(
        &self,
        actor: &Actor,
        pickup_id: Uuid,
        request: CancelPickupRequest,
    ) -> DispatchResult<Pickup> {
        request.validate()?;

        let mut tx = self.pool.begin().await?;
        let pickup = lock_pickup(&mut tx, pickup_id).await?;
        require_manager(actor, &pickup)?;
        let next = state_machine::check_cancellable(pickup.status)?;

        let released = match pickup.subscription_id {
            Some(subscription_id) => {
                self.release_quietly(&mut tx, &pickup, subscription_id).await?
            }
            None => false,
        };

        let cancelled = set_pickup_status(&mut tx, pickup_id, next).await?;
        tx.commit().await?;

        tracing::info!(
            pickup_id = %pickup_id,
            from = %pickup.status,
            usage_released = released,
            "Pickup cancelled"
        );
        self.audit.record(AuditEntry::new(
            actor.id,
            action::PICKUP_CANCELLED,
            Some(pickup.organization_id),
            json!({
                "pickup_id": pickup_id,
                "reason": request.reason.trim(),
                "previous_status": pickup.status,
                "usage_released": released,
            }),
        ));

        Ok(cancelled)
    }

    /// Release the pickup's reservation inside a savepoint. Failures are logged
    /// and rolled back to the savepoint; only the savepoint plumbing itself can
    /// fail the caller.
    async fn release_quietly(
        &self,
        conn: &mut PgConnection,
        pickup: &Pickup,
        subscription_id: Uuid,
    ) -> DispatchResult<bool> {
        let mut savepoint = conn.begin().await?;
        let delta = UsageDelta::pickup(pickup.waste_weight_grams);

        match self.ledger.release(&mut savepoint, subscription_id, delta).await {
            Ok(Some(_)) => {
                savepoint.commit().await?;
                Ok(true)
            }
            Ok(None) => {
                savepoint.commit().await?;
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(
                    pickup_id = %pickup.id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Failed to release pickup usage, cancelling anyway"
                );
                savepoint.rollback().await?;
                Ok(false)
            }
        }
    }

    /// Move the scheduled time of a pickup that has not started
    pub async fn reschedule(
        &self,
        actor: &Actor,
        pickup_id: Uuid,
        request: ReschedulePickupRequest,
    ) -> DispatchResult<Pickup> {
        let new_time = request.validate_at(OffsetDateTime::now_utc())?;

        let mut tx = self.pool.begin().await?;
        let pickup = lock_pickup(&mut tx, pickup_id).await?;
        require_manager(actor, &pickup)?;
        state_machine::check_reschedulable(pickup.status)?;

        let rescheduled: Pickup = sqlx::query_as(&format!(
            "UPDATE pickups SET scheduled_at = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            PICKUP_COLUMNS
        ))
        .bind(pickup_id)
        .bind(new_time)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(pickup_id = %pickup_id, scheduled_at = %new_time, "Pickup rescheduled");
        self.audit.record(AuditEntry::new(
            actor.id,
            action::PICKUP_RESCHEDULED,
            Some(pickup.organization_id),
            json!({
                "pickup_id": pickup_id,
                "old_scheduled_at": pickup.scheduled_at.map(|at| at.unix_timestamp()),
                "new_scheduled_at": new_time.unix_timestamp(),
                "reason": request.reason.trim(),
            }),
        ));

        Ok(rescheduled)
    }

    /// The assigned driver takes the pickup; ASSIGNED becomes IN_PROGRESS
    pub async fn accept(&self, actor: &Actor, pickup_id: Uuid) -> DispatchResult<Pickup> {
        let mut tx = self.pool.begin().await?;
        let pickup = lock_pickup(&mut tx, pickup_id).await?;
        let assignment = require_assigned_driver(actor, current_assignment(&mut tx, pickup_id).await?)?;
        let next = state_machine::transition(pickup.status, PickupStatus::InProgress)?;

        set_assignment_status(&mut tx, assignment.id, AssignmentStatus::Accepted).await?;
        let accepted = set_pickup_status(&mut tx, pickup_id, next).await?;
        tx.commit().await?;

        tracing::info!(pickup_id = %pickup_id, driver_id = %actor.id, "Pickup accepted");
        self.audit.record(AuditEntry::new(
            actor.id,
            action::PICKUP_ACCEPTED,
            Some(pickup.organization_id),
            json!({ "pickup_id": pickup_id }),
        ));

        Ok(accepted)
    }

    /// The assigned driver declines; the assignment is removed and the pickup
    /// returns to PENDING for reassignment
    pub async fn reject(
        &self,
        actor: &Actor,
        pickup_id: Uuid,
        request: RejectPickupRequest,
    ) -> DispatchResult<Pickup> {
        request.validate()?;

        let mut tx = self.pool.begin().await?;
        let pickup = lock_pickup(&mut tx, pickup_id).await?;
        let assignment = require_assigned_driver(actor, current_assignment(&mut tx, pickup_id).await?)?;
        let next = state_machine::check_rejectable(pickup.status)?;

        sqlx::query("DELETE FROM pickup_assignments WHERE id = $1")
            .bind(assignment.id)
            .execute(&mut *tx)
            .await?;
        let rejected = set_pickup_status(&mut tx, pickup_id, next).await?;
        tx.commit().await?;

        tracing::info!(pickup_id = %pickup_id, driver_id = %actor.id, "Pickup rejected by driver");
        self.audit.record(AuditEntry::new(
            actor.id,
            action::PICKUP_REJECTED,
            Some(pickup.organization_id),
            json!({ "pickup_id": pickup_id, "reason": request.reason.trim() }),
        ));

        Ok(rejected)
    }

    /// Finish an IN_PROGRESS pickup with its measured weight.
    ///
    /// The measured weight replaces the declared one on the pickup only; the
    /// ledger keeps the declared weight that was reserved at creation.
    pub async fn complete(
        &self,
        actor: &Actor,
        pickup_id: Uuid,
        request: CompletePickupRequest,
    ) -> DispatchResult<Pickup> {
        let actual_grams = request.validate()?;

        let mut tx = self.pool.begin().await?;
        let pickup = lock_pickup(&mut tx, pickup_id).await?;
        let assignment = require_assigned_driver(actor, current_assignment(&mut tx, pickup_id).await?)?;
        let next = state_machine::transition(pickup.status, PickupStatus::Completed)?;
        if assignment.status != AssignmentStatus::Accepted {
            return Err(DispatchError::Forbidden(
                "Pickup must be accepted before it can be completed".to_string(),
            ));
        }

        set_assignment_status(&mut tx, assignment.id, AssignmentStatus::Completed).await?;
        let completed: Pickup = sqlx::query_as(&format!(
            r#"
            UPDATE pickups
            SET status = $2, waste_weight_grams = $3, completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PICKUP_COLUMNS
        ))
        .bind(pickup_id)
        .bind(next)
        .bind(actual_grams)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            pickup_id = %pickup_id,
            driver_id = %actor.id,
            declared_weight_grams = pickup.waste_weight_grams,
            actual_weight_grams = actual_grams,
            "Pickup completed"
        );
        self.audit.record(AuditEntry::new(
            actor.id,
            action::PICKUP_COMPLETED,
            Some(pickup.organization_id),
            json!({
                "pickup_id": pickup_id,
                "declared_weight": grams_to_kg(pickup.waste_weight_grams),
                "actual_weight": grams_to_kg(actual_grams),
                "notes": request.notes,
            }),
        ));

        Ok(completed)
    }
}
