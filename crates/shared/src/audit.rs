//! Write-only audit sink
//!
//! The lifecycle core records `(actor_id, action, org_id, metadata)` tuples
//! after a mutation commits. Recording never blocks the caller and never
//! fails it: the Postgres sink writes on a spawned task and logs failures.

use std::sync::Mutex;

use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Action names written to `audit_logs.action`
pub mod action {
    pub const PICKUP_CREATED: &str = "pickup.created";
    pub const PICKUP_ASSIGNED: &str = "pickup.assigned";
    pub const PICKUP_CANCELLED: &str = "pickup.cancelled";
    pub const PICKUP_RESCHEDULED: &str = "pickup.rescheduled";
    pub const PICKUP_ACCEPTED: &str = "pickup.accepted";
    pub const PICKUP_REJECTED: &str = "pickup.rejected";
    pub const PICKUP_COMPLETED: &str = "pickup.completed";

    pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
    pub const SUBSCRIPTION_CANCELLED: &str = "subscription.cancelled";
    pub const SUBSCRIPTION_UPGRADED: &str = "subscription.upgraded";

    pub const PLAN_CREATED: &str = "plan.created";
    pub const PLAN_UPDATED: &str = "plan.updated";
    pub const PLAN_DELETED: &str = "plan.deleted";
}

/// One audit record
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub actor_id: Uuid,
    pub action: &'static str,
    pub org_id: Option<Uuid>,
    pub metadata: Value,
}

impl AuditEntry {
    pub fn new(actor_id: Uuid, action: &'static str, org_id: Option<Uuid>, metadata: Value) -> Self {
        Self {
            actor_id,
            action,
            org_id,
            metadata,
        }
    }
}

/// Fire-and-forget audit destination
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Audit sink backed by the `audit_logs` table
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PgAuditSink {
    fn record(&self, entry: AuditEntry) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(action = entry.action, "No async runtime, dropping audit entry");
                return;
            }
        };

        let pool = self.pool.clone();
        handle.spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_logs (id, actor_id, action, org_id, metadata)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(entry.actor_id)
            .bind(entry.action)
            .bind(entry.org_id)
            .bind(&entry.metadata)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::warn!(
                    actor_id = %entry.actor_id,
                    action = entry.action,
                    error = %e,
                    "Failed to write audit log entry"
                );
            }
        });
    }
}

/// In-memory sink for tests and local tooling
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn actions(&self) -> Vec<&'static str> {
        self.entries().iter().map(|e| e.action).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let actor = Uuid::new_v4();
        sink.record(AuditEntry::new(actor, action::PICKUP_CREATED, None, json!({})));
        sink.record(AuditEntry::new(
            actor,
            action::PICKUP_CANCELLED,
            None,
            json!({ "reason": "no longer needed" }),
        ));

        assert_eq!(
            sink.actions(),
            vec![action::PICKUP_CREATED, action::PICKUP_CANCELLED]
        );
        assert_eq!(sink.entries()[1].metadata["reason"], "no longer needed");
    }
}
