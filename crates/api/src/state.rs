//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;
use wastewise_billing::{PlanCatalog, SubscriptionService, UsageLedger};
use wastewise_dispatch::PickupService;
use wastewise_shared::{AuditSink, PgAuditSink};

use crate::auth::{AuthState, JwtManager};
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub pickups: Arc<PickupService>,
    pub subscriptions: Arc<SubscriptionService>,
    pub plans: Arc<PlanCatalog>,
    pub ledger: UsageLedger,
}

impl AppState {
    /// Build the services over `pool`, auditing into `audit_logs`
    pub fn new(pool: PgPool, config: Config) -> Self {
        let audit: Arc<dyn AuditSink> = Arc::new(PgAuditSink::new(pool.clone()));
        Self::with_audit(pool, config, audit)
    }

    pub fn with_audit(pool: PgPool, config: Config, audit: Arc<dyn AuditSink>) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);

        Self {
            pickups: Arc::new(PickupService::new(pool.clone(), audit.clone())),
            subscriptions: Arc::new(SubscriptionService::new(pool.clone(), audit.clone())),
            plans: Arc::new(PlanCatalog::new(pool.clone(), audit)),
            ledger: UsageLedger::new(pool.clone()),
            config: Arc::new(config),
            jwt,
            pool,
        }
    }

    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt: self.jwt.clone(),
        }
    }
}
