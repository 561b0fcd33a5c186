//! Viewer scope
//!
//! Which pickups an actor may see, resolved once from the actor's roles.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;
use wastewise_shared::types::{Pickup, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerScope {
    Admin,
    Organization(Uuid),
    Driver(Uuid),
}

impl ViewerScope {
    /// Resolve the scope for an actor holding `roles`.
    ///
    /// Precedence is Admin, then Driver, then Organization. The organization
    /// scope needs the actor's `org_id`; without one it is not granted.
    pub fn from_roles(roles: &[Role], actor_id: Uuid, org_id: Option<Uuid>) -> Option<Self> {
        if roles.contains(&Role::Admin) {
            return Some(Self::Admin);
        }
        if roles.contains(&Role::Driver) {
            return Some(Self::Driver(actor_id));
        }
        if roles.contains(&Role::Organization) {
            return org_id.map(Self::Organization);
        }
        None
    }

    /// `current_driver` is the driver named by the pickup's current assignment
    pub fn can_view(&self, pickup: &Pickup, current_driver: Option<Uuid>) -> bool {
        match self {
            Self::Admin => true,
            Self::Organization(org_id) => pickup.organization_id == *org_id,
            Self::Driver(driver_id) => current_driver == Some(*driver_id),
        }
    }

    /// Whether this scope manages the pickup on behalf of its organization
    pub fn manages(&self, pickup: &Pickup) -> bool {
        match self {
            Self::Admin => true,
            Self::Organization(org_id) => pickup.organization_id == *org_id,
            Self::Driver(_) => false,
        }
    }

    /// Append the `WHERE` clause restricting a query over `pickups p`
    pub fn visible_set(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Self::Admin => {
                builder.push(" WHERE TRUE");
            }
            Self::Organization(org_id) => {
                builder.push(" WHERE p.organization_id = ");
                builder.push_bind(*org_id);
            }
            Self::Driver(driver_id) => {
                builder.push(
                    " WHERE EXISTS (SELECT 1 FROM pickup_assignments a WHERE a.pickup_id = p.id AND a.driver_id = ",
                );
                builder.push_bind(*driver_id);
                builder.push(")");
            }
        }
    }
}

/// Authenticated caller of a dispatch operation
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub scope: ViewerScope,
}

impl Actor {
    pub fn new(id: Uuid, scope: ViewerScope) -> Self {
        Self { id, scope }
    }
}
