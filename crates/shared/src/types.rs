//! Domain types used across WasteWise
//!
//! Enums are stored as upper-case `VARCHAR` values and use the same spelling
//! on the wire. Row structs mirror the tables in `migrations/`.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Weights
// =============================================================================

/// Weights are persisted as whole grams so ledger arithmetic stays exact.
pub const GRAMS_PER_KG: f64 = 1000.0;

/// Convert a kilogram value from the wire into stored grams (nearest gram).
/// `None` when the value is not finite or the gram count does not fit in an
/// `i64` column.
pub fn checked_kg_to_grams(kg: f64) -> Option<i64> {
    let grams = (kg * GRAMS_PER_KG).round();
    // i64::MAX as f64 rounds up to 2^63, which is itself out of range
    if !grams.is_finite() || grams >= i64::MAX as f64 || grams < i64::MIN as f64 {
        return None;
    }
    Some(grams as i64)
}

/// Convert stored grams back into kilograms for responses.
pub fn grams_to_kg(grams: i64) -> f64 {
    grams as f64 / GRAMS_PER_KG
}

// =============================================================================
// Enums
// =============================================================================

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
    Suspended,
}

impl SubscriptionStatus {
    /// EXPIRED and CANCELLED subscriptions never become ACTIVE again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Expired => "EXPIRED",
            Self::Cancelled => "CANCELLED",
            Self::Suspended => "SUSPENDED",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "ACTIVE" => Ok(Self::Active),
            "EXPIRED" => Ok(Self::Expired),
            "CANCELLED" => Ok(Self::Cancelled),
            "SUSPENDED" => Ok(Self::Suspended),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Billing cycle of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    Monthly,
    Yearly,
}

impl BillingCycle {
    /// Length of one subscription window
    pub fn period(&self) -> Duration {
        match self {
            Self::Monthly => Duration::days(30),
            Self::Yearly => Duration::days(365),
        }
    }
}

/// Organization category a plan is sold to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CategoryType {
    Apartment,
    Household,
    Individual,
    Commercial,
    Others,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PricingModel {
    Fixed,
    PerUnit,
    PerMember,
    Custom,
}

/// Pickup status. Transitions are owned by `wastewise-dispatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickupStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
}

impl PickupStatus {
    pub const ALL: [PickupStatus; 5] = [
        Self::Pending,
        Self::Assigned,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for PickupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PickupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "ASSIGNED" => Ok(Self::Assigned),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid pickup status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WasteType {
    General,
    Recyclable,
    Hazardous,
    Organic,
    Electronic,
}

/// Status of the driver binding on a pickup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    Assigned,
    Accepted,
    Rejected,
    Completed,
}

/// Role carried by an authenticated actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Organization,
    Driver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "ADMIN"),
            Self::Organization => write!(f, "ORGANIZATION"),
            Self::Driver => write!(f, "DRIVER"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Self::Admin),
            "ORGANIZATION" => Ok(Self::Organization),
            "DRIVER" => Ok(Self::Driver),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Organization reference data read by the subscription core
#[derive(Debug, Clone, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub total_units: i32,
    pub total_members: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Catalog entry with the three quota ceilings (0 = unlimited)
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionPlan {
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
    pub waste_weight_limit_grams: i64,
    pub driver_limit: i32,
    pub is_visible: bool,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Binding of one organization to one plan for `[start_date, end_date)`
#[derive(Debug, Clone, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub plan_id: Uuid,
    pub start_date: OffsetDateTime,
    pub end_date: OffsetDateTime,
    pub status: SubscriptionStatus,
    pub auto_renew: bool,
    pub cancelled_at: Option<OffsetDateTime>,
    pub upgraded_from_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.end_date
    }
}

/// Per-subscription usage counters
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionUsage {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub pickups_used: i32,
    pub waste_weight_used_grams: i64,
    pub drivers_used: i32,
    pub last_reset_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct Pickup {
    pub id: Uuid,
    pub organization_id: Uuid,
    /// Subscription active at creation time, kept after it expires
    pub subscription_id: Option<Uuid>,
    pub waste_type: WasteType,
    pub waste_weight_grams: i64,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: PickupStatus,
    pub scheduled_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct PickupAssignment {
    pub id: Uuid,
    pub pickup_id: Uuid,
    pub driver_id: Uuid,
    pub status: AssignmentStatus,
    pub assigned_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}
