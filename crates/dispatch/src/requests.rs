//! Pickup request payloads and their validation
//!
//! Weights arrive in kilograms and are validated here before anything touches
//! the database.

use serde::Deserialize;
use time::{OffsetDateTime, UtcOffset};
use uuid::Uuid;
use wastewise_shared::types::{checked_kg_to_grams, PickupStatus, WasteType};

use crate::error::{DispatchError, DispatchResult};

pub const REASON_MIN_CHARS: usize = 5;
pub const REASON_MAX_CHARS: usize = 500;
pub const NOTES_MAX_CHARS: usize = 1000;
pub const ADDRESS_MAX_CHARS: usize = 500;
/// Upper bound on a single pickup's declared or measured weight
pub const WEIGHT_MAX_KG: f64 = 100_000.0;

fn invalid(message: impl Into<String>) -> DispatchError {
    DispatchError::Validation(message.into())
}

fn validate_reason(field: &str, reason: &str) -> DispatchResult<()> {
    let len = reason.trim().chars().count();
    if !(REASON_MIN_CHARS..=REASON_MAX_CHARS).contains(&len) {
        return Err(invalid(format!(
            "{} must be between {} and {} characters",
            field, REASON_MIN_CHARS, REASON_MAX_CHARS
        )));
    }
    Ok(())
}

fn bounded_grams(field: &str, kg: f64) -> DispatchResult<i64> {
    if kg > WEIGHT_MAX_KG {
        return Err(invalid(format!(
            "{} must be at most {} kg",
            field, WEIGHT_MAX_KG
        )));
    }
    checked_kg_to_grams(kg).ok_or_else(|| invalid(format!("{} is out of range", field)))
}

/// Kilograms to grams for a weight that must be strictly positive
fn positive_grams(field: &str, kg: f64) -> DispatchResult<i64> {
    if !kg.is_finite() || kg <= 0.0 {
        return Err(invalid(format!("{} must be greater than 0", field)));
    }
    let grams = bounded_grams(field, kg)?;
    if grams == 0 {
        return Err(invalid(format!("{} must be at least 0.001 kg", field)));
    }
    Ok(grams)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePickupRequest {
    pub waste_type: WasteType,
    /// Declared weight in kg
    pub waste_weight: f64,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub scheduled_at: Option<OffsetDateTime>,
}

/// A create request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedPickup {
    pub waste_type: WasteType,
    pub waste_weight_grams: i64,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub scheduled_at: Option<OffsetDateTime>,
}

impl CreatePickupRequest {
    pub fn validate(&self) -> DispatchResult<ValidatedPickup> {
        let waste_weight_grams = positive_grams("waste_weight", self.waste_weight)?;

        let address = self.address.trim();
        if address.is_empty() {
            return Err(invalid("address is required"));
        }
        if address.chars().count() > ADDRESS_MAX_CHARS {
            return Err(invalid(format!(
                "address must be at most {} characters",
                ADDRESS_MAX_CHARS
            )));
        }

        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(invalid("latitude must be between -90 and 90"));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(invalid("longitude must be between -180 and 180"));
        }

        Ok(ValidatedPickup {
            waste_type: self.waste_type,
            waste_weight_grams,
            address: address.to_string(),
            latitude: self.latitude,
            longitude: self.longitude,
            scheduled_at: self.scheduled_at.map(|at| at.to_offset(UtcOffset::UTC)),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PickupFilter {
    pub status: Option<PickupStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignDriverRequest {
    pub driver_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelPickupRequest {
    #[serde(alias = "cancellation_reason")]
    pub reason: String,
}

impl CancelPickupRequest {
    pub fn validate(&self) -> DispatchResult<()> {
        validate_reason("reason", &self.reason)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReschedulePickupRequest {
    #[serde(with = "time::serde::rfc3339")]
    pub new_scheduled_at: OffsetDateTime,
    pub reason: String,
}

impl ReschedulePickupRequest {
    /// Validate against `now`; the new time must be strictly later
    pub fn validate_at(&self, now: OffsetDateTime) -> DispatchResult<OffsetDateTime> {
        validate_reason("reason", &self.reason)?;
        let new_time = self.new_scheduled_at.to_offset(UtcOffset::UTC);
        if new_time <= now {
            return Err(invalid("new_scheduled_at must be in the future"));
        }
        Ok(new_time)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RejectPickupRequest {
    pub reason: String,
}

impl RejectPickupRequest {
    pub fn validate(&self) -> DispatchResult<()> {
        validate_reason("reason", &self.reason)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletePickupRequest {
    /// Measured weight in kg
    pub actual_weight: f64,
    pub notes: Option<String>,
}

impl CompletePickupRequest {
    /// Returns the actual weight in grams
    pub fn validate(&self) -> DispatchResult<i64> {
        if !self.actual_weight.is_finite() || self.actual_weight < 0.0 {
            return Err(invalid("actual_weight must be 0 or greater"));
        }
        if let Some(notes) = &self.notes {
            if notes.chars().count() > NOTES_MAX_CHARS {
                return Err(invalid(format!(
                    "notes must be at most {} characters",
                    NOTES_MAX_CHARS
                )));
            }
        }
        bounded_grams("actual_weight", self.actual_weight)
    }
}
