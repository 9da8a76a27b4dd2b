use ulid::Ulid;

use crate::model::{Ms, VehicleId};
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    /// `start >= end`.
    InvalidInterval { start: Ms, end: Ms },
    /// Booking would start before the moment it is created.
    PastDate { start: Ms, now: Ms },
    NotFound(VehicleId),
    BookingNotFound(Ulid),
    /// Overlap detected at commit; nothing was written.
    AvailabilityConflict {
        vehicle_id: VehicleId,
        conflicting: Vec<Ulid>,
    },
    Storage(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UnknownVehicle(id) => EngineError::NotFound(id),
            other => EngineError::Storage(other),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): end date must be after start date")
            }
            EngineError::PastDate { start, now } => {
                write!(f, "start date {start} is in the past (now {now})")
            }
            EngineError::NotFound(id) => write!(f, "vehicle not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::AvailabilityConflict { vehicle_id, conflicting } => {
                write!(
                    f,
                    "vehicle {vehicle_id} is not available for the selected dates; conflicts with {} booking(s)",
                    conflicting.len()
                )
            }
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Storage(e) => Some(e),
            _ => None,
        }
    }
}
