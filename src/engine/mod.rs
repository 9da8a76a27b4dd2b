mod availability;
mod conflict;
mod error;
mod mutations;
#[cfg(test)]
mod properties;
mod queries;

pub use conflict::{Clock, SystemClock, find_conflicts, now_ms};
pub use error::EngineError;

use std::sync::Arc;

use crate::model::*;
use crate::store::BookingStore;

/// The availability engine: owns the overlap rule and the guarded booking
/// protocol. Storage is injected; the engine holds no booking state itself.
pub struct Engine {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Resolve vehicle + vehicle type for a booking that is known to exist.
    async fn details_for(&self, booking: Booking) -> Result<BookingDetails, EngineError> {
        let (vehicle, vehicle_type) = self
            .store
            .vehicle_details(booking.vehicle_id)
            .await?
            .ok_or(EngineError::NotFound(booking.vehicle_id))?;
        Ok(BookingDetails {
            booking,
            vehicle,
            vehicle_type,
        })
    }
}
