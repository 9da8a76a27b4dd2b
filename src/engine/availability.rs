use crate::model::*;

use super::conflict::{find_conflicts, validate_interval};
use super::{Engine, EngineError};

impl Engine {
    /// Which confirmed bookings on `vehicle_id` overlap `[start, end)`.
    ///
    /// A pure read: nothing is locked beyond the store's own snapshot, so the
    /// answer can be stale the moment it is returned. Only `create_booking`
    /// gives a binding guarantee.
    pub async fn check_availability(
        &self,
        vehicle_id: VehicleId,
        start: Ms,
        end: Ms,
    ) -> Result<Availability, EngineError> {
        let span = validate_interval(start, end)?;
        if !self.store.vehicle_exists(vehicle_id).await? {
            return Err(EngineError::NotFound(vehicle_id));
        }

        let bookings = self.store.find_confirmed_bookings(vehicle_id).await?;
        let conflicting_bookings = find_conflicts(&bookings, &span);
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL).increment(1);

        Ok(Availability {
            vehicle_id,
            span,
            is_available: conflicting_bookings.is_empty(),
            conflicting_bookings,
        })
    }
}
