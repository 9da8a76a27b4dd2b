use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::store::Insertion;

use super::conflict::{check_not_past, validate_interval};
use super::{Engine, EngineError};

impl Engine {
    /// Reserve `vehicle_id` for `[start, end)`.
    ///
    /// Validation runs first (interval, past date, vehicle existence). The
    /// overlap check and the insert then happen as one store primitive under
    /// the vehicle's exclusive lock: of two concurrent overlapping requests
    /// exactly one commits, the other gets `AvailabilityConflict`. Conflicts
    /// are never retried here.
    pub async fn create_booking(
        &self,
        first_name: String,
        last_name: String,
        vehicle_id: VehicleId,
        start: Ms,
        end: Ms,
    ) -> Result<BookingDetails, EngineError> {
        let result = self
            .try_create_booking(first_name, last_name, vehicle_id, start, end)
            .await;
        match &result {
            Ok(details) => {
                metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL).increment(1);
                info!(
                    "booking {} confirmed for vehicle {vehicle_id} [{start}, {end})",
                    details.booking.id
                );
            }
            Err(e) => {
                metrics::counter!(
                    crate::observability::BOOKINGS_REJECTED_TOTAL,
                    "reason" => crate::observability::rejection_label(e)
                )
                .increment(1);
                debug!("booking for vehicle {vehicle_id} [{start}, {end}) rejected: {e}");
            }
        }
        result
    }

    async fn try_create_booking(
        &self,
        first_name: String,
        last_name: String,
        vehicle_id: VehicleId,
        start: Ms,
        end: Ms,
    ) -> Result<BookingDetails, EngineError> {
        let span = validate_interval(start, end)?;
        let now = self.clock.now_ms();
        check_not_past(&span, now)?;

        let (vehicle, vehicle_type) = self
            .store
            .vehicle_details(vehicle_id)
            .await?
            .ok_or(EngineError::NotFound(vehicle_id))?;

        let candidate = Booking {
            id: Ulid::new(),
            first_name,
            last_name,
            vehicle_id,
            span,
            status: BookingStatus::Confirmed,
            created_at: now,
        };

        match self.store.insert_booking_if_no_conflict(candidate).await? {
            Insertion::Inserted(booking) => Ok(BookingDetails {
                booking,
                vehicle,
                vehicle_type,
            }),
            Insertion::Conflict(existing) => Err(EngineError::AvailabilityConflict {
                vehicle_id,
                conflicting: existing.iter().map(|b| b.id).collect(),
            }),
        }
    }
}
