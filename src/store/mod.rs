mod wal_store;

pub use wal_store::WalStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::model::*;

/// Outcome of the atomic check-and-insert primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    Inserted(Booking),
    /// Nothing was written. Carries the confirmed bookings that overlap.
    Conflict(Vec<Booking>),
}

/// Persistent storage of catalog and booking records, as seen by the engine.
///
/// `insert_booking_if_no_conflict` must be atomic per vehicle: the overlap
/// scan and the insert happen under one exclusive section, so two concurrent
/// callers for the same vehicle can never both observe "no conflict".
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn find_confirmed_bookings(&self, vehicle_id: VehicleId) -> Result<Vec<Booking>, StoreError>;

    async fn vehicle_exists(&self, vehicle_id: VehicleId) -> Result<bool, StoreError>;

    async fn insert_booking_if_no_conflict(&self, booking: Booking) -> Result<Insertion, StoreError>;

    async fn vehicle_details(
        &self,
        vehicle_id: VehicleId,
    ) -> Result<Option<(Vehicle, VehicleType)>, StoreError>;

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError>;

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    Wal(String),
    UnknownVehicle(VehicleId),
    UnknownVehicleType(VehicleTypeId),
    AlreadyExists(&'static str, u32),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
            StoreError::UnknownVehicle(id) => write!(f, "unknown vehicle: {id}"),
            StoreError::UnknownVehicleType(id) => write!(f, "unknown vehicle type: {id}"),
            StoreError::AlreadyExists(what, id) => write!(f, "{what} {id} already exists"),
        }
    }
}

impl std::error::Error for StoreError {}
