use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type inside the core.
pub type Ms = i64;

pub type VehicleId = u32;
pub type VehicleTypeId = u32;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Two half-open spans overlap iff each starts before the other ends.
    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleType {
    pub id: VehicleTypeId,
    pub name: String,
    /// 2 (bikes) or 4 (cars).
    pub wheels: u8,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub vehicle_type_id: VehicleTypeId,
    pub name: String,
    /// Model/year label, e.g. "2023".
    pub model: String,
    /// Catalog listing flag. Independent of bookings.
    pub is_available: bool,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Confirmed,
    /// Reserved. No operation transitions a booking here yet.
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub first_name: String,
    pub last_name: String,
    pub vehicle_id: VehicleId,
    pub span: Span,
    pub status: BookingStatus,
    pub created_at: Ms,
}

impl Booking {
    /// Only confirmed bookings block their vehicle.
    pub fn conflicts_with(&self, span: &Span) -> bool {
        self.status == BookingStatus::Confirmed && self.span.overlaps(span)
    }
}

/// A booking with its vehicle and vehicle type resolved for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingDetails {
    pub booking: Booking,
    pub vehicle: Vehicle,
    pub vehicle_type: VehicleType,
}

/// Result of an availability check for one vehicle and one candidate span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub vehicle_id: VehicleId,
    pub span: Span,
    pub is_available: bool,
    pub conflicting_bookings: Vec<Booking>,
}

/// Per-vehicle booking ledger. Bookings sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct VehicleLedger {
    pub vehicle_id: VehicleId,
    pub bookings: Vec<Booking>,
}

impl VehicleLedger {
    pub fn new(vehicle_id: VehicleId) -> Self {
        Self {
            vehicle_id,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    /// Confirmed bookings whose span overlaps `query`.
    /// Binary search skips bookings starting at or after `query.end`.
    pub fn conflicting(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.conflicts_with(query))
    }

    pub fn confirmed(&self) -> impl Iterator<Item = &Booking> {
        self.bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Confirmed)
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleTypeAdded {
        id: VehicleTypeId,
        name: String,
        wheels: u8,
        description: String,
    },
    VehicleAdded {
        id: VehicleId,
        vehicle_type_id: VehicleTypeId,
        name: String,
        model: String,
        is_available: bool,
    },
    BookingConfirmed {
        id: Ulid,
        vehicle_id: VehicleId,
        span: Span,
        first_name: String,
        last_name: String,
        created_at: Ms,
    },
}
