//! Property tests for the overlap rule and the no-double-booking invariant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use proptest::prelude::*;
use ulid::Ulid;

use super::*;
use crate::store::{BookingStore, Insertion, StoreError, WalStore};

fn span_strategy() -> impl Strategy<Value = Span> {
    (0i64..1_000, 1i64..200).prop_map(|(start, len)| Span::new(start, start + len))
}

/// Single-mutex store: every call is trivially atomic.
#[derive(Default)]
struct MemStore {
    bookings: Mutex<HashMap<VehicleId, Vec<Booking>>>,
}

#[async_trait]
impl BookingStore for MemStore {
    async fn find_confirmed_bookings(&self, vehicle_id: VehicleId) -> Result<Vec<Booking>, StoreError> {
        let guard = self.bookings.lock().unwrap();
        Ok(guard.get(&vehicle_id).cloned().unwrap_or_default())
    }

    async fn vehicle_exists(&self, vehicle_id: VehicleId) -> Result<bool, StoreError> {
        Ok((1..=3).contains(&vehicle_id))
    }

    async fn insert_booking_if_no_conflict(&self, booking: Booking) -> Result<Insertion, StoreError> {
        let mut guard = self.bookings.lock().unwrap();
        let ledger = guard.entry(booking.vehicle_id).or_default();
        let conflicts = find_conflicts(ledger, &booking.span);
        if !conflicts.is_empty() {
            return Ok(Insertion::Conflict(conflicts));
        }
        ledger.push(booking.clone());
        Ok(Insertion::Inserted(booking))
    }

    async fn vehicle_details(
        &self,
        vehicle_id: VehicleId,
    ) -> Result<Option<(Vehicle, VehicleType)>, StoreError> {
        if !(1..=3).contains(&vehicle_id) {
            return Ok(None);
        }
        Ok(Some((cruiser(vehicle_id), cruiser_type())))
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        let guard = self.bookings.lock().unwrap();
        Ok(guard.values().flatten().find(|b| b.id == id).cloned())
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let guard = self.bookings.lock().unwrap();
        Ok(guard.values().flatten().cloned().collect())
    }
}

fn cruiser_type() -> VehicleType {
    VehicleType {
        id: 1,
        name: "Cruiser".into(),
        wheels: 2,
        description: "Classic style motorcycles".into(),
    }
}

fn cruiser(id: VehicleId) -> Vehicle {
    Vehicle {
        id,
        vehicle_type_id: 1,
        name: format!("Cruiser {id}"),
        model: "2023".into(),
        is_available: true,
    }
}

/// WAL-backed store in a fresh temp file holding vehicles 1..=3.
async fn wal_store(path: std::path::PathBuf) -> Arc<WalStore> {
    let store = WalStore::open(path).unwrap();
    store.add_vehicle_type(cruiser_type()).await.unwrap();
    for id in 1..=3 {
        store.add_vehicle(cruiser(id)).await.unwrap();
    }
    Arc::new(store)
}

/// Feed every request to the engine, then check no two stored bookings on
/// the same vehicle overlap.
async fn book_all_without_overlap(
    engine: &Engine,
    requests: &[(VehicleId, Span)],
) -> Result<(), TestCaseError> {
    for (vehicle_id, span) in requests {
        let result = engine
            .create_booking("Prop".into(), "Test".into(), *vehicle_id, span.start, span.end)
            .await;
        let expected = matches!(result, Ok(_) | Err(EngineError::AvailabilityConflict { .. }));
        prop_assert!(expected, "unexpected result {:?}", result);
    }

    let stored = engine.list_bookings().await.unwrap();
    for (i, a) in stored.iter().enumerate() {
        for b in &stored[i + 1..] {
            if a.booking.vehicle_id == b.booking.vehicle_id {
                prop_assert!(!a.booking.span.overlaps(&b.booking.span));
            }
        }
    }
    Ok(())
}

struct Epoch;

impl Clock for Epoch {
    fn now_ms(&self) -> Ms {
        0
    }
}

proptest! {
    #[test]
    fn overlap_is_symmetric(a in span_strategy(), b in span_strategy()) {
        prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
    }

    #[test]
    fn span_overlaps_itself(a in span_strategy()) {
        prop_assert!(a.overlaps(&a));
    }

    #[test]
    fn adjacent_spans_never_overlap(a in span_strategy(), len in 1i64..200) {
        let next = Span::new(a.end, a.end + len);
        prop_assert!(!a.overlaps(&next));
        prop_assert!(!next.overlaps(&a));
    }

    /// Overlap holds exactly when one span starts inside the other or the
    /// candidate swallows the existing one.
    #[test]
    fn overlap_matches_three_case_rule(existing in span_strategy(), candidate in span_strategy()) {
        let starts_inside = existing.start <= candidate.start && candidate.start < existing.end;
        let ends_inside = existing.start < candidate.end && candidate.end <= existing.end;
        let swallows = candidate.start <= existing.start && candidate.end >= existing.end;
        prop_assert_eq!(existing.overlaps(&candidate), starts_inside || ends_inside || swallows);
    }

    #[test]
    fn accepted_bookings_never_overlap(
        requests in proptest::collection::vec((1u32..=3, span_strategy()), 1..40)
    ) {
        let engine = Engine::with_clock(Arc::new(MemStore::default()), Arc::new(Epoch));
        tokio_test::block_on(book_all_without_overlap(&engine, &requests))?;
    }

    /// A span reported available is always bookable right after.
    #[test]
    fn available_implies_bookable(
        existing in proptest::collection::vec(span_strategy(), 0..10),
        candidate in span_strategy(),
    ) {
        let engine = Engine::with_clock(Arc::new(MemStore::default()), Arc::new(Epoch));
        tokio_test::block_on(async {
            for span in &existing {
                let _ = engine
                    .create_booking("Prop".into(), "Test".into(), 1, span.start, span.end)
                    .await;
            }
            let availability = engine
                .check_availability(1, candidate.start, candidate.end)
                .await
                .unwrap();
            let created = engine
                .create_booking("Prop".into(), "Test".into(), 1, candidate.start, candidate.end)
                .await;
            prop_assert_eq!(availability.is_available, created.is_ok());
            Ok(())
        })?;
    }
}

proptest! {
    // Every booking is an fsync; keep the case count modest.
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Same invariant through the WAL-backed ledger and its sorted scan.
    #[test]
    fn wal_store_never_accepts_overlap(
        requests in proptest::collection::vec((1u32..=3, span_strategy()), 1..40)
    ) {
        let path = std::env::temp_dir().join(format!("rentald_prop_{}.wal", Ulid::new()));
        let outcome = tokio_test::block_on(async {
            let engine = Engine::with_clock(wal_store(path.clone()).await, Arc::new(Epoch));
            let result = book_all_without_overlap(&engine, &requests).await;

            // A restart rebuilds every accepted booking and nothing else.
            let accepted = engine.list_bookings().await.unwrap().len();
            let replayed = WalStore::open(path.clone()).unwrap();
            prop_assert_eq!(replayed.list_bookings().await.unwrap().len(), accepted);
            result
        });
        let _ = std::fs::remove_file(&path);
        outcome?;
    }
}
