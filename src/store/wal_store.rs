use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::{BookingStore, Insertion, StoreError};

pub type SharedLedger = Arc<RwLock<VehicleLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued (the batch window).
/// 3. Write and fsync the whole batch as one unit, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, batch);
        // Compaction must observe every append queued ahead of it.
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

/// All or nothing: on failure no event of the batch stays in the log and
/// every caller is told it failed.
fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let (events, senders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    let flush_start = std::time::Instant::now();
    let result = wal.append_batch(&events);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for tx in senders {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Durable booking store: the catalog and one ledger per vehicle live in
/// memory, every mutation is written ahead to the WAL before it is applied.
pub struct WalStore {
    vehicle_types: DashMap<VehicleTypeId, VehicleType>,
    vehicles: DashMap<VehicleId, Vehicle>,
    ledgers: DashMap<VehicleId, SharedLedger>,
    /// Reverse lookup: booking id → vehicle id.
    booking_index: DashMap<Ulid, VehicleId>,
    /// Shared by every commit, exclusive for compaction so the snapshot
    /// cannot miss an append that lands between snapshot and swap.
    commit_gate: RwLock<()>,
    /// Serializes catalog additions (check-then-insert on ids).
    catalog_lock: Mutex<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay the WAL at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let vehicle_types = DashMap::new();
        let vehicles = DashMap::new();
        let booking_index = DashMap::new();
        let mut ledgers: HashMap<VehicleId, VehicleLedger> = HashMap::new();

        for event in &events {
            match event {
                Event::VehicleTypeAdded { id, name, wheels, description } => {
                    vehicle_types.insert(
                        *id,
                        VehicleType {
                            id: *id,
                            name: name.clone(),
                            wheels: *wheels,
                            description: description.clone(),
                        },
                    );
                }
                Event::VehicleAdded { id, vehicle_type_id, name, model, is_available } => {
                    vehicles.insert(
                        *id,
                        Vehicle {
                            id: *id,
                            vehicle_type_id: *vehicle_type_id,
                            name: name.clone(),
                            model: model.clone(),
                            is_available: *is_available,
                        },
                    );
                    ledgers.entry(*id).or_insert_with(|| VehicleLedger::new(*id));
                }
                Event::BookingConfirmed { id, vehicle_id, .. } => {
                    let Some(ledger) = ledgers.get_mut(vehicle_id) else {
                        warn!("replay: booking {id} references unknown vehicle {vehicle_id}, skipped");
                        continue;
                    };
                    if let Some(booking) = booking_from_event(event) {
                        if let Some(existing) = ledger.conflicting(&booking.span).next() {
                            warn!(
                                "replay: booking {id} overlaps {} on vehicle {vehicle_id}, skipped",
                                existing.id
                            );
                            continue;
                        }
                        ledger.insert_booking(booking);
                        booking_index.insert(*id, *vehicle_id);
                    }
                }
            }
        }

        info!(
            "store replayed {} events: {} vehicle types, {} vehicles, {} bookings",
            events.len(),
            vehicle_types.len(),
            vehicles.len(),
            booking_index.len()
        );

        Ok(Self {
            vehicle_types,
            vehicles,
            ledgers: ledgers
                .into_iter()
                .map(|(id, ledger)| (id, Arc::new(RwLock::new(ledger))))
                .collect(),
            booking_index,
            commit_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    fn ledger(&self, vehicle_id: VehicleId) -> Option<SharedLedger> {
        self.ledgers.get(&vehicle_id).map(|e| e.value().clone())
    }

    // ── Catalog ──────────────────────────────────────────────

    pub async fn add_vehicle_type(&self, vehicle_type: VehicleType) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.vehicle_types.contains_key(&vehicle_type.id) {
            return Err(StoreError::AlreadyExists("vehicle type", vehicle_type.id));
        }
        let event = Event::VehicleTypeAdded {
            id: vehicle_type.id,
            name: vehicle_type.name.clone(),
            wheels: vehicle_type.wheels,
            description: vehicle_type.description.clone(),
        };
        self.wal_append(&event).await?;
        self.vehicle_types.insert(vehicle_type.id, vehicle_type);
        Ok(())
    }

    pub async fn add_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError> {
        let _gate = self.commit_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if !self.vehicle_types.contains_key(&vehicle.vehicle_type_id) {
            return Err(StoreError::UnknownVehicleType(vehicle.vehicle_type_id));
        }
        if self.vehicles.contains_key(&vehicle.id) {
            return Err(StoreError::AlreadyExists("vehicle", vehicle.id));
        }
        let event = Event::VehicleAdded {
            id: vehicle.id,
            vehicle_type_id: vehicle.vehicle_type_id,
            name: vehicle.name.clone(),
            model: vehicle.model.clone(),
            is_available: vehicle.is_available,
        };
        self.wal_append(&event).await?;
        self.ledgers
            .insert(vehicle.id, Arc::new(RwLock::new(VehicleLedger::new(vehicle.id))));
        self.vehicles.insert(vehicle.id, vehicle);
        Ok(())
    }

    pub fn vehicle_type_count(&self) -> usize {
        self.vehicle_types.len()
    }

    /// All vehicle types, ordered by id.
    pub fn vehicle_types(&self) -> Vec<VehicleType> {
        let mut types: Vec<_> = self.vehicle_types.iter().map(|e| e.value().clone()).collect();
        types.sort_by_key(|t| t.id);
        types
    }

    /// All vehicles, ordered by id.
    pub fn vehicles(&self) -> Vec<Vehicle> {
        let mut vehicles: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        vehicles.sort_by_key(|v| v.id);
        vehicles
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.commit_gate.write().await;

        let mut events: Vec<Event> = self
            .vehicle_types()
            .into_iter()
            .map(|t| Event::VehicleTypeAdded {
                id: t.id,
                name: t.name,
                wheels: t.wheels,
                description: t.description,
            })
            .collect();

        let vehicles = self.vehicles();
        for v in &vehicles {
            events.push(Event::VehicleAdded {
                id: v.id,
                vehicle_type_id: v.vehicle_type_id,
                name: v.name.clone(),
                model: v.model.clone(),
                is_available: v.is_available,
            });
        }
        for v in &vehicles {
            let Some(ledger) = self.ledger(v.id) else { continue };
            let guard = ledger.read().await;
            events.extend(guard.confirmed().map(|b| Event::BookingConfirmed {
                id: b.id,
                vehicle_id: b.vehicle_id,
                span: b.span,
                first_name: b.first_name.clone(),
                last_name: b.last_name.clone(),
                created_at: b.created_at,
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn booking_from_event(event: &Event) -> Option<Booking> {
    match event {
        Event::BookingConfirmed {
            id,
            vehicle_id,
            span,
            first_name,
            last_name,
            created_at,
        } => Some(Booking {
            id: *id,
            first_name: first_name.clone(),
            last_name: last_name.clone(),
            vehicle_id: *vehicle_id,
            span: *span,
            status: BookingStatus::Confirmed,
            created_at: *created_at,
        }),
        _ => None,
    }
}

#[async_trait]
impl BookingStore for WalStore {
    async fn find_confirmed_bookings(&self, vehicle_id: VehicleId) -> Result<Vec<Booking>, StoreError> {
        let ledger = self
            .ledger(vehicle_id)
            .ok_or(StoreError::UnknownVehicle(vehicle_id))?;
        let guard = ledger.read().await;
        Ok(guard.confirmed().cloned().collect())
    }

    async fn vehicle_exists(&self, vehicle_id: VehicleId) -> Result<bool, StoreError> {
        Ok(self.vehicles.contains_key(&vehicle_id))
    }

    async fn insert_booking_if_no_conflict(&self, booking: Booking) -> Result<Insertion, StoreError> {
        let _gate = self.commit_gate.read().await;
        let ledger = self
            .ledger(booking.vehicle_id)
            .ok_or(StoreError::UnknownVehicle(booking.vehicle_id))?;
        // Held from the overlap scan until the booking is applied.
        let mut guard = ledger.write().await;

        let conflicts: Vec<Booking> = guard.conflicting(&booking.span).cloned().collect();
        if !conflicts.is_empty() {
            return Ok(Insertion::Conflict(conflicts));
        }

        let event = Event::BookingConfirmed {
            id: booking.id,
            vehicle_id: booking.vehicle_id,
            span: booking.span,
            first_name: booking.first_name.clone(),
            last_name: booking.last_name.clone(),
            created_at: booking.created_at,
        };
        self.wal_append(&event).await?;
        guard.insert_booking(booking.clone());
        self.booking_index.insert(booking.id, booking.vehicle_id);
        Ok(Insertion::Inserted(booking))
    }

    async fn vehicle_details(
        &self,
        vehicle_id: VehicleId,
    ) -> Result<Option<(Vehicle, VehicleType)>, StoreError> {
        let Some(vehicle) = self.vehicles.get(&vehicle_id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let vehicle_type = self
            .vehicle_types
            .get(&vehicle.vehicle_type_id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::UnknownVehicleType(vehicle.vehicle_type_id))?;
        Ok(Some((vehicle, vehicle_type)))
    }

    async fn get_booking(&self, id: Ulid) -> Result<Option<Booking>, StoreError> {
        let Some(vehicle_id) = self.booking_index.get(&id).map(|e| *e.value()) else {
            return Ok(None);
        };
        let ledger = self
            .ledger(vehicle_id)
            .ok_or(StoreError::UnknownVehicle(vehicle_id))?;
        let guard = ledger.read().await;
        Ok(guard.bookings.iter().find(|b| b.id == id).cloned())
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let ledgers: Vec<SharedLedger> = self.ledgers.iter().map(|e| e.value().clone()).collect();
        let mut all = Vec::new();
        for ledger in ledgers {
            let guard = ledger.read().await;
            all.extend(guard.bookings.iter().cloned());
        }
        Ok(all)
    }
}
