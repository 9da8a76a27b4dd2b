use tracing::info;

use crate::model::*;
use crate::store::{StoreError, WalStore};

const VEHICLE_TYPES: &[(&str, u8, &str)] = &[
    ("Hatchback", 4, "Compact and efficient city cars"),
    ("SUV", 4, "Sport Utility Vehicles for all terrains"),
    ("Sedan", 4, "Elegant and comfortable passenger cars"),
    ("Cruiser", 2, "Comfortable long-distance motorcycles"),
    ("Sports", 2, "High-performance racing motorcycles"),
];

/// (vehicle name, vehicle type name)
const VEHICLES: &[(&str, &str)] = &[
    ("Honda Civic Hatchback", "Hatchback"),
    ("Toyota Corolla Hatchback", "Hatchback"),
    ("Volkswagen Golf", "Hatchback"),
    ("Toyota RAV4", "SUV"),
    ("Honda CR-V", "SUV"),
    ("Ford Explorer", "SUV"),
    ("Honda Accord", "Sedan"),
    ("Toyota Camry", "Sedan"),
    ("BMW 3 Series", "Sedan"),
    ("Harley-Davidson Street 750", "Cruiser"),
    ("Indian Scout Bobber", "Cruiser"),
    ("Yamaha R1", "Sports"),
    ("Kawasaki Ninja ZX-10R", "Sports"),
    ("Honda CBR1000RR", "Sports"),
];

const SEED_MODEL: &str = "2023";

/// Populate an empty catalog with the default fleet. Ids are assigned
/// 1..=N in list order. Returns `false` (and writes nothing) if any vehicle
/// type already exists.
pub async fn seed_catalog(store: &WalStore) -> Result<bool, StoreError> {
    if store.vehicle_type_count() > 0 {
        return Ok(false);
    }

    for (i, (name, wheels, description)) in VEHICLE_TYPES.iter().enumerate() {
        store
            .add_vehicle_type(VehicleType {
                id: i as VehicleTypeId + 1,
                name: name.to_string(),
                wheels: *wheels,
                description: description.to_string(),
            })
            .await?;
    }

    for (i, (name, type_name)) in VEHICLES.iter().enumerate() {
        let type_pos = VEHICLE_TYPES
            .iter()
            .position(|(t, _, _)| t == type_name)
            .ok_or_else(|| StoreError::Wal(format!("seed: no vehicle type named {type_name}")))?;
        store
            .add_vehicle(Vehicle {
                id: i as VehicleId + 1,
                vehicle_type_id: type_pos as VehicleTypeId + 1,
                name: name.to_string(),
                model: SEED_MODEL.to_string(),
                is_available: true,
            })
            .await?;
    }

    info!(
        "seeded catalog: {} vehicle types, {} vehicles",
        VEHICLE_TYPES.len(),
        VEHICLES.len()
    );
    Ok(true)
}
