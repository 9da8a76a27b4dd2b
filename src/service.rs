use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::model::*;

const MIN_NAME_LEN: usize = 2;
const MAX_NAME_LEN: usize = 50;

/// A booking request as it arrives from a client: every field is raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingRequest {
    pub first_name: String,
    pub last_name: String,
    pub vehicle_id: String,
    pub start_date: String,
    pub end_date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The caller sent something wrong; retrying the same request won't help.
    Client,
    Server,
}

#[derive(Debug)]
pub enum ServiceError {
    Validation(Vec<FieldError>),
    Engine(EngineError),
}

impl ServiceError {
    pub fn class(&self) -> FailureClass {
        match self {
            ServiceError::Validation(_) => FailureClass::Client,
            ServiceError::Engine(EngineError::Storage(_)) => FailureClass::Server,
            ServiceError::Engine(_) => FailureClass::Client,
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        ServiceError::Engine(e)
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Validation(errors) => {
                write!(f, "validation failed")?;
                for (i, e) in errors.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{sep}{e}")?;
                }
                Ok(())
            }
            ServiceError::Engine(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServiceError::Engine(e) => Some(e),
            ServiceError::Validation(_) => None,
        }
    }
}

/// Validates and converts client input, then delegates to the engine.
pub struct BookingService {
    engine: Arc<Engine>,
}

impl BookingService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub async fn create_booking(&self, req: BookingRequest) -> Result<BookingDetails, ServiceError> {
        let mut errors = Vec::new();
        let first_name = validate_name(
            &req.first_name,
            "first_name",
            "First name is required",
            "First name must be between 2 and 50 characters",
            &mut errors,
        );
        let last_name = validate_name(
            &req.last_name,
            "last_name",
            "Last name is required",
            "Last name must be between 2 and 50 characters",
            &mut errors,
        );
        let vehicle_id = validate_vehicle_id(&req.vehicle_id, &mut errors);
        let start = validate_date(
            &req.start_date,
            "start_date",
            "Start date is required",
            "Start date must be a valid ISO 8601 date",
            &mut errors,
        );
        let end = validate_date(
            &req.end_date,
            "end_date",
            "End date is required",
            "End date must be a valid ISO 8601 date",
            &mut errors,
        );

        match (first_name, last_name, vehicle_id, start, end) {
            (Some(first), Some(last), Some(vehicle_id), Some(start), Some(end)) if errors.is_empty() => Ok(self
                .engine
                .create_booking(first, last, vehicle_id, start, end)
                .await?),
            _ => Err(ServiceError::Validation(errors)),
        }
    }

    pub async fn check_availability(
        &self,
        vehicle_id: &str,
        start_date: &str,
        end_date: &str,
    ) -> Result<Availability, ServiceError> {
        let mut errors = Vec::new();
        let vehicle_id = validate_vehicle_id(vehicle_id, &mut errors);
        let start = validate_date(
            start_date,
            "start_date",
            "Start date is required",
            "Start date must be a valid ISO 8601 date",
            &mut errors,
        );
        let end = validate_date(
            end_date,
            "end_date",
            "End date is required",
            "End date must be a valid ISO 8601 date",
            &mut errors,
        );

        match (vehicle_id, start, end) {
            (Some(vehicle_id), Some(start), Some(end)) if errors.is_empty() => {
                Ok(self.engine.check_availability(vehicle_id, start, end).await?)
            }
            _ => Err(ServiceError::Validation(errors)),
        }
    }

    pub async fn get_booking(&self, id: &str) -> Result<BookingDetails, ServiceError> {
        let id = Ulid::from_string(id.trim()).map_err(|_| {
            ServiceError::Validation(vec![FieldError {
                field: "id",
                message: "Valid booking ID is required",
            }])
        })?;
        Ok(self.engine.get_booking(id).await?)
    }

    pub async fn list_bookings(&self) -> Result<Vec<BookingDetails>, ServiceError> {
        Ok(self.engine.list_bookings().await?)
    }
}

fn validate_name(
    raw: &str,
    field: &'static str,
    required: &'static str,
    bad_length: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    let name = raw.trim();
    if name.is_empty() {
        errors.push(FieldError { field, message: required });
        return None;
    }
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        errors.push(FieldError { field, message: bad_length });
        return None;
    }
    Some(name.to_string())
}

fn validate_vehicle_id(raw: &str, errors: &mut Vec<FieldError>) -> Option<VehicleId> {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.push(FieldError {
            field: "vehicle_id",
            message: "Vehicle ID is required",
        });
        return None;
    }
    match raw.parse::<VehicleId>() {
        Ok(id) if id >= 1 => Some(id),
        _ => {
            errors.push(FieldError {
                field: "vehicle_id",
                message: "Vehicle ID must be a valid positive integer",
            });
            None
        }
    }
}

fn validate_date(
    raw: &str,
    field: &'static str,
    required: &'static str,
    invalid: &'static str,
    errors: &mut Vec<FieldError>,
) -> Option<Ms> {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.push(FieldError { field, message: required });
        return None;
    }
    let parsed = parse_date(raw);
    if parsed.is_none() {
        errors.push(FieldError { field, message: invalid });
    }
    parsed
}

/// Parse an ISO-8601 date or date-time into Unix milliseconds.
///
/// Accepts RFC 3339 with an offset, a naive date-time (taken as UTC), or a
/// bare calendar date (UTC midnight).
pub fn parse_date(s: &str) -> Option<Ms> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// RFC 3339 UTC with millisecond precision, e.g. `2025-06-01T00:00:00.000Z`.
pub fn format_ms(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Millis, true),
        None => ms.to_string(),
    }
}
