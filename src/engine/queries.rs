use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<BookingDetails, EngineError> {
        let booking = self
            .store
            .get_booking(id)
            .await?
            .ok_or(EngineError::BookingNotFound(id))?;
        self.details_for(booking).await
    }

    /// Every booking, newest first.
    pub async fn list_bookings(&self) -> Result<Vec<BookingDetails>, EngineError> {
        let mut bookings = self.store.list_bookings().await?;
        bookings.sort_by_key(|b| (Reverse(b.created_at), Reverse(b.id)));

        let mut details = Vec::with_capacity(bookings.len());
        for booking in bookings {
            details.push(self.details_for(booking).await?);
        }
        Ok(details)
    }
}
