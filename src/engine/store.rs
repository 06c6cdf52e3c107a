use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Authoritative booking records, keyed by id. Records are never removed.
#[derive(Default)]
pub struct BookingStore {
    bookings: DashMap<Ulid, Booking>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn get(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    /// Insert a new record. An existing id is never overwritten.
    pub fn insert(&self, booking: Booking) -> Result<(), EngineError> {
        match self.bookings.entry(booking.id) {
            Entry::Occupied(e) => Err(EngineError::AlreadyExists(*e.key())),
            Entry::Vacant(e) => {
                e.insert(booking);
                Ok(())
            }
        }
    }

    /// Mutate a record in place. The shard lock is held for the whole closure,
    /// so readers see either the old or the new record.
    pub fn update(&self, id: &Ulid, f: impl FnOnce(&mut Booking)) -> Result<Booking, EngineError> {
        let mut entry = self.bookings.get_mut(id).ok_or(EngineError::NotFound(*id))?;
        f(entry.value_mut());
        Ok(entry.value().clone())
    }

    /// Records matching the filter, in no particular order. Pagination fields are ignored.
    pub fn scan(&self, filter: &BookingFilter) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn active(&self) -> Vec<Booking> {
        self.bookings
            .iter()
            .filter(|e| e.value().status.is_active())
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Booking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }

    // ── Event application ────────────────────────────────────

    pub fn apply_event(&self, event: &Event) -> Result<Booking, EngineError> {
        match event {
            Event::BookingCreated { booking } => {
                self.insert(booking.clone())?;
                Ok(booking.clone())
            }
            other => self.update(&other.booking_id(), |b| b.apply(other)),
        }
    }
}
