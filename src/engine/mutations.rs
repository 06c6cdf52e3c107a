use std::future::Future;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::identity::Caller;
use crate::model::*;
use crate::observability::{
    BOOKINGS_CREATED_TOTAL, BOOKINGS_REJECTED_TOTAL, BOOKING_TRANSITIONS_TOTAL,
    CRITICAL_SECTION_SECONDS, STORAGE_ROLLBACKS_TOTAL,
};

use super::validate::{validate_caller, validate_reason, validate_resource, validate_window};
use super::{Committer, Engine, EngineError, SharedLedgerEntry, WalCommand};

/// Run a critical section on its own task. Once spawned it runs to the end
/// even if the caller stops waiting, so the ledger and the store always
/// settle together.
async fn run_detached<T, F>(section: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, EngineError>> + Send + 'static,
{
    tokio::spawn(section)
        .await
        .map_err(|e| EngineError::StorageFailure(format!("commit task failed: {e}")))?
}

impl Engine {
    /// Reserve `request.window` on `request.resource` for the caller.
    ///
    /// Caller and resource checks, the catalog lookup and window validation
    /// happen before the resource lock is taken, so an unknown resource is
    /// reported as `ResourceNotFound` whatever its window. Inside the lock:
    /// capacity check, ledger reserve, journal append, store write. A journal
    /// failure releases the reservation again.
    pub async fn create_booking(&self, caller: &Caller, request: NewBooking) -> Result<Booking, EngineError> {
        let NewBooking { resource, window } = request;
        validate_caller(caller)?;
        validate_resource(&resource)?;
        if !self.access.may_book(caller, &resource) {
            return Err(EngineError::Forbidden("caller may not book this resource"));
        }

        let entry = self
            .catalog
            .lookup(&resource)
            .await
            .map_err(|e| EngineError::StorageFailure(format!("catalog lookup failed: {e}")))?
            .filter(|e| e.is_bookable())
            .ok_or_else(|| EngineError::ResourceNotFound(resource.clone()))?;
        let now = self.clock.now_ms();
        validate_window(resource.kind, &window, now)?;

        let status = self.confirm.initial_status(resource.kind);
        let booking = Booking {
            id: Ulid::new(),
            resource: resource.clone(),
            customer_ref: caller.customer_ref.clone(),
            window,
            status,
            total_price: entry.quote(&window),
            created_at: now,
            updated_at: now,
            confirmed_at: (status == BookingStatus::Confirmed).then_some(now),
            completed_at: None,
            cancelled_at: None,
            cancel_reason: None,
        };
        let shared = self.ledger_entry(&resource);
        run_detached(self.committer().create(shared, booking, entry.capacity)).await
    }

    /// Cancel an active booking and release its capacity.
    /// Cancelling a cancelled or completed booking is an `InvalidTransition`.
    pub async fn cancel_booking(
        &self,
        caller: &Caller,
        id: Ulid,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_reason(reason.as_deref())?;
        self.transition(caller, id, BookingStatus::Cancelled, reason).await
    }

    /// Pending → Confirmed.
    pub async fn confirm_booking(&self, caller: &Caller, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(caller, id, BookingStatus::Confirmed, None).await
    }

    /// Confirmed → Completed, releasing capacity.
    pub async fn complete_booking(&self, caller: &Caller, id: Ulid) -> Result<Booking, EngineError> {
        self.transition(caller, id, BookingStatus::Completed, None).await
    }

    async fn transition(
        &self,
        caller: &Caller,
        id: Ulid,
        to: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let resource = self.store.get(&id).ok_or(EngineError::NotFound(id))?.resource;
        let shared = self.ledger_entry(&resource);
        run_detached(self.committer().transition(shared, caller.clone(), id, to, reason)).await
    }

    /// Rewrite the WAL as one creation snapshot per booking.
    /// Returns the number of bookings written.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut bookings = self.store.snapshot();
        bookings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let events: Vec<Event> = bookings
            .into_iter()
            .map(|booking| Event::BookingCreated { booking })
            .collect();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageFailure(e.to_string()))?;
        info!("compacted WAL to {count} bookings");
        Ok(count)
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

impl Committer {
    pub(super) async fn create(
        self,
        shared: SharedLedgerEntry,
        booking: Booking,
        capacity: u32,
    ) -> Result<Booking, EngineError> {
        let id = booking.id;
        let resource = booking.resource.clone();
        let (window, status) = (booking.window, booking.status);
        let mut guard = shared.write().await;
        let section = Instant::now();

        if !guard.fits(&window, capacity) {
            metrics::counter!(BOOKINGS_REJECTED_TOTAL, "reason" => "slot_unavailable").increment(1);
            debug!("rejected booking on {resource}: capacity {capacity} reached");
            return Err(EngineError::SlotUnavailable { resource, capacity });
        }

        let event = Event::BookingCreated { booking };
        guard.commit(id, window);
        let gate = self.commit_gate.read().await;
        let applied = match self.append(&event).await {
            Ok(()) => self.store.apply_event(&event),
            Err(e) => Err(e),
        };
        drop(gate);
        let booking = match applied {
            Ok(b) => b,
            Err(e) => {
                guard.release(id);
                metrics::counter!(STORAGE_ROLLBACKS_TOTAL).increment(1);
                warn!("create on {resource} rolled back: {e}");
                return Err(e);
            }
        };

        self.notify.send(&resource, &event);
        drop(guard);
        metrics::histogram!(CRITICAL_SECTION_SECONDS).record(section.elapsed().as_secs_f64());
        metrics::counter!(BOOKINGS_CREATED_TOTAL, "resource_type" => resource.kind.as_str()).increment(1);
        info!("booking {id} created on {resource} ({status})");
        Ok(booking)
    }

    pub(super) async fn transition(
        self,
        shared: SharedLedgerEntry,
        caller: Caller,
        id: Ulid,
        to: BookingStatus,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let mut guard = shared.write().await;
        let section = Instant::now();

        // Re-read under the lock: a racing transition may have landed first.
        let current = self.store.get(&id).ok_or(EngineError::NotFound(id))?;
        let resource = current.resource.clone();
        let allowed = match to {
            BookingStatus::Cancelled => self.access.may_cancel(&caller, &current),
            _ => self.access.may_manage(&caller, &current),
        };
        if !allowed {
            return Err(EngineError::Forbidden(match to {
                BookingStatus::Cancelled => "caller may not cancel this booking",
                _ => "caller may not manage this booking",
            }));
        }
        if !current.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status,
                to,
            });
        }

        let at = self.clock.now_ms();
        let event = match to {
            BookingStatus::Confirmed => Event::BookingConfirmed {
                id,
                resource: resource.clone(),
                at,
            },
            BookingStatus::Cancelled => Event::BookingCancelled {
                id,
                resource: resource.clone(),
                at,
                reason,
            },
            BookingStatus::Completed => Event::BookingCompleted {
                id,
                resource: resource.clone(),
                at,
            },
            BookingStatus::Pending => {
                return Err(EngineError::InvalidTransition {
                    id,
                    from: current.status,
                    to,
                });
            }
        };

        let released = if current.status.is_active() && !to.is_active() {
            guard.release(id)
        } else {
            None
        };
        let gate = self.commit_gate.read().await;
        let applied = match self.append(&event).await {
            Ok(()) => self.store.apply_event(&event),
            Err(e) => Err(e),
        };
        drop(gate);
        let updated = match applied {
            Ok(b) => b,
            Err(e) => {
                if let Some(window) = released {
                    guard.commit(id, window);
                }
                metrics::counter!(STORAGE_ROLLBACKS_TOTAL).increment(1);
                warn!("{to} of {id} on {resource} rolled back: {e}");
                return Err(e);
            }
        };

        self.notify.send(&resource, &event);
        drop(guard);
        metrics::histogram!(CRITICAL_SECTION_SECONDS).record(section.elapsed().as_secs_f64());
        metrics::counter!(BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!("booking {id} on {resource}: {} -> {to}", current.status);
        Ok(updated)
    }
}
