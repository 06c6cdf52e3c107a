use std::collections::BTreeSet;

use tokio::sync::broadcast;
use ulid::Ulid;

use crate::catalog::CatalogEntry;
use crate::limits::*;
use crate::model::*;

use super::ledger;
use super::validate::validate_resource;
use super::{Engine, EngineError};

impl Engine {
    pub fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.get(&id).ok_or(EngineError::NotFound(id))
    }

    /// Filtered, paginated listing, newest first. Ties on `created_at` are
    /// broken by id so the same filter and page always yield the same slice.
    pub fn list_bookings(&self, filter: &BookingFilter) -> Result<BookingPage, EngineError> {
        if filter.page == 0 {
            return Err(EngineError::InvalidInput("page is 1-based"));
        }
        if filter.limit == 0 {
            return Err(EngineError::InvalidInput("limit must be positive"));
        }
        let limit = filter.limit.min(MAX_PAGE_LIMIT);

        let mut matches = self.store.scan(filter);
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        let total = matches.len();
        let skip = (filter.page as usize - 1).saturating_mul(limit as usize);
        let bookings = matches.into_iter().skip(skip).take(limit as usize).collect();

        Ok(BookingPage {
            bookings,
            total,
            page: filter.page,
            limit,
        })
    }

    async fn bookable_entry(&self, resource: &ResourceKey) -> Result<CatalogEntry, EngineError> {
        validate_resource(resource)?;
        self.catalog
            .lookup(resource)
            .await
            .map_err(|e| EngineError::StorageFailure(format!("catalog lookup failed: {e}")))?
            .filter(|e| e.is_bookable())
            .ok_or_else(|| EngineError::ResourceNotFound(resource.clone()))
    }

    /// Free sub-spans of `query` on a guide or homestay: where at least one
    /// more booking would fit under capacity.
    pub async fn availability(&self, resource: &ResourceKey, query: Span) -> Result<Vec<Span>, EngineError> {
        if !resource.kind.is_time_based() {
            return Err(EngineError::InvalidInput("products are booked by quantity"));
        }
        if query.start >= query.end {
            return Err(EngineError::InvalidInput("window start must be before end"));
        }
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::InvalidInput("query window too wide"));
        }
        let entry = self.bookable_entry(resource).await?;

        let shared = match self.ledger.get(resource) {
            Some(e) => e.value().clone(),
            None => return Ok(vec![query]),
        };
        let guard = shared.read().await;
        Ok(guard.free_spans(&query, entry.capacity))
    }

    /// Stock left on a product.
    pub async fn remaining_units(&self, resource: &ResourceKey) -> Result<u32, EngineError> {
        if resource.kind.is_time_based() {
            return Err(EngineError::InvalidInput("guides and homestays are booked by time window"));
        }
        let entry = self.bookable_entry(resource).await?;

        let committed = match self.ledger.get(resource).map(|e| e.value().clone()) {
            Some(shared) => shared.read().await.committed_units(),
            None => 0,
        };
        Ok(u64::from(entry.capacity).saturating_sub(committed) as u32)
    }

    /// Recompute the ledger from the store's active bookings and report every
    /// resource where it disagrees with the live ledger. Empty at any quiescent point.
    pub async fn verify_ledger(&self) -> Vec<LedgerDrift> {
        let recomputed = ledger::rebuild(&self.store.active());

        let mut keys: BTreeSet<ResourceKey> = recomputed.keys().cloned().collect();
        keys.extend(self.ledger.iter().map(|e| e.key().clone()));

        let mut drift = Vec::new();
        for key in keys {
            let live = match self.ledger.get(&key).map(|e| e.value().clone()) {
                Some(shared) => shared.read().await.commitments(),
                None => Vec::new(),
            };
            let expected = recomputed
                .get(&key)
                .map(|e| e.commitments())
                .unwrap_or_default();
            if live != expected {
                drift.push(LedgerDrift {
                    resource: key,
                    live,
                    recomputed: expected,
                });
            }
        }
        drift
    }

    /// Subscribe to booking events on one resource.
    pub fn watch(&self, resource: &ResourceKey) -> Result<broadcast::Receiver<Event>, EngineError> {
        validate_resource(resource)?;
        Ok(self.notify.subscribe(resource))
    }

    /// Confirmed time bookings whose window has ended by `now`.
    pub fn due_for_completion(&self, now: Ms) -> Vec<Ulid> {
        let filter = BookingFilter {
            status: Some(BookingStatus::Confirmed),
            ..Default::default()
        };
        self.store
            .scan(&filter)
            .into_iter()
            .filter(|b| b.window.span().is_some_and(|s| s.end <= now))
            .map(|b| b.id)
            .collect()
    }
}
