use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::*;

/// How a resource's unit price is charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    PerHour,
    PerDay,
    PerNight,
    PerItem,
}

/// Bookable attributes of a catalog resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Concurrent bookings (guides/homestays) or stock (products).
    pub capacity: u32,
    /// Minor currency units per `price_unit`.
    pub unit_price: u64,
    pub price_unit: PriceUnit,
    pub active: bool,
}

impl CatalogEntry {
    pub fn is_bookable(&self) -> bool {
        self.active && self.capacity > 0
    }

    /// Price of reserving `window`. Partial hours/days round up.
    pub fn quote(&self, window: &Window) -> u64 {
        let units = match (self.price_unit, window) {
            (PriceUnit::PerHour, Window::Time(span)) => ceil_div(span.duration_ms(), HOUR_MS),
            (PriceUnit::PerDay | PriceUnit::PerNight, Window::Time(span)) => {
                ceil_div(span.duration_ms(), DAY_MS)
            }
            (PriceUnit::PerItem, Window::Time(_)) => 1,
            (_, Window::Quantity(q)) => u64::from(*q),
        };
        self.unit_price.saturating_mul(units)
    }
}

fn ceil_div(n: Ms, d: Ms) -> u64 {
    if n <= 0 {
        return 0;
    }
    ((n + d - 1) / d) as u64
}

/// Read-only lookup into the externally owned resource catalog.
///
/// `Ok(None)` means the resource does not exist; `Err` means the catalog could
/// not be reached.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn lookup(&self, resource: &ResourceKey) -> io::Result<Option<CatalogEntry>>;
}

/// One row of a catalog JSON file.
#[derive(Debug, Clone, Deserialize)]
struct CatalogRecord {
    kind: ResourceType,
    id: String,
    capacity: u32,
    #[serde(default)]
    unit_price: u64,
    price_unit: PriceUnit,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// Catalog held in memory, seeded from a JSON file or built up in tests.
#[derive(Default)]
pub struct InMemoryCatalog {
    entries: DashMap<ResourceKey, CatalogEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of `{kind, id, capacity, unit_price, price_unit, active}` records.
    pub fn from_json_file(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_json_slice(&bytes)
    }

    pub fn from_json_slice(bytes: &[u8]) -> io::Result<Self> {
        let records: Vec<CatalogRecord> = serde_json::from_slice(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let catalog = Self::new();
        for r in records {
            catalog.upsert(
                ResourceKey::new(r.kind, r.id),
                CatalogEntry {
                    capacity: r.capacity,
                    unit_price: r.unit_price,
                    price_unit: r.price_unit,
                    active: r.active,
                },
            );
        }
        Ok(catalog)
    }

    pub fn upsert(&self, resource: ResourceKey, entry: CatalogEntry) {
        self.entries.insert(resource, entry);
    }

    /// Mark a resource unbookable. Returns false if it is unknown.
    pub fn deactivate(&self, resource: &ResourceKey) -> bool {
        match self.entries.get_mut(resource) {
            Some(mut entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn lookup(&self, resource: &ResourceKey) -> io::Result<Option<CatalogEntry>> {
        Ok(self.entries.get(resource).map(|e| e.value().clone()))
    }
}
