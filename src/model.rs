use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::DEFAULT_PAGE_LIMIT;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The three kinds of bookable things in the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Guide,
    Homestay,
    Product,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [ResourceType::Guide, ResourceType::Homestay, ResourceType::Product];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Guide => "guide",
            ResourceType::Homestay => "homestay",
            ResourceType::Product => "product",
        }
    }

    /// Guides and homestays are booked by time window, products by quantity.
    pub fn is_time_based(&self) -> bool {
        !matches!(self, ResourceType::Product)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a catalog resource. Serialization points and ledger entries are keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceType,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceType, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// What a booking reserves against a resource's capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Time(Span),
    Quantity(u32),
}

impl Window {
    pub fn span(&self) -> Option<Span> {
        match self {
            Window::Time(span) => Some(*span),
            Window::Quantity(_) => None,
        }
    }

    pub fn quantity(&self) -> Option<u32> {
        match self {
            Window::Quantity(q) => Some(*q),
            Window::Time(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Active bookings occupy capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    /// The legal-transition table. Anything not listed here is rejected.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub resource: ResourceKey,
    pub customer_ref: String,
    pub window: Window,
    pub status: BookingStatus,
    /// Quote in minor currency units, fixed at creation.
    pub total_price: u64,
    pub created_at: Ms,
    pub updated_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub cancel_reason: Option<String>,
}

impl Booking {
    /// Fold a status event into the record. Creation events are a no-op here.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingCreated { .. } => {}
            Event::BookingConfirmed { at, .. } => {
                self.status = BookingStatus::Confirmed;
                self.confirmed_at = Some(*at);
                self.updated_at = *at;
            }
            Event::BookingCancelled { at, reason, .. } => {
                self.status = BookingStatus::Cancelled;
                self.cancelled_at = Some(*at);
                self.cancel_reason = reason.clone();
                self.updated_at = *at;
            }
            Event::BookingCompleted { at, .. } => {
                self.status = BookingStatus::Completed;
                self.completed_at = Some(*at);
                self.updated_at = *at;
            }
        }
    }
}

/// A create request. The customer is taken from the caller, never from the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBooking {
    pub resource: ResourceKey,
    pub window: Window,
}

/// Journal record. Replaying these in order rebuilds the booking store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    BookingConfirmed {
        id: Ulid,
        resource: ResourceKey,
        at: Ms,
    },
    BookingCancelled {
        id: Ulid,
        resource: ResourceKey,
        at: Ms,
        reason: Option<String>,
    },
    BookingCompleted {
        id: Ulid,
        resource: ResourceKey,
        at: Ms,
    },
}

impl Event {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking } => booking.id,
            Event::BookingConfirmed { id, .. }
            | Event::BookingCancelled { id, .. }
            | Event::BookingCompleted { id, .. } => *id,
        }
    }

    pub fn resource(&self) -> &ResourceKey {
        match self {
            Event::BookingCreated { booking } => &booking.resource,
            Event::BookingConfirmed { resource, .. }
            | Event::BookingCancelled { resource, .. }
            | Event::BookingCompleted { resource, .. } => resource,
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingFilter {
    pub status: Option<BookingStatus>,
    pub resource_type: Option<ResourceType>,
    pub resource_id: Option<String>,
    pub customer_ref: Option<String>,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl Default for BookingFilter {
    fn default() -> Self {
        Self {
            status: None,
            resource_type: None,
            resource_id: None,
            customer_ref: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking) -> bool {
        self.status.is_none_or(|s| booking.status == s)
            && self.resource_type.is_none_or(|k| booking.resource.kind == k)
            && self
                .resource_id
                .as_deref()
                .is_none_or(|id| booking.resource.id == id)
            && self
                .customer_ref
                .as_deref()
                .is_none_or(|c| booking.customer_ref == c)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPage {
    pub bookings: Vec<Booking>,
    /// Matches across all pages.
    pub total: usize,
    pub page: u32,
    pub limit: u32,
}

/// A resource whose live ledger disagrees with a recomputation from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerDrift {
    pub resource: ResourceKey,
    pub live: Vec<(Ulid, Window)>,
    pub recomputed: Vec<(Ulid, Window)>,
}
