use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use crate::model::*;

/// Capacity committed against one resource by its active bookings.
///
/// Time windows and quantities live side by side; a resource only ever
/// receives one shape because the window is validated against its type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Time commitments, sorted by `span.start`.
    spans: Vec<(Ulid, Span)>,
    units: BTreeMap<Ulid, u32>,
    committed_units: u64,
}

impl LedgerEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.spans.len() + self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.units.is_empty()
    }

    pub fn committed_units(&self) -> u64 {
        self.committed_units
    }

    /// Time commitments whose span overlaps the query window.
    /// Uses binary search to skip commitments starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &(Ulid, Span)> {
        let right_bound = self.spans.partition_point(|(_, s)| s.start < query.end);
        self.spans[..right_bound]
            .iter()
            .filter(move |(_, s)| s.end > query.start)
    }

    /// Would committing `window` keep every instant at or below `capacity`?
    pub fn fits(&self, window: &Window, capacity: u32) -> bool {
        if capacity == 0 {
            return false;
        }
        match window {
            Window::Time(span) => {
                let allocs: Vec<Span> = self.overlapping(span).map(|(_, s)| *s).collect();
                if allocs.is_empty() {
                    return true;
                }
                compute_saturated_spans(&allocs, capacity)
                    .iter()
                    .all(|sat| !sat.overlaps(span))
            }
            Window::Quantity(q) => self.committed_units + u64::from(*q) <= u64::from(capacity),
        }
    }

    pub fn commit(&mut self, booking_id: Ulid, window: Window) {
        match window {
            Window::Time(span) => {
                let pos = self.spans.partition_point(|(_, s)| s.start <= span.start);
                self.spans.insert(pos, (booking_id, span));
            }
            Window::Quantity(q) => {
                if let Some(prev) = self.units.insert(booking_id, q) {
                    self.committed_units -= u64::from(prev);
                }
                self.committed_units += u64::from(q);
            }
        }
    }

    /// Undo a commit. Returns what was released, if anything.
    pub fn release(&mut self, booking_id: Ulid) -> Option<Window> {
        if let Some(pos) = self.spans.iter().position(|(id, _)| *id == booking_id) {
            return Some(Window::Time(self.spans.remove(pos).1));
        }
        self.units.remove(&booking_id).map(|q| {
            self.committed_units -= u64::from(q);
            Window::Quantity(q)
        })
    }

    /// Every commitment, ordered by booking id.
    pub fn commitments(&self) -> Vec<(Ulid, Window)> {
        let mut all: Vec<(Ulid, Window)> = self
            .spans
            .iter()
            .map(|(id, s)| (*id, Window::Time(*s)))
            .chain(self.units.iter().map(|(id, q)| (*id, Window::Quantity(*q))))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    /// Sub-spans of `query` where at least one more booking would fit.
    pub fn free_spans(&self, query: &Span, capacity: u32) -> Vec<Span> {
        if capacity == 0 {
            return Vec::new();
        }
        let allocs: Vec<Span> = self.overlapping(query).map(|(_, s)| *s).collect();
        let saturated = compute_saturated_spans(&allocs, capacity);
        subtract_intervals(&[*query], &saturated)
    }
}

/// Recompute ledger state from scratch: one entry per resource holding the
/// windows of its active bookings.
pub fn rebuild<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> HashMap<ResourceKey, LedgerEntry> {
    let mut ledger: HashMap<ResourceKey, LedgerEntry> = HashMap::new();
    for b in bookings {
        if b.status.is_active() {
            ledger
                .entry(b.resource.clone())
                .or_default()
                .commit(b.id, b.window);
        }
    }
    ledger
}

// ── Interval algebra ──────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Sweep-line: time ranges where the commitment count is at or above `capacity`.
/// Input sorted by start. Returns sorted, merged spans.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    // +1 at start, -1 at end; ends sort before starts at the same instant.
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result: Vec<Span> = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += 1;
        } else {
            count -= 1;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity
            && let Some(start) = saturated_start.take()
            && *time > start {
                result.push(Span::new(start, *time));
            }
    }

    merge_overlapping(&result)
}
