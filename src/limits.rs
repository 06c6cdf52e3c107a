use crate::model::{Ms, DAY_MS};

pub const MAX_RESOURCE_ID_LEN: usize = 128;
pub const MAX_CUSTOMER_REF_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single booking may not span more than a year.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_LINE_LEN: usize = 64 * 1024;
/// Resources a single connection may watch at once.
pub const MAX_WATCHES_PER_CONNECTION: usize = 64;
