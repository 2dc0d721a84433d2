use crate::model::{DAY_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single booking may not be longer than this.
pub const MAX_SPAN_DURATION_MS: Ms = 31 * DAY_MS;

/// Series length, parent included.
pub const MAX_SERIES_OCCURRENCES: u32 = 104;

pub const MAX_BATCH_SIZE: usize = 1000;

pub const MAX_REASON_LEN: usize = 1024;

pub const MAX_CURRENCY_LEN: usize = 8;

pub const MAX_TENANTS: usize = 10_000;

/// Widest range accepted by range queries (upcoming reminders, free windows).
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;
