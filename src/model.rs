use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::engine::lifecycle::StatusChange;

/// Unix milliseconds. Every timestamp in the crate uses this.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    /// Build a span from values already known to be ordered.
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Build a span from caller input, rejecting `end <= start`.
    pub fn try_new(start: Ms, end: Ms) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 6] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::InProgress,
        BookingStatus::Completed,
        BookingStatus::Cancelled,
        BookingStatus::NoShow,
    ];

    /// Active bookings occupy their interval.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::InProgress
        )
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who requested a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelledBy {
    Customer,
    Provider,
    Admin,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecurrencePattern {
    Weekly,
    Biweekly,
    /// Fixed 30-day stride, not a calendar month.
    Monthly,
}

impl RecurrencePattern {
    pub fn step_ms(self) -> Ms {
        match self {
            RecurrencePattern::Weekly => 7 * DAY_MS,
            RecurrencePattern::Biweekly => 14 * DAY_MS,
            RecurrencePattern::Monthly => 30 * DAY_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderKind {
    /// 24 hours ahead.
    DayBefore,
    /// 1 hour ahead.
    HourBefore,
}

impl ReminderKind {
    pub fn lead_ms(self) -> Ms {
        match self {
            ReminderKind::DayBefore => DAY_MS,
            ReminderKind::HourBefore => HOUR_MS,
        }
    }
}

/// Commercial fields in minor currency units. Owned by the payments side;
/// the engine only validates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub base_price: i64,
    pub addons_price: i64,
    pub total_price: i64,
    pub deposit_paid: i64,
    pub currency: String,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            base_price: 0,
            addons_price: 0,
            total_price: 0,
            deposit_paid: 0,
            currency: "EUR".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub tenant_id: Ulid,
    pub provider_id: Ulid,
    pub customer_id: Ulid,
    pub service_id: Ulid,
    pub start_time: Ms,
    pub end_time: Ms,
    /// Redundant with the interval, kept for display.
    pub duration_minutes: i64,
    pub status: BookingStatus,
    pub completed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
    pub is_recurring: bool,
    pub recurrence_pattern: Option<RecurrencePattern>,
    /// Set on generated occurrences, pointing at the series root.
    pub parent_booking_id: Option<Ulid>,
    pub pricing: Pricing,
    pub reminder_sent_24h: bool,
    pub reminder_sent_1h: bool,
    pub created_at: Ms,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        id: Ulid,
        tenant_id: Ulid,
        provider_id: Ulid,
        customer_id: Ulid,
        service_id: Ulid,
        span: Span,
        pricing: Pricing,
        created_at: Ms,
    ) -> Self {
        Self {
            id,
            tenant_id,
            provider_id,
            customer_id,
            service_id,
            start_time: span.start,
            end_time: span.end,
            duration_minutes: span.duration_ms() / MINUTE_MS,
            status: BookingStatus::Pending,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            is_recurring: false,
            recurrence_pattern: None,
            parent_booking_id: None,
            pricing,
            reminder_sent_24h: false,
            reminder_sent_1h: false,
            created_at,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start_time, self.end_time)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Id of the series root this booking belongs to, if any.
    pub fn series_root(&self) -> Option<Ulid> {
        match self.parent_booking_id {
            Some(pid) => Some(pid),
            None if self.is_recurring => Some(self.id),
            None => None,
        }
    }

    pub(crate) fn set_span(&mut self, span: Span) {
        self.start_time = span.start;
        self.end_time = span.end;
        self.duration_minutes = span.duration_ms() / MINUTE_MS;
    }

    pub fn reminder_sent(&self, kind: ReminderKind) -> bool {
        match kind {
            ReminderKind::DayBefore => self.reminder_sent_24h,
            ReminderKind::HourBefore => self.reminder_sent_1h,
        }
    }

    pub(crate) fn set_reminder_sent(&mut self, kind: ReminderKind) {
        match kind {
            ReminderKind::DayBefore => self.reminder_sent_24h = true,
            ReminderKind::HourBefore => self.reminder_sent_1h = true,
        }
    }
}

/// Every booking of one provider, terminal ones included, sorted by `start_time`.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub provider_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl ProviderState {
    pub fn new(provider_id: Ulid) -> Self {
        Self {
            provider_id,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by start_time.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.start_time, |b| b.start_time)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose interval overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.start_time < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.end_time > query.start)
    }

    /// Overlapping bookings that still occupy their interval.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        self.overlapping(query).filter(|b| b.is_active())
    }
}

/// The WAL record format. Each record is applied atomically on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
    },
    /// All-or-nothing group, e.g. a recurring series.
    BatchCreated {
        bookings: Vec<Booking>,
    },
    StatusChanged {
        provider_id: Ulid,
        change: StatusChange,
    },
    Rescheduled {
        id: Ulid,
        provider_id: Ulid,
        span: Span,
    },
    ReminderMarked {
        id: Ulid,
        provider_id: Ulid,
        kind: ReminderKind,
    },
}

impl Event {
    /// Providers whose bookings this event touches, deduplicated.
    pub fn provider_ids(&self) -> Vec<Ulid> {
        match self {
            Event::BookingCreated { booking } => vec![booking.provider_id],
            Event::BatchCreated { bookings } => {
                let mut ids: Vec<Ulid> = bookings.iter().map(|b| b.provider_id).collect();
                ids.sort();
                ids.dedup();
                ids
            }
            Event::StatusChanged { provider_id, .. }
            | Event::Rescheduled { provider_id, .. }
            | Event::ReminderMarked { provider_id, .. } => vec![*provider_id],
        }
    }
}
