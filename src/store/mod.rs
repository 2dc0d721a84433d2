mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::engine::lifecycle::StatusChange;
use crate::model::*;

/// Persistence port consumed by the scheduler.
///
/// Implementations must make `create_booking` and `create_booking_batch`
/// atomic with respect to the provider's active bookings: of two racing
/// writes with overlapping intervals for one provider, at most one succeeds
/// and the other fails with a conflict.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError>;

    /// Active bookings of `provider_id` overlapping `range`, ascending by start.
    async fn find_active_bookings(&self, provider_id: Ulid, range: Span) -> Result<Vec<Booking>, EngineError>;

    /// Fails with `SlotUnavailable` if an active booking of the same
    /// provider overlaps.
    async fn create_booking(&self, booking: Booking) -> Result<Booking, EngineError>;

    /// All-or-nothing. Fails with `BatchConflict` naming the first entry
    /// that collides with stored bookings or with an earlier entry.
    async fn create_booking_batch(&self, bookings: Vec<Booking>) -> Result<Vec<Booking>, EngineError>;

    /// Re-validates the transition against the stored status.
    async fn update_booking_status(&self, change: StatusChange) -> Result<Booking, EngineError>;

    /// Move a non-terminal booking; its own interval is ignored by the
    /// conflict check.
    async fn reschedule_booking(&self, id: Ulid, span: Span) -> Result<Booking, EngineError>;

    /// The root followed by its occurrences, ascending by start.
    async fn find_series(&self, parent_booking_id: Ulid) -> Result<Vec<Booking>, EngineError>;

    /// Active bookings of every provider starting inside `range`.
    async fn find_upcoming(&self, range: Span) -> Result<Vec<Booking>, EngineError>;

    async fn mark_reminder_sent(&self, id: Ulid, kind: ReminderKind) -> Result<Booking, EngineError>;
}
