use ulid::Ulid;

use crate::model::{BookingStatus, Ms};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid interval: end {end} must be after start {start}")]
    InvalidInterval { start: Ms, end: Ms },
    #[error("slot unavailable: conflicts with booking {conflicting}")]
    SlotUnavailable { conflicting: Ulid },
    #[error("illegal transition from {from} to {to}")]
    IllegalTransition { from: BookingStatus, to: BookingStatus },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("series generation failed at occurrence {failed_index}: conflicts with booking {conflicting_booking}")]
    SeriesGenerationFailed { failed_index: u32, conflicting_booking: Ulid },
    /// Raised by stores; the scheduler translates it for callers.
    #[error("batch entry {index} conflicts with booking {conflicting}")]
    BatchConflict { index: usize, conflicting: Ulid },
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}
