use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

use super::EngineError;

// ── Booking state machine ────────────────────────────────────────
//
//   Pending ──► Confirmed ──► InProgress ──► Completed
//      │            │  │           │  │
//      └──► Cancelled ◄┘  └► NoShow ◄┘  └► Cancelled

impl BookingStatus {
    /// Edges of the status graph. Terminal states have none.
    pub fn can_transition_to(self, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, to),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
                | (InProgress, Completed)
                | (InProgress, Cancelled)
                | (InProgress, NoShow)
        )
    }
}

/// Named lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Confirm,
    Start,
    Complete,
    Cancel {
        by: CancelledBy,
        reason: Option<String>,
    },
    MarkNoShow,
}

impl Transition {
    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::Confirm => BookingStatus::Confirmed,
            Transition::Start => BookingStatus::InProgress,
            Transition::Complete => BookingStatus::Completed,
            Transition::Cancel { .. } => BookingStatus::Cancelled,
            Transition::MarkNoShow => BookingStatus::NoShow,
        }
    }

    /// The operation that leads to `target`. `Pending` is never a target.
    pub fn to(target: BookingStatus, actor: CancelledBy, reason: Option<String>) -> Option<Transition> {
        match target {
            BookingStatus::Pending => None,
            BookingStatus::Confirmed => Some(Transition::Confirm),
            BookingStatus::InProgress => Some(Transition::Start),
            BookingStatus::Completed => Some(Transition::Complete),
            BookingStatus::Cancelled => Some(Transition::Cancel { by: actor, reason }),
            BookingStatus::NoShow => Some(Transition::MarkNoShow),
        }
    }
}

/// Check `from -> to` against the graph.
///
/// Returns `Ok(false)` for the one permitted no-op, re-confirming a
/// Confirmed booking, so retried confirm requests succeed.
pub fn ensure_transition(from: BookingStatus, to: BookingStatus) -> Result<bool, EngineError> {
    if from == BookingStatus::Confirmed && to == BookingStatus::Confirmed {
        return Ok(false);
    }
    if from.can_transition_to(to) {
        Ok(true)
    } else {
        Err(EngineError::IllegalTransition { from, to })
    }
}

/// A status update plus its side-effect fields, persisted as one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub id: Ulid,
    pub status: BookingStatus,
    pub at: Ms,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,
}

impl StatusChange {
    pub fn new(id: Ulid, transition: Transition, at: Ms) -> Self {
        let status = transition.target();
        let (cancelled_by, cancellation_reason) = match transition {
            Transition::Cancel { by, reason } => (Some(by), reason),
            _ => (None, None),
        };
        Self {
            id,
            status,
            at,
            cancelled_by,
            cancellation_reason,
        }
    }

    pub fn apply(&self, booking: &mut Booking) {
        booking.status = self.status;
        match self.status {
            BookingStatus::Completed => booking.completed_at = Some(self.at),
            BookingStatus::Cancelled => {
                booking.cancelled_at = Some(self.at);
                booking.cancelled_by = self.cancelled_by;
                booking.cancellation_reason = self.cancellation_reason.clone();
            }
            _ => {}
        }
    }
}

/// Validate `transition` for `booking` and build the change to persist.
/// `None` means nothing needs to be written.
pub fn plan_transition(
    booking: &Booking,
    transition: Transition,
    now: Ms,
) -> Result<Option<StatusChange>, EngineError> {
    if !ensure_transition(booking.status, transition.target())? {
        return Ok(None);
    }
    Ok(Some(StatusChange::new(booking.id, transition, now)))
}
