use ulid::Ulid;

use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.end <= span.start {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// First active booking among `bookings` whose interval overlaps `span`.
/// `exclude` skips the booking being rescheduled.
pub fn find_conflict<'a>(
    bookings: impl IntoIterator<Item = &'a Booking>,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    bookings
        .into_iter()
        .filter(|b| b.is_active() && Some(b.id) != exclude)
        .find(|b| b.span().overlaps(span))
}

/// Conflict check against a provider's state; callers hold its lock.
pub(crate) fn check_no_conflict(
    state: &ProviderState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(state.active_overlapping(span), span, exclude) {
        Some(existing) => Err(EngineError::SlotUnavailable {
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    const T0: Ms = 1_717_200_000_000; // 2024-06-01T00:00:00Z

    fn state_with(pid: Ulid, bookings: Vec<Booking>) -> ProviderState {
        let mut ps = ProviderState::new(pid);
        for b in bookings {
            ps.insert_booking(b);
        }
        ps
    }

    #[test]
    fn overlap_is_conflict() {
        let pid = Ulid::new();
        let existing = booking_with_status(pid, T0 + 10 * HOUR_MS, T0 + 11 * HOUR_MS, BookingStatus::Confirmed);
        let existing_id = existing.id;
        let ps = state_with(pid, vec![existing]);
        let candidate = Span::new(T0 + 10 * HOUR_MS + 30 * MINUTE_MS, T0 + 11 * HOUR_MS + 30 * MINUTE_MS);
        match check_no_conflict(&ps, &candidate, None) {
            Err(EngineError::SlotUnavailable { conflicting }) => assert_eq!(conflicting, existing_id),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn boundary_touch_is_not_conflict() {
        let pid = Ulid::new();
        let ps = state_with(
            pid,
            vec![booking_with_status(pid, T0 + 10 * HOUR_MS, T0 + 11 * HOUR_MS, BookingStatus::Confirmed)],
        );
        let after = Span::new(T0 + 11 * HOUR_MS, T0 + 12 * HOUR_MS);
        let before = Span::new(T0 + 9 * HOUR_MS, T0 + 10 * HOUR_MS);
        assert!(check_no_conflict(&ps, &after, None).is_ok());
        assert!(check_no_conflict(&ps, &before, None).is_ok());
    }

    #[test]
    fn terminal_bookings_never_conflict() {
        let pid = Ulid::new();
        let ps = state_with(
            pid,
            vec![
                booking_with_status(pid, T0, T0 + HOUR_MS, BookingStatus::Cancelled),
                booking_with_status(pid, T0, T0 + HOUR_MS, BookingStatus::Completed),
                booking_with_status(pid, T0, T0 + HOUR_MS, BookingStatus::NoShow),
            ],
        );
        assert!(check_no_conflict(&ps, &Span::new(T0, T0 + HOUR_MS), None).is_ok());
    }

    #[test]
    fn every_active_status_conflicts() {
        for status in [BookingStatus::Pending, BookingStatus::Confirmed, BookingStatus::InProgress] {
            let pid = Ulid::new();
            let ps = state_with(pid, vec![booking_with_status(pid, T0, T0 + HOUR_MS, status)]);
            assert!(check_no_conflict(&ps, &Span::new(T0, T0 + 1), None).is_err(), "{status}");
        }
    }

    #[test]
    fn exclude_skips_self() {
        let pid = Ulid::new();
        let b = booking_with_status(pid, T0, T0 + HOUR_MS, BookingStatus::Confirmed);
        let id = b.id;
        let ps = state_with(pid, vec![b]);
        let moved = Span::new(T0 + 30 * MINUTE_MS, T0 + 90 * MINUTE_MS);
        assert!(check_no_conflict(&ps, &moved, Some(id)).is_ok());
        assert!(check_no_conflict(&ps, &moved, None).is_err());
    }

    #[test]
    fn single_ms_overlap_conflicts() {
        let pid = Ulid::new();
        let ps = state_with(pid, vec![booking_at(pid, T0, T0 + 201)]);
        assert!(check_no_conflict(&ps, &Span::new(T0 + 200, T0 + 300), None).is_err());
    }

    #[test]
    fn candidate_enclosing_existing_conflicts() {
        let pid = Ulid::new();
        let ps = state_with(pid, vec![booking_at(pid, T0 + 100, T0 + 200)]);
        assert!(check_no_conflict(&ps, &Span::new(T0, T0 + 1000), None).is_err());
    }

    #[test]
    fn validate_span_limits() {
        assert!(validate_span(&Span { start: T0, end: T0 }).is_err());
        assert!(matches!(
            validate_span(&Span::new(0, 100)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(matches!(
            validate_span(&Span::new(T0, T0 + 40 * DAY_MS)),
            Err(EngineError::LimitExceeded(_))
        ));
        assert!(validate_span(&Span::new(T0, T0 + HOUR_MS)).is_ok());
    }
}
