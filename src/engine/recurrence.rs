use ulid::Ulid;

use crate::model::*;

/// Turn a standalone booking into the root of a `pattern` series.
pub fn as_series_root(mut booking: Booking, pattern: RecurrencePattern) -> Booking {
    booking.is_recurring = true;
    booking.recurrence_pattern = Some(pattern);
    booking.parent_booking_id = None;
    booking
}

/// Generate occurrences `1..occurrence_count` of a series rooted at `parent`.
///
/// Occurrence `i` is the parent shifted by `i * pattern.step_ms()`, Pending,
/// with the parent's commercial fields. The parent itself is not included.
pub fn expand(parent: &Booking, occurrence_count: u32, pattern: RecurrencePattern) -> Vec<Booking> {
    let step = pattern.step_ms();
    (1..occurrence_count)
        .map(|i| {
            let shift = i as Ms * step;
            Booking {
                id: Ulid::new(),
                start_time: parent.start_time + shift,
                end_time: parent.end_time + shift,
                status: BookingStatus::Pending,
                completed_at: None,
                cancelled_at: None,
                cancelled_by: None,
                cancellation_reason: None,
                is_recurring: true,
                recurrence_pattern: Some(pattern),
                parent_booking_id: Some(parent.id),
                reminder_sent_24h: false,
                reminder_sent_1h: false,
                ..parent.clone()
            }
        })
        .collect()
}

/// Series members that a tail cancellation applies to: not yet started and
/// not already terminal.
pub fn series_tail(series: &[Booking], now: Ms) -> impl Iterator<Item = &Booking> {
    series
        .iter()
        .filter(move |b| b.start_time > now && b.is_active())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    const T0: Ms = 1_717_236_000_000; // 2024-06-01T10:00:00Z

    fn root(pattern: RecurrencePattern) -> Booking {
        let mut b = booking_at(Ulid::new(), T0, T0 + HOUR_MS);
        b.pricing.total_price = 12_000;
        b.pricing.deposit_paid = 3_000;
        as_series_root(b, pattern)
    }

    #[test]
    fn weekly_expansion_times() {
        let parent = root(RecurrencePattern::Weekly);
        let occ = expand(&parent, 5, RecurrencePattern::Weekly);
        assert_eq!(occ.len(), 4);
        for (i, b) in occ.iter().enumerate() {
            let shift = (i as Ms + 1) * 7 * DAY_MS;
            assert_eq!(b.start_time, T0 + shift);
            assert_eq!(b.end_time, T0 + HOUR_MS + shift);
            assert_eq!(b.duration_minutes, 60);
        }
    }

    #[test]
    fn biweekly_and_monthly_strides() {
        let parent = root(RecurrencePattern::Biweekly);
        let occ = expand(&parent, 3, RecurrencePattern::Biweekly);
        assert_eq!(occ[1].start_time - parent.start_time, 28 * DAY_MS);

        let parent = root(RecurrencePattern::Monthly);
        let occ = expand(&parent, 13, RecurrencePattern::Monthly);
        // 12 fixed strides of 30 days drift 5 days short of a year.
        assert_eq!(occ[11].start_time - parent.start_time, 360 * DAY_MS);
    }

    #[test]
    fn occurrences_link_to_root_and_copy_commercials() {
        let parent = root(RecurrencePattern::Weekly);
        for b in expand(&parent, 4, RecurrencePattern::Weekly) {
            assert_ne!(b.id, parent.id);
            assert_eq!(b.parent_booking_id, Some(parent.id));
            assert_eq!(b.provider_id, parent.provider_id);
            assert_eq!(b.customer_id, parent.customer_id);
            assert_eq!(b.service_id, parent.service_id);
            assert_eq!(b.pricing, parent.pricing);
            assert_eq!(b.status, BookingStatus::Pending);
            assert!(b.is_recurring);
            assert_eq!(b.recurrence_pattern, Some(RecurrencePattern::Weekly));
        }
    }

    #[test]
    fn expansion_is_deterministic_in_time() {
        let parent = root(RecurrencePattern::Weekly);
        let a: Vec<Span> = expand(&parent, 6, RecurrencePattern::Weekly).iter().map(Booking::span).collect();
        let b: Vec<Span> = expand(&parent, 6, RecurrencePattern::Weekly).iter().map(Booking::span).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn count_of_one_or_zero_generates_nothing() {
        let parent = root(RecurrencePattern::Weekly);
        assert!(expand(&parent, 1, RecurrencePattern::Weekly).is_empty());
        assert!(expand(&parent, 0, RecurrencePattern::Weekly).is_empty());
    }

    #[test]
    fn tail_skips_past_and_terminal() {
        let pid = Ulid::new();
        let now = T0 + 10 * DAY_MS;
        let series = vec![
            booking_with_status(pid, T0, T0 + HOUR_MS, BookingStatus::Completed),
            booking_with_status(pid, now + DAY_MS, now + DAY_MS + HOUR_MS, BookingStatus::Confirmed),
            booking_with_status(pid, now + 2 * DAY_MS, now + 2 * DAY_MS + HOUR_MS, BookingStatus::Pending),
            booking_with_status(pid, now + 3 * DAY_MS, now + 3 * DAY_MS + HOUR_MS, BookingStatus::Cancelled),
            booking_with_status(pid, now - HOUR_MS, now + HOUR_MS, BookingStatus::InProgress),
        ];
        let tail: Vec<BookingStatus> = series_tail(&series, now).map(|b| b.status).collect();
        assert_eq!(tail, vec![BookingStatus::Confirmed, BookingStatus::Pending]);
    }
}
