use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_SPAN_DURATION_MS;
use crate::model::*;
use crate::observability;

use super::conflict::{find_conflict, validate_span};
use super::slots::{WorkingHours, busy_spans, day_window, free_windows, generate_slots};
use super::{EngineError, Scheduler};

impl Scheduler {
    /// Id of an active booking of `provider_id` overlapping `span`, other
    /// than `exclude`.
    pub(super) async fn find_conflicting(
        &self,
        provider_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, EngineError> {
        let bookings = self.store.find_active_bookings(provider_id, span).await?;
        Ok(find_conflict(&bookings, &span, exclude).map(|b| b.id))
    }

    /// Whether `span` collides with an active booking of `provider_id`.
    /// Touching boundaries do not collide.
    pub async fn has_conflict(&self, provider_id: Ulid, span: Span, exclude: Option<Ulid>) -> Result<bool, EngineError> {
        validate_span(&span)?;
        Ok(self.find_conflicting(provider_id, span, exclude).await?.is_some())
    }

    pub async fn check_availability(&self, provider_id: Ulid, span: Span) -> Result<bool, EngineError> {
        Ok(!self.has_conflict(provider_id, span, None).await?)
    }

    async fn busy_on(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        hours: WorkingHours,
    ) -> Result<(Span, Vec<Span>), EngineError> {
        let window = day_window(date, hours, self.config().utc_offset)?;
        let bookings = self.store.find_active_bookings(provider_id, window).await?;
        Ok((window, busy_spans(&bookings)))
    }

    /// Free `duration_minutes` slots of `provider_id` on `date`, stepping
    /// through the configured working hours every 30 minutes. Ascending; may
    /// be empty.
    pub async fn available_slots(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<Vec<Span>, EngineError> {
        self.available_slots_within(provider_id, date, duration_minutes, self.config().working_hours)
            .await
    }

    /// Like `available_slots`, with explicit working hours for this call.
    pub async fn available_slots_within(
        &self,
        provider_id: Ulid,
        date: NaiveDate,
        duration_minutes: i64,
        hours: WorkingHours,
    ) -> Result<Vec<Span>, EngineError> {
        let start = Instant::now();
        let duration = slot_duration_ms(duration_minutes)?;
        let (window, busy) = self.busy_on(provider_id, date, hours).await?;
        let slots: Vec<Span> = generate_slots(&busy, window, duration).collect();
        observability::record_duration("available_slots", start);
        Ok(slots)
    }

    /// Maximal free ranges of `provider_id` within working hours on `date`.
    pub async fn free_windows(&self, provider_id: Ulid, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let (window, busy) = self.busy_on(provider_id, date, self.config().working_hours).await?;
        Ok(free_windows(window, &busy))
    }

    pub async fn get_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.get_booking(id).await
    }

    /// The series containing `id`, root first. A standalone booking is a
    /// series of one.
    pub async fn series(&self, id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let booking = self.store.get_booking(id).await?;
        let root = booking.series_root().unwrap_or(booking.id);
        self.store.find_series(root).await
    }

    /// Pending or Confirmed bookings starting within the lead time of `kind`
    /// whose reminder has not been sent yet.
    pub async fn reminder_candidates(&self, kind: ReminderKind) -> Result<Vec<Booking>, EngineError> {
        let now = self.now();
        let upcoming = self.store.find_upcoming(Span::new(now, now + kind.lead_ms())).await?;
        Ok(upcoming
            .into_iter()
            .filter(|b| matches!(b.status, BookingStatus::Pending | BookingStatus::Confirmed))
            .filter(|b| !b.reminder_sent(kind))
            .collect())
    }
}

/// Requested slot length in milliseconds: positive and no longer than a
/// single booking may be.
fn slot_duration_ms(duration_minutes: i64) -> Result<Ms, EngineError> {
    if duration_minutes <= 0 {
        return Err(EngineError::InvalidRequest("duration must be positive"));
    }
    match duration_minutes.checked_mul(MINUTE_MS) {
        Some(ms) if ms <= MAX_SPAN_DURATION_MS => Ok(ms),
        _ => Err(EngineError::LimitExceeded("slot duration too long")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_duration_bounds() {
        assert_eq!(slot_duration_ms(30).unwrap(), 30 * MINUTE_MS);
        assert!(matches!(slot_duration_ms(0), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(slot_duration_ms(-5), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(slot_duration_ms(i64::MAX / 1000), Err(EngineError::LimitExceeded(_))));
        assert!(matches!(slot_duration_ms(i64::MAX), Err(EngineError::LimitExceeded(_))));
        assert_eq!(slot_duration_ms(MAX_SPAN_DURATION_MS / MINUTE_MS).unwrap(), MAX_SPAN_DURATION_MS);
    }
}
