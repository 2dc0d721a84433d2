use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{self, BOOKINGS_CREATED_TOTAL, SERIES_CANCELLED_TOTAL, SERIES_CREATED_TOTAL, TRANSITIONS_TOTAL};

use super::conflict::validate_span;
use super::lifecycle::{plan_transition, StatusChange, Transition};
use super::recurrence::{as_series_root, expand, series_tail};
use super::{BookingRequest, EngineError, Scheduler};

fn validate_pricing(pricing: &Pricing) -> Result<(), EngineError> {
    if pricing.base_price < 0 || pricing.addons_price < 0 || pricing.total_price < 0 || pricing.deposit_paid < 0 {
        return Err(EngineError::InvalidRequest("prices must not be negative"));
    }
    if pricing.deposit_paid > pricing.total_price {
        return Err(EngineError::InvalidRequest("deposit exceeds total price"));
    }
    if pricing.currency.is_empty() || pricing.currency.len() > MAX_CURRENCY_LEN {
        return Err(EngineError::InvalidRequest("invalid currency code"));
    }
    Ok(())
}

fn validate_reason(reason: &Option<String>) -> Result<(), EngineError> {
    match reason {
        Some(r) if r.len() > MAX_REASON_LEN => Err(EngineError::LimitExceeded("cancellation reason too long")),
        _ => Ok(()),
    }
}

impl Scheduler {
    fn new_booking(&self, req: &BookingRequest) -> Booking {
        Booking::new_pending(
            Ulid::new(),
            self.tenant_id,
            req.provider_id,
            req.customer_id,
            req.service_id,
            req.span,
            req.pricing.clone(),
            self.now(),
        )
    }

    /// Create a Pending booking if the provider is free for `req.span`.
    pub async fn book(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let start = Instant::now();
        validate_span(&req.span)?;
        validate_pricing(&req.pricing)?;

        if let Some(conflicting) = self.find_conflicting(req.provider_id, req.span, None).await? {
            observability::record_conflict("book");
            debug!("book rejected: provider {} busy in {:?}", req.provider_id, req.span);
            return Err(EngineError::SlotUnavailable { conflicting });
        }

        // The store re-checks under the provider lock; a racing writer may
        // still win between the check above and this call.
        let booking = self
            .store
            .create_booking(self.new_booking(&req))
            .await
            .inspect_err(|e| {
                if matches!(e, EngineError::SlotUnavailable { .. }) {
                    observability::record_conflict("book");
                }
            })?;

        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            "booked {} for provider {} [{}, {})",
            booking.id, booking.provider_id, booking.start_time, booking.end_time
        );
        observability::record_duration("book", start);
        Ok(booking)
    }

    /// Book `req` plus `occurrence_count - 1` repetitions as one series.
    ///
    /// All-or-nothing: if the root collides the error is `SlotUnavailable`,
    /// if occurrence `i` collides it is `SeriesGenerationFailed` with
    /// `failed_index = i`, and nothing is stored either way.
    pub async fn book_recurring(
        &self,
        req: BookingRequest,
        pattern: RecurrencePattern,
        occurrence_count: u32,
    ) -> Result<Vec<Booking>, EngineError> {
        let start = Instant::now();
        validate_span(&req.span)?;
        validate_pricing(&req.pricing)?;
        if occurrence_count == 0 {
            return Err(EngineError::InvalidRequest("occurrence count must be at least 1"));
        }
        if occurrence_count > MAX_SERIES_OCCURRENCES {
            return Err(EngineError::LimitExceeded("too many occurrences"));
        }
        if req.span.duration_ms() > pattern.step_ms() {
            return Err(EngineError::InvalidRequest("booking is longer than the recurrence step"));
        }

        let root = as_series_root(self.new_booking(&req), pattern);
        let occurrences = expand(&root, occurrence_count, pattern);
        if let Some(last) = occurrences.last() {
            validate_span(&last.span())?;
        }

        let mut batch = Vec::with_capacity(occurrences.len() + 1);
        batch.push(root);
        batch.extend(occurrences);

        let series = match self.store.create_booking_batch(batch).await {
            Ok(series) => series,
            Err(EngineError::BatchConflict { index: 0, conflicting }) => {
                observability::record_conflict("book_recurring");
                debug!("series rejected: root conflicts with {conflicting}");
                return Err(EngineError::SlotUnavailable { conflicting });
            }
            Err(EngineError::BatchConflict { index, conflicting }) => {
                observability::record_conflict("book_recurring");
                debug!("series rejected: occurrence {index} conflicts with {conflicting}");
                return Err(EngineError::SeriesGenerationFailed {
                    failed_index: index as u32,
                    conflicting_booking: conflicting,
                });
            }
            Err(e) => return Err(e),
        };

        metrics::counter!(SERIES_CREATED_TOTAL).increment(1);
        metrics::counter!(BOOKINGS_CREATED_TOTAL).increment(series.len() as u64);
        info!(
            "booked {:?} series {} with {} occurrences for provider {}",
            pattern,
            series[0].id,
            series.len(),
            req.provider_id
        );
        observability::record_duration("book_recurring", start);
        Ok(series)
    }

    /// Move booking `id` to `target`. `actor` and `reason` only matter for
    /// cancellations.
    pub async fn transition(
        &self,
        id: Ulid,
        target: BookingStatus,
        actor: CancelledBy,
        reason: Option<String>,
    ) -> Result<Booking, EngineError> {
        let booking = self.store.get_booking(id).await?;
        let Some(transition) = Transition::to(target, actor, reason) else {
            return Err(EngineError::IllegalTransition {
                from: booking.status,
                to: target,
            });
        };
        self.apply_transition(booking, transition).await
    }

    async fn apply_transition(&self, booking: Booking, transition: Transition) -> Result<Booking, EngineError> {
        let start = Instant::now();
        if let Transition::Cancel { reason, .. } = &transition {
            validate_reason(reason)?;
        }
        let from = booking.status;
        let Some(change) = plan_transition(&booking, transition, self.now()).inspect_err(|e| {
            debug!("transition rejected for {}: {e}", booking.id);
        })?
        else {
            return Ok(booking);
        };

        let to = change.status;
        let updated = self.store.update_booking_status(change).await?;
        metrics::counter!(TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!("booking {} {from} -> {to}", updated.id);
        observability::record_duration("transition", start);
        Ok(updated)
    }

    async fn apply_to(&self, id: Ulid, transition: Transition) -> Result<Booking, EngineError> {
        let booking = self.store.get_booking(id).await?;
        self.apply_transition(booking, transition).await
    }

    pub async fn confirm(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.apply_to(id, Transition::Confirm).await
    }

    pub async fn start(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.apply_to(id, Transition::Start).await
    }

    pub async fn complete(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.apply_to(id, Transition::Complete).await
    }

    pub async fn cancel(&self, id: Ulid, by: CancelledBy, reason: Option<String>) -> Result<Booking, EngineError> {
        self.apply_to(id, Transition::Cancel { by, reason }).await
    }

    pub async fn mark_no_show(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.apply_to(id, Transition::MarkNoShow).await
    }

    /// Cancel every member of the series containing `booking_id` that has not
    /// started yet and is still active. Returns how many were cancelled.
    pub async fn cancel_series(&self, booking_id: Ulid, reason: Option<String>) -> Result<usize, EngineError> {
        let start = Instant::now();
        validate_reason(&reason)?;
        let booking = self.store.get_booking(booking_id).await?;
        let root = booking.series_root().unwrap_or(booking.id);
        let series = self.store.find_series(root).await?;

        let now = self.now();
        let mut cancelled = 0;
        for member in series_tail(&series, now) {
            let change = StatusChange::new(
                member.id,
                Transition::Cancel {
                    by: CancelledBy::System,
                    reason: reason.clone(),
                },
                now,
            );
            match self.store.update_booking_status(change).await {
                Ok(_) => cancelled += 1,
                // Moved to a terminal state since the series was read.
                Err(EngineError::IllegalTransition { from, .. }) => {
                    debug!("series {root}: skipping {} already {from}", member.id);
                }
                Err(e) => return Err(e),
            }
        }

        metrics::counter!(SERIES_CANCELLED_TOTAL).increment(cancelled as u64);
        metrics::counter!(TRANSITIONS_TOTAL, "to" => BookingStatus::Cancelled.as_str()).increment(cancelled as u64);
        info!("cancelled {cancelled} of {} bookings in series {root}", series.len());
        observability::record_duration("cancel_series", start);
        Ok(cancelled)
    }

    /// Move a non-terminal booking to `span`. Its current interval does not
    /// count against itself.
    pub async fn reschedule(&self, id: Ulid, span: Span) -> Result<Booking, EngineError> {
        let start = Instant::now();
        validate_span(&span)?;
        let booking = self.store.get_booking(id).await?;
        if booking.status.is_terminal() {
            return Err(EngineError::InvalidRequest("terminal bookings cannot be rescheduled"));
        }
        if let Some(conflicting) = self.find_conflicting(booking.provider_id, span, Some(id)).await? {
            observability::record_conflict("reschedule");
            debug!("reschedule of {id} rejected: provider {} busy in {span:?}", booking.provider_id);
            return Err(EngineError::SlotUnavailable { conflicting });
        }

        let moved = self.store.reschedule_booking(id, span).await.inspect_err(|e| {
            if matches!(e, EngineError::SlotUnavailable { .. }) {
                observability::record_conflict("reschedule");
            }
        })?;
        info!(
            "rescheduled {id} from [{}, {}) to [{}, {})",
            booking.start_time, booking.end_time, moved.start_time, moved.end_time
        );
        observability::record_duration("reschedule", start);
        Ok(moved)
    }

    /// Record that the `kind` reminder for `id` went out.
    pub async fn mark_reminder_sent(&self, id: Ulid, kind: ReminderKind) -> Result<Booking, EngineError> {
        self.store.mark_reminder_sent(id, kind).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_rules() {
        assert!(validate_pricing(&Pricing::default()).is_ok());

        let negative = Pricing {
            addons_price: -1,
            ..Pricing::default()
        };
        assert!(matches!(validate_pricing(&negative), Err(EngineError::InvalidRequest(_))));

        let over_deposit = Pricing {
            total_price: 100,
            deposit_paid: 101,
            ..Pricing::default()
        };
        assert!(validate_pricing(&over_deposit).is_err());

        let bad_currency = Pricing {
            currency: String::new(),
            ..Pricing::default()
        };
        assert!(validate_pricing(&bad_currency).is_err());
    }

    #[test]
    fn reason_length_is_capped() {
        assert!(validate_reason(&None).is_ok());
        assert!(validate_reason(&Some("x".repeat(MAX_REASON_LEN))).is_ok());
        assert!(matches!(
            validate_reason(&Some("x".repeat(MAX_REASON_LEN + 1))),
            Err(EngineError::LimitExceeded(_))
        ));
    }
}
