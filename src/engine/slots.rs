use chrono::{FixedOffset, NaiveDate, TimeZone};

use crate::model::*;

use super::EngineError;

/// Candidate slots start every 30 minutes.
pub const SLOT_STEP_MS: Ms = 30 * MINUTE_MS;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Daily window `[start_minute, end_minute)` in minutes since local midnight.
/// `end_minute` may be 1440 (midnight of the next day).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    pub start_minute: u32,
    pub end_minute: u32,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start_minute: 9 * 60,
            end_minute: MINUTES_PER_DAY,
        }
    }
}

impl WorkingHours {
    pub fn new(start_minute: u32, end_minute: u32) -> Result<Self, EngineError> {
        if start_minute >= end_minute || end_minute > MINUTES_PER_DAY {
            return Err(EngineError::InvalidInterval {
                start: start_minute as Ms * MINUTE_MS,
                end: end_minute as Ms * MINUTE_MS,
            });
        }
        Ok(Self {
            start_minute,
            end_minute,
        })
    }

    pub fn length_ms(&self) -> Ms {
        (self.end_minute - self.start_minute) as Ms * MINUTE_MS
    }
}

/// The working window of `date`, as absolute instants.
pub fn day_window(date: NaiveDate, hours: WorkingHours, offset: FixedOffset) -> Result<Span, EngineError> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or(EngineError::InvalidRequest("invalid date"))?;
    let midnight_ms = offset
        .from_local_datetime(&midnight)
        .single()
        .ok_or(EngineError::InvalidRequest("invalid date"))?
        .timestamp_millis();
    Ok(Span::new(
        midnight_ms + hours.start_minute as Ms * MINUTE_MS,
        midnight_ms + hours.end_minute as Ms * MINUTE_MS,
    ))
}

/// Intervals of active bookings, sorted by start.
pub fn busy_spans<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Vec<Span> {
    let mut busy: Vec<Span> = bookings
        .into_iter()
        .filter(|b| b.is_active())
        .map(|b| b.span())
        .collect();
    busy.sort_by_key(|s| s.start);
    busy
}

fn is_busy(busy: &[Span], candidate: &Span) -> bool {
    let right_bound = busy.partition_point(|s| s.start < candidate.end);
    busy[..right_bound].iter().any(|s| s.end > candidate.start)
}

/// Lazy sequence of free candidate slots. Cloning restarts it.
#[derive(Debug, Clone)]
pub struct SlotCandidates<'a> {
    busy: &'a [Span],
    cursor: Ms,
    window_end: Ms,
    duration: Ms,
}

/// Step through `window` in 30-minute increments, yielding each
/// `[cursor, cursor + duration)` that fits the window and avoids `busy`
/// (sorted by start).
pub fn generate_slots(busy: &[Span], window: Span, duration: Ms) -> SlotCandidates<'_> {
    let cursor = if duration > 0 { window.start } else { window.end };
    SlotCandidates {
        busy,
        cursor,
        window_end: window.end,
        duration: duration.max(1),
    }
}

impl Iterator for SlotCandidates<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Span> {
        while let Some(end) = self.cursor.checked_add(self.duration)
            && end <= self.window_end
        {
            let candidate = Span::new(self.cursor, end);
            self.cursor = self.cursor.saturating_add(SLOT_STEP_MS);
            if !is_busy(self.busy, &candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

/// Maximal free ranges of `window` not covered by `busy` (sorted by start).
pub fn free_windows(window: Span, busy: &[Span]) -> Vec<Span> {
    let clamped: Vec<Span> = busy
        .iter()
        .filter(|s| s.overlaps(&window))
        .map(|s| Span::new(s.start.max(window.start), s.end.min(window.end)))
        .collect();
    subtract_intervals(&[window], &merge_overlapping(&clamped))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`; both sorted and disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}
