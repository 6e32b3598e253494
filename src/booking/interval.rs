//! Half-open time intervals and slot contiguity checks.

use chrono::{DateTime, Utc};
use serde::Serialize;
use ts_rs::TS;
use uuid::Uuid;

use super::BookingError;
use crate::data::models::TimeSlot;

/// A half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BookingError> {
        if end <= start {
            return Err(BookingError::InvalidInterval);
        }
        Ok(Self { start, end })
    }

    /// Two intervals overlap when they share any instant. Touching ends do not.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

impl From<&TimeSlot> for Interval {
    fn from(slot: &TimeSlot) -> Self {
        Self {
            start: slot.start_time,
            end: slot.end_time,
        }
    }
}

/// True if `candidate` overlaps none of the `taken` intervals.
pub fn is_free(candidate: &Interval, taken: &[Interval]) -> bool {
    !taken.iter().any(|t| candidate.overlaps(t))
}

/// Validate that `slots` form one uninterrupted block on a single court and
/// return the court id and the covering interval.
///
/// Slots may be given in any order.
pub fn merge_contiguous(slots: &[TimeSlot]) -> Result<(Uuid, Interval), BookingError> {
    let mut ordered: Vec<&TimeSlot> = slots.iter().collect();
    ordered.sort_by_key(|s| s.start_time);

    let (first, rest) = ordered.split_first().ok_or(BookingError::NoSlots)?;
    let court_id = first.court_id;
    let mut covered = Interval::new(first.start_time, first.end_time)?;

    for slot in rest {
        if slot.court_id != court_id {
            return Err(BookingError::MixedCourts);
        }
        if slot.start_time != covered.end || slot.end_time <= slot.start_time {
            return Err(BookingError::NotContiguous);
        }
        covered.end = slot.end_time;
    }

    Ok((court_id, covered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    fn slot(court: Uuid, start: (u32, u32), end: (u32, u32)) -> TimeSlot {
        TimeSlot {
            id: Uuid::new_v4(),
            court_id: court,
            start_time: at(start.0, start.1),
            end_time: at(end.0, end.1),
            price_cents: None,
            is_available: true,
            created_at: at(0, 0),
        }
    }

    #[test]
    fn rejects_empty_and_inverted_intervals() {
        assert!(matches!(
            Interval::new(at(10, 0), at(10, 0)),
            Err(BookingError::InvalidInterval)
        ));
        assert!(Interval::new(at(11, 0), at(10, 0)).is_err());
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let a = Interval::new(at(9, 0), at(10, 0)).unwrap();
        let b = Interval::new(at(10, 0), at(11, 0)).unwrap();
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn partial_and_nested_intervals_overlap() {
        let a = Interval::new(at(9, 0), at(11, 0)).unwrap();
        let partial = Interval::new(at(10, 30), at(12, 0)).unwrap();
        let nested = Interval::new(at(9, 30), at(10, 0)).unwrap();
        assert!(a.overlaps(&partial));
        assert!(a.overlaps(&nested));
        assert!(nested.overlaps(&a));
    }

    #[test]
    fn is_free_checks_every_taken_interval() {
        let candidate = Interval::new(at(14, 0), at(15, 0)).unwrap();
        let taken = vec![
            Interval::new(at(9, 0), at(10, 0)).unwrap(),
            Interval::new(at(14, 30), at(16, 0)).unwrap(),
        ];
        assert!(!is_free(&candidate, &taken));
        assert!(is_free(&candidate, &taken[..1]));
        assert!(is_free(&candidate, &[]));
    }

    #[test]
    fn merges_consecutive_slots_in_any_order() {
        let court = Uuid::new_v4();
        let slots = vec![
            slot(court, (11, 0), (12, 0)),
            slot(court, (9, 0), (10, 0)),
            slot(court, (10, 0), (11, 0)),
        ];
        let (court_id, covered) = merge_contiguous(&slots).unwrap();
        assert_eq!(court_id, court);
        assert_eq!(covered.start, at(9, 0));
        assert_eq!(covered.end, at(12, 0));
        assert_eq!(covered.minutes(), 180);
    }

    #[test]
    fn merge_rejects_gaps_overlaps_and_mixed_courts() {
        let court = Uuid::new_v4();
        let gap = vec![slot(court, (9, 0), (10, 0)), slot(court, (10, 30), (11, 30))];
        assert!(matches!(
            merge_contiguous(&gap),
            Err(BookingError::NotContiguous)
        ));

        let overlap = vec![slot(court, (9, 0), (10, 0)), slot(court, (9, 30), (10, 30))];
        assert!(matches!(
            merge_contiguous(&overlap),
            Err(BookingError::NotContiguous)
        ));

        let mixed = vec![
            slot(court, (9, 0), (10, 0)),
            slot(Uuid::new_v4(), (10, 0), (11, 0)),
        ];
        assert!(matches!(
            merge_contiguous(&mixed),
            Err(BookingError::MixedCourts)
        ));

        assert!(matches!(merge_contiguous(&[]), Err(BookingError::NoSlots)));
    }
}
