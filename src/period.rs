use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

/// Inclusive `(year, month)` walk over a cyclic month range.
///
/// Stepping past the upper bound of the cycle wraps back to the lower bound and
/// advances the year. The span is a value, so it can be iterated any number of
/// times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSpan {
    cycle: (u32, u32),
    begin: (i32, u32),
    end: (i32, u32),
}

impl CycleSpan {
    pub fn new(cycle: (u32, u32), begin: (i32, u32), end: (i32, u32)) -> Self {
        Self { cycle, begin, end }
    }

    /// Calendar months, `1..=12`.
    pub fn months(begin: (i32, u32), end: (i32, u32)) -> Self {
        Self::new((1, 12), begin, end)
    }

    pub fn iter(&self) -> CycleIter {
        CycleIter {
            cycle: self.cycle,
            next: Some(self.begin).filter(|begin| *begin <= self.end),
            end: self.end,
        }
    }
}

impl IntoIterator for &CycleSpan {
    type Item = (i32, u32);
    type IntoIter = CycleIter;

    fn into_iter(self) -> CycleIter {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct CycleIter {
    cycle: (u32, u32),
    next: Option<(i32, u32)>,
    end: (i32, u32),
}

impl Iterator for CycleIter {
    type Item = (i32, u32);

    fn next(&mut self) -> Option<(i32, u32)> {
        let current = self.next?;
        self.next = if current >= self.end {
            None
        } else {
            let (year, step) = current;
            Some(if step >= self.cycle.1 {
                (year + 1, self.cycle.0)
            } else {
                (year, step + 1)
            })
        };
        Some(current)
    }
}

/// Shift `(year, month)` by `delta` months.
pub fn add_months(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let index = year * 12 + (month as i32 - 1) + delta;
    (index.div_euclid(12), (index.rem_euclid(12) + 1) as u32)
}

/// Bounds of the three-month window starting at `(year, month)`.
///
/// The end is the last representable instant of the last day of the third
/// month. Returns `None` when `month` is not a calendar month.
pub fn quarter(year: i32, month: u32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (last_year, last_month) = add_months(year, month, 2);
    let end_day = last_day_of_month(last_year, last_month)?;
    let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)?;
    Some((start.and_time(NaiveTime::MIN), end_day.and_time(end_of_day)))
}

/// First month of the quarter preceding the one starting at `(year, month)`.
pub fn previous_quarter_start(year: i32, month: u32) -> (i32, u32) {
    if month < 4 {
        (year - 1, month + 9)
    } else {
        (year, month - 3)
    }
}

pub fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = add_months(year, month, 1);
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// First and last day of a calendar year.
pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}

pub fn year_month(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end_of(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_nano_opt(23, 59, 59, 999_999_999)
            .unwrap()
    }

    fn midnight(year: i32, month: u32, day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn month_span_wraps_into_next_year() {
        let span = CycleSpan::months((2023, 11), (2024, 2));
        let months: Vec<_> = span.iter().collect();
        assert_eq!(months, vec![(2023, 11), (2023, 12), (2024, 1), (2024, 2)]);
    }

    #[test]
    fn month_span_is_restartable() {
        let span = CycleSpan::months((2022, 12), (2023, 1));
        assert_eq!(span.iter().count(), 2);
        assert_eq!((&span).into_iter().count(), 2);
    }

    #[test]
    fn month_span_single_and_empty() {
        assert_eq!(
            CycleSpan::months((2023, 5), (2023, 5)).iter().collect::<Vec<_>>(),
            vec![(2023, 5)]
        );
        assert_eq!(CycleSpan::months((2023, 6), (2023, 5)).iter().count(), 0);
    }

    #[test]
    fn custom_cycle_uses_its_own_bounds() {
        let span = CycleSpan::new((1, 4), (1, 3), (2, 2));
        let steps: Vec<_> = span.iter().collect();
        assert_eq!(steps, vec![(1, 3), (1, 4), (2, 1), (2, 2)]);
    }

    #[test]
    fn quarter_crossing_year_end() {
        assert_eq!(
            quarter(2023, 11),
            Some((midnight(2023, 11, 1), end_of(2024, 1, 31)))
        );
        assert_eq!(
            quarter(2023, 12),
            Some((midnight(2023, 12, 1), end_of(2024, 2, 29)))
        );
    }

    #[test]
    fn quarter_within_year() {
        assert_eq!(
            quarter(2023, 1),
            Some((midnight(2023, 1, 1), end_of(2023, 3, 31)))
        );
        assert_eq!(
            quarter(2023, 4),
            Some((midnight(2023, 4, 1), end_of(2023, 6, 30)))
        );
    }

    #[test]
    fn quarter_rejects_invalid_month() {
        assert_eq!(quarter(2023, 0), None);
        assert_eq!(quarter(2023, 13), None);
    }

    #[test]
    fn previous_quarter_wraps_year() {
        assert_eq!(previous_quarter_start(2023, 2), (2022, 11));
        assert_eq!(previous_quarter_start(2023, 1), (2022, 10));
        assert_eq!(previous_quarter_start(2023, 3), (2022, 12));
        assert_eq!(previous_quarter_start(2023, 6), (2023, 3));
        assert_eq!(previous_quarter_start(2023, 4), (2023, 1));
    }

    #[test]
    fn add_months_handles_negative_offsets() {
        assert_eq!(add_months(2023, 1, -1), (2022, 12));
        assert_eq!(add_months(2023, 12, 1), (2024, 1));
        assert_eq!(add_months(2023, 11, 2), (2024, 1));
    }
}
