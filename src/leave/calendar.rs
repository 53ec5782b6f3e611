use chrono::{Datelike, NaiveDate, Weekday};

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Days in `start..=end` that fall Monday through Friday. Zero when
/// `start > end`. Constant time in the length of the range.
pub fn working_days(start: NaiveDate, end: NaiveDate) -> u32 {
    if start > end {
        return 0;
    }

    let span = (end - start).num_days() + 1;
    let full_weeks = span / 7;
    let tail = start
        .iter_days()
        .take((span % 7) as usize)
        .filter(|day| !is_weekend(*day))
        .count() as i64;

    u32::try_from(full_weeks * 5 + tail).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(day: u32) -> NaiveDate {
        // March 2026: the 2nd is a Monday.
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    #[test]
    fn monday_to_friday_is_five() {
        assert_eq!(working_days(date(2), date(6)), 5);
    }

    #[test]
    fn weekend_only_is_zero() {
        assert_eq!(working_days(date(7), date(8)), 0);
    }

    #[test]
    fn friday_to_monday_is_two() {
        assert_eq!(working_days(date(6), date(9)), 2);
    }

    #[test]
    fn single_day_and_two_weeks() {
        assert_eq!(working_days(date(4), date(4)), 1);
        assert_eq!(working_days(date(2), date(15)), 10);
    }

    #[test]
    fn inverted_range_is_zero() {
        assert_eq!(working_days(date(6), date(2)), 0);
    }

    #[test]
    fn matches_day_by_day_count() {
        for start_day in 2..=8 {
            let start = date(start_day);
            for len in 0..40 {
                let end = start + chrono::Duration::days(len);
                let expected = start
                    .iter_days()
                    .take_while(|day| *day <= end)
                    .filter(|day| !is_weekend(*day))
                    .count() as u32;
                assert_eq!(working_days(start, end), expected, "{start}..={end}");
            }
        }
    }

    #[test]
    fn far_future_end_date() {
        let ten_thousand_weeks = date(2) + chrono::Duration::days(70_000 - 1);
        assert_eq!(working_days(date(2), ten_thousand_weeks), 50_000);

        let end = NaiveDate::from_ymd_opt(262_000, 1, 1).unwrap();
        assert!(working_days(date(2), end) > 67_000_000);
    }
}
