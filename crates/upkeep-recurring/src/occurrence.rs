use chrono::{Datelike, Duration, NaiveDate};

use crate::{
    error::{RecurringError, Result},
    types::{Frequency, RecurringTemplate},
};

/// The Monday of the ISO week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Compute the date `template` falls on in the period beginning `period_start`.
///
/// `period_start` is the Monday that opens the generation period. Returns
/// `Ok(None)` when the template has no occurrence this period (an odd ISO
/// week for a biweekly template) and an error when the template is missing
/// or has out-of-range day fields.
///
/// Monthly and quarterly dates are not clamped to the month length: day 31
/// of a 30-day month rolls over into the first day of the next month.
pub fn compute_occurrence(
    template: &RecurringTemplate,
    period_start: NaiveDate,
) -> Result<Option<NaiveDate>> {
    match template.frequency {
        Frequency::Weekly => Ok(Some(weekday_in_period(template, period_start)?)),

        Frequency::Biweekly => {
            // Validate before the parity check so a malformed template fails
            // every week, not just the even ones.
            let date = weekday_in_period(template, period_start)?;
            if period_start.iso_week().week() % 2 == 0 {
                Ok(Some(date))
            } else {
                Ok(None)
            }
        }

        Frequency::Monthly => {
            let anchor = NaiveDate::from_ymd_opt(period_start.year(), period_start.month(), 1)
                .ok_or_else(|| out_of_calendar(template, period_start))?;
            Ok(Some(day_from_anchor(template, anchor)?))
        }

        Frequency::Quarterly => {
            let quarter_month = (period_start.month0() / 3) * 3 + 1;
            let anchor = NaiveDate::from_ymd_opt(period_start.year(), quarter_month, 1)
                .ok_or_else(|| out_of_calendar(template, period_start))?;
            Ok(Some(day_from_anchor(template, anchor)?))
        }
    }
}

fn weekday_in_period(template: &RecurringTemplate, period_start: NaiveDate) -> Result<NaiveDate> {
    match template.day_of_week {
        Some(day @ 1..=7) => Ok(period_start + Duration::days(day as i64 - 1)),
        Some(day) => Err(RecurringError::invalid_template(
            &template.id,
            format!("day_of_week {day} is outside 1..=7"),
        )),
        None => Err(RecurringError::invalid_template(
            &template.id,
            format!("{} template requires day_of_week", template.frequency),
        )),
    }
}

fn day_from_anchor(template: &RecurringTemplate, anchor: NaiveDate) -> Result<NaiveDate> {
    match template.day_of_month {
        Some(day @ 1..=31) => Ok(anchor + Duration::days(day as i64 - 1)),
        Some(day) => Err(RecurringError::invalid_template(
            &template.id,
            format!("day_of_month {day} is outside 1..=31"),
        )),
        None => Err(RecurringError::invalid_template(
            &template.id,
            format!("{} template requires day_of_month", template.frequency),
        )),
    }
}

fn out_of_calendar(template: &RecurringTemplate, period_start: NaiveDate) -> RecurringError {
    RecurringError::invalid_template(
        &template.id,
        format!("period start {period_start} has no representable anchor"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn template(frequency: Frequency) -> RecurringTemplate {
        RecurringTemplate::new("Inspection", "hvac_inspection", frequency)
    }

    #[test]
    fn week_start_returns_monday() {
        assert_eq!(week_start(date(2025, 3, 10)), date(2025, 3, 10));
        assert_eq!(week_start(date(2025, 3, 13)), date(2025, 3, 10));
        assert_eq!(week_start(date(2025, 3, 16)), date(2025, 3, 10));
        assert_eq!(week_start(date(2025, 1, 1)), date(2024, 12, 30));
    }

    #[test]
    fn weekly_offsets_from_monday() {
        let mut t = template(Frequency::Weekly);
        t.day_of_week = Some(1);
        assert_eq!(compute_occurrence(&t, date(2025, 3, 10)).unwrap(), Some(date(2025, 3, 10)));
        t.day_of_week = Some(7);
        assert_eq!(compute_occurrence(&t, date(2025, 3, 10)).unwrap(), Some(date(2025, 3, 16)));
    }

    #[test]
    fn weekly_without_day_is_a_validation_error() {
        let t = template(Frequency::Weekly);
        let err = compute_occurrence(&t, date(2025, 3, 10)).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn weekly_rejects_out_of_range_day() {
        let mut t = template(Frequency::Weekly);
        for bad in [0, 8, 255] {
            t.day_of_week = Some(bad);
            assert!(compute_occurrence(&t, date(2025, 3, 10)).is_err());
        }
    }

    #[test]
    fn biweekly_fires_in_even_iso_weeks_only() {
        let mut t = template(Frequency::Biweekly);
        t.day_of_week = Some(3);
        // 2025-03-10 is ISO week 11, 2025-03-17 is week 12.
        assert_eq!(compute_occurrence(&t, date(2025, 3, 10)).unwrap(), None);
        assert_eq!(compute_occurrence(&t, date(2025, 3, 17)).unwrap(), Some(date(2025, 3, 19)));
        assert_eq!(compute_occurrence(&t, date(2025, 3, 24)).unwrap(), None);
        assert_eq!(compute_occurrence(&t, date(2025, 3, 31)).unwrap(), Some(date(2025, 4, 2)));
    }

    #[test]
    fn biweekly_validates_in_odd_weeks_too() {
        let t = template(Frequency::Biweekly);
        assert!(compute_occurrence(&t, date(2025, 3, 10)).is_err());
    }

    #[test]
    fn monthly_anchors_to_month_regardless_of_week() {
        let mut t = template(Frequency::Monthly);
        t.day_of_month = Some(15);
        for monday in [date(2025, 3, 3), date(2025, 3, 10), date(2025, 3, 17), date(2025, 3, 31)] {
            assert_eq!(compute_occurrence(&t, monday).unwrap(), Some(date(2025, 3, 15)));
        }
    }

    #[test]
    fn monthly_day_31_rolls_into_next_month() {
        let mut t = template(Frequency::Monthly);
        t.day_of_month = Some(31);
        assert_eq!(compute_occurrence(&t, date(2025, 4, 7)).unwrap(), Some(date(2025, 5, 1)));
        // February 2025 has 28 days: day 31 lands on March 3.
        assert_eq!(compute_occurrence(&t, date(2025, 2, 10)).unwrap(), Some(date(2025, 3, 3)));
        assert_eq!(compute_occurrence(&t, date(2025, 3, 10)).unwrap(), Some(date(2025, 3, 31)));
    }

    #[test]
    fn monthly_without_day_is_a_validation_error() {
        let mut t = template(Frequency::Monthly);
        t.day_of_week = Some(1);
        assert!(compute_occurrence(&t, date(2025, 3, 10)).is_err());
        t.day_of_month = Some(32);
        assert!(compute_occurrence(&t, date(2025, 3, 10)).is_err());
    }

    #[test]
    fn quarterly_anchors_to_quarter_start() {
        let mut t = template(Frequency::Quarterly);
        t.day_of_month = Some(10);
        assert_eq!(compute_occurrence(&t, date(2025, 2, 17)).unwrap(), Some(date(2025, 1, 10)));
        assert_eq!(compute_occurrence(&t, date(2025, 6, 30)).unwrap(), Some(date(2025, 4, 10)));
        assert_eq!(compute_occurrence(&t, date(2025, 12, 1)).unwrap(), Some(date(2025, 10, 10)));
    }

    #[test]
    fn unknown_frequency_tag_is_rejected() {
        let err = "yearly".parse::<Frequency>().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
