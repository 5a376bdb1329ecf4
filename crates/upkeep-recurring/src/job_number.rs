use tracing::debug;

use crate::{
    error::{RecurringError, Result},
    store::RecurringStore,
};

/// Produces sequential `PREFIX-YEAR-NNN` job numbers.
///
/// The next number is derived from the highest existing one, so two callers
/// racing can pick the same value. The store's unique constraint on
/// `job_number` catches that as [`RecurringError::JobNumberConflict`] and the
/// generation engine re-allocates.
#[derive(Debug, Clone)]
pub struct JobNumberAllocator {
    prefix: String,
}

impl JobNumberAllocator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    /// `"DC-2025-"` for prefix `DC` and year 2025.
    pub fn year_prefix(&self, year: i32) -> String {
        format!("{}-{}-", self.prefix, year)
    }

    pub fn next_job_number(&self, store: &dyn RecurringStore, year: i32) -> Result<String> {
        let year_prefix = self.year_prefix(year);
        let next = match store.find_last_job_number(&year_prefix)? {
            Some(last) => sequence_of(&last, &year_prefix)? + 1,
            None => 1,
        };
        let number = format_job_number(&year_prefix, next);
        debug!(job_number = %number, "job number allocated");
        Ok(number)
    }
}

fn sequence_of(job_number: &str, year_prefix: &str) -> Result<u32> {
    job_number
        .strip_prefix(year_prefix)
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .ok_or_else(|| RecurringError::MalformedJobNumber {
            job_number: job_number.to_string(),
        })
}

/// Zero-pad to three digits; larger sequences keep all their digits.
fn format_job_number(year_prefix: &str, sequence: u32) -> String {
    format!("{year_prefix}{sequence:03}")
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate};

    use super::*;
    use crate::{
        store::SqliteStore,
        types::{Frequency, NewJob, RecurringTemplate},
    };

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(format_job_number("DC-2025-", 14), "DC-2025-014");
        assert_eq!(format_job_number("DC-2025-", 1000), "DC-2025-1000");
    }

    #[test]
    fn starts_at_one_for_a_fresh_year() {
        let store = SqliteStore::open_in_memory().unwrap();
        let allocator = JobNumberAllocator::new("DC");
        assert_eq!(allocator.next_job_number(&store, 2025).unwrap(), "DC-2025-001");
    }

    #[test]
    fn sequential_allocation_has_no_gaps_or_repeats() {
        let store = SqliteStore::open_in_memory().unwrap();
        let property = store.add_property("Depot", None).unwrap();
        let template = RecurringTemplate::new("Sweep", "cleaning", Frequency::Weekly);
        store.save_template(&template).unwrap();
        let allocator = JobNumberAllocator::new("DC");
        let first_monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();

        let mut issued = Vec::new();
        for week in 0..12 {
            let number = allocator.next_job_number(&store, 2025).unwrap();
            let date = first_monday + Duration::weeks(week);
            store
                .create_job(&NewJob::from_template(&template, &property, date, number.clone()))
                .unwrap()
                .unwrap();
            issued.push(number);
        }

        let expected: Vec<String> = (1..=12).map(|n| format!("DC-2025-{n:03}")).collect();
        assert_eq!(issued, expected);
    }

    #[test]
    fn years_are_numbered_independently() {
        let store = SqliteStore::open_in_memory().unwrap();
        let property = store.add_property("Depot", None).unwrap();
        let template = RecurringTemplate::new("Sweep", "cleaning", Frequency::Weekly);
        store.save_template(&template).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 12, 30).unwrap();
        store
            .create_job(&NewJob::from_template(&template, &property, date, "DC-2024-041".into()))
            .unwrap();

        let allocator = JobNumberAllocator::new("DC");
        assert_eq!(allocator.next_job_number(&store, 2024).unwrap(), "DC-2024-042");
        assert_eq!(allocator.next_job_number(&store, 2025).unwrap(), "DC-2025-001");
    }

    #[test]
    fn hand_made_suffixed_number_does_not_block_allocation() {
        let store = SqliteStore::open_in_memory().unwrap();
        let property = store.add_property("Depot", None).unwrap();
        let template = RecurringTemplate::new("Sweep", "cleaning", Frequency::Weekly);
        store.save_template(&template).unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 2, 3).unwrap();
        for (week, number) in ["DC-2025-014", "DC-2025-014-R"].into_iter().enumerate() {
            let date = monday + Duration::weeks(week as i64);
            store
                .create_job(&NewJob::from_template(&template, &property, date, number.into()))
                .unwrap();
        }

        let allocator = JobNumberAllocator::new("DC");
        assert_eq!(allocator.next_job_number(&store, 2025).unwrap(), "DC-2025-015");
    }

    #[test]
    fn non_numeric_suffix_is_reported() {
        let err = sequence_of("DC-2025-ABC", "DC-2025-").unwrap_err();
        assert!(matches!(err, RecurringError::MalformedJobNumber { .. }));
    }
}
