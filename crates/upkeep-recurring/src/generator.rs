use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use tracing::{debug, info, instrument, warn};
use upkeep_core::config::JobsConfig;

use crate::{
    error::{RecurringError, Result},
    job_number::JobNumberAllocator,
    occurrence::{compute_occurrence, week_start},
    store::RecurringStore,
    targets::resolve_targets,
    types::{GenerationResult, Job, NewJob, Property, RecurringTemplate},
};

/// Expands one template into dated jobs for a period.
///
/// Properties are processed sequentially. Every create is insert-or-ignore on
/// the `(template, property, date)` key, so re-running a period, or racing
/// another trigger for it, never produces a second job.
pub struct GenerationEngine {
    store: Arc<dyn RecurringStore>,
    allocator: JobNumberAllocator,
    max_number_attempts: u32,
}

impl GenerationEngine {
    pub fn new(store: Arc<dyn RecurringStore>, config: &JobsConfig) -> Self {
        Self {
            store,
            allocator: JobNumberAllocator::new(&config.number_prefix),
            max_number_attempts: config.max_number_attempts.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecurringStore> {
        &self.store
    }

    /// Generate the jobs `template` owes for the period starting `period_start`.
    ///
    /// Off-weeks and already-generated targets are counted as skipped, not
    /// errors. Malformed templates, empty zones and store failures are
    /// returned as errors for the caller to record.
    #[instrument(skip_all, fields(template_id = %template.id, %period_start))]
    pub fn generate_for_template(
        &self,
        template: &RecurringTemplate,
        period_start: NaiveDate,
    ) -> Result<GenerationResult> {
        let mut result = GenerationResult::empty(template);
        if !template.is_active {
            debug!("template inactive, nothing to generate");
            return Ok(result);
        }

        let targets = resolve_targets(self.store.as_ref(), template)?;
        if targets.is_empty() {
            return Err(RecurringError::EmptyZone {
                zone_id: template.zone_id.clone().unwrap_or_default(),
            });
        }
        result.target_count = targets.len();

        // Same date for every target: frequency rules do not depend on the property.
        let Some(date) = compute_occurrence(template, period_start)? else {
            debug!(targets = targets.len(), "no occurrence this period");
            result.skipped = targets.len();
            return Ok(result);
        };

        for property in &targets {
            if let Some(existing) = self.store.find_job(&template.id, &property.id, date)? {
                debug!(
                    property_id = %property.id,
                    job_number = %existing.job_number,
                    "already generated, skipping"
                );
                result.skipped += 1;
                continue;
            }

            match self.create_job(template, property, date)? {
                Some(job) => {
                    info!(
                        property_id = %property.id,
                        job_number = %job.job_number,
                        scheduled_date = %date,
                        "recurring job created"
                    );
                    result.jobs_created.push(job);
                }
                None => {
                    // Another trigger created it between our check and insert.
                    debug!(property_id = %property.id, "lost create race, skipping");
                    result.skipped += 1;
                }
            }
        }

        Ok(result)
    }

    /// Generate `periods` consecutive weeks starting with the week containing
    /// `start`, merging the per-period results.
    pub fn generate_for_periods(
        &self,
        template: &RecurringTemplate,
        start: NaiveDate,
        periods: u32,
    ) -> Result<GenerationResult> {
        let first = week_start(start);
        let mut total = GenerationResult::empty(template);
        for offset in 0..periods {
            let period_start = first + Duration::weeks(offset as i64);
            total.absorb(self.generate_for_template(template, period_start)?);
        }
        Ok(total)
    }

    /// Allocate a number and insert, re-allocating when the number collides.
    fn create_job(
        &self,
        template: &RecurringTemplate,
        property: &Property,
        date: NaiveDate,
    ) -> Result<Option<Job>> {
        let year = Utc::now().year();
        let mut attempt = 1;
        loop {
            let number = self.allocator.next_job_number(self.store.as_ref(), year)?;
            let new_job = NewJob::from_template(template, property, date, number);
            match self.store.create_job(&new_job) {
                Err(RecurringError::JobNumberConflict { job_number })
                    if attempt < self.max_number_attempts =>
                {
                    warn!(%job_number, attempt, "job number taken, re-allocating");
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::DateTime;

    use super::*;
    use crate::{
        store::SqliteStore,
        types::{Frequency, TemplateFilter, TemplateSelection},
    };

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn engine(store: Arc<SqliteStore>) -> GenerationEngine {
        GenerationEngine::new(store, &JobsConfig::default())
    }

    fn seeded() -> (Arc<SqliteStore>, RecurringTemplate) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let zone = store.add_zone("Z").unwrap();
        for name in ["A", "B", "C"] {
            let p = store.add_property(name, None).unwrap();
            store.add_zone_member(&zone.id, &p.id).unwrap();
        }
        let mut t = RecurringTemplate::new("Weekly HVAC", "hvac_inspection", Frequency::Weekly);
        t.day_of_week = Some(1);
        t.zone_id = Some(zone.id);
        t.assigned_to = Some("crew-3".to_string());
        t.estimated_duration_mins = Some(60);
        store.save_template(&t).unwrap();
        (store, t)
    }

    #[test]
    fn creates_one_scheduled_job_per_zone_property() {
        let (store, template) = seeded();
        let result = engine(store.clone())
            .generate_for_template(&template, monday())
            .unwrap();

        assert_eq!(result.target_count, 3);
        assert_eq!(result.created_count(), 3);
        assert_eq!(result.skipped, 0);
        for job in &result.jobs_created {
            assert_eq!(job.scheduled_date, monday());
            assert!(job.is_recurring);
            assert_eq!(job.recurring_template_id.as_deref(), Some(template.id.as_str()));
            assert_eq!(job.assigned_to.as_deref(), Some("crew-3"));
            assert_eq!(job.estimated_duration_mins, Some(60));
            assert_eq!(job.status, crate::types::JobStatus::Scheduled);
        }
        let titles: Vec<_> = result.jobs_created.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["Weekly HVAC - A", "Weekly HVAC - B", "Weekly HVAC - C"]);
    }

    #[test]
    fn second_run_is_a_no_op() {
        let (store, template) = seeded();
        let engine = engine(store.clone());
        engine.generate_for_template(&template, monday()).unwrap();
        let again = engine.generate_for_template(&template, monday()).unwrap();

        assert_eq!(again.created_count(), 0);
        assert_eq!(again.skipped, 3);
        assert_eq!(store.jobs_for_template(&template.id).unwrap().len(), 3);
    }

    #[test]
    fn inactive_template_generates_nothing() {
        let (store, mut template) = seeded();
        template.is_active = false;
        let result = engine(store.clone())
            .generate_for_template(&template, monday())
            .unwrap();
        assert_eq!(result.created_count(), 0);
        assert_eq!(result.target_count, 0);
        assert!(store.jobs_for_template(&template.id).unwrap().is_empty());
    }

    #[test]
    fn empty_zone_is_an_error() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let zone = store.add_zone("Empty").unwrap();
        let mut t = RecurringTemplate::new("Sweep", "cleaning", Frequency::Weekly);
        t.day_of_week = Some(1);
        t.zone_id = Some(zone.id.clone());

        let err = engine(store).generate_for_template(&t, monday()).unwrap_err();
        assert!(matches!(err, RecurringError::EmptyZone { zone_id } if zone_id == zone.id));
    }

    #[test]
    fn biweekly_off_week_skips_every_target() {
        let (store, mut template) = seeded();
        template.frequency = Frequency::Biweekly;
        let result = engine(store)
            .generate_for_template(&template, monday())
            .unwrap();
        assert_eq!(result.created_count(), 0);
        assert_eq!(result.skipped, 3);
    }

    #[test]
    fn periods_backfill_consecutive_weeks() {
        let (store, template) = seeded();
        // A Thursday normalises to its Monday.
        let thursday = NaiveDate::from_ymd_opt(2025, 3, 13).unwrap();
        let result = engine(store.clone())
            .generate_for_periods(&template, thursday, 3)
            .unwrap();

        assert_eq!(result.created_count(), 9);
        let mut dates: Vec<_> = store
            .jobs_for_template(&template.id)
            .unwrap()
            .into_iter()
            .map(|j| j.scheduled_date)
            .collect();
        dates.dedup();
        assert_eq!(
            dates,
            vec![monday(), monday() + Duration::weeks(1), monday() + Duration::weeks(2)]
        );
    }

    /// Delegates to SQLite but pretends the first `conflicts` creates hit a
    /// number another process took.
    struct ConflictingStore {
        inner: SqliteStore,
        conflicts: AtomicU32,
    }

    impl RecurringStore for ConflictingStore {
        fn find_active_templates(&self, f: TemplateFilter) -> Result<TemplateSelection> {
            self.inner.find_active_templates(f)
        }
        fn find_template(&self, id: &str) -> Result<Option<RecurringTemplate>> {
            self.inner.find_template(id)
        }
        fn find_property(&self, id: &str) -> Result<Option<Property>> {
            self.inner.find_property(id)
        }
        fn resolve_zone_properties(&self, zone_id: &str) -> Result<Vec<Property>> {
            self.inner.resolve_zone_properties(zone_id)
        }
        fn find_job(&self, t: &str, p: &str, d: NaiveDate) -> Result<Option<Job>> {
            self.inner.find_job(t, p, d)
        }
        fn find_last_job_number(&self, prefix: &str) -> Result<Option<String>> {
            self.inner.find_last_job_number(prefix)
        }
        fn create_job(&self, job: &NewJob) -> Result<Option<Job>> {
            let left = self.conflicts.load(Ordering::SeqCst);
            if left > 0 {
                self.conflicts.store(left - 1, Ordering::SeqCst);
                return Err(RecurringError::JobNumberConflict {
                    job_number: job.job_number.clone(),
                });
            }
            self.inner.create_job(job)
        }
        fn update_template_last_generated(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.inner.update_template_last_generated(id, at)
        }
    }

    fn conflicting(conflicts: u32) -> (Arc<ConflictingStore>, RecurringTemplate) {
        let inner = SqliteStore::open_in_memory().unwrap();
        let p = inner.add_property("Tower", None).unwrap();
        let mut t = RecurringTemplate::new("Pump check", "plumbing", Frequency::Weekly);
        t.day_of_week = Some(5);
        t.property_id = Some(p.id);
        inner.save_template(&t).unwrap();
        let store = Arc::new(ConflictingStore {
            inner,
            conflicts: AtomicU32::new(conflicts),
        });
        (store, t)
    }

    #[test]
    fn job_number_conflict_is_retried() {
        let (store, template) = conflicting(2);
        let result = GenerationEngine::new(store, &JobsConfig::default())
            .generate_for_template(&template, monday())
            .unwrap();
        assert_eq!(result.created_count(), 1);
    }

    #[test]
    fn job_number_conflict_gives_up_after_max_attempts() {
        let (store, template) = conflicting(10);
        let config = JobsConfig {
            max_number_attempts: 3,
            ..JobsConfig::default()
        };
        let err = GenerationEngine::new(store.clone(), &config)
            .generate_for_template(&template, monday())
            .unwrap_err();
        assert_eq!(err.kind(), "job_number_conflict");
        assert_eq!(store.conflicts.load(Ordering::SeqCst), 7);
    }
}
