use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{info, warn};

use crate::{
    error::{RecurringError, Result},
    generator::GenerationEngine,
    types::{
        GenerationResult, JobSummary, RecurringTemplate, RunReport, TemplateFailure,
        TemplateSelection, TriggerKind, UnreadableTemplate,
    },
};

/// Runs the generation engine over a list of templates, one at a time.
///
/// A failing template is recorded in the report and the run moves on; the
/// batch itself never fails. Sequential processing keeps the job-number
/// allocator's race window to a single writer per process.
pub struct BatchRunner {
    engine: GenerationEngine,
}

impl BatchRunner {
    pub fn new(engine: GenerationEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &GenerationEngine {
        &self.engine
    }

    pub fn run_batch(
        &self,
        templates: &[RecurringTemplate],
        period_start: NaiveDate,
        trigger: TriggerKind,
    ) -> RunReport {
        self.run(templates, &[], period_start, trigger)
    }

    /// Run a store selection. Rows the store could not decode are recorded as
    /// validation failures ahead of the readable templates.
    pub fn run_selection(
        &self,
        selection: &TemplateSelection,
        period_start: NaiveDate,
        trigger: TriggerKind,
    ) -> RunReport {
        self.run(&selection.templates, &selection.unreadable, period_start, trigger)
    }

    fn run(
        &self,
        templates: &[RecurringTemplate],
        unreadable: &[UnreadableTemplate],
        period_start: NaiveDate,
        trigger: TriggerKind,
    ) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut report = RunReport {
            trigger,
            period_start,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
            templates_processed: 0,
            successful_templates: 0,
            jobs_created: 0,
            errors: Vec::new(),
            created_jobs: Vec::new(),
        };

        for row in unreadable {
            report.templates_processed += 1;
            let e = RecurringError::invalid_template(&row.template_id, row.reason.as_str());
            record_failure(&mut report, &row.template_id, &row.template_name, &e);
        }

        for template in templates {
            report.templates_processed += 1;
            match self.run_template(template, period_start) {
                Ok(result) => {
                    report.successful_templates += 1;
                    report.jobs_created += result.created_count();
                    report
                        .created_jobs
                        .extend(result.jobs_created.iter().map(JobSummary::from));
                }
                Err(e) => record_failure(&mut report, &template.id, &template.name, &e),
            }
        }

        report.finished_at = Utc::now();
        report.duration_ms = clock.elapsed().as_millis() as u64;
        info!(
            %trigger,
            %period_start,
            processed = report.templates_processed,
            succeeded = report.successful_templates,
            jobs_created = report.jobs_created,
            errors = report.error_count(),
            duration_ms = report.duration_ms,
            "batch complete"
        );
        report
    }

    /// Generate one template and stamp `last_generated` once it succeeded.
    pub fn run_template(
        &self,
        template: &RecurringTemplate,
        period_start: NaiveDate,
    ) -> Result<GenerationResult> {
        let result = self.engine.generate_for_template(template, period_start)?;
        if template.is_active {
            self.engine
                .store()
                .update_template_last_generated(&template.id, Utc::now())?;
        }
        Ok(result)
    }
}

fn record_failure(
    report: &mut RunReport,
    template_id: &str,
    template_name: &str,
    e: &RecurringError,
) {
    warn!(
        %template_id,
        template = %template_name,
        kind = e.kind(),
        "template generation failed: {e}"
    );
    report.errors.push(TemplateFailure {
        template_id: template_id.to_string(),
        template_name: template_name.to_string(),
        kind: e.kind().to_string(),
        message: e.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use upkeep_core::config::JobsConfig;

    use super::*;
    use crate::{
        store::{RecurringStore, SqliteStore},
        types::Frequency,
    };

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn runner(store: &Arc<SqliteStore>) -> BatchRunner {
        BatchRunner::new(GenerationEngine::new(store.clone(), &JobsConfig::default()))
    }

    fn weekly(store: &SqliteStore, name: &str, day: Option<u8>) -> RecurringTemplate {
        let p = store.add_property(&format!("{name} site"), None).unwrap();
        let mut t = RecurringTemplate::new(name, "hvac_inspection", Frequency::Weekly);
        t.day_of_week = day;
        t.property_id = Some(p.id);
        store.save_template(&t).unwrap();
        t
    }

    #[test]
    fn one_bad_template_does_not_abort_the_batch() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let t1 = weekly(&store, "T1", Some(1));
        let t2 = weekly(&store, "T2", None);
        let t3 = weekly(&store, "T3", Some(4));

        let report = runner(&store).run_batch(
            &[t1.clone(), t2.clone(), t3.clone()],
            monday(),
            TriggerKind::Manual,
        );

        assert_eq!(report.templates_processed, 3);
        assert_eq!(report.successful_templates, 2);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.jobs_created, 2);
        assert_eq!(report.errors[0].template_id, t2.id);
        assert_eq!(report.errors[0].template_name, "T2");
        assert_eq!(report.errors[0].kind, "validation");
        assert_eq!(report.created_jobs.len(), 2);
        assert_eq!(store.jobs_for_template(&t1.id).unwrap().len(), 1);
        assert_eq!(store.jobs_for_template(&t3.id).unwrap().len(), 1);
    }

    #[test]
    fn only_successful_templates_get_last_generated() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let good = weekly(&store, "Good", Some(2));
        let bad = weekly(&store, "Bad", Some(9));

        runner(&store).run_batch(&[good.clone(), bad.clone()], monday(), TriggerKind::Manual);

        let good = store.find_template(&good.id).unwrap().unwrap();
        let bad = store.find_template(&bad.id).unwrap().unwrap();
        assert!(good.last_generated.is_some());
        assert!(bad.last_generated.is_none());
    }

    #[test]
    fn empty_batch_reports_zero_counts() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let report = runner(&store).run_batch(&[], monday(), TriggerKind::Weekly);
        assert_eq!(report.trigger, TriggerKind::Weekly);
        assert_eq!(report.templates_processed, 0);
        assert_eq!(report.jobs_created, 0);
        assert!(report.errors.is_empty());
        assert_eq!(report.period_start, monday());
    }

    #[test]
    fn unreadable_rows_are_reported_as_validation_failures() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let good = weekly(&store, "Good", Some(1));
        let selection = TemplateSelection {
            templates: vec![good.clone()],
            unreadable: vec![UnreadableTemplate {
                template_id: "broken-id".to_string(),
                template_name: "Broken".to_string(),
                reason: "bad time_of_day".to_string(),
            }],
        };

        let report = runner(&store).run_selection(&selection, monday(), TriggerKind::CatchUp);

        assert_eq!(report.trigger, TriggerKind::CatchUp);
        assert_eq!(report.templates_processed, 2);
        assert_eq!(report.successful_templates, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].template_id, "broken-id");
        assert_eq!(report.errors[0].kind, "validation");
        assert_eq!(store.jobs_for_template(&good.id).unwrap().len(), 1);
    }
}
