use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info, warn};
use upkeep_core::UpkeepConfig;

use crate::{
    batch::BatchRunner,
    error::{RecurringError, Result},
    generator::GenerationEngine,
    occurrence::week_start,
    store::RecurringStore,
    types::{GenerationResult, RunReport, SchedulerState, TemplateFilter, TriggerKind},
};

/// Upper bound on periods a single-template backfill may request (one year).
pub const MAX_BACKFILL_PERIODS: u32 = 52;

/// Owns the store handle, the batch runner and the trigger schedules.
///
/// Each instance is independent: construct as many as needed (one per test,
/// for instance) and drive them through the trigger methods or [`start`].
///
/// [`start`]: RecurringScheduler::start
pub struct RecurringScheduler {
    store: Arc<dyn RecurringStore>,
    runner: BatchRunner,
    weekly: cron::Schedule,
    catch_up: cron::Schedule,
    offset: FixedOffset,
    catch_up_on_start: bool,
    /// Triggers currently inside a batch; overlap is allowed and made safe by
    /// the idempotency key, this only feeds [`RecurringScheduler::state`].
    running: Mutex<Vec<TriggerKind>>,
}

impl RecurringScheduler {
    /// Build a scheduler, validating the cron expressions and UTC offset.
    pub fn new(store: Arc<dyn RecurringStore>, config: &UpkeepConfig) -> Result<Self> {
        let weekly = parse_cron("weekly_cron", &config.scheduler.weekly_cron)?;
        let catch_up = parse_cron("catch_up_cron", &config.scheduler.catch_up_cron)?;
        let offset = FixedOffset::from_str(&config.scheduler.utc_offset).map_err(|e| {
            RecurringError::InvalidSchedule(format!(
                "utc_offset {:?}: {e}",
                config.scheduler.utc_offset
            ))
        })?;
        let engine = GenerationEngine::new(Arc::clone(&store), &config.jobs);
        Ok(Self {
            store,
            runner: BatchRunner::new(engine),
            weekly,
            catch_up,
            offset,
            catch_up_on_start: config.scheduler.catch_up_on_start,
            running: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> SchedulerState {
        let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        match running.last() {
            Some(trigger) => SchedulerState::Running(*trigger),
            None => SchedulerState::Idle,
        }
    }

    /// The Monday opening the week `now` falls in, in the configured offset.
    pub fn period_start(&self, now: DateTime<Utc>) -> NaiveDate {
        week_start(now.with_timezone(&self.offset).date_naive())
    }

    /// Midnight of the current period's Monday, as a UTC instant.
    fn period_boundary(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = self.period_start(now).and_time(chrono::NaiveTime::MIN);
        self.offset
            .from_local_datetime(&midnight)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            // A fixed offset maps every local time to exactly one instant.
            .unwrap_or(now)
    }

    /// Generate the current period for every active template.
    pub fn run_weekly(&self, now: DateTime<Utc>) -> Result<RunReport> {
        self.run_trigger(TriggerKind::Weekly, TemplateFilter::AllActive, now)
    }

    /// Re-attempt active templates not generated since this period began.
    ///
    /// Already-generated templates can be selected again (e.g. when a later
    /// stamp failed); the idempotency check turns them into no-ops.
    pub fn run_catch_up(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let cutoff = self.period_boundary(now);
        self.run_trigger(TriggerKind::CatchUp, TemplateFilter::StaleSince(cutoff), now)
    }

    /// Operator-initiated run over every active template for the current period.
    pub fn run_manual(&self) -> Result<RunReport> {
        self.run_trigger(TriggerKind::Manual, TemplateFilter::AllActive, Utc::now())
    }

    /// Generate a single template, optionally backfilling several periods.
    ///
    /// `start` defaults to the current period and is normalised to its
    /// Monday; `periods` defaults to 1 and may not exceed
    /// [`MAX_BACKFILL_PERIODS`]. `last_generated` is only stamped when the
    /// generated range includes the current period, so a backfill of past
    /// weeks never hides the current week from the catch-up sweep.
    pub fn run_template(
        &self,
        template_id: &str,
        start: Option<NaiveDate>,
        periods: Option<u32>,
    ) -> Result<GenerationResult> {
        let periods = periods.unwrap_or(1);
        if !(1..=MAX_BACKFILL_PERIODS).contains(&periods) {
            return Err(RecurringError::InvalidRequest(format!(
                "periods must be between 1 and {MAX_BACKFILL_PERIODS}, got {periods}"
            )));
        }
        let template =
            self.store
                .find_template(template_id)?
                .ok_or_else(|| RecurringError::NotFound {
                    entity: "template",
                    id: template_id.to_string(),
                })?;
        let current = self.period_start(Utc::now());
        let start = start.unwrap_or(current);
        let first = week_start(start);
        let covers_current =
            first <= current && current < first + Duration::weeks(i64::from(periods));

        let _guard = self.enter(TriggerKind::SingleTemplate);
        let result = self
            .runner
            .engine()
            .generate_for_periods(&template, start, periods)?;
        let stamped = template.is_active && covers_current;
        if stamped {
            self.store
                .update_template_last_generated(&template.id, Utc::now())?;
        }
        info!(
            template_id = %template.id,
            %start,
            periods,
            stamped,
            jobs_created = result.created_count(),
            skipped = result.skipped,
            "single-template generation complete"
        );
        Ok(result)
    }

    /// Load the trigger's templates and run them as one batch.
    ///
    /// Only a failure to load templates is returned as an error; per-template
    /// failures are inside the report.
    fn run_trigger(
        &self,
        trigger: TriggerKind,
        filter: TemplateFilter,
        now: DateTime<Utc>,
    ) -> Result<RunReport> {
        let period_start = self.period_start(now);
        let _guard = self.enter(trigger);
        info!(%trigger, %period_start, "trigger fired");

        let selection = self.store.find_active_templates(filter)?;
        let report = self.runner.run_selection(&selection, period_start, trigger);
        if report.error_count() > 0 {
            warn!(%trigger, errors = report.error_count(), "batch finished with failures");
        }
        Ok(report)
    }

    fn enter(&self, trigger: TriggerKind) -> RunGuard<'_> {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(trigger);
        RunGuard {
            running: &self.running,
            trigger,
        }
    }

    /// The next timer trigger strictly after `now`. Weekly wins a tie.
    pub fn next_fire(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, TriggerKind)> {
        let local = now.with_timezone(&self.offset);
        let weekly = self.weekly.after(&local).next();
        let catch_up = self.catch_up.after(&local).next();
        let next = match (weekly, catch_up) {
            (Some(w), Some(c)) if c < w => (c, TriggerKind::CatchUp),
            (Some(w), _) => (w, TriggerKind::Weekly),
            (None, Some(c)) => (c, TriggerKind::CatchUp),
            (None, None) => return None,
        };
        Some((next.0.with_timezone(&Utc), next.1))
    }

    /// Spawn the timer loop on the current Tokio runtime.
    pub fn start(self: Arc<Self>) -> SchedulerService {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run_loop(shutdown_rx));
        SchedulerService {
            shutdown_tx,
            handle,
        }
    }

    /// Sleeps until the next trigger, fires it, repeats until `shutdown`
    /// broadcasts `true`. A batch in flight is finished before stopping.
    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(offset = %self.offset, "recurring scheduler started");
        if self.catch_up_on_start {
            Arc::clone(&self).fire(TriggerKind::CatchUp).await;
        }

        loop {
            let now = Utc::now();
            let Some((at, trigger)) = self.next_fire(now) else {
                warn!("no upcoming trigger; waiting for shutdown");
                let _ = shutdown.wait_for(|stop| *stop).await;
                break;
            };
            let wait = (at - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    Arc::clone(&self).fire(trigger).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("recurring scheduler shutting down");
    }

    /// Run a timer trigger on the blocking pool; store calls are synchronous.
    async fn fire(self: Arc<Self>, trigger: TriggerKind) {
        let now = Utc::now();
        let outcome = tokio::task::spawn_blocking(move || match trigger {
            TriggerKind::CatchUp => self.run_catch_up(now),
            _ => self.run_weekly(now),
        })
        .await;

        match outcome {
            Ok(Ok(_report)) => {}
            Ok(Err(e)) => error!(%trigger, kind = e.kind(), "trigger failed: {e}"),
            Err(e) => error!(%trigger, "trigger task panicked: {e}"),
        }
    }
}

/// Marks a trigger as running for as long as it is alive.
struct RunGuard<'a> {
    running: &'a Mutex<Vec<TriggerKind>>,
    trigger: TriggerKind,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = running.iter().rposition(|t| *t == self.trigger) {
            running.remove(pos);
        }
    }
}

/// Handle to a started scheduler loop.
pub struct SchedulerService {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerService {
    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("scheduler loop ended abnormally: {e}");
        }
    }
}

fn parse_cron(field: &str, expression: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(expression)
        .map_err(|e| RecurringError::InvalidSchedule(format!("{field} {expression:?}: {e}")))
}
