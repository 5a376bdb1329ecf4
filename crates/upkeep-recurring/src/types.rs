use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RecurringError;

/// How often a template produces an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Every week on `day_of_week`.
    Weekly,
    /// On `day_of_week`, in even ISO weeks only.
    Biweekly,
    /// On `day_of_month` of each calendar month.
    Monthly,
    /// On `day_of_month` counted from the first day of each calendar quarter.
    Quarterly,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Frequency {
    type Err = RecurringError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Frequency::Weekly),
            "biweekly" => Ok(Frequency::Biweekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            other => Err(RecurringError::UnknownFrequency(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Lifecycle state of a work order. Generated jobs always start `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// A rule describing when and where recurring work is generated.
///
/// Exactly one of `zone_id` / `property_id` must be set. The engine only ever
/// writes `last_generated`; every other field is owned by the CRUD layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurringTemplate {
    /// UUID v7 string, primary key.
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Free-form work type tag copied onto each job (e.g. `"hvac_inspection"`).
    pub work_type: String,
    pub priority: Priority,
    pub frequency: Frequency,
    /// 1 = Monday … 7 = Sunday. Required for weekly and biweekly templates.
    pub day_of_week: Option<u8>,
    /// 1–31. Required for monthly and quarterly templates.
    pub day_of_month: Option<u8>,
    pub time_of_day: Option<NaiveTime>,
    pub estimated_duration_mins: Option<u32>,
    pub assigned_to: Option<String>,
    pub zone_id: Option<String>,
    pub property_id: Option<String>,
    pub is_active: bool,
    /// When the most recent successful generation pass finished.
    pub last_generated: Option<DateTime<Utc>>,
}

impl RecurringTemplate {
    /// An active template with no target, day fields or defaults set.
    pub fn new(name: &str, work_type: &str, frequency: Frequency) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.to_string(),
            description: None,
            work_type: work_type.to_string(),
            priority: Priority::default(),
            frequency,
            day_of_week: None,
            day_of_month: None,
            time_of_day: None,
            estimated_duration_mins: None,
            assigned_to: None,
            zone_id: None,
            property_id: None,
            is_active: true,
            last_generated: None,
        }
    }
}

/// A concrete, dated work order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Human-readable `PREFIX-YEAR-NNN`, unique across all jobs.
    pub job_number: String,
    pub title: String,
    pub description: Option<String>,
    pub work_type: String,
    pub priority: Priority,
    pub status: JobStatus,
    pub property_id: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Option<NaiveTime>,
    pub estimated_duration_mins: Option<u32>,
    pub assigned_to: Option<String>,
    pub is_recurring: bool,
    pub recurring_template_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything the store needs to insert a generated job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_number: String,
    pub title: String,
    pub description: Option<String>,
    pub work_type: String,
    pub priority: Priority,
    pub property_id: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: Option<NaiveTime>,
    pub estimated_duration_mins: Option<u32>,
    pub assigned_to: Option<String>,
    pub recurring_template_id: String,
}

impl NewJob {
    /// Copy the template's defaults onto a job for one property and date.
    pub fn from_template(
        template: &RecurringTemplate,
        property: &Property,
        scheduled_date: NaiveDate,
        job_number: String,
    ) -> Self {
        Self {
            job_number,
            title: format!("{} - {}", template.name, property.name),
            description: template.description.clone(),
            work_type: template.work_type.clone(),
            priority: template.priority,
            property_id: property.id.clone(),
            scheduled_date,
            scheduled_time: template.time_of_day,
            estimated_duration_mins: template.estimated_duration_mins,
            assigned_to: template.assigned_to.clone(),
            recurring_template_id: template.id.clone(),
        }
    }
}

/// Which active templates a trigger selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFilter {
    AllActive,
    /// Active templates never generated, or last generated before the instant.
    StaleSince(DateTime<Utc>),
}

/// A template row that matched a filter but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadableTemplate {
    pub template_id: String,
    pub template_name: String,
    pub reason: String,
}

/// Templates selected for a batch. Rows that failed to decode are kept so the
/// batch can report them against their id.
#[derive(Debug, Clone, Default)]
pub struct TemplateSelection {
    pub templates: Vec<RecurringTemplate>,
    pub unreadable: Vec<UnreadableTemplate>,
}

impl TemplateSelection {
    pub fn len(&self) -> usize {
        self.templates.len() + self.unreadable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What fired a generation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Weekly,
    CatchUp,
    Manual,
    SingleTemplate,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Weekly => "weekly",
            TriggerKind::CatchUp => "catch_up",
            TriggerKind::Manual => "manual",
            TriggerKind::SingleTemplate => "single_template",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "trigger", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running(TriggerKind),
}

/// Outcome of generating one template for one or more periods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub template_id: String,
    pub template_name: String,
    pub jobs_created: Vec<Job>,
    /// Properties the template resolved to (per period).
    pub target_count: usize,
    /// Target/period pairs with nothing to do: off-week, or already generated.
    pub skipped: usize,
}

impl GenerationResult {
    pub fn empty(template: &RecurringTemplate) -> Self {
        Self {
            template_id: template.id.clone(),
            template_name: template.name.clone(),
            jobs_created: Vec::new(),
            target_count: 0,
            skipped: 0,
        }
    }

    pub fn created_count(&self) -> usize {
        self.jobs_created.len()
    }

    /// Fold a later period's result into this one.
    pub fn absorb(&mut self, other: GenerationResult) {
        self.target_count = self.target_count.max(other.target_count);
        self.skipped += other.skipped;
        self.jobs_created.extend(other.jobs_created);
    }
}

/// Compact view of a created job for run reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub job_number: String,
    pub title: String,
    pub property_id: String,
    pub scheduled_date: NaiveDate,
    pub template_id: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            job_number: job.job_number.clone(),
            title: job.title.clone(),
            property_id: job.property_id.clone(),
            scheduled_date: job.scheduled_date,
            template_id: job.recurring_template_id.clone().unwrap_or_default(),
        }
    }
}

/// A template that failed during a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFailure {
    pub template_id: String,
    pub template_name: String,
    /// Stable classification from [`RecurringError::kind`].
    pub kind: String,
    pub message: String,
}

/// Aggregate result of one batch invocation. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub trigger: TriggerKind,
    pub period_start: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub templates_processed: usize,
    pub successful_templates: usize,
    pub jobs_created: usize,
    pub errors: Vec<TemplateFailure>,
    pub created_jobs: Vec<JobSummary>,
}

impl RunReport {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}
