use thiserror::Error;

/// Errors that can occur within the recurring-job subsystem.
#[derive(Debug, Error)]
pub enum RecurringError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The template is malformed: missing day fields, bad target scope, …
    #[error("Invalid template {template_id}: {reason}")]
    InvalidTemplate { template_id: String, reason: String },

    /// A stored frequency tag is not one of the supported cadences.
    #[error("Unknown frequency: {0}")]
    UnknownFrequency(String),

    /// The template targets a zone that currently has no properties.
    #[error("Zone {zone_id} has no properties")]
    EmptyZone { zone_id: String },

    /// No record with the given ID exists in the store.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Another job already holds this number; the allocator raced.
    #[error("Job number already taken: {job_number}")]
    JobNumberConflict { job_number: String },

    /// An existing job number does not end in a numeric sequence.
    #[error("Malformed job number in store: {job_number}")]
    MalformedJobNumber { job_number: String },

    /// A trigger or schedule definition is invalid.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A caller-supplied argument is out of range.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl RecurringError {
    pub(crate) fn invalid_template(template_id: &str, reason: impl Into<String>) -> Self {
        RecurringError::InvalidTemplate {
            template_id: template_id.to_string(),
            reason: reason.into(),
        }
    }

    /// Short classification recorded against failed templates in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            RecurringError::InvalidTemplate { .. }
            | RecurringError::UnknownFrequency(_)
            | RecurringError::InvalidRequest(_) => "validation",
            RecurringError::EmptyZone { .. } => "empty_target",
            RecurringError::NotFound { .. } => "not_found",
            RecurringError::Database(_) | RecurringError::MalformedJobNumber { .. } => {
                "repository"
            }
            RecurringError::JobNumberConflict { .. } => "job_number_conflict",
            RecurringError::InvalidSchedule(_) => "config",
        }
    }
}

pub type Result<T> = std::result::Result<T, RecurringError>;
