//! `upkeep-recurring`: turns recurring maintenance templates into dated work orders.
//!
//! # Overview
//!
//! A [`RecurringTemplate`] says when (frequency + day) and where (a zone or a
//! single property) work recurs. Each generation pass takes a period, the
//! Monday-to-Sunday week starting at a given Monday, and creates at most one
//! [`Job`] per `(template, property, date)`. Re-running a period is always
//! safe: the store ignores inserts for keys that already exist.
//!
//! | Layer                     | Responsibility                                   |
//! |---------------------------|--------------------------------------------------|
//! | [`occurrence`]            | Date of a template's occurrence in a period      |
//! | [`targets`]               | Zone → property expansion                        |
//! | [`job_number`]            | `PREFIX-YEAR-NNN` allocation                     |
//! | [`generator`]             | One template, one or more periods                |
//! | [`batch`]                 | Many templates, failures isolated per template   |
//! | [`scheduler`]             | Weekly, daily catch-up, manual and single triggers |
//! | [`store`] / [`db`]        | Repository trait and its SQLite implementation   |
//!
//! # Frequencies
//!
//! | Variant     | Date in the period starting Monday `m`                      |
//! |-------------|-------------------------------------------------------------|
//! | `Weekly`    | `m + (day_of_week - 1)`                                     |
//! | `Biweekly`  | as weekly, only when `m`'s ISO week number is even          |
//! | `Monthly`   | first of `m`'s month `+ (day_of_month - 1)`, unclamped      |
//! | `Quarterly` | first of `m`'s quarter `+ (day_of_month - 1)`, unclamped    |

pub mod batch;
pub mod db;
pub mod error;
pub mod generator;
pub mod job_number;
pub mod occurrence;
pub mod scheduler;
pub mod store;
pub mod targets;
pub mod types;

pub use batch::BatchRunner;
pub use error::{RecurringError, Result};
pub use generator::GenerationEngine;
pub use scheduler::{RecurringScheduler, SchedulerService};
pub use store::{RecurringStore, SqliteStore};
pub use types::{
    Frequency, GenerationResult, Job, JobStatus, Priority, Property, RecurringTemplate, RunReport,
    SchedulerState, TemplateFilter, TemplateSelection, TriggerKind, UnreadableTemplate, Zone,
};
