use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{ffi, params, types::Type, Connection, ErrorCode, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    db::init_db,
    error::{RecurringError, Result},
    types::{
        Job, JobStatus, NewJob, Priority, Property, RecurringTemplate, TemplateFilter,
        TemplateSelection, UnreadableTemplate, Zone,
    },
};

/// Repository operations the generation engine depends on.
///
/// Implementations must be `Send + Sync` so one store can be shared by the
/// scheduler task and on-demand triggers.
pub trait RecurringStore: Send + Sync {
    /// Active templates matching `filter`, in creation order. Rows that match
    /// but cannot be decoded come back in [`TemplateSelection::unreadable`].
    fn find_active_templates(&self, filter: TemplateFilter) -> Result<TemplateSelection>;

    fn find_template(&self, id: &str) -> Result<Option<RecurringTemplate>>;

    fn find_property(&self, id: &str) -> Result<Option<Property>>;

    /// Every property associated with the zone, in association order.
    fn resolve_zone_properties(&self, zone_id: &str) -> Result<Vec<Property>>;

    /// Look up a job by its idempotency key.
    fn find_job(
        &self,
        template_id: &str,
        property_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Job>>;

    /// The highest job number made of `prefix` (e.g. `"DC-2025-"`) followed
    /// by digits only. Numbers with any other suffix are ignored.
    fn find_last_job_number(&self, prefix: &str) -> Result<Option<String>>;

    /// Insert a generated job unless one already exists for its
    /// `(template, property, date)` key, in which case `None` is returned.
    ///
    /// Returns [`RecurringError::JobNumberConflict`] when the job number is
    /// already held by another job.
    fn create_job(&self, job: &NewJob) -> Result<Option<Job>>;

    fn update_template_last_generated(&self, template_id: &str, at: DateTime<Utc>) -> Result<()>;
}

const TEMPLATE_COLUMNS: &str = "id, name, description, work_type, priority, frequency,
    day_of_week, day_of_month, time_of_day, estimated_duration_mins, assigned_to,
    zone_id, property_id, is_active, last_generated";

const JOB_COLUMNS: &str = "id, job_number, title, description, work_type, priority, status,
    property_id, scheduled_date, scheduled_time, estimated_duration_mins, assigned_to,
    is_recurring, recurring_template_id, created_at";

/// SQLite-backed [`RecurringStore`].
///
/// Wraps a single connection in a `Mutex`; every write is a single-row
/// statement so no transaction spans more than one call.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// A private in-memory database, mostly useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    pub(crate) fn db(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves nothing half-written; keep serving.
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_property(&self, name: &str, address: Option<&str>) -> Result<Property> {
        let id = Uuid::now_v7().to_string();
        self.db().execute(
            "INSERT INTO properties (id, name, address, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, address, timestamp(Utc::now())],
        )?;
        Ok(Property {
            id,
            name: name.to_string(),
            address: address.map(String::from),
        })
    }

    pub fn add_zone(&self, name: &str) -> Result<Zone> {
        let id = Uuid::now_v7().to_string();
        self.db().execute(
            "INSERT INTO zones (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, name, timestamp(Utc::now())],
        )?;
        Ok(Zone {
            id,
            name: name.to_string(),
        })
    }

    /// Associate a property with a zone. Re-adding an existing member is a no-op.
    pub fn add_zone_member(&self, zone_id: &str, property_id: &str) -> Result<()> {
        self.db().execute(
            "INSERT OR IGNORE INTO zone_properties (zone_id, property_id) VALUES (?1, ?2)",
            params![zone_id, property_id],
        )?;
        Ok(())
    }

    /// Insert or fully replace a template row.
    pub fn save_template(&self, template: &RecurringTemplate) -> Result<()> {
        let now = timestamp(Utc::now());
        self.db().execute(
            "INSERT INTO recurring_templates
             (id, name, description, work_type, priority, frequency, day_of_week,
              day_of_month, time_of_day, estimated_duration_mins, assigned_to,
              zone_id, property_id, is_active, last_generated, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?16)
             ON CONFLICT (id) DO UPDATE SET
                name = excluded.name, description = excluded.description,
                work_type = excluded.work_type, priority = excluded.priority,
                frequency = excluded.frequency, day_of_week = excluded.day_of_week,
                day_of_month = excluded.day_of_month, time_of_day = excluded.time_of_day,
                estimated_duration_mins = excluded.estimated_duration_mins,
                assigned_to = excluded.assigned_to, zone_id = excluded.zone_id,
                property_id = excluded.property_id, is_active = excluded.is_active,
                last_generated = excluded.last_generated, updated_at = excluded.updated_at",
            params![
                template.id,
                template.name,
                template.description,
                template.work_type,
                template.priority.to_string(),
                template.frequency.to_string(),
                template.day_of_week,
                template.day_of_month,
                template.time_of_day.map(|t| t.to_string()),
                template.estimated_duration_mins,
                template.assigned_to,
                template.zone_id,
                template.property_id,
                template.is_active as i32,
                template.last_generated.map(timestamp),
                now,
            ],
        )?;
        info!(template_id = %template.id, name = %template.name, "template saved");
        Ok(())
    }

    /// All jobs generated from a template, ordered by date then job number.
    pub fn jobs_for_template(&self, template_id: &str) -> Result<Vec<Job>> {
        let db = self.db();
        let mut stmt = db.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE recurring_template_id = ?1
             ORDER BY scheduled_date, job_number"
        ))?;
        let jobs = stmt
            .query_map([template_id], row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

impl RecurringStore for SqliteStore {
    fn find_active_templates(&self, filter: TemplateFilter) -> Result<TemplateSelection> {
        let db = self.db();
        let rows = match filter {
            TemplateFilter::AllActive => {
                let mut stmt = db.prepare_cached(&format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM recurring_templates
                     WHERE is_active = 1
                     ORDER BY created_at, rowid"
                ))?;
                let rows = stmt
                    .query_map([], row_to_selected)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            TemplateFilter::StaleSince(cutoff) => {
                let mut stmt = db.prepare_cached(&format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM recurring_templates
                     WHERE is_active = 1
                       AND (last_generated IS NULL OR last_generated < ?1)
                     ORDER BY created_at, rowid"
                ))?;
                let rows = stmt
                    .query_map([timestamp(cutoff)], row_to_selected)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };

        let mut selection = TemplateSelection::default();
        for row in rows {
            match row {
                Ok(template) => selection.templates.push(template),
                Err(unreadable) => {
                    debug!(template_id = %unreadable.template_id, "unreadable template row");
                    selection.unreadable.push(unreadable);
                }
            }
        }
        Ok(selection)
    }

    fn find_template(&self, id: &str) -> Result<Option<RecurringTemplate>> {
        let template = self
            .db()
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM recurring_templates WHERE id = ?1"),
                [id],
                row_to_template,
            )
            .optional()?;
        Ok(template)
    }

    fn find_property(&self, id: &str) -> Result<Option<Property>> {
        let property = self
            .db()
            .query_row(
                "SELECT id, name, address FROM properties WHERE id = ?1",
                [id],
                row_to_property,
            )
            .optional()?;
        Ok(property)
    }

    fn resolve_zone_properties(&self, zone_id: &str) -> Result<Vec<Property>> {
        let db = self.db();
        let mut stmt = db.prepare_cached(
            "SELECT p.id, p.name, p.address
             FROM zone_properties zp
             JOIN properties p ON p.id = zp.property_id
             WHERE zp.zone_id = ?1
             ORDER BY zp.rowid",
        )?;
        let properties = stmt
            .query_map([zone_id], row_to_property)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(%zone_id, count = properties.len(), "zone resolved");
        Ok(properties)
    }

    fn find_job(
        &self,
        template_id: &str,
        property_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Job>> {
        let job = self
            .db()
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs
                     WHERE recurring_template_id = ?1 AND property_id = ?2
                       AND scheduled_date = ?3"
                ),
                params![template_id, property_id, date.to_string()],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn find_last_job_number(&self, prefix: &str) -> Result<Option<String>> {
        // Digits-only suffixes; length first so "…-1000" outranks "…-999".
        let last = self
            .db()
            .query_row(
                "SELECT job_number FROM jobs
                 WHERE substr(job_number, 1, length(?1)) = ?1
                   AND length(job_number) > length(?1)
                   AND substr(job_number, length(?1) + 1) NOT GLOB '*[^0-9]*'
                 ORDER BY length(job_number) DESC, job_number DESC
                 LIMIT 1",
                [prefix],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(last)
    }

    fn create_job(&self, job: &NewJob) -> Result<Option<Job>> {
        let id = Uuid::now_v7().to_string();
        let created_at = Utc::now();

        let inserted = self.db().execute(
            "INSERT INTO jobs
             (id, job_number, title, description, work_type, priority, status,
              property_id, scheduled_date, scheduled_time, estimated_duration_mins,
              assigned_to, is_recurring, recurring_template_id, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,'scheduled',?7,?8,?9,?10,?11,1,?12,?13)
             ON CONFLICT (recurring_template_id, property_id, scheduled_date) DO NOTHING",
            params![
                id,
                job.job_number,
                job.title,
                job.description,
                job.work_type,
                job.priority.to_string(),
                job.property_id,
                job.scheduled_date.to_string(),
                job.scheduled_time.map(|t| t.to_string()),
                job.estimated_duration_mins,
                job.assigned_to,
                job.recurring_template_id,
                timestamp(created_at),
            ],
        );

        match inserted {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(Job {
                id,
                job_number: job.job_number.clone(),
                title: job.title.clone(),
                description: job.description.clone(),
                work_type: job.work_type.clone(),
                priority: job.priority,
                status: JobStatus::Scheduled,
                property_id: job.property_id.clone(),
                scheduled_date: job.scheduled_date,
                scheduled_time: job.scheduled_time,
                estimated_duration_mins: job.estimated_duration_mins,
                assigned_to: job.assigned_to.clone(),
                is_recurring: true,
                recurring_template_id: Some(job.recurring_template_id.clone()),
                created_at,
            })),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation
                    && e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Err(RecurringError::JobNumberConflict {
                    job_number: job.job_number.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update_template_last_generated(&self, template_id: &str, at: DateTime<Utc>) -> Result<()> {
        let n = self.db().execute(
            "UPDATE recurring_templates SET last_generated = ?1, updated_at = ?1 WHERE id = ?2",
            params![timestamp(at), template_id],
        )?;
        if n == 0 {
            return Err(RecurringError::NotFound {
                entity: "template",
                id: template_id.to_string(),
            });
        }
        Ok(())
    }
}

/// Fixed-width UTC timestamps so stored values compare correctly as text.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a TEXT column through `FromStr`, reporting failures as conversion errors.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: T::Err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn parse_optional_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => parse_column(row, idx).map(Some),
        None => Ok(None),
    }
}

/// Day fields are read leniently: values that do not fit a `u8` become 255 so
/// the date calculator rejects them as out of range instead of the row failing.
fn day_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u8>> {
    Ok(row
        .get::<_, Option<i64>>(idx)?
        .map(|v| u8::try_from(v).unwrap_or(u8::MAX)))
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<RecurringTemplate> {
    Ok(RecurringTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        work_type: row.get(3)?,
        priority: parse_column::<Priority>(row, 4)?,
        frequency: parse_column(row, 5)?,
        day_of_week: day_column(row, 6)?,
        day_of_month: day_column(row, 7)?,
        time_of_day: parse_optional_column(row, 8)?,
        estimated_duration_mins: row.get(9)?,
        assigned_to: row.get(10)?,
        zone_id: row.get(11)?,
        property_id: row.get(12)?,
        is_active: row.get::<_, i32>(13)? != 0,
        last_generated: parse_optional_column(row, 14)?,
    })
}

/// Decode a template row, keeping its id and name when the rest is unreadable.
fn row_to_selected(
    row: &Row<'_>,
) -> rusqlite::Result<std::result::Result<RecurringTemplate, UnreadableTemplate>> {
    match row_to_template(row) {
        Ok(template) => Ok(Ok(template)),
        Err(e) => Ok(Err(UnreadableTemplate {
            template_id: row.get(0)?,
            template_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            reason: e.to_string(),
        })),
    }
}

fn row_to_property(row: &Row<'_>) -> rusqlite::Result<Property> {
    Ok(Property {
        id: row.get(0)?,
        name: row.get(1)?,
        address: row.get(2)?,
    })
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        job_number: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        work_type: row.get(4)?,
        priority: parse_column::<Priority>(row, 5)?,
        status: parse_column::<JobStatus>(row, 6)?,
        property_id: row.get(7)?,
        scheduled_date: parse_column(row, 8)?,
        scheduled_time: parse_optional_column(row, 9)?,
        estimated_duration_mins: row.get(10)?,
        assigned_to: row.get(11)?,
        is_recurring: row.get::<_, i32>(12)? != 0,
        recurring_template_id: row.get(13)?,
        created_at: parse_column(row, 14)?,
    })
}
