use rusqlite::{Connection, Result};

/// Initialise all tables for the recurring-job subsystem. Safe to call on
/// every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_properties_table(conn)?;
    create_zones_tables(conn)?;
    create_templates_table(conn)?;
    create_jobs_table(conn)?;
    Ok(())
}

fn create_properties_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS properties (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            address     TEXT,
            created_at  TEXT NOT NULL
        );",
    )
}

fn create_zones_tables(conn: &Connection) -> Result<()> {
    // zone_properties keeps rowid so membership resolves in insertion order.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS zones (
            id          TEXT PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS zone_properties (
            zone_id     TEXT NOT NULL REFERENCES zones(id),
            property_id TEXT NOT NULL REFERENCES properties(id),
            PRIMARY KEY (zone_id, property_id)
        );",
    )
}

fn create_templates_table(conn: &Connection) -> Result<()> {
    // No CHECK on the day fields: a malformed template must still load so the
    // batch can report it against that template.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS recurring_templates (
            id                      TEXT PRIMARY KEY NOT NULL,
            name                    TEXT NOT NULL,
            description             TEXT,
            work_type               TEXT NOT NULL,
            priority                TEXT NOT NULL DEFAULT 'medium',
            frequency               TEXT NOT NULL
                CHECK (frequency IN ('weekly', 'biweekly', 'monthly', 'quarterly')),
            day_of_week             INTEGER,
            day_of_month            INTEGER,
            time_of_day             TEXT,               -- HH:MM:SS or NULL
            estimated_duration_mins INTEGER,
            assigned_to             TEXT,
            zone_id                 TEXT REFERENCES zones(id),
            property_id             TEXT REFERENCES properties(id),
            is_active               INTEGER NOT NULL DEFAULT 1,
            last_generated          TEXT,               -- RFC 3339 UTC or NULL
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_templates_active
            ON recurring_templates (is_active, last_generated);",
    )
}

fn create_jobs_table(conn: &Connection) -> Result<()> {
    // UNIQUE(recurring_template_id, property_id, scheduled_date) is the
    // idempotency key: at most one job per template, property and date.
    // Hand-made jobs carry a NULL template id and never collide.
    // UNIQUE(job_number) turns an allocator race into a retryable conflict.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS jobs (
            id                      TEXT PRIMARY KEY NOT NULL,
            job_number              TEXT NOT NULL UNIQUE,
            title                   TEXT NOT NULL,
            description             TEXT,
            work_type               TEXT NOT NULL,
            priority                TEXT NOT NULL,
            status                  TEXT NOT NULL DEFAULT 'scheduled',
            property_id             TEXT NOT NULL REFERENCES properties(id),
            scheduled_date          TEXT NOT NULL,      -- YYYY-MM-DD
            scheduled_time          TEXT,
            estimated_duration_mins INTEGER,
            assigned_to             TEXT,
            is_recurring            INTEGER NOT NULL DEFAULT 0,
            recurring_template_id   TEXT REFERENCES recurring_templates(id),
            created_at              TEXT NOT NULL,
            UNIQUE (recurring_template_id, property_id, scheduled_date)
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_scheduled_date
            ON jobs (scheduled_date);",
    )
}
