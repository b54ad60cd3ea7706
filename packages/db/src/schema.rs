//! Database schema definitions using SurrealQL.

use crate::{DbError, get_db};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema() -> Result<(), DbError> {
    let db = get_db()?;

    tracing::info!("Initializing database schema...");

    // Application table
    db.query(APPLICATION_SCHEMA).await?.check()?;

    // Job table
    db.query(JOB_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Application table schema.
const APPLICATION_SCHEMA: &str = r#"
-- Registered integration targets
DEFINE TABLE IF NOT EXISTS application SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS name ON application TYPE string;
DEFINE FIELD IF NOT EXISTS description ON application TYPE option<string>;
DEFINE FIELD IF NOT EXISTS user_id ON application TYPE string;
DEFINE FIELD IF NOT EXISTS handler_model ON application TYPE string;
DEFINE FIELD IF NOT EXISTS handler_function ON application TYPE string;
DEFINE FIELD IF NOT EXISTS args ON application TYPE option<string>;
DEFINE FIELD IF NOT EXISTS priority ON application TYPE int DEFAULT 0;
DEFINE FIELD IF NOT EXISTS active ON application TYPE bool DEFAULT true;
DEFINE FIELD IF NOT EXISTS checkpoint ON application TYPE bool DEFAULT false;
DEFINE FIELD IF NOT EXISTS autostart ON application TYPE bool DEFAULT false;
DEFINE FIELD IF NOT EXISTS thread_token ON application TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON application TYPE datetime DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON application TYPE datetime DEFAULT time::now();

-- Names are unique
DEFINE INDEX IF NOT EXISTS application_name ON application FIELDS name UNIQUE;
DEFINE INDEX IF NOT EXISTS application_active ON application FIELDS active;
DEFINE INDEX IF NOT EXISTS application_autostart ON application FIELDS autostart;
"#;

/// Job table schema.
///
/// `claim_token` is set while a worker holds the exclusive claim on a row;
/// a job is only claimable while it is `ready` and has no token.
const JOB_SCHEMA: &str = r#"
-- Integration jobs
DEFINE TABLE IF NOT EXISTS job SCHEMAFULL;

DEFINE FIELD IF NOT EXISTS application_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS state ON job TYPE string DEFAULT "draft"
    ASSERT $value INSIDE ["draft", "ready", "cancel", "done", "error"];
DEFINE FIELD IF NOT EXISTS data ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS message ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS claim_token ON job TYPE option<string>;
DEFINE FIELD IF NOT EXISTS claimed_at ON job TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE datetime DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON job TYPE datetime DEFAULT time::now();

-- Indexes for polling
DEFINE INDEX IF NOT EXISTS job_application ON job FIELDS application_id;
DEFINE INDEX IF NOT EXISTS job_state ON job FIELDS state;
DEFINE INDEX IF NOT EXISTS job_ready ON job FIELDS state, application_id;
"#;
