//! Application repository for CRUD operations and run-token bookkeeping.

use chrono::{DateTime, Utc};
use integration_core::{Application, ApplicationId, RunToken};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{DbError, get_db};

/// Repository for application persistence operations.
pub struct ApplicationRepository;

/// Internal record type for SurrealDB reads.
#[derive(Debug, Deserialize)]
struct ApplicationRecord {
    id: Thing,
    name: String,
    description: Option<String>,
    user_id: String,
    handler_model: String,
    handler_function: String,
    args: Option<String>,
    priority: i64,
    active: bool,
    checkpoint: bool,
    autostart: bool,
    thread_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    fn into_application(self) -> Result<Application, DbError> {
        let raw_id = self.id.id.to_raw();
        let id = ApplicationId::parse(&raw_id)
            .map_err(|e| DbError::Serialization(format!("application id {raw_id}: {e}")))?;

        // A malformed token cannot belong to any live worker.
        let thread_token = self
            .thread_token
            .as_deref()
            .and_then(|t| RunToken::parse(t).ok());

        Ok(Application {
            id,
            name: self.name,
            description: self.description,
            user_id: self.user_id,
            model: self.handler_model,
            function: self.handler_function,
            args: self.args,
            priority: self.priority,
            active: self.active,
            checkpoint: self.checkpoint,
            autostart: self.autostart,
            thread_token,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn into_applications(records: Vec<ApplicationRecord>) -> Result<Vec<Application>, DbError> {
    records
        .into_iter()
        .map(ApplicationRecord::into_application)
        .collect()
}

/// Struct for creating applications - omits datetime fields and the run token
/// so SurrealDB defaults apply.
#[derive(Debug, Clone, Serialize)]
struct ApplicationCreate {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    user_id: String,
    handler_model: String,
    handler_function: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<String>,
    priority: i64,
    active: bool,
    checkpoint: bool,
    autostart: bool,
}

impl ApplicationRepository {
    /// Create a new application. Fails if the name is already taken.
    pub async fn create(application: &Application) -> Result<Application, DbError> {
        let db = get_db()?;
        let application_id = application.id.to_string();

        let create_data = ApplicationCreate {
            name: application.name.clone(),
            description: application.description.clone(),
            user_id: application.user_id.clone(),
            handler_model: application.model.clone(),
            handler_function: application.function.clone(),
            args: application.args.clone(),
            priority: application.priority,
            active: application.active,
            checkpoint: application.checkpoint,
            autostart: application.autostart,
        };

        let record: Option<ApplicationRecord> = db
            .create(("application", application_id.as_str()))
            .content(create_data)
            .await?;

        let mut created = record
            .ok_or_else(|| DbError::Query("Failed to create application".into()))?
            .into_application()?;

        // The token is runtime state; restore it if the caller seeded one.
        if let Some(token) = application.thread_token {
            created = Self::set_thread_token(created.id, token).await?;
        }

        Ok(created)
    }

    /// Get an application by ID.
    pub async fn get(id: ApplicationId) -> Result<Application, DbError> {
        Self::find(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Application not found: {}", id)))
    }

    /// Get an application by ID, `None` if it does not exist.
    pub async fn find(id: ApplicationId) -> Result<Option<Application>, DbError> {
        let db = get_db()?;

        let record: Option<ApplicationRecord> =
            db.select(("application", id.to_string())).await?;

        record.map(ApplicationRecord::into_application).transpose()
    }

    /// Get an application by its unique name.
    pub async fn get_by_name(name: &str) -> Result<Application, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM application WHERE name = $name LIMIT 1")
            .bind(("name", name.to_string()))
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;

        into_applications(records)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Application not found: {}", name)))
    }

    /// List all applications.
    pub async fn list() -> Result<Vec<Application>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM application ORDER BY priority ASC, name ASC")
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;
        into_applications(records)
    }

    /// List active applications, highest priority first.
    pub async fn list_active() -> Result<Vec<Application>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query(
                "SELECT * FROM application WHERE active = true ORDER BY priority ASC, name ASC",
            )
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;
        into_applications(records)
    }

    /// List applications whose worker must be started with the process.
    pub async fn list_autostart() -> Result<Vec<Application>, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT * FROM application WHERE autostart = true ORDER BY priority ASC, name ASC")
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;
        into_applications(records)
    }

    /// Record the run token of a freshly started worker.
    pub async fn set_thread_token(
        id: ApplicationId,
        token: RunToken,
    ) -> Result<Application, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPDATE type::thing('application', $id) SET thread_token = $run_token, updated_at = time::now() RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("run_token", token.to_string()))
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;

        into_applications(records)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Application not found: {}", id)))
    }

    /// Clear the run token unconditionally. Missing applications are ignored.
    pub async fn clear_thread_token(id: ApplicationId) -> Result<(), DbError> {
        let db = get_db()?;

        db.query("UPDATE type::thing('application', $id) SET thread_token = NONE, updated_at = time::now()")
            .bind(("id", id.to_string()))
            .await?
            .check()?;

        Ok(())
    }

    /// Clear the run token only if it still points at `token`.
    ///
    /// Returns whether a token was cleared. A newer worker started in the
    /// meantime keeps its token.
    pub async fn clear_thread_token_if(
        id: ApplicationId,
        token: RunToken,
    ) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPDATE type::thing('application', $id) SET thread_token = NONE, updated_at = time::now() WHERE thread_token = $run_token RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("run_token", token.to_string()))
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;
        Ok(!records.is_empty())
    }

    /// Activate or deactivate an application.
    pub async fn set_active(id: ApplicationId, active: bool) -> Result<Application, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPDATE type::thing('application', $id) SET active = $active, updated_at = time::now() RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("active", active))
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;

        into_applications(records)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Application not found: {}", id)))
    }

    /// Toggle whether the application's worker starts with the process.
    pub async fn set_autostart(id: ApplicationId, autostart: bool) -> Result<Application, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("UPDATE type::thing('application', $id) SET autostart = $autostart, updated_at = time::now() RETURN AFTER")
            .bind(("id", id.to_string()))
            .bind(("autostart", autostart))
            .await?;

        let records: Vec<ApplicationRecord> = result.take(0)?;

        into_applications(records)?
            .into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Application not found: {}", id)))
    }

    /// Delete an application.
    pub async fn delete(id: ApplicationId) -> Result<(), DbError> {
        let db = get_db()?;

        let _: Option<ApplicationRecord> = db.delete(("application", id.to_string())).await?;

        Ok(())
    }

    /// Check if an application name exists.
    pub async fn name_exists(name: &str) -> Result<bool, DbError> {
        let db = get_db()?;

        let mut result = db
            .query("SELECT count() FROM application WHERE name = $name GROUP ALL")
            .bind(("name", name.to_string()))
            .await?;

        #[derive(Deserialize)]
        struct CountResult {
            count: i64,
        }

        let counts: Vec<CountResult> = result.take(0)?;

        Ok(counts.first().is_some_and(|c| c.count > 0))
    }
}
