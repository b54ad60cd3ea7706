//! Application domain types: the registered targets that own jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub Ulid);

impl ApplicationId {
    /// Create a new unique application ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse an application ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for ApplicationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token correlating a started worker with the record that launched it.
///
/// A fresh token is minted for every start; it is never reused, so a stale
/// token left behind by a crashed process can never match a live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunToken(pub Ulid);

impl RunToken {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handler target of an application: the `(model, function)` pair that
/// identifies the callable invoked for each of its jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerKey {
    /// Logical namespace, e.g. `res.partner`.
    pub model: String,
    /// Entry point name inside the namespace.
    pub function: String,
}

impl HandlerKey {
    pub fn new(model: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            function: function.into(),
        }
    }

    /// Both halves are set.
    pub fn is_complete(&self) -> bool {
        !self.model.trim().is_empty() && !self.function.trim().is_empty()
    }
}

impl std::fmt::Display for HandlerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.model, self.function)
    }
}

/// A registered integration target.
///
/// Inactive applications are invisible to workers. `thread_token` is an
/// advisory pointer to the worker currently running for this application;
/// the supervisor's in-memory bookkeeping decides whether it is really alive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Unique identifier for this application.
    pub id: ApplicationId,
    /// Unique human-readable name.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning user reference.
    pub user_id: String,
    /// Model the handler lives on.
    pub model: String,
    /// Handler entry point.
    pub function: String,
    /// Free-form parameters forwarded to the handler.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    /// Lower value means higher priority.
    pub priority: i64,
    pub active: bool,
    /// Jobs must be promoted to ready by hand rather than queued directly.
    pub checkpoint: bool,
    /// Restart a worker for this application whenever the process starts.
    pub autostart: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_token: Option<RunToken>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Create a new active application targeting `model.function`.
    pub fn new(
        name: impl Into<String>,
        user_id: impl Into<String>,
        model: impl Into<String>,
        function: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ApplicationId::new(),
            name: name.into(),
            description: None,
            user_id: user_id.into(),
            model: model.into(),
            function: function.into(),
            args: None,
            priority: 0,
            active: true,
            checkpoint: false,
            autostart: false,
            thread_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: bool) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    pub fn with_autostart(mut self, autostart: bool) -> Self {
        self.autostart = autostart;
        self
    }

    /// The `(model, function)` pair jobs of this application are dispatched to.
    pub fn handler_key(&self) -> HandlerKey {
        HandlerKey::new(&self.model, &self.function)
    }

    /// Whether the stored token points at the given worker.
    pub fn is_claimed_by(&self, token: RunToken) -> bool {
        self.thread_token == Some(token)
    }
}
