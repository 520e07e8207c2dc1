use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Profile returned by `/auth/me`, `/auth/register` and `/users/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

fn default_true() -> bool {
    true
}

impl User {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.email)
    }
}

/// `GET /auth/config`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default)]
    pub demo_user: Option<String>,
    #[serde(default)]
    pub emails_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Body of `POST /auth/register`.
#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

/// Body of `PATCH /users/me`; only the populated fields are sent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_password: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.username.is_none()
            && self.full_name.is_none()
            && self.new_password.is_none()
    }
}

/// Body of `PATCH /users/{id}/privileges`. Both flags are always sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserPrivileges {
    pub is_superuser: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Submitted,
    Running,
    Completed,
    Failed,
    Cancelled,
    CancellationFailed,
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Submitted => "submitted",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::CancellationFailed => "cancellation_failed",
            ExecutionStatus::Unknown => "unknown",
        }
    }

    /// No further transitions are expected once one of these is reached.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceHints {
    pub cpu_milli: Option<u32>,
    pub memory_mib: Option<u32>,
}

/// One submission, serialized as the backend's execution-create body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRequest {
    pub notebook_path: String,
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_version: Option<String>,
    #[serde(flatten)]
    pub resources: ResourceHints,
    pub force_rerun: bool,
}

impl ExecutionRequest {
    pub fn new(notebook_path: impl Into<String>) -> Self {
        Self {
            notebook_path: notebook_path.into(),
            parameters: Map::new(),
            python_version: None,
            resources: ResourceHints::default(),
            force_rerun: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOwner {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Backend-owned execution record; the client only ever holds a cached copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub notebook_path: Option<String>,
    #[serde(default)]
    pub notebook_name: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub output_notebook: Option<String>,
    #[serde(default)]
    pub output_html: Option<String>,
    #[serde(default)]
    pub python_version: Option<String>,
    #[serde(default)]
    pub cpu_milli: Option<u32>,
    #[serde(default)]
    pub memory_mib: Option<u32>,
    #[serde(default)]
    pub user: Option<ExecutionOwner>,
}

impl ExecutionRecord {
    /// Overlay a freshly fetched copy; fields the new copy leaves empty keep
    /// their cached values.
    pub fn merge(&mut self, fresh: ExecutionRecord) {
        self.status = fresh.status;
        self.notebook_path = fresh.notebook_path.or(self.notebook_path.take());
        self.notebook_name = fresh.notebook_name.or(self.notebook_name.take());
        if !fresh.parameters.is_empty() {
            self.parameters = fresh.parameters;
        }
        self.created_at = fresh.created_at.or(self.created_at.take());
        self.started_at = fresh.started_at.or(self.started_at.take());
        self.completed_at = fresh.completed_at.or(self.completed_at.take());
        self.error = fresh.error.or(self.error.take());
        self.output_notebook = fresh.output_notebook.or(self.output_notebook.take());
        self.output_html = fresh.output_html.or(self.output_html.take());
        self.python_version = fresh.python_version.or(self.python_version.take());
        self.cpu_milli = fresh.cpu_milli.or(self.cpu_milli);
        self.memory_mib = fresh.memory_mib.or(self.memory_mib);
        self.user = fresh.user.or(self.user.take());
    }
}

/// `POST /executions/check-duplicate`
#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateCheck {
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub original_execution: Option<ExecutionRecord>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Duplicate {
        duplicate_execution: Option<ExecutionRecord>,
        message: String,
    },
    Created {
        execution: ExecutionRecord,
    },
}

/// Result of `POST /executions/{id}/cancel`. A 200 response can still carry
/// `status: "cancellation_failed"`, which is reported as `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled { message: Option<String> },
    Failed { message: Option<String>, body: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookMetadata {
    pub path: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub python_version: String,
    #[serde(default)]
    pub requirements: Map<String, Value>,
    #[serde(default)]
    pub parameters: Vec<Value>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Events emitted while watching an execution.
#[derive(Debug, Clone, Serialize)]
pub enum WatchEvent {
    StatusChanged {
        id: String,
        from: Option<ExecutionStatus>,
        to: ExecutionStatus,
    },
    PollFailed {
        message: String,
        consecutive: u32,
    },
    Finished {
        // Box to keep WatchEvent small.
        execution: Box<ExecutionRecord>,
    },
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_as_execution_create() {
        let mut req = ExecutionRequest::new("reports/daily.ipynb");
        req.parameters.insert("days".into(), json!(7));
        req.resources.cpu_milli = Some(1000);
        req.force_rerun = true;
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(
            v,
            json!({
                "notebook_path": "reports/daily.ipynb",
                "parameters": {"days": 7},
                "cpu_milli": 1000,
                "memory_mib": null,
                "force_rerun": true
            })
        );
    }

    #[test]
    fn unknown_status_does_not_break_decoding() {
        let rec: ExecutionRecord =
            serde_json::from_value(json!({"id": "E9", "status": "queued_elsewhere"})).unwrap();
        assert_eq!(rec.status, ExecutionStatus::Unknown);
        let rec: ExecutionRecord =
            serde_json::from_value(json!({"id": "E9", "status": "cancellation_failed"})).unwrap();
        assert_eq!(rec.status, ExecutionStatus::CancellationFailed);
    }

    #[test]
    fn merge_keeps_cached_fields() {
        let mut cached: ExecutionRecord = serde_json::from_value(json!({
            "id": "E1", "status": "running", "notebook_path": "a.ipynb",
            "parameters": {"x": 1}
        }))
        .unwrap();
        let fresh: ExecutionRecord = serde_json::from_value(json!({
            "id": "E1", "status": "completed", "output_html": "out/a.html"
        }))
        .unwrap();
        cached.merge(fresh);
        assert_eq!(cached.status, ExecutionStatus::Completed);
        assert_eq!(cached.notebook_path.as_deref(), Some("a.ipynb"));
        assert_eq!(cached.output_html.as_deref(), Some("out/a.html"));
        assert_eq!(cached.parameters.get("x"), Some(&json!(1)));
    }

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::CancellationFailed.is_terminal());
    }

    #[test]
    fn display_name_prefers_full_name() {
        let u: User = serde_json::from_value(json!({
            "id": "u1", "email": "a@b.c", "username": "ab", "full_name": "Ada B"
        }))
        .unwrap();
        assert_eq!(u.display_name(), "Ada B");
        let u: User = serde_json::from_value(json!({"id": "u1", "email": "a@b.c"})).unwrap();
        assert_eq!(u.display_name(), "a@b.c");
        assert!(u.is_active);
    }
}
