use serde_json::Value;
use thiserror::Error;

pub(crate) const NETWORK_MESSAGE: &str =
    "No response from server. Please check your network connection.";
const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred.";

/// Every failure the API layer can surface, already normalized into a
/// human-readable message at the gateway.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was sent but no response came back.
    #[error("{message}")]
    Transport { message: String, source_text: String },

    /// The backend answered with a non-success status.
    #[error("{message}")]
    Http {
        status: u16,
        message: String,
        detail: Option<Value>,
    },

    /// The body parsed but did not have any of the documented shapes.
    #[error("Invalid API response: {0}")]
    Contract(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("No authentication token available")]
    NotAuthenticated,

    #[error("{0}")]
    Storage(String),

    /// The request could not be built or sent at all.
    #[error("{0}")]
    Request(String),
}

impl ApiError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        ApiError::Transport {
            message: NETWORK_MESSAGE.to_string(),
            source_text: err.to_string(),
        }
    }

    pub fn request(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.trim().is_empty() {
            ApiError::Request(UNEXPECTED_MESSAGE.to_string())
        } else {
            ApiError::Request(raw)
        }
    }

    /// Build an `Http` error from a status and the (possibly non-JSON) body.
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let parsed: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let detail = parsed.get("detail").cloned();
        ApiError::Http {
            status,
            message: describe_status(status, &parsed),
            detail,
        }
    }

    /// Like `from_status` but prefers the backend `detail` string over the
    /// generic table, falling back to `fallback`. Used by the auth flows.
    pub fn with_detail_or(status: u16, body: &[u8], fallback: &str) -> Self {
        let parsed: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
        let detail = parsed.get("detail").cloned();
        let message = detail
            .as_ref()
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.to_string());
        ApiError::Http {
            status,
            message,
            detail,
        }
    }

    /// Rewrite an already-normalized `Http` error the way the auth flows
    /// report it: the backend `detail` string if there is one, else `fallback`.
    /// Other variants pass through.
    pub fn detail_or(self, fallback: &str) -> Self {
        match self {
            ApiError::Http { status, detail, .. } => {
                let message = detail
                    .as_ref()
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| fallback.to_string());
                ApiError::Http {
                    status,
                    message,
                    detail,
                }
            }
            other => other,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The raw backend `detail`, for callers that want more than the message.
    pub fn detail(&self) -> Option<&Value> {
        match self {
            ApiError::Http { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

fn detail_str(body: &Value) -> Option<String> {
    body.get("detail")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Status-code keyed message table.
pub(crate) fn describe_status(status: u16, body: &Value) -> String {
    match status {
        400 => detail_str(body)
            .unwrap_or_else(|| "Invalid request. Please check your input.".to_string()),
        401 => "Authentication required. Please log in.".to_string(),
        403 => "You do not have permission to perform this action.".to_string(),
        404 => "The requested resource was not found.".to_string(),
        422 => match body.get("detail") {
            Some(Value::Array(items)) => join_field_errors(items),
            _ => detail_str(body)
                .unwrap_or_else(|| "Validation error. Please check your input.".to_string()),
        },
        s if s >= 500 => "A server error occurred. Please try again later.".to_string(),
        s => detail_str(body).unwrap_or_else(|| format!("Error: {s}")),
    }
}

/// `[{loc: ["body", "notebook_path"], msg: "..."}]` -> `body.notebook_path: ...`
fn join_field_errors(items: &[Value]) -> String {
    items
        .iter()
        .map(|item| {
            let loc = item
                .get("loc")
                .and_then(Value::as_array)
                .map(|parts| {
                    parts
                        .iter()
                        .map(|p| match p {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(".")
                })
                .unwrap_or_default();
            let msg = item.get("msg").and_then(Value::as_str).unwrap_or_default();
            format!("{loc}: {msg}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}
