use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::model::{DuplicateCheck, ExecutionRecord, ExecutionRequest, SubmitOutcome};
use serde_json::Value;

const DEFAULT_DUPLICATE_MESSAGE: &str = "Duplicate execution found";

/// The shapes `POST /executions` is known to answer with.
#[derive(Debug, PartialEq)]
enum SubmissionResponse {
    /// `{is_duplicate: true, original_execution | execution, message}`
    Duplicate {
        execution: Option<ExecutionRecord>,
        message: String,
    },
    /// `{execution: {...}}`
    Wrapped(ExecutionRecord),
    /// The record itself, recognised by its `id`.
    Flat(ExecutionRecord),
}

impl SubmissionResponse {
    fn decode(body: Value) -> Result<Self, ApiError> {
        if body.get("is_duplicate").and_then(Value::as_bool) == Some(true) {
            let record = body
                .get("original_execution")
                .filter(|v| !v.is_null())
                .or_else(|| body.get("execution").filter(|v| !v.is_null()))
                .map(|v| record_from(v.clone()))
                .transpose()?;
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_DUPLICATE_MESSAGE)
                .to_string();
            return Ok(SubmissionResponse::Duplicate {
                execution: record,
                message,
            });
        }

        if let Some(inner) = body.get("execution").filter(|v| v.is_object()) {
            return Ok(SubmissionResponse::Wrapped(record_from(inner.clone())?));
        }
        if body.get("id").is_some() {
            return Ok(SubmissionResponse::Flat(record_from(body)?));
        }
        Err(ApiError::Contract("execution data not found".to_string()))
    }
}

fn record_from(value: Value) -> Result<ExecutionRecord, ApiError> {
    serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Submits executions, consulting the duplicate check first unless the
/// request forces a rerun. The server may still report a duplicate on submit,
/// and that answer wins.
pub struct ExecutionSubmitter {
    api: ApiClient,
    last_error: Option<String>,
}

impl ExecutionSubmitter {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            last_error: None,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub async fn submit(&mut self, request: &ExecutionRequest) -> Result<SubmitOutcome, ApiError> {
        let result = self.submit_inner(request).await;
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    async fn submit_inner(&self, request: &ExecutionRequest) -> Result<SubmitOutcome, ApiError> {
        let body = serde_json::to_value(request).map_err(|e| ApiError::request(e.to_string()))?;

        if request.force_rerun {
            tracing::debug!("Skipping duplicate check because force_rerun=true");
        } else {
            let check: DuplicateCheck = self
                .api
                .send_json(ApiRequest::post("/executions/check-duplicate").json(body.clone()))
                .await?;
            if check.is_duplicate {
                tracing::info!("Duplicate found by duplicate check for {}", request.notebook_path);
                return Ok(SubmitOutcome::Duplicate {
                    duplicate_execution: check.original_execution,
                    message: check
                        .message
                        .unwrap_or_else(|| DEFAULT_DUPLICATE_MESSAGE.to_string()),
                });
            }
        }

        let resp = self
            .api
            .send(ApiRequest::post("/executions").json(body))
            .await?;
        match SubmissionResponse::decode(resp.value()?)? {
            SubmissionResponse::Duplicate { execution, message } => {
                tracing::info!(
                    "Duplicate reported on submit{}",
                    if request.force_rerun { " despite force_rerun" } else { "" }
                );
                Ok(SubmitOutcome::Duplicate {
                    duplicate_execution: execution,
                    message,
                })
            }
            SubmissionResponse::Wrapped(execution) => Ok(SubmitOutcome::Created { execution }),
            SubmissionResponse::Flat(execution) => {
                tracing::warn!("Execution returned without wrapper; accepting flat record");
                Ok(SubmitOutcome::Created { execution })
            }
        }
    }
}
