use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::model::{CancelOutcome, ExecutionRecord, ExecutionStatus};
use serde_json::Value;

/// Read-through cache of execution records. Every failure is remembered in
/// `last_error` and returned to the caller.
pub struct ExecutionStore {
    api: ApiClient,
    executions: Vec<ExecutionRecord>,
    current: Option<ExecutionRecord>,
    last_error: Option<String>,
}

fn require_id(id: &str) -> Result<(), ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::InvalidArgument(
            "Invalid execution ID: empty".to_string(),
        ));
    }
    Ok(())
}

impl ExecutionStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            executions: Vec::new(),
            current: None,
            last_error: None,
        }
    }

    pub fn executions(&self) -> &[ExecutionRecord] {
        &self.executions
    }

    pub fn current(&self) -> Option<&ExecutionRecord> {
        self.current.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record<T>(&mut self, result: Result<T, ApiError>) -> Result<T, ApiError> {
        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }
        result
    }

    pub async fn fetch_executions(&mut self) -> Result<&[ExecutionRecord], ApiError> {
        let result = self
            .api
            .send_json::<Vec<ExecutionRecord>>(ApiRequest::get("/executions"))
            .await;
        self.executions = self.record(result)?;
        Ok(&self.executions)
    }

    pub async fn get_execution(&mut self, id: &str) -> Result<&ExecutionRecord, ApiError> {
        let result = self.fetch_one(id).await;
        let record = self.record(result)?;
        Ok(self.current.insert(record))
    }

    /// Fetch the latest copy and merge it into the current record when the ids
    /// match. Returns the fresh copy.
    pub async fn refresh_status(&mut self, id: &str) -> Result<ExecutionRecord, ApiError> {
        let result = self.fetch_one(id).await;
        let fresh = self.record(result)?;
        if let Some(current) = self.current.as_mut().filter(|c| c.id == id) {
            current.merge(fresh.clone());
        }
        if let Some(listed) = self.executions.iter_mut().find(|e| e.id == id) {
            listed.merge(fresh.clone());
        }
        Ok(fresh)
    }

    pub async fn get_report(&mut self, id: &str) -> Result<Value, ApiError> {
        let result = match require_id(id) {
            Ok(()) => {
                self.api
                    .send_json::<Value>(
                        ApiRequest::get("/executions").segment(id).segment("report"),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        self.record(result)
    }

    /// A 200 answer can still be a failed cancellation; only a real success
    /// marks the cached copies cancelled.
    pub async fn cancel(&mut self, id: &str) -> Result<CancelOutcome, ApiError> {
        let result = match require_id(id) {
            Ok(()) => {
                tracing::info!("Cancelling execution {id}");
                match self
                    .api
                    .send(ApiRequest::post("/executions").segment(id).segment("cancel"))
                    .await
                {
                    Ok(resp) => resp.value(),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };
        let body = self.record(result)?;

        let message = body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string);
        if body.get("status").and_then(Value::as_str)
            == Some(ExecutionStatus::CancellationFailed.as_str())
        {
            tracing::warn!("Cancellation failed for execution {id}");
            return Ok(CancelOutcome::Failed { message, body });
        }

        if let Some(current) = self.current.as_mut().filter(|c| c.id == id) {
            current.status = ExecutionStatus::Cancelled;
        }
        if let Some(listed) = self.executions.iter_mut().find(|e| e.id == id) {
            listed.status = ExecutionStatus::Cancelled;
        }
        Ok(CancelOutcome::Cancelled { message })
    }

    async fn fetch_one(&self, id: &str) -> Result<ExecutionRecord, ApiError> {
        require_id(id)?;
        self.api
            .send_json(ApiRequest::get("/executions").segment(id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{ok, status, ScriptedTransport};
    use crate::session::guard::{CommandNavigator, View};
    use crate::session::store::MemoryTokenStore;
    use crate::session::SessionContext;
    use serde_json::json;
    use std::sync::Arc;

    fn store(transport: ScriptedTransport) -> (ExecutionStore, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let session = Arc::new(SessionContext::open(Box::new(MemoryTokenStore::with_token(
            "T0",
        ))));
        let api = ApiClient::new(
            transport.clone(),
            session,
            Arc::new(CommandNavigator::new(View::Executions)),
        );
        (ExecutionStore::new(api), transport)
    }

    #[tokio::test]
    async fn cancellation_failed_does_not_mark_cancelled() {
        let (mut s, _) = store(
            ScriptedTransport::new()
                .on("GET /executions/E1", ok(json!({"id": "E1", "status": "running"})))
                .on("GET /executions", ok(json!([{"id": "E1", "status": "running"}])))
                .on(
                    "POST /executions/E1/cancel",
                    ok(json!({"status": "cancellation_failed"})),
                ),
        );
        s.fetch_executions().await.unwrap();
        s.get_execution("E1").await.unwrap();
        let out = s.cancel("E1").await.unwrap();
        assert!(matches!(out, CancelOutcome::Failed { .. }));
        assert_eq!(s.current().unwrap().status, ExecutionStatus::Running);
        assert_eq!(s.executions()[0].status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn successful_cancel_marks_current_and_listed() {
        let (mut s, _) = store(
            ScriptedTransport::new()
                .on("GET /executions/E1", ok(json!({"id": "E1", "status": "running"})))
                .on(
                    "GET /executions",
                    ok(json!([{"id": "E0", "status": "completed"}, {"id": "E1", "status": "running"}])),
                )
                .on(
                    "POST /executions/E1/cancel",
                    ok(json!({"status": "cancelled", "execution_id": "E1", "message": "Job deleted"})),
                ),
        );
        s.fetch_executions().await.unwrap();
        s.get_execution("E1").await.unwrap();
        let out = s.cancel("E1").await.unwrap();
        assert_eq!(
            out,
            CancelOutcome::Cancelled {
                message: Some("Job deleted".into())
            }
        );
        assert_eq!(s.current().unwrap().status, ExecutionStatus::Cancelled);
        assert_eq!(s.executions()[1].status, ExecutionStatus::Cancelled);
        assert_eq!(s.executions()[0].status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn conflict_on_cancel_is_an_error() {
        let (mut s, _) = store(ScriptedTransport::new().on(
            "POST /executions/E1/cancel",
            status(409, json!({"detail": "Cannot cancel execution in 'completed' state"})),
        ));
        let err = s.cancel("E1").await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot cancel execution in 'completed' state");
        assert_eq!(
            s.last_error(),
            Some("Cannot cancel execution in 'completed' state")
        );
    }

    #[tokio::test]
    async fn empty_id_is_rejected_before_any_request() {
        let (mut s, transport) = store(ScriptedTransport::new());
        assert!(matches!(
            s.cancel("").await,
            Err(ApiError::InvalidArgument(_))
        ));
        assert!(matches!(
            s.get_report("  ").await,
            Err(ApiError::InvalidArgument(_))
        ));
        assert!(matches!(
            s.get_execution("").await,
            Err(ApiError::InvalidArgument(_))
        ));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn refresh_merges_into_current() {
        let (mut s, _) = store(
            ScriptedTransport::new()
                .on(
                    "GET /executions/E1",
                    ok(json!({"id": "E1", "status": "running", "notebook_path": "a.ipynb"})),
                )
                .on(
                    "GET /executions/E1",
                    ok(json!({"id": "E1", "status": "completed", "output_html": "a.html"})),
                ),
        );
        s.get_execution("E1").await.unwrap();
        let fresh = s.refresh_status("E1").await.unwrap();
        assert_eq!(fresh.status, ExecutionStatus::Completed);
        let current = s.current().unwrap();
        assert_eq!(current.status, ExecutionStatus::Completed);
        assert_eq!(current.notebook_path.as_deref(), Some("a.ipynb"));
        assert_eq!(current.output_html.as_deref(), Some("a.html"));
    }

    #[tokio::test]
    async fn report_is_passed_through() {
        let (mut s, _) = store(ScriptedTransport::new().on(
            "GET /executions/E1/report",
            ok(json!({"outputs": {"total": 42}})),
        ));
        let report = s.get_report("E1").await.unwrap();
        assert_eq!(report["outputs"]["total"], 42);
    }
}
