//! Notebook templates: listing, upload, validation and metadata rewrites.

use crate::api::{ApiClient, ApiError, ApiRequest, FormPart};
use crate::model::NotebookMetadata;
use bytes::Bytes;
use serde_json::Value;
use std::path::Path;

/// A local notebook file ready to be sent as a multipart part.
#[derive(Debug, Clone)]
pub struct NotebookFile {
    pub file_name: String,
    pub bytes: Bytes,
}

impl NotebookFile {
    pub async fn read(path: &Path) -> Result<Self, ApiError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ApiError::Storage(format!("failed to read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "notebook.ipynb".to_string());
        Ok(Self {
            file_name,
            bytes: Bytes::from(bytes),
        })
    }

    fn part(&self) -> FormPart {
        FormPart::file("file", self.file_name.clone(), self.bytes.clone())
    }
}

pub struct NotebookStore {
    api: ApiClient,
    notebooks: Vec<NotebookMetadata>,
    validated: Option<NotebookMetadata>,
    last_error: Option<String>,
}

impl NotebookStore {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            notebooks: Vec::new(),
            validated: None,
            last_error: None,
        }
    }

    pub fn notebooks(&self) -> &[NotebookMetadata] {
        &self.notebooks
    }

    pub fn validated(&self) -> Option<&NotebookMetadata> {
        self.validated.as_ref()
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

    pub async fn list(&mut self, prefix: &str) -> Result<&[NotebookMetadata], ApiError> {
        let result = self
            .api
            .send_json::<Vec<NotebookMetadata>>(ApiRequest::get("/notebooks").query("prefix", prefix))
            .await;
        self.notebooks = self.record(result)?;
        Ok(&self.notebooks)
    }

    pub async fn get(&mut self, path: &str) -> Result<NotebookMetadata, ApiError> {
        let result = if path.trim().is_empty() {
            Err(ApiError::InvalidArgument("Notebook path is required".to_string()))
        } else {
            self.api
                .send_json(ApiRequest::get("/notebooks").segment(path))
                .await
        };
        self.record(result)
    }

    /// Upload, then refresh the listing so it includes the new notebook.
    pub async fn upload(&mut self, file: &NotebookFile) -> Result<Value, ApiError> {
        let result = self
            .api
            .send_json::<Value>(ApiRequest::post("/notebooks/upload").multipart(vec![file.part()]))
            .await;
        let uploaded = self.record(result)?;
        self.list("").await?;
        Ok(uploaded)
    }

    pub async fn validate(&mut self, file: &NotebookFile) -> Result<&NotebookMetadata, ApiError> {
        let result = self
            .api
            .send_json::<NotebookMetadata>(
                ApiRequest::post("/notebooks/validate").multipart(vec![file.part()]),
            )
            .await;
        let metadata = self.record(result)?;
        Ok(self.validated.insert(metadata))
    }

    /// Returns the rewritten notebook bytes.
    pub async fn update_metadata(
        &mut self,
        file: &NotebookFile,
        metadata: &Value,
    ) -> Result<Bytes, ApiError> {
        let request = ApiRequest::post("/notebooks/update-metadata").multipart(vec![
            file.part(),
            FormPart::text("metadata", metadata.to_string()),
        ]);
        let result = self.api.send(request).await.map(|resp| resp.body);
        self.record(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{ok, raw, status, ScriptedTransport};
    use crate::api::transport::{PartValue, RequestBody};
    use crate::session::guard::{CommandNavigator, View};
    use crate::session::store::MemoryTokenStore;
    use crate::session::SessionContext;
    use serde_json::json;
    use std::sync::Arc;

    fn store(transport: ScriptedTransport) -> (NotebookStore, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let session = Arc::new(SessionContext::open(Box::new(MemoryTokenStore::with_token(
            "T0",
        ))));
        let api = ApiClient::new(
            transport.clone(),
            session,
            Arc::new(CommandNavigator::new(View::Notebooks)),
        );
        (NotebookStore::new(api), transport)
    }

    fn file() -> NotebookFile {
        NotebookFile {
            file_name: "daily.ipynb".into(),
            bytes: Bytes::from_static(br#"{"cells": []}"#),
        }
    }

    fn listed() -> serde_json::Value {
        json!([{
            "path": "templates/daily.ipynb",
            "name": "Daily",
            "description": "Daily report",
            "tags": ["report"],
            "python_version": "3.11",
            "requirements": {"pandas": ">=2"},
            "parameters": [{"name": "days", "type": "int", "default": 7}],
            "last_modified": "2024-05-01T10:00:00",
            "size": 2048
        }])
    }

    #[tokio::test]
    async fn list_sends_prefix_and_caches() {
        let (mut s, transport) = store(ScriptedTransport::new().on("GET /notebooks", ok(listed())));
        let notebooks = s.list("reports").await.unwrap();
        assert_eq!(notebooks.len(), 1);
        assert_eq!(notebooks[0].name, "Daily");
        assert_eq!(s.notebooks()[0].size, Some(2048));
        let sent = transport.last("GET /notebooks").unwrap();
        assert_eq!(sent.query, vec![("prefix".to_string(), "reports".to_string())]);
    }

    #[tokio::test]
    async fn get_keeps_path_as_one_segment() {
        let (mut s, transport) = store(ScriptedTransport::new().on(
            "GET /notebooks/templates/daily.ipynb",
            ok(listed()[0].clone()),
        ));
        let nb = s.get("templates/daily.ipynb").await.unwrap();
        assert_eq!(nb.path, "templates/daily.ipynb");
        let sent = transport.requests().pop().unwrap();
        assert_eq!(sent.segments, vec!["notebooks", "templates/daily.ipynb"]);
    }

    #[tokio::test]
    async fn upload_refreshes_listing() {
        let (mut s, transport) = store(
            ScriptedTransport::new()
                .on("POST /notebooks/upload", ok(json!({"path": "templates/daily.ipynb", "filename": "daily.ipynb", "metadata": {}})))
                .on("GET /notebooks", ok(listed())),
        );
        s.upload(&file()).await.unwrap();
        assert_eq!(transport.calls("GET /notebooks"), 1);
        assert_eq!(s.notebooks().len(), 1);
        match transport.last("POST /notebooks/upload").unwrap().body {
            RequestBody::Multipart(parts) => {
                assert_eq!(parts.len(), 1);
                assert_eq!(parts[0].name, "file");
                assert!(matches!(
                    &parts[0].value,
                    PartValue::File { file_name, .. } if file_name == "daily.ipynb"
                ));
            }
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validate_caches_result_and_records_errors() {
        let (mut s, _) = store(
            ScriptedTransport::new()
                .on("POST /notebooks/validate", ok(listed()[0].clone()))
                .on(
                    "POST /notebooks/validate",
                    status(400, json!({"detail": "Invalid notebook format"})),
                ),
        );
        assert_eq!(s.validate(&file()).await.unwrap().name, "Daily");
        assert!(s.validated().is_some());
        let err = s.validate(&file()).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid notebook format");
        assert_eq!(s.last_error(), Some("Invalid notebook format"));
    }

    #[tokio::test]
    async fn update_metadata_returns_raw_bytes() {
        let (mut s, transport) = store(ScriptedTransport::new().on(
            "POST /notebooks/update-metadata",
            raw(200, br#"{"cells": [], "metadata": {"name": "Daily"}}"#),
        ));
        let bytes = s
            .update_metadata(&file(), &json!({"name": "Daily"}))
            .await
            .unwrap();
        assert!(bytes.starts_with(br#"{"cells""#));
        match transport.last("POST /notebooks/update-metadata").unwrap().body {
            RequestBody::Multipart(parts) => {
                assert_eq!(parts[1].name, "metadata");
                assert!(matches!(
                    &parts[1].value,
                    PartValue::Text(t) if t == r#"{"name":"Daily"}"#
                ));
            }
            other => panic!("expected multipart, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn read_missing_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = NotebookFile::read(&dir.path().join("missing.ipynb"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Storage(_)));
    }
}
