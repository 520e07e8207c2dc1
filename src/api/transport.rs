//! Wire-level request/response types and the HTTP transport.
//!
//! The gateway only talks to a [`Transport`]; the production implementation wraps a
//! shared `reqwest::Client` bound to the versioned API base URL.

use crate::api::error::ApiError;
use crate::config::Config;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<FormPart>),
}

#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    pub value: PartValue,
}

#[derive(Debug, Clone)]
pub enum PartValue {
    Text(String),
    File { file_name: String, bytes: Bytes },
}

impl FormPart {
    pub fn text(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: PartValue::Text(value.into()),
        }
    }

    pub fn file(name: &str, file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.to_string(),
            value: PartValue::File {
                file_name: file_name.into(),
                bytes: bytes.into(),
            },
        }
    }
}

/// A request relative to the API base. Path segments are kept unencoded and
/// percent-encoded individually by the transport, so a notebook path such as
/// `reports/daily.ipynb` travels as a single segment.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub segments: Vec<String>,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub bearer: Option<String>,
}

impl ApiRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            segments: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            query: Vec::new(),
            body: RequestBody::Empty,
            bearer: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: &str) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = RequestBody::Form(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    /// `METHOD /a/b` form, used for logging and request matching.
    pub fn route(&self) -> String {
        format!("{} /{}", self.method, self.segments.join("/"))
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// The body as JSON, or `Null` when empty.
    pub fn value(&self) -> Result<Value, ApiError> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        self.json()
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one request. `Err` means no response was obtained; any status code,
    /// including 4xx/5xx, comes back as `Ok`.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(cfg: &Config) -> Result<Self, ApiError> {
        let base_url = Url::parse(&cfg.api_base_url())
            .map_err(|e| ApiError::request(format!("invalid API URL {}: {e}", cfg.api_url)))?;
        let http = reqwest::Client::builder()
            .user_agent(format!("nbrun/{}", env!("CARGO_PKG_VERSION")))
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| ApiError::request(e.to_string()))?;
        Ok(Self { http, base_url })
    }

    fn url_for(&self, request: &ApiRequest) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::request("API URL cannot be a base"))?;
            path.pop_if_empty();
            for segment in &request.segments {
                path.push(segment);
            }
        }
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let url = self.url_for(&request)?;
        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(token) = request.bearer.as_deref() {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart(parts) => {
                let mut form = multipart::Form::new();
                for part in parts {
                    form = match part.value {
                        PartValue::Text(text) => form.text(part.name, text),
                        PartValue::File { file_name, bytes } => form.part(
                            part.name,
                            multipart::Part::stream(bytes).file_name(file_name),
                        ),
                    };
                }
                builder.multipart(form)
            }
        };

        let resp = builder.send().await.map_err(|e| {
            if e.is_builder() {
                ApiError::request(e.to_string())
            } else {
                ApiError::transport(e)
            }
        })?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await.map_err(ApiError::transport)?;
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(api_url: &str) -> HttpTransport {
        let cfg = Config {
            api_url: api_url.to_string(),
            ..Config::default()
        };
        HttpTransport::new(&cfg).unwrap()
    }

    #[test]
    fn notebook_path_is_a_single_encoded_segment() {
        let t = transport("http://localhost:8000");
        let req = ApiRequest::get("/notebooks").segment("reports/daily run.ipynb");
        let url = t.url_for(&req).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/api/v1/notebooks/reports%2Fdaily%20run.ipynb"
        );
    }

    #[test]
    fn query_is_appended() {
        let t = transport("https://nb.example.com/api/v1");
        let req = ApiRequest::get("/notebooks").query("prefix", "");
        let url = t.url_for(&req).unwrap();
        assert_eq!(url.as_str(), "https://nb.example.com/api/v1/notebooks?prefix=");
    }

    #[test]
    fn route_formats_method_and_path() {
        let req = ApiRequest::post("/executions/").segment("E1").segment("cancel");
        assert_eq!(req.route(), "POST /executions/E1/cancel");
    }
}
