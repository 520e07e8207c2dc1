use crate::api::error::ApiError;
use crate::api::transport::{ApiRequest, ApiResponse, Transport};
use crate::session::guard::{Navigator, View};
use crate::session::SessionContext;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// The single HTTP entry point. Every call made through [`ApiClient::send`]
/// carries the session's bearer token, and a 401 drops the token and sends the
/// user to the login view.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionContext>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            transport,
            session,
            navigator,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Send through the interceptors. Non-success statuses come back as a
    /// normalized [`ApiError::Http`].
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, ApiError> {
        if request.bearer.is_none() {
            request.bearer = self.session.token();
        }
        let route = request.route();
        tracing::debug!("-> {route}");

        let resp = match self.transport.send(request).await {
            Ok(resp) => resp,
            Err(e) => {
                if let ApiError::Transport { source_text, .. } = &e {
                    tracing::debug!("{route}: {source_text}");
                }
                return Err(e);
            }
        };
        if resp.is_success() {
            return Ok(resp);
        }

        if resp.status == 401 {
            self.handle_unauthorized();
        }
        let err = ApiError::from_status(resp.status, &resp.body);
        tracing::debug!("{route}: {err}");
        Err(err)
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ApiError> {
        self.send(request).await?.json()
    }

    /// Bypass the interceptors: no implicit token, no 401 redirect, and any
    /// status is returned as-is. The auth flows validate tokens themselves.
    pub async fn send_unguarded(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let route = request.route();
        tracing::debug!("-> {route} (unguarded)");
        self.transport.send(request).await
    }

    /// Navigate to the login view unless already there.
    pub fn redirect_to_login(&self) {
        if self.navigator.current_view() != View::Login {
            self.navigator.go_to_login();
        }
    }

    fn handle_unauthorized(&self) {
        self.session.clear_token();
        self.redirect_to_login();
    }
}
