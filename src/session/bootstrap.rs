use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::model::{AuthConfig, NewUser, TokenResponse, User, UserUpdate};
use crate::session::{token_preview, SessionContext};
use serde_json::json;
use std::sync::Arc;

/// Fresh demo tokens requested when a user fetch fails in demo mode.
const DEMO_TOKEN_RETRIES: usize = 1;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub remember_me: bool,
}

/// Resolves demo mode vs normal authentication and owns every flow that
/// writes the session token.
pub struct SessionBootstrapper {
    api: ApiClient,
    session: Arc<SessionContext>,
}

impl SessionBootstrapper {
    pub fn new(api: ApiClient, session: Arc<SessionContext>) -> Self {
        Self { api, session }
    }

    /// Validate a stored token, or fall back to demo mode, or stay anonymous.
    ///
    /// Only a transport failure while exchanging for a demo token is returned
    /// as an error; every other way of ending up without a session is `Ok`.
    pub async fn init(&self) -> Result<Option<User>, ApiError> {
        if let Some(token) = self.session.token() {
            match self.fetch_user_with(&token).await {
                Ok(user) => {
                    self.session.set_user(Some(user));
                    match self.fetch_auth_config().await {
                        Ok(cfg) => {
                            self.session.set_demo_mode(cfg.demo_mode);
                            self.session.mark_demo_checked();
                            tracing::debug!("Demo mode status: {}", cfg.demo_mode);
                        }
                        Err(e) => tracing::warn!("Failed to check demo mode config: {e}"),
                    }
                    return Ok(self.session.user());
                }
                Err(e) => {
                    tracing::warn!("Token validation failed: {e}");
                    self.session.teardown();
                }
            }
        }

        self.check_and_setup_demo_mode().await?;
        Ok(self.session.user())
    }

    /// Returns `true` when a demo session was established.
    pub async fn check_and_setup_demo_mode(&self) -> Result<bool, ApiError> {
        tracing::debug!("Checking for demo mode");
        let cfg = match self.fetch_auth_config().await {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("Demo mode setup failed: {e}");
                self.session.set_demo_mode(false);
                return Ok(false);
            }
        };
        self.session.mark_demo_checked();

        if !cfg.demo_mode {
            tracing::debug!("Demo mode is not enabled");
            self.session.set_demo_mode(false);
            return Ok(false);
        }

        tracing::info!("Demo mode is enabled, requesting demo token");
        self.session.set_demo_mode(true);
        let token = match self.request_demo_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Demo mode setup failed: {e}");
                self.session.set_demo_mode(false);
                if matches!(e, ApiError::Transport { .. }) {
                    return Err(e);
                }
                return Ok(false);
            }
        };
        self.session.set_token(token.clone());

        match self.fetch_user_with(&token).await {
            Ok(user) => {
                tracing::info!("Demo user authenticated: {}", user.email);
                self.session.set_user(Some(user));
                Ok(true)
            }
            Err(e) => {
                tracing::warn!("Failed to authenticate with demo token: {e}");
                self.session.clear_token();
                Ok(false)
            }
        }
    }

    /// Load the profile for the current token. In demo mode a failed fetch is
    /// retried with a fresh demo token, at most [`DEMO_TOKEN_RETRIES`] times;
    /// if every attempt fails the first failure is returned.
    pub async fn fetch_current_user(&self) -> Result<User, ApiError> {
        let mut retries_left = if self.session.demo_mode() {
            DEMO_TOKEN_RETRIES
        } else {
            0
        };
        let mut failure: Option<ApiError> = None;

        loop {
            match self.fetch_user_once().await {
                Ok(user) => return Ok(user),
                Err(e) => {
                    tracing::warn!("Failed to fetch user: {e}");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
            if retries_left == 0 {
                break;
            }
            retries_left -= 1;

            tracing::info!("Refreshing demo token after failed user fetch");
            match self.request_demo_token().await {
                Ok(token) => self.session.set_token(token),
                Err(e) => {
                    tracing::warn!("Demo token refresh failed: {e}");
                    break;
                }
            }
        }

        Err(failure.unwrap_or(ApiError::NotAuthenticated))
    }

    /// Returns the loaded user, or the current (possibly absent) demo user
    /// without contacting the backend when in demo mode.
    pub async fn login(&self, creds: &Credentials) -> Result<Option<User>, ApiError> {
        if self.session.demo_mode() {
            return Ok(self.session.user());
        }

        let resp = self
            .api
            .send_unguarded(ApiRequest::post("/auth/login").form(&[
                ("username", creds.email.as_str()),
                ("password", creds.password.as_str()),
            ]))
            .await?;
        if !resp.is_success() {
            return Err(ApiError::with_detail_or(resp.status, &resp.body, "Login failed"));
        }
        let token: TokenResponse = resp.json()?;
        self.session.set_token(token.access_token);

        if creds.remember_me {
            self.upgrade_to_remembered_token(creds).await;
        }

        let user = self.fetch_current_user().await?;
        Ok(Some(user))
    }

    /// Swap the session token for a longer-lived one. Failures keep the
    /// normal token.
    async fn upgrade_to_remembered_token(&self, creds: &Credentials) {
        let request = ApiRequest::post("/auth/login").json(json!({
            "username": creds.email,
            "password": creds.password,
            "remember_me": true,
        }));
        match self.api.send_unguarded(request).await {
            Ok(resp) if resp.is_success() => match resp.json::<TokenResponse>() {
                Ok(token) => self.session.set_token(token.access_token),
                Err(e) => tracing::warn!("Failed to get remember-me token: {e}"),
            },
            Ok(resp) => tracing::warn!("Failed to get remember-me token: HTTP {}", resp.status),
            Err(e) => tracing::warn!("Failed to get remember-me token: {e}"),
        }
    }

    pub async fn register(&self, new_user: &NewUser) -> Result<Option<User>, ApiError> {
        let body = serde_json::to_value(new_user).map_err(|e| ApiError::request(e.to_string()))?;
        let resp = self
            .api
            .send_unguarded(ApiRequest::post("/auth/register").json(body))
            .await?;
        if !resp.is_success() {
            return Err(ApiError::with_detail_or(
                resp.status,
                &resp.body,
                "Registration failed",
            ));
        }
        self.login(&Credentials {
            email: new_user.email.clone(),
            password: new_user.password.clone(),
            remember_me: false,
        })
        .await
    }

    /// Goes through the guarded gateway, so an expired token is dropped and
    /// the user sent to login like any other authenticated call.
    pub async fn update_user(&self, changes: &UserUpdate) -> Result<User, ApiError> {
        if self.session.token().is_none() {
            return Err(ApiError::NotAuthenticated);
        }
        let body = serde_json::to_value(changes).map_err(|e| ApiError::request(e.to_string()))?;
        let user: User = self
            .api
            .send_json(ApiRequest::patch("/users/me").json(body))
            .await
            .map_err(|e| e.detail_or("Failed to update user"))?;
        self.session.set_user(Some(user.clone()));
        Ok(user)
    }

    /// Ask for a reset link by email. The backend answers the same way for
    /// unknown addresses.
    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        if email.trim().is_empty() {
            return Err(ApiError::InvalidArgument("Email is required".to_string()));
        }
        let resp = self
            .api
            .send_unguarded(ApiRequest::post("/auth/forgot-password").json(json!({"email": email})))
            .await?;
        if !resp.is_success() {
            return Err(ApiError::with_detail_or(
                resp.status,
                &resp.body,
                "Failed to request password reset",
            ));
        }
        Ok(())
    }

    /// Set a new password with the token from a reset email. The session is
    /// left alone; the caller logs in afterwards.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<User, ApiError> {
        if token.trim().is_empty() || new_password.is_empty() {
            return Err(ApiError::InvalidArgument(
                "Token and new password are required".to_string(),
            ));
        }
        let resp = self
            .api
            .send_unguarded(ApiRequest::post("/auth/reset-password").json(json!({
                "token": token,
                "new_password": new_password,
            })))
            .await?;
        if !resp.is_success() {
            return Err(ApiError::with_detail_or(
                resp.status,
                &resp.body,
                "Failed to reset password",
            ));
        }
        resp.json()
    }

    /// Returns `false` in demo mode, where there is nothing to log out of.
    pub fn logout(&self) -> bool {
        if self.session.demo_mode() {
            return false;
        }
        self.session.teardown();
        self.api.redirect_to_login();
        true
    }

    async fn fetch_user_once(&self) -> Result<User, ApiError> {
        let token = self.session.token().ok_or(ApiError::NotAuthenticated)?;
        if self.session.demo_mode() {
            tracing::debug!("Fetching user in demo mode with token {}", token_preview(&token));
        }
        let user = self.fetch_user_with(&token).await?;
        self.session.set_user(Some(user.clone()));
        Ok(user)
    }

    async fn fetch_user_with(&self, token: &str) -> Result<User, ApiError> {
        let resp = self
            .api
            .send_unguarded(ApiRequest::get("/auth/me").bearer(token))
            .await?;
        if !resp.is_success() {
            return Err(ApiError::from_status(resp.status, &resp.body));
        }
        resp.json()
    }

    async fn fetch_auth_config(&self) -> Result<AuthConfig, ApiError> {
        let resp = self
            .api
            .send_unguarded(ApiRequest::get("/auth/config"))
            .await?;
        if !resp.is_success() {
            return Err(ApiError::from_status(resp.status, &resp.body));
        }
        resp.json()
    }

    async fn request_demo_token(&self) -> Result<String, ApiError> {
        let resp = self
            .api
            .send_unguarded(ApiRequest::get("/auth/demo-token"))
            .await?;
        if !resp.is_success() {
            return Err(ApiError::from_status(resp.status, &resp.body));
        }
        let token: TokenResponse = resp.json()?;
        tracing::debug!("Received demo token {}", token_preview(&token.access_token));
        Ok(token.access_token)
    }
}
