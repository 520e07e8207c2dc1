//! Account administration for superusers.

use crate::api::{ApiClient, ApiError, ApiRequest};
use crate::model::{User, UserPrivileges};

/// Page size the backend applies when none is given.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

pub struct AdminUsers {
    api: ApiClient,
    users: Vec<User>,
    last_error: Option<String>,
}

impl AdminUsers {
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            users: Vec::new(),
            last_error: None,
        }
    }

    pub fn users(&self) -> &[User] {
        &self.users
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

    /// Refuse early when the loaded profile is not a superuser; the backend
    /// would answer 403 anyway.
    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        match self.api.session().user() {
            Some(user) if user.is_superuser => Ok(()),
            _ => Err(ApiError::InvalidArgument(
                "Administrator privileges required".to_string(),
            )),
        }
    }

    pub async fn list(&mut self, skip: u32, limit: u32) -> Result<&[User], ApiError> {
        let request = ApiRequest::get("/users")
            .query("skip", skip.to_string())
            .query("limit", limit.to_string());
        let result = self.api.send_json::<Vec<User>>(request).await;
        self.users = self.record(result)?;
        Ok(&self.users)
    }

    /// Replace a user's flags. The cached row, if listed, is updated in place.
    pub async fn set_privileges(
        &mut self,
        user_id: &str,
        privileges: UserPrivileges,
    ) -> Result<User, ApiError> {
        if user_id.trim().is_empty() {
            return self.record(Err(ApiError::InvalidArgument(
                "Invalid user ID: empty".to_string(),
            )));
        }
        let own = self.api.session().user().is_some_and(|u| u.id == user_id);
        if own && !privileges.is_superuser {
            return self.record(Err(ApiError::InvalidArgument(
                "Cannot remove your own superuser status".to_string(),
            )));
        }

        let body = serde_json::to_value(privileges).map_err(|e| ApiError::request(e.to_string()))?;
        let request = ApiRequest::patch("/users")
            .segment(user_id)
            .segment("privileges")
            .json(body);
        let result = self.api.send_json::<User>(request).await;
        let updated = self.record(result)?;
        tracing::info!(
            "Updated privileges for {}: superuser={} active={}",
            updated.email,
            updated.is_superuser,
            updated.is_active
        );
        if let Some(row) = self.users.iter_mut().find(|u| u.id == updated.id) {
            *row = updated.clone();
        }
        Ok(updated)
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

    fn admin(
        transport: ScriptedTransport,
        me: serde_json::Value,
    ) -> (AdminUsers, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let session = Arc::new(SessionContext::open(Box::new(MemoryTokenStore::with_token(
            "T0",
        ))));
        session.set_user(Some(serde_json::from_value(me).unwrap()));
        let api = ApiClient::new(
            transport.clone(),
            session,
            Arc::new(CommandNavigator::new(View::Admin)),
        );
        (AdminUsers::new(api), transport)
    }

    fn root() -> serde_json::Value {
        json!({"id": "root", "email": "root@example.com", "is_superuser": true})
    }

    #[tokio::test]
    async fn list_sends_paging_and_caches_rows() {
        let (mut a, transport) = admin(
            ScriptedTransport::new().on(
                "GET /users",
                ok(json!([root(), {"id": "u2", "email": "b@example.com"}])),
            ),
            root(),
        );
        assert!(a.ensure_admin().is_ok());
        let users = a.list(0, DEFAULT_PAGE_SIZE).await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(!users[1].is_superuser);
        let sent = transport.last("GET /users").unwrap();
        assert_eq!(
            sent.query,
            vec![
                ("skip".to_string(), "0".to_string()),
                ("limit".to_string(), "100".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn non_admin_is_refused_locally() {
        let (a, _) = admin(
            ScriptedTransport::new(),
            json!({"id": "u2", "email": "b@example.com"}),
        );
        assert_eq!(
            a.ensure_admin().unwrap_err().to_string(),
            "Administrator privileges required"
        );
    }

    #[tokio::test]
    async fn set_privileges_patches_and_updates_cache() {
        let (mut a, transport) = admin(
            ScriptedTransport::new()
                .on("GET /users", ok(json!([{"id": "u2", "email": "b@example.com"}])))
                .on(
                    "PATCH /users/u2/privileges",
                    ok(json!({"id": "u2", "email": "b@example.com", "is_superuser": true})),
                ),
            root(),
        );
        a.list(0, 10).await.unwrap();
        let updated = a
            .set_privileges(
                "u2",
                UserPrivileges {
                    is_superuser: true,
                    is_active: true,
                },
            )
            .await
            .unwrap();
        assert!(updated.is_superuser);
        assert!(a.users()[0].is_superuser);
        let sent = transport.last("PATCH /users/u2/privileges").unwrap();
        match sent.body {
            crate::api::RequestBody::Json(body) => {
                assert_eq!(body, json!({"is_superuser": true, "is_active": true}))
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn cannot_demote_self() {
        let (mut a, transport) = admin(ScriptedTransport::new(), root());
        let err = a
            .set_privileges(
                "root",
                UserPrivileges {
                    is_superuser: false,
                    is_active: true,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Cannot remove your own superuser status");
        assert_eq!(a.last_error(), Some("Cannot remove your own superuser status"));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn missing_user_surfaces_backend_detail() {
        let (mut a, _) = admin(
            ScriptedTransport::new().on(
                "PATCH /users/ghost/privileges",
                status(404, json!({"detail": "User not found"})),
            ),
            root(),
        );
        let err = a
            .set_privileges(
                "ghost",
                UserPrivileges {
                    is_superuser: false,
                    is_active: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.detail(), Some(&json!("User not found")));
        assert!(a.last_error().is_some());
    }
}
