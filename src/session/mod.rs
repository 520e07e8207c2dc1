//! Client-side session: the bearer token, the loaded profile and the demo-mode
//! flags, plus the flows that populate them.
//!
//! A [`SessionContext`] is created once per process, handed to every component
//! that issues authenticated calls, and torn down on logout.

mod bootstrap;
pub mod guard;
pub mod store;

pub use bootstrap::{Credentials, SessionBootstrapper};

use crate::model::User;
use std::sync::{Mutex, MutexGuard};
use store::TokenStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub token: Option<String>,
    pub user: Option<User>,
    pub demo_mode: bool,
    pub demo_checked: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

pub struct SessionContext {
    store: Box<dyn TokenStore>,
    state: Mutex<Session>,
}

impl SessionContext {
    /// Start a session seeded with whatever token the durable store holds.
    pub fn open(store: Box<dyn TokenStore>) -> Self {
        let token = store.load();
        Self {
            store,
            state: Mutex::new(Session {
                token,
                ..Session::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, Session> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn token(&self) -> Option<String> {
        self.state().token.clone()
    }

    pub fn user(&self) -> Option<User> {
        self.state().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    pub fn demo_mode(&self) -> bool {
        self.state().demo_mode
    }

    pub fn demo_checked(&self) -> bool {
        self.state().demo_checked
    }

    /// Replace the active token in memory and in the durable store.
    pub fn set_token(&self, token: String) {
        if let Err(e) = self.store.save(&token) {
            tracing::warn!("Failed to persist token: {e}");
        }
        self.state().token = Some(token);
    }

    pub fn clear_token(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Failed to remove stored token: {e}");
        }
        self.state().token = None;
    }

    pub fn set_user(&self, user: Option<User>) {
        self.state().user = user;
    }

    pub fn set_demo_mode(&self, enabled: bool) {
        self.state().demo_mode = enabled;
    }

    pub fn mark_demo_checked(&self) {
        self.state().demo_checked = true;
    }

    /// Drop the profile and token. Demo flags are kept: they describe the
    /// backend, not the user.
    pub fn teardown(&self) {
        self.clear_token();
        self.set_user(None);
    }
}

/// Shorten a token for log output.
pub(crate) fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(10).collect();
    format!("{head}...")
}
