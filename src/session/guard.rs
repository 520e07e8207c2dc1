//! Per-command access control, the terminal counterpart of a router guard.

use crate::session::{SessionBootstrapper, SessionContext};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Where a command lands, used for access rules and login redirects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Home,
    Login,
    Register,
    ForgotPassword,
    ResetPassword,
    Logout,
    Profile,
    Notebooks,
    Executions,
    Admin,
}

impl View {
    pub fn access(self) -> Access {
        match self {
            View::Login | View::Register | View::ForgotPassword | View::ResetPassword => {
                Access::Guest
            }
            View::Logout => Access::Public,
            View::Home | View::Profile | View::Notebooks | View::Executions | View::Admin => {
                Access::RequiresAuth
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            View::Home => "home",
            View::Login => "login",
            View::Register => "register",
            View::ForgotPassword => "forgot-password",
            View::ResetPassword => "reset-password",
            View::Logout => "logout",
            View::Profile => "profile",
            View::Notebooks => "notebooks",
            View::Executions => "executions",
            View::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Guest,
    RequiresAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    RedirectHome,
    RedirectLogin { redirect: View },
}

/// Receives forced navigation to the login view.
pub trait Navigator: Send + Sync {
    fn current_view(&self) -> View;
    fn go_to_login(&self);
}

/// Navigator for a single command invocation: the "view" is the command itself
/// and navigating to login means telling the user to log in.
pub struct CommandNavigator {
    view: View,
    announce: bool,
    redirects: AtomicUsize,
}

impl CommandNavigator {
    pub fn new(view: View) -> Self {
        Self {
            view,
            announce: true,
            redirects: AtomicUsize::new(0),
        }
    }

    /// Count redirects without telling the user, for commands that end the
    /// session on purpose.
    pub fn quiet(mut self) -> Self {
        self.announce = false;
        self
    }

    pub fn redirects(&self) -> usize {
        self.redirects.load(Ordering::Relaxed)
    }
}

impl Navigator for CommandNavigator {
    fn current_view(&self) -> View {
        self.view
    }

    fn go_to_login(&self) {
        let previous = self.redirects.fetch_add(1, Ordering::Relaxed);
        if previous == 0 && self.announce {
            tracing::warn!("Session is no longer valid; run `nbrun login` to sign in again");
        }
    }
}

/// Bootstrap the session if needed, then decide whether `to` may run.
pub async fn before_each(
    to: View,
    session: &SessionContext,
    bootstrapper: &SessionBootstrapper,
) -> GuardDecision {
    if session.user().is_none() && (session.token().is_some() || !session.demo_checked()) {
        if let Err(e) = bootstrapper.init().await {
            tracing::error!("Error in session guard: {e}");
            return GuardDecision::Proceed;
        }
    }

    if session.demo_mode() && matches!(to, View::Login | View::Register) {
        return GuardDecision::RedirectHome;
    }

    match to.access() {
        Access::RequiresAuth if !session.is_authenticated() => {
            GuardDecision::RedirectLogin { redirect: to }
        }
        Access::Guest if session.is_authenticated() => GuardDecision::RedirectHome,
        _ => GuardDecision::Proceed,
    }
}
