//! Route guards: navigation predicates over a session snapshot

use crate::state::{SessionEvent, SessionSnapshot};

/// Surfaces the guards send navigation to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    Dashboard,
    AccessDenied,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/dashboard",
            Route::AccessDenied => "/access-denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(Route),
}

/// Protected surfaces: authenticated and privileged only.
pub fn require_admin(snapshot: &SessionSnapshot) -> GuardDecision {
    if !snapshot.is_authenticated() {
        GuardDecision::Redirect(Route::Login)
    } else if !snapshot.is_authorized() {
        GuardDecision::Redirect(Route::AccessDenied)
    } else {
        GuardDecision::Allow
    }
}

/// Public-only surfaces such as the login page.
pub fn guest_only(snapshot: &SessionSnapshot) -> GuardDecision {
    if snapshot.is_authorized() {
        GuardDecision::Redirect(Route::Dashboard)
    } else {
        GuardDecision::Allow
    }
}

/// Where a session event should send the user, if anywhere.
pub fn redirect_for(event: &SessionEvent) -> Option<Route> {
    match event {
        SessionEvent::ForcedLogout { .. } | SessionEvent::LoggedOut => Some(Route::Login),
        SessionEvent::AccessDenied { .. } => Some(Route::AccessDenied),
        SessionEvent::LoggedIn { .. } => Some(Route::Dashboard),
        SessionEvent::Refreshed => None,
    }
}
