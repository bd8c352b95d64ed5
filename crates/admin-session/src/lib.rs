//! Session and credential lifecycle for the admin API client
//!
//! Attaches the access credential to every call, refreshes it exactly once
//! per expiry no matter how many requests observe the expiry together,
//! replays the rejected requests, and ends the session when the credential
//! chain is dead. Only principals with a privileged role may hold a session.
//!
//! Session lifecycle:
//! 1. `AdminSession::hydrate` loads the stored pair and verifies the principal
//!    via the pipeline, or `login` establishes a new session
//! 2. `Pipeline::execute` attaches the access credential to each request
//! 3. A 401 sends the request to `RefreshCoordinator`, which runs one
//!    exchange and hands its result to every waiter; the request replays once
//! 4. A failed refresh, or a second 401 after refresh, clears the store and
//!    the session → `SessionEvent::ForcedLogout`
//! 5. A 403 surfaces as `Forbidden` → `SessionEvent::AccessDenied`
//! 6. `logout` notifies the server best-effort and always clears locally

pub mod classify;
pub mod error;
pub mod gate;
pub mod guard;
pub mod metrics;
pub mod pipeline;
pub mod refresh;
pub mod session;
pub mod state;

#[cfg(test)]
mod testing;

pub use classify::{ResponseClass, classify_status};
pub use error::{Error, Result};
pub use gate::{PRIVILEGED_ROLES, authorize, is_privileged};
pub use guard::{GuardDecision, Route, guest_only, redirect_for, require_admin};
pub use pipeline::{ApiRequest, ApiResponse, Pipeline};
pub use refresh::RefreshCoordinator;
pub use session::AdminSession;
pub use state::{LogoutReason, Phase, SessionEvent, SessionSnapshot, SessionState};
