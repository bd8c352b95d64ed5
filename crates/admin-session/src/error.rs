//! Error taxonomy for session operations
//!
//! `Clone` because a single refresh outcome is handed to every request that
//! was waiting on it.

use admin_auth::Role;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No credential was attached and the endpoint requires one.
    #[error("not authenticated")]
    Unauthenticated,

    /// 401 from a credential endpoint itself; never refreshed.
    #[error("credential expired")]
    CredentialExpired,

    #[error("no refresh credential available")]
    NoRefreshTokenAvailable,

    /// The refresh exchange failed. The session has been cleared.
    #[error("session expired: refresh failed: {0}")]
    RefreshFailed(String),

    /// The refresh this request was waiting on was abandoned (teardown).
    #[error("refresh abandoned before it settled")]
    RefreshInFlightFailed,

    /// A freshly refreshed credential was rejected again. The session has been cleared.
    #[error("session expired: credential rejected after refresh")]
    SessionExpired,

    /// Valid session, insufficient privilege for this resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Identity accepted but the role may not hold an administrative session.
    #[error("access denied: role {0} may not hold an administrative session")]
    AccessDenied(Role),

    /// The identity layer refused the login.
    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("request failed: {0}")]
    Network(String),

    #[error("server returned {status}: {message}")]
    Server { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether this failure ended the session (store and state cleared).
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            Error::RefreshFailed(_) | Error::SessionExpired | Error::AccessDenied(_)
        )
    }
}

impl From<admin_auth::Error> for Error {
    fn from(err: admin_auth::Error) -> Self {
        match err {
            admin_auth::Error::Http(msg) => Error::Network(msg),
            admin_auth::Error::InvalidCredentials(msg) => Error::LoginFailed(msg),
            admin_auth::Error::Rejected { status, message } => Error::Server { status, message },
            admin_auth::Error::InvalidResponse(msg)
            | admin_auth::Error::CredentialParse(msg)
            | admin_auth::Error::Io(msg) => Error::InvalidResponse(msg),
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
