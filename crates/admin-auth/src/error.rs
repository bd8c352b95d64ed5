//! Error types for transport and credential storage

/// Errors from the auth endpoints and the credential store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// 401/403 from login or refresh: the presented credentials are not accepted.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("server returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
