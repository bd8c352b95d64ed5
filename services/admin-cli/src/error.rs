//! Command-line usage errors
//!
//! Session failures come back as `admin_session::Error` and are reported
//! through `anyhow`; these cover what goes wrong before a session is touched.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("no command given (expected one of: login, logout, whoami, status, get)")]
    MissingCommand,

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0} requires a value")]
    MissingValue(&'static str),

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error("query parameters must look like key=value, got: {0}")]
    MalformedQuery(String),

    #[error("no login email: pass --email or set [login] email")]
    MissingEmail,

    #[error("no login password: set ADMIN_PASSWORD or [login] password_file")]
    MissingPassword,
}

/// Result alias using CLI Error
pub type Result<T> = std::result::Result<T, Error>;
