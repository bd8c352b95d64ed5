//! Response classification for the request pipeline
//!
//! The pipeline distinguishes failure classes by status code only, never by
//! body content.

/// How the pipeline treats a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// 2xx
    Success,
    /// 401: the access credential is expired or unknown, recoverable by refresh
    CredentialExpired,
    /// 403: valid credential, insufficient privilege, never refreshed
    Forbidden,
    /// Anything else, passed through to the caller untouched
    Other,
}

impl ResponseClass {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            ResponseClass::Success => "success",
            ResponseClass::CredentialExpired => "credential_expired",
            ResponseClass::Forbidden => "forbidden",
            ResponseClass::Other => "other",
        }
    }
}

pub fn classify_status(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        401 => ResponseClass::CredentialExpired,
        403 => ResponseClass::Forbidden,
        _ => ResponseClass::Other,
    }
}
