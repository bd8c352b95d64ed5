//! Endpoint paths and storage keys
//!
//! Paths are relative to the configured API base URL. Storage keys are the
//! logical names under which the credential store persists session material.

/// Credential-issuing endpoint (identity credentials in, token pair + principal out)
pub const LOGIN_PATH: &str = "/auth/login";

/// Credential-refresh endpoint (refresh token in, new token pair out)
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Principal-fetch endpoint
pub const ME_PATH: &str = "/auth/me";

/// Server-side logout
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Storage key for the access credential
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key for the refresh credential
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Storage key for the serialized principal
pub const PRINCIPAL_KEY: &str = "user";
