//! Auth endpoint client and wire types
//!
//! Login, refresh and logout go straight to the API with a plain
//! `reqwest::Client`: none of them pass through the session pipeline, so a
//! 401 here is a verdict on the presented credentials, never a reason to
//! refresh. Every API body is wrapped in the standard response envelope.

use common::Secret;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use crate::error::{Error, Result};
use crate::principal::Principal;

/// Standard API response wrapper.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap `data`, or describe why the envelope carries none.
    pub fn into_data(self) -> std::result::Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (_, _) => Err(self
                .error
                .map(|e| e.message)
                .or(self.message)
                .unwrap_or_else(|| "response carried no data".to_string())),
        }
    }
}

/// Best human-readable message from an error body: `error.message`, then
/// `message`, then the raw body.
pub fn error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Partial {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<ApiErrorBody>,
    }

    match serde_json::from_slice::<Partial>(body) {
        Ok(Partial {
            error: Some(error), ..
        }) => error.message,
        Ok(Partial {
            message: Some(message),
            ..
        }) => message,
        _ if body.is_empty() => String::from("<no body>"),
        _ => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Decode an enveloped payload.
pub fn decode_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    let envelope: ApiEnvelope<T> = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidResponse(format!("malformed envelope: {e}")))?;
    envelope.into_data().map_err(Error::InvalidResponse)
}

/// Payload of a successful login.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: Principal,
}

/// Payload of a successful refresh.
#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Client for the credential endpoints.
#[derive(Debug, Clone)]
pub struct AuthApi {
    client: reqwest::Client,
    base_url: String,
}

impl AuthApi {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an API path.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Exchange identity credentials for a token pair and principal.
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<LoginResponse> {
        let body = serde_json::json!({
            "email": email,
            "password": password.expose(),
        });
        let response = self
            .client
            .post(self.endpoint(LOGIN_PATH))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

        let body = read_success(response, "login").await?;
        debug!(email, "login accepted by identity layer");
        decode_envelope(&body)
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = self
            .client
            .post(self.endpoint(REFRESH_PATH))
            .json(&serde_json::json!({ "refreshToken": refresh_token }))
            .send()
            .await
            .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

        let body = read_success(response, "refresh").await?;
        decode_envelope(&body)
    }

    /// Ask the server to drop its session state for this access token.
    pub async fn logout(&self, access_token: &str) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(LOGOUT_PATH))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| Error::Http(format!("logout request failed: {e}")))?;

        read_success(response, "logout").await.map(|_| ())
    }
}

/// Read the body of a successful response, or map the failure status.
/// 401/403 mean the presented credentials were refused.
async fn read_success(response: reqwest::Response, operation: &str) -> Result<Vec<u8>> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| Error::Http(format!("reading {operation} response: {e}")))?;

    if status.is_success() {
        return Ok(body.to_vec());
    }

    let message = error_message(&body);
    match status.as_u16() {
        401 | 403 => Err(Error::InvalidCredentials(format!(
            "{operation} rejected ({status}): {message}"
        ))),
        code => Err(Error::Rejected {
            status: code,
            message,
        }),
    }
}
