//! Request Pipeline: every authenticated call goes through `Pipeline::execute`
//!
//! The pipeline attaches the current access credential, dispatches the
//! request and classifies the response by status. A 401 triggers one
//! refresh through the coordinator and one replay with the new credential.
//! The retry budget is counted per call to `execute`, so one request's retry
//! never suppresses another's. A 403 is surfaced as `Forbidden` and announced
//! to subscribers; it never refreshes and never ends the session here.

use admin_auth::{AuthApi, LOGIN_PATH, REFRESH_PATH, decode_envelope, error_message};
use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::classify::{ResponseClass, classify_status};
use crate::error::{Error, Result};
use crate::metrics;
use crate::refresh::RefreshCoordinator;
use crate::state::{LogoutReason, SessionState};

/// Replays allowed per request after a credential refresh.
const MAX_RETRIES: u8 = 1;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// An outbound API call, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Login and refresh endpoints answer 401 about the presented
    /// credentials; refreshing on them would loop.
    pub fn is_auth_endpoint(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default();
        path == LOGIN_PATH || path == REFRESH_PATH
    }
}

/// A response that made it back through the pipeline. Non-2xx statuses other
/// than 401/403 arrive here untouched.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: u16,
    body: Bytes,
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        classify_status(self.status) == ResponseClass::Success
    }

    /// Turn a non-2xx response into `Error::Server`.
    pub fn ensure_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Server {
                status: self.status,
                message: error_message(&self.body),
            })
        }
    }

    /// Decode the raw body, ignoring the envelope.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::InvalidResponse(format!("decoding response body: {e}")))
    }

    /// Unwrap the `data` field of the response envelope.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T> {
        let response = self.ensure_success()?;
        decode_envelope(&response.body).map_err(Error::from)
    }
}

/// Shared by every caller; cheap to clone.
#[derive(Debug, Clone)]
pub struct Pipeline {
    api: AuthApi,
    session: SessionState,
    coordinator: RefreshCoordinator,
}

impl Pipeline {
    pub fn new(api: AuthApi, session: SessionState, coordinator: RefreshCoordinator) -> Self {
        Self {
            api,
            session,
            coordinator,
        }
    }

    /// Dispatch `request` with the session's credential, recovering once
    /// from an expired credential.
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let request_id = Uuid::new_v4().to_string();
        self.execute_with_id(request, &request_id).await
    }

    #[instrument(skip_all, fields(request_id = %request_id, method = %request.method, path = %request.path))]
    async fn execute_with_id(&self, request: &ApiRequest, request_id: &str) -> Result<ApiResponse> {
        let mut credential = self.session.snapshot().credential;
        let mut retries: u8 = 0;

        loop {
            let access = credential.as_ref().map(|c| c.access_token().to_owned());
            let response = self.send(request, access.as_deref(), request_id).await?;
            let class = classify_status(response.status);
            metrics::record_response(class);

            match class {
                ResponseClass::Success | ResponseClass::Other => {
                    debug!(status = response.status, retries, "request completed");
                    return Ok(response);
                }
                ResponseClass::Forbidden => {
                    debug!("request forbidden");
                    self.session.notify_access_denied(&request.path);
                    return Err(Error::Forbidden(request.path.clone()));
                }
                ResponseClass::CredentialExpired => {
                    if request.is_auth_endpoint() {
                        return Err(Error::CredentialExpired);
                    }
                    let Some(rejected) = access else {
                        return Err(Error::Unauthenticated);
                    };
                    if retries >= MAX_RETRIES {
                        warn!("refreshed credential rejected, ending session");
                        self.session
                            .force_logout_rejecting(&rejected, LogoutReason::CredentialRejected);
                        return Err(Error::SessionExpired);
                    }

                    retries += 1;
                    debug!("access credential rejected, refreshing");
                    let fresh = self
                        .coordinator
                        .ensure_fresh_credential(Some(&rejected))
                        .await?;
                    credential = Some(fresh);
                }
            }
        }
    }

    async fn send(&self, request: &ApiRequest, access: Option<&str>, request_id: &str) -> Result<ApiResponse> {
        let mut builder = self
            .api
            .client()
            .request(request.method.clone(), self.api.endpoint(&request.path))
            .header(REQUEST_ID_HEADER, request_id);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = access {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            Error::Network(format!("{} {}: {e}", request.method, request.path))
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("reading response body: {e}")))?;
        Ok(ApiResponse { status, body })
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(&ApiRequest::get(path)).await?.into_data()
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::post(path).with_json(to_json(body)?);
        self.execute(&request).await?.into_data()
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::put(path).with_json(to_json(body)?);
        self.execute(&request).await?.into_data()
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = ApiRequest::patch(path).with_json(to_json(body)?);
        self.execute(&request).await?.into_data()
    }

    /// Delete endpoints usually answer with a bare `message`, so only the
    /// status is checked.
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute(&ApiRequest::delete(path))
            .await?
            .ensure_success()
            .map(|_| ())
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| Error::InvalidRequest(format!("encoding request body: {e}")))
}
