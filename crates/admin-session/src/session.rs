//! `AdminSession`: the entry points that establish, verify and end a session
//!
//! Login bypasses the pipeline: a 401 from the login endpoint is a verdict on
//! the password, not an expired credential. Hydrate and the principal fetch
//! go through the pipeline, so a stale stored access token is refreshed there
//! like any other request.

use admin_auth::{AuthApi, CredentialPair, CredentialStore, ME_PATH, Principal};
use common::Secret;
use tracing::{info, instrument, warn};

use crate::error::{Error, Result};
use crate::gate::authorize;
use crate::pipeline::Pipeline;
use crate::refresh::RefreshCoordinator;
use crate::state::{LogoutReason, SessionSnapshot, SessionState};

#[derive(Debug, Clone)]
pub struct AdminSession {
    api: AuthApi,
    state: SessionState,
    coordinator: RefreshCoordinator,
    pipeline: Pipeline,
}

impl AdminSession {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, store: CredentialStore) -> Self {
        let api = AuthApi::new(client, base_url);
        let state = SessionState::new(store);
        let coordinator = RefreshCoordinator::new(api.clone(), state.clone());
        let pipeline = Pipeline::new(api.clone(), state.clone(), coordinator.clone());
        Self {
            api,
            state,
            coordinator,
            pipeline,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Pipeline for resource calls made on behalf of this session.
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.snapshot()
    }

    /// Restore the session from the credential store and verify it against
    /// the API.
    ///
    /// With nothing stored this is a no-op that leaves the session Anonymous.
    /// A principal the API refuses (403) or that is not privileged ends the
    /// session. Network and server failures keep the cached session and are
    /// returned to the caller.
    pub async fn hydrate(&self) -> Result<SessionSnapshot> {
        if self.state.load_from_store().is_none() {
            return Ok(self.snapshot());
        }

        match self.current_principal().await {
            Ok(_) => Ok(self.snapshot()),
            Err(e @ (Error::Network(_) | Error::Server { .. } | Error::InvalidResponse(_))) => {
                warn!(error = %e, "could not verify stored session, keeping cached state");
                self.state.settle();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Authenticate with identity credentials. Only privileged principals
    /// get a session; anyone else gets `AccessDenied` and nothing is stored.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn login(&self, email: &str, password: &Secret<String>) -> Result<Principal> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(Error::InvalidRequest("email and password are required".into()));
        }
        self.state.begin_authenticating();

        let response = match self.api.login(email, password).await {
            Ok(response) => response,
            Err(e) => {
                self.state.settle();
                return Err(e.into());
            }
        };

        if let Err(e) = authorize(&response.user) {
            warn!(role = %response.user.role, "login refused for unprivileged role");
            self.state.settle();
            return Err(e);
        }

        let principal = response.user;
        self.state.commit_login(
            CredentialPair::new(response.access_token, response.refresh_token),
            principal.clone(),
        );
        Ok(principal)
    }

    /// Tell the server, then clear local state whatever it answered.
    pub async fn logout(&self) {
        if let Some(pair) = self.state.store().get()
            && let Err(e) = self.api.logout(pair.access_token()).await
        {
            warn!(error = %e, "server-side logout failed, clearing local session anyway");
        }
        self.state.clear();
        info!("logged out");
    }

    /// Fetch the principal from the API and commit it.
    ///
    /// Unlike ordinary resource calls, a 403 here ends the session, as does a
    /// principal without a privileged role.
    pub async fn current_principal(&self) -> Result<Principal> {
        let principal: Principal = match self.pipeline.get(ME_PATH).await {
            Ok(principal) => principal,
            Err(Error::Forbidden(path)) => {
                self.state.force_logout(LogoutReason::Forbidden);
                return Err(Error::Forbidden(path));
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = authorize(&principal) {
            warn!(principal_id = %principal.id, role = %principal.role, "principal is not privileged");
            self.state.force_logout(LogoutReason::Unprivileged);
            return Err(e);
        }

        if !self.state.commit_principal(principal.clone()) {
            return Err(Error::Unauthenticated);
        }
        Ok(principal)
    }

    /// Release anything waiting on a refresh. The session is unusable for
    /// refreshes afterwards.
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
