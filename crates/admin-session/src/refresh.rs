//! Refresh Coordinator: single-flight exchange of the refresh credential
//!
//! At most one refresh call is outstanding at any instant. The first caller
//! that finds no exchange in flight spawns one and parks the receiving half
//! of a `watch` channel in the in-flight slot; every later caller clones that
//! receiver instead of starting a second exchange. The check-then-start
//! happens under the slot's mutex, so two callers can never both see an
//! empty slot.
//!
//! The exchange runs on its own task. A caller giving up does not cancel it,
//! and the other waiters still get the outcome. `shutdown` aborts the task;
//! dropping the sender resolves every waiter with `RefreshInFlightFailed`.
//!
//! A caller that presents the access token its request was rejected with is
//! told the current pair without a new exchange when the store already holds
//! a different one. This covers 401s that arrive after a refresh settled.
//!
//! An exchange belongs to the session epoch it was started in. If that
//! session ends (logout, forced logout, new login) before the exchange
//! returns, its outcome touches neither store nor snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use admin_auth::{AuthApi, CredentialPair};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::gate::is_privileged;
use crate::metrics;
use crate::state::{Epoch, LogoutReason, SessionState};

type Outcome = Result<CredentialPair>;

/// The single outstanding exchange.
struct InFlight {
    id: u64,
    outcome: watch::Receiver<Option<Outcome>>,
    started_at: Instant,
    task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    api: AuthApi,
    session: SessionState,
    in_flight: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    exchanges: AtomicU64,
    closed: AtomicBool,
}

impl RefreshCoordinator {
    pub fn new(api: AuthApi, session: SessionState) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                session,
                in_flight: Mutex::new(None),
                next_id: AtomicU64::new(1),
                exchanges: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Return a credential newer than `rejected_access`, refreshing if needed.
    ///
    /// Pass the access token the failing request carried; `None` forces an
    /// exchange unless one is already in flight. Fails immediately, without
    /// a network call, when nothing is stored.
    pub async fn ensure_fresh_credential(&self, rejected_access: Option<&str>) -> Result<CredentialPair> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::RefreshInFlightFailed);
        }

        let mut outcome = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(
                        refresh_id = in_flight.id,
                        elapsed_ms = in_flight.started_at.elapsed().as_millis() as u64,
                        "joining refresh already in flight"
                    );
                    in_flight.outcome.clone()
                }
                None => {
                    let Some(current) = self.inner.session.store().get() else {
                        debug!("refresh requested with no stored credential");
                        return Err(Error::NoRefreshTokenAvailable);
                    };
                    if let Some(rejected) = rejected_access
                        && current.access_token() != rejected
                    {
                        debug!("credential already rotated, reusing it");
                        return Ok(current);
                    }

                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = watch::channel(None);
                    let epoch = self.inner.session.begin_refresh();
                    let task = tokio::spawn(self.inner.clone().exchange(id, epoch, current, tx));
                    *slot = Some(InFlight {
                        id,
                        outcome: rx.clone(),
                        started_at: Instant::now(),
                        task,
                    });
                    debug!(refresh_id = id, "refresh started");
                    rx
                }
            }
        };

        let settled = outcome.wait_for(Option::is_some).await;
        match settled.as_deref() {
            Ok(Some(result)) => result.clone(),
            _ => Err(Error::RefreshInFlightFailed),
        }
    }

    /// Whether an exchange is outstanding right now.
    pub async fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().await.is_some()
    }

    /// Number of refresh calls made to the API so far.
    pub fn exchanges(&self) -> u64 {
        self.inner.exchanges.load(Ordering::Relaxed)
    }

    /// Abort any outstanding exchange and refuse new ones. Waiters resolve
    /// with `RefreshInFlightFailed`; the session leaves `Refreshing`.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(in_flight) = self.inner.in_flight.lock().await.take() {
            info!(refresh_id = in_flight.id, "aborting in-flight refresh");
            in_flight.task.abort();
            self.inner.session.abandon_refresh();
        }
    }
}

impl Inner {
    async fn exchange(
        self: Arc<Self>,
        id: u64,
        epoch: Epoch,
        current: CredentialPair,
        tx: watch::Sender<Option<Outcome>>,
    ) {
        self.exchanges.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.api.refresh(current.refresh_token()).await {
            Ok(tokens) => {
                let pair = CredentialPair::new(tokens.access_token, tokens.refresh_token);
                self.commit(id, epoch, pair)
            }
            Err(e) => {
                warn!(refresh_id = id, error = %e, "refresh failed, forcing logout");
                metrics::record_refresh("failure");
                self.session.force_logout_in(epoch, LogoutReason::RefreshFailed);
                Err(Error::RefreshFailed(e.to_string()))
            }
        };

        {
            let mut slot = self.in_flight.lock().await;
            if slot.as_ref().is_some_and(|f| f.id == id) {
                *slot = None;
            }
        }
        tx.send_replace(Some(outcome));
    }

    fn commit(&self, id: u64, epoch: Epoch, pair: CredentialPair) -> Outcome {
        if !self.session.commit_refresh(epoch, &pair) {
            debug!(refresh_id = id, "session ended during refresh, discarding new credential");
            metrics::record_refresh("discarded");
            return Err(Error::Unauthenticated);
        }

        let principal = self.session.snapshot().principal;
        if let Some(p) = principal
            && !is_privileged(p.role)
        {
            self.session.force_logout_in(epoch, LogoutReason::Unprivileged);
            metrics::record_refresh("unprivileged");
            return Err(Error::AccessDenied(p.role));
        }

        info!(refresh_id = id, "refresh succeeded");
        metrics::record_refresh("success");
        Ok(pair)
    }
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("exchanges", &self.exchanges())
            .finish_non_exhaustive()
    }
}
