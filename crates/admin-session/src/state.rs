//! Session State: the in-memory view of who is logged in
//!
//! One `SessionState` per process, shared by handle. Readers take snapshots
//! from a `watch` channel and never block writers. Every mutation goes through
//! the `pub(crate)` transition methods below, which update the credential
//! store and the snapshot together under a short transition lock, so store
//! and snapshot never disagree for longer than one transition.
//!
//! Phases:
//! - Anonymous → Authenticating (login started, or credential hydrated from store)
//! - Authenticating → Authenticated (authorized principal committed)
//! - Authenticated → Refreshing → Authenticated (refresh exchange)
//! - any → Invalid → Anonymous (forced logout)
//! - any → Anonymous (voluntary logout)

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use admin_auth::{CredentialPair, CredentialStore, Principal, Role};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::gate::is_privileged;
use crate::metrics;

const EVENT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Anonymous,
    Authenticating,
    Authenticated,
    Refreshing,
    Invalid,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Anonymous => "anonymous",
            Phase::Authenticating => "authenticating",
            Phase::Authenticated => "authenticated",
            Phase::Refreshing => "refreshing",
            Phase::Invalid => "invalid",
        }
    }
}

/// Point-in-time copy of the session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub principal: Option<Principal>,
    pub credential: Option<CredentialPair>,
    pub phase: Phase,
}

impl SessionSnapshot {
    fn anonymous() -> Self {
        Self {
            principal: None,
            credential: None,
            phase: Phase::Anonymous,
        }
    }

    /// Credential and principal present, and not mid-login or invalidated.
    /// A refresh in progress still counts as authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
            && self.principal.is_some()
            && matches!(self.phase, Phase::Authenticated | Phase::Refreshing)
    }

    /// Authenticated with a privileged role.
    pub fn is_authorized(&self) -> bool {
        self.is_authenticated()
            && self
                .principal
                .as_ref()
                .is_some_and(|p| is_privileged(p.role))
    }

    pub fn has_role(&self, roles: &[Role]) -> bool {
        self.principal
            .as_ref()
            .is_some_and(|p| roles.contains(&p.role))
    }

    pub fn is_super_admin(&self) -> bool {
        self.has_role(&[Role::SuperAdmin])
    }

    pub fn access_token(&self) -> Option<&str> {
        self.credential.as_ref().map(CredentialPair::access_token)
    }
}

/// Why a session was ended without the user asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    /// Refresh exchange failed
    RefreshFailed,
    /// A freshly refreshed credential was rejected again
    CredentialRejected,
    /// Principal role is not privileged
    Unprivileged,
    /// Principal fetch answered 403
    Forbidden,
    /// Stored principal record could not be read
    UnreadablePrincipal,
}

impl LogoutReason {
    pub fn label(&self) -> &'static str {
        match self {
            LogoutReason::RefreshFailed => "refresh_failed",
            LogoutReason::CredentialRejected => "credential_rejected",
            LogoutReason::Unprivileged => "unprivileged",
            LogoutReason::Forbidden => "forbidden",
            LogoutReason::UnreadablePrincipal => "unreadable_principal",
        }
    }
}

/// Notifications for route guards and UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { principal_id: String },
    Refreshed,
    LoggedOut,
    ForcedLogout { reason: LogoutReason },
    AccessDenied { path: String },
}

/// Identifies one session from login (or load) to logout. A refresh only
/// lands in the epoch it was started in.
pub(crate) type Epoch = u64;

/// Shared handle to the session.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
}

struct Inner {
    store: CredentialStore,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    /// Held for every transition; guards the current epoch.
    transition: Mutex<Epoch>,
}

impl SessionState {
    /// Start Anonymous. Nothing is read from the store until hydration.
    pub fn new(store: CredentialStore) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot::anonymous());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                snapshot,
                events,
                transition: Mutex::new(0),
            }),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.inner.snapshot.borrow().phase
    }

    /// Follow every committed snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn store(&self) -> &CredentialStore {
        &self.inner.store
    }

    fn lock(&self) -> MutexGuard<'_, Epoch> {
        self.inner
            .transition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    /// Seed the snapshot from the store. Returns the stored pair, if any.
    ///
    /// A stored principal without a privileged role wipes the store. Loading
    /// the same material twice leaves the snapshot untouched.
    pub(crate) fn load_from_store(&self) -> Option<CredentialPair> {
        let mut epoch = self.lock();
        let store = &self.inner.store;

        let Some(pair) = store.get() else {
            store.clear();
            self.inner.snapshot.send_if_modified(|s| {
                if s.credential.is_none() && s.phase == Phase::Anonymous {
                    return false;
                }
                *s = SessionSnapshot::anonymous();
                true
            });
            return None;
        };

        let principal = store.principal();
        if principal.is_none() && store.has_principal_record() {
            warn!("stored principal is unreadable, clearing session");
            self.invalidate_locked(&mut epoch, LogoutReason::UnreadablePrincipal);
            return None;
        }
        if let Some(p) = &principal
            && !is_privileged(p.role)
        {
            warn!(principal_id = %p.id, role = %p.role, "stored principal is not privileged, clearing session");
            self.invalidate_locked(&mut epoch, LogoutReason::Unprivileged);
            return None;
        }

        self.inner.snapshot.send_if_modified(|s| {
            let same_credential = s.access_token() == Some(pair.access_token());
            if same_credential && s.principal == principal {
                return false;
            }
            if s.credential.is_some() && !same_credential {
                *epoch += 1;
            }
            *s = SessionSnapshot {
                principal: principal.clone(),
                credential: Some(pair.clone()),
                phase: Phase::Authenticating,
            };
            true
        });
        debug!(has_principal = principal.is_some(), "session seeded from store");
        Some(pair)
    }

    pub(crate) fn begin_authenticating(&self) {
        let _guard = self.lock();
        self.inner
            .snapshot
            .send_modify(|s| s.phase = Phase::Authenticating);
    }

    /// Leave `Authenticating` without committing anything new.
    pub(crate) fn settle(&self) {
        let _guard = self.lock();
        self.inner.snapshot.send_if_modified(|s| {
            if s.phase != Phase::Authenticating {
                return false;
            }
            s.phase = match (&s.credential, &s.principal) {
                (None, _) => Phase::Anonymous,
                (Some(_), Some(_)) => Phase::Authenticated,
                (Some(_), None) => return false,
            };
            true
        });
    }

    pub(crate) fn commit_login(&self, pair: CredentialPair, principal: Principal) {
        let mut epoch = self.lock();
        *epoch += 1;
        let store = &self.inner.store;
        store.set(&pair);
        store.set_principal(&principal);

        let principal_id = principal.id.clone();
        self.inner.snapshot.send_replace(SessionSnapshot {
            principal: Some(principal),
            credential: Some(pair),
            phase: Phase::Authenticated,
        });
        info!(principal_id = %principal_id, "session established");
        self.emit(SessionEvent::LoggedIn { principal_id });
    }

    /// Mark an exchange as outstanding. Returns the epoch the exchange
    /// belongs to.
    pub(crate) fn begin_refresh(&self) -> Epoch {
        let epoch = self.lock();
        self.inner.snapshot.send_if_modified(|s| {
            if s.credential.is_none() {
                return false;
            }
            s.phase = Phase::Refreshing;
            true
        });
        *epoch
    }

    /// Leave `Refreshing` without a new credential, e.g. when the exchange
    /// was abandoned.
    pub(crate) fn abandon_refresh(&self) {
        let _guard = self.lock();
        self.inner.snapshot.send_if_modified(|s| {
            if s.phase != Phase::Refreshing {
                return false;
            }
            s.phase = match (&s.credential, &s.principal) {
                (None, _) => Phase::Anonymous,
                (Some(_), Some(_)) => Phase::Authenticated,
                (Some(_), None) => Phase::Authenticating,
            };
            true
        });
    }

    /// Install a refreshed pair. Returns `false` when the session the
    /// exchange started in has ended (logout, forced logout or a new login);
    /// the pair is then discarded.
    pub(crate) fn commit_refresh(&self, started_in: Epoch, pair: &CredentialPair) -> bool {
        let epoch = self.lock();
        if *epoch != started_in || self.inner.snapshot.borrow().credential.is_none() {
            return false;
        }

        self.inner.store.set(pair);
        self.inner.snapshot.send_modify(|s| {
            s.credential = Some(pair.clone());
            s.phase = if s.principal.is_some() {
                Phase::Authenticated
            } else {
                Phase::Authenticating
            };
        });
        self.emit(SessionEvent::Refreshed);
        true
    }

    /// Install a freshly fetched principal. Returns `false` when there is no
    /// live credential to attach it to.
    pub(crate) fn commit_principal(&self, principal: Principal) -> bool {
        let _guard = self.lock();
        if self.inner.snapshot.borrow().credential.is_none() {
            return false;
        }

        self.inner.store.set_principal(&principal);
        self.inner.snapshot.send_modify(|s| {
            s.principal = Some(principal);
            s.phase = Phase::Authenticated;
        });
        true
    }

    /// End the session involuntarily. Returns `false` if there was nothing
    /// to end, so concurrent callers produce a single logout.
    pub(crate) fn force_logout(&self, reason: LogoutReason) -> bool {
        let mut epoch = self.lock();
        self.invalidate_locked(&mut epoch, reason)
    }

    /// Like `force_logout`, but only while the session is still the one
    /// identified by `started_in`.
    pub(crate) fn force_logout_in(&self, started_in: Epoch, reason: LogoutReason) -> bool {
        let mut epoch = self.lock();
        if *epoch != started_in {
            debug!(reason = reason.label(), "session already replaced, keeping it");
            return false;
        }
        self.invalidate_locked(&mut epoch, reason)
    }

    /// Like `force_logout`, but only if `rejected_access` is still the live
    /// access token. A session that has since moved on to a newer credential
    /// is left alone.
    pub(crate) fn force_logout_rejecting(&self, rejected_access: &str, reason: LogoutReason) -> bool {
        let mut epoch = self.lock();
        let current = self.inner.snapshot.borrow().access_token().map(str::to_owned);
        match current {
            Some(current) if current != rejected_access => {
                debug!("rejected credential already replaced, keeping session");
                false
            }
            _ => self.invalidate_locked(&mut epoch, reason),
        }
    }

    fn invalidate_locked(&self, epoch: &mut Epoch, reason: LogoutReason) -> bool {
        let had_credential = self.inner.snapshot.borrow().credential.is_some();
        let had_stored = self.inner.store.get().is_some();
        self.inner.store.clear();
        if !had_credential && !had_stored {
            return false;
        }
        *epoch += 1;

        self.inner.snapshot.send_modify(|s| {
            s.credential = None;
            s.principal = None;
            s.phase = Phase::Invalid;
        });
        self.inner.snapshot.send_replace(SessionSnapshot::anonymous());

        warn!(reason = reason.label(), "session invalidated");
        metrics::record_forced_logout(reason.label());
        self.emit(SessionEvent::ForcedLogout { reason });
        true
    }

    /// Voluntary logout: wipe everything and land in Anonymous.
    pub(crate) fn clear(&self) {
        let mut epoch = self.lock();
        *epoch += 1;
        self.inner.store.clear();
        self.inner.snapshot.send_replace(SessionSnapshot::anonymous());
        info!("session cleared");
        self.emit(SessionEvent::LoggedOut);
    }

    pub(crate) fn notify_access_denied(&self, path: &str) {
        self.emit(SessionEvent::AccessDenied {
            path: path.to_string(),
        });
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::principal;
    use admin_auth::{KeyValueStore, MemoryStore, PRINCIPAL_KEY};

    fn seeded(role: Role) -> (SessionState, CredentialStore) {
        let store = CredentialStore::in_memory();
        store.set(&CredentialPair::new("A1", "R1"));
        store.set_principal(&principal(role));
        (SessionState::new(store.clone()), store)
    }

    #[test]
    fn starts_anonymous_without_reading_store() {
        let (state, _) = seeded(Role::Admin);
        let snap = state.snapshot();
        assert_eq!(snap.phase, Phase::Anonymous);
        assert!(snap.credential.is_none());
        assert!(!snap.is_authenticated());
    }

    #[test]
    fn load_from_store_is_idempotent() {
        let (state, _) = seeded(Role::Admin);
        let mut rx = state.subscribe();
        rx.mark_unchanged();

        assert!(state.load_from_store().is_some());
        assert!(rx.has_changed().unwrap());
        rx.mark_unchanged();

        assert!(state.load_from_store().is_some());
        assert!(!rx.has_changed().unwrap(), "second load must not touch the snapshot");
        assert_eq!(state.phase(), Phase::Authenticating);
    }

    #[test]
    fn unprivileged_stored_principal_is_wiped() {
        let (state, store) = seeded(Role::Client);
        assert!(state.load_from_store().is_none());
        assert!(store.is_empty());
        assert_eq!(state.phase(), Phase::Anonymous);
    }

    #[test]
    fn settle_promotes_when_principal_cached() {
        let (state, _) = seeded(Role::Staff);
        state.load_from_store();
        state.settle();
        let snap = state.snapshot();
        assert_eq!(snap.phase, Phase::Authenticated);
        assert!(snap.is_authorized());
    }

    #[test]
    fn force_logout_is_single_shot() {
        let (state, store) = seeded(Role::Admin);
        state.load_from_store();
        let mut events = state.events();

        assert!(state.force_logout(LogoutReason::RefreshFailed));
        assert!(!state.force_logout(LogoutReason::CredentialRejected));

        assert!(store.is_empty());
        assert_eq!(state.phase(), Phase::Anonymous);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ForcedLogout {
                reason: LogoutReason::RefreshFailed
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn rejection_of_replaced_credential_keeps_session() {
        let (state, store) = seeded(Role::Admin);
        state.load_from_store();
        let epoch = state.begin_refresh();
        assert!(state.commit_refresh(epoch, &CredentialPair::new("A2", "R2")));

        assert!(!state.force_logout_rejecting("A1", LogoutReason::CredentialRejected));
        assert_eq!(store.get().unwrap().access_token(), "A2");

        assert!(state.force_logout_rejecting("A2", LogoutReason::CredentialRejected));
        assert!(store.get().is_none());
    }

    #[test]
    fn refresh_after_logout_is_discarded() {
        let (state, store) = seeded(Role::Admin);
        state.load_from_store();
        let epoch = state.begin_refresh();
        assert_eq!(state.phase(), Phase::Refreshing);

        state.clear();
        assert!(!state.commit_refresh(epoch, &CredentialPair::new("A2", "R2")));
        assert!(store.get().is_none());
        assert_eq!(state.phase(), Phase::Anonymous);
    }

    #[test]
    fn refresh_from_previous_session_leaves_new_login_alone() {
        let (state, store) = seeded(Role::Admin);
        state.load_from_store();
        let epoch = state.begin_refresh();

        state.clear();
        state.commit_login(CredentialPair::new("A0", "R1"), principal(Role::Admin));

        assert!(!state.commit_refresh(epoch, &CredentialPair::new("A2", "R2")));
        assert!(!state.force_logout_in(epoch, LogoutReason::RefreshFailed));

        let stored = store.get().unwrap();
        assert_eq!(stored.access_token(), "A0");
        assert_eq!(stored.refresh_token(), "R1");
        assert_eq!(state.phase(), Phase::Authenticated);
        assert_eq!(state.snapshot().access_token(), Some("A0"));
    }

    #[test]
    fn failed_refresh_in_current_session_logs_out() {
        let (state, store) = seeded(Role::Admin);
        state.load_from_store();
        let epoch = state.begin_refresh();

        assert!(state.force_logout_in(epoch, LogoutReason::RefreshFailed));
        assert!(store.is_empty());
        assert_eq!(state.phase(), Phase::Anonymous);
    }

    #[test]
    fn unreadable_stored_principal_is_wiped() {
        let backend = Arc::new(MemoryStore::default());
        let store = CredentialStore::new(backend.clone());
        store.set(&CredentialPair::new("A1", "R1"));
        backend.set(PRINCIPAL_KEY, "{not json".to_string());
        let state = SessionState::new(store.clone());
        let mut events = state.events();

        assert!(state.load_from_store().is_none());
        assert!(store.is_empty());
        assert!(backend.get(PRINCIPAL_KEY).is_none());
        assert_eq!(state.phase(), Phase::Anonymous);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::ForcedLogout {
                reason: LogoutReason::UnreadablePrincipal
            }
        );
    }

    #[test]
    fn missing_principal_keeps_credential() {
        let store = CredentialStore::in_memory();
        store.set(&CredentialPair::new("A1", "R1"));
        let state = SessionState::new(store.clone());

        assert!(state.load_from_store().is_some());
        assert!(!store.is_empty());
        assert_eq!(state.phase(), Phase::Authenticating);
    }

    #[test]
    fn abandoned_refresh_restores_phase() {
        let (state, _) = seeded(Role::Admin);
        state.load_from_store();
        state.settle();
        state.begin_refresh();
        assert!(state.snapshot().is_authorized());

        state.abandon_refresh();
        assert_eq!(state.phase(), Phase::Authenticated);
        assert!(state.snapshot().is_authorized());
    }

    #[test]
    fn snapshot_role_predicates() {
        let (state, _) = seeded(Role::SuperAdmin);
        state.load_from_store();
        let snap = state.snapshot();
        assert!(snap.is_super_admin());
        assert!(snap.has_role(&[Role::Admin, Role::SuperAdmin]));
        assert!(!snap.has_role(&[Role::Client]));
    }
}
