//! Session lifecycle orchestration.
//!
//! `SessionController` owns the live access token and the session state,
//! and drives the four flows: startup restoration, login, logout, and
//! refresh. It exposes two faces:
//!
//! - [`AuthHandle`], the narrow boundary the application's HTTP layer
//!   consumes: a synchronous token getter, a refresh invoker that routes
//!   through the single-flight coordinator, and a forced-logout entry
//!   point
//! - [`subscribe`](SessionController::subscribe), a watch channel
//!   mirroring every state change for reactive consumers
//!
//! The token lives in two representations on purpose: a plain cell read
//! synchronously by the HTTP layer's getter (updated with no suspension
//! point between receiving a token and storing it, so a call chain that
//! resumes afterward always observes the new value), and the watch
//! mirror for consumers that want recomputation on change. The
//! synchronous path never depends on the asynchronous one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::AuthApi;
use crate::config::AuthConfig;
use crate::error::AuthFault;
use crate::refresh::RefreshCoordinator;
use crate::scheduler::{ProactiveScheduler, RefreshDriver};
use crate::store::{keys, SessionStore};
use crate::token;

use super::state::{transition, Session, SessionEvent, SessionState};

/// Callbacks injected at construction. The session layer never touches
/// UI primitives directly; it asks through this seam.
pub trait AuthEvents: Send + Sync {
    /// Redirect to the login surface after a forced logout.
    fn navigate_to_login(&self) {}
    /// The session was torn down because the server rejected its
    /// credentials (e.g. the refresh token came back invalid).
    fn session_invalidated(&self) {}
}

/// Default no-op event sink.
pub struct NoopEvents;

impl AuthEvents for NoopEvents {}

/// The narrow interface registered with the application's HTTP client at
/// startup.
#[async_trait]
pub trait AuthHandle: Send + Sync {
    /// Current live access token. Synchronous by design: concurrent
    /// outbound requests must observe the latest value even mid-update.
    fn access_token(&self) -> Option<String>;

    /// Called by the HTTP client on an authorization failure. Multiple
    /// simultaneously-failing requests cause exactly one refresh.
    async fn refresh_after_unauthorized(&self) -> Result<String, AuthFault>;

    /// Tear the session down without a logout call, e.g. when the server
    /// has already invalidated it.
    async fn force_logout(&self);
}

pub struct SessionController {
    config: AuthConfig,
    api: Arc<dyn AuthApi>,
    store: SessionStore,
    coordinator: RefreshCoordinator,
    scheduler: ProactiveScheduler,
    events: Arc<dyn AuthEvents>,

    /// Authoritative copy of the live access token, readable without
    /// suspension by the HTTP layer's token getter.
    token_cell: RwLock<Option<String>>,
    state: RwLock<SessionState>,
    state_tx: watch::Sender<SessionState>,

    /// Cleared by `shutdown()`; restoration skips its tail-end state
    /// mutations once this is false.
    alive: AtomicBool,
}

impl SessionController {
    /// Construct the controller. Initial state is `Restoring` iff a
    /// persisted access token exists - otherwise `Unauthenticated`, and
    /// no network call will be made until `login`.
    pub fn new(
        config: AuthConfig,
        api: Arc<dyn AuthApi>,
        store: SessionStore,
        events: Arc<dyn AuthEvents>,
    ) -> Arc<Self> {
        let initial = if store.get(keys::ACCESS_TOKEN).is_some() {
            SessionState::Restoring
        } else {
            SessionState::Unauthenticated
        };
        debug!(state = initial.label(), "session controller starting");

        let (state_tx, _) = watch::channel(initial.clone());
        let scheduler = ProactiveScheduler::new(config.late_refresh_delay);

        Arc::new(Self {
            config,
            api,
            store,
            coordinator: RefreshCoordinator::new(),
            scheduler,
            events,
            token_cell: RwLock::new(None),
            state: RwLock::new(initial),
            state_tx,
            alive: AtomicBool::new(true),
        })
    }

    // =========================================================================
    // Observers
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.state.read().unwrap().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.read().unwrap().is_authenticated()
    }

    pub fn session(&self) -> Option<Session> {
        self.state.read().unwrap().session().cloned()
    }

    /// Reactive mirror of the session state. Receives every change
    /// applied through the transition function.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Current live access token (synchronous cell read).
    pub fn access_token(&self) -> Option<String> {
        self.token_cell.read().unwrap().clone()
    }

    /// Whether the current session carries any of the given role tags.
    pub fn has_role(&self, roles: &[&str]) -> bool {
        self.state
            .read()
            .unwrap()
            .session()
            .map(|session| session.has_any_role(roles))
            .unwrap_or(false)
    }

    /// The coordinator, for HTTP layers that queue mid-refresh replays.
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    // =========================================================================
    // State plumbing
    // =========================================================================

    fn apply(&self, event: SessionEvent) {
        let mut state = self.state.write().unwrap();
        let next = transition(&state, event);
        if *state != next {
            debug!(from = state.label(), to = next.label(), "session state change");
            *state = next.clone();
            let _ = self.state_tx.send(next);
        }
    }

    /// Adopt a freshly received token: cell first (synchronous, so any
    /// call chain resuming after this observes it), then the persisted
    /// mirror.
    fn adopt_token(&self, access_token: &str) {
        *self.token_cell.write().unwrap() = Some(access_token.to_string());
        self.store.set(keys::ACCESS_TOKEN, access_token);
    }

    /// Undo a partially established login: the adopted token must not
    /// outlive the sequence that adopted it.
    fn clear_adopted_token(&self) {
        *self.token_cell.write().unwrap() = None;
        self.store.remove(keys::ACCESS_TOKEN);
        self.store.remove(keys::REFRESH_TOKEN);
    }

    /// Unconditional teardown: live token, session, persisted keys,
    /// queued requests, armed timer. Safe to call repeatedly.
    fn teardown(&self) {
        *self.token_cell.write().unwrap() = None;
        self.scheduler.cancel();
        self.coordinator.clear();
        self.store.clear_all();
        self.apply(SessionEvent::LoggedOut);
    }

    fn arm_scheduler(self: &Arc<Self>, access_token: &str) {
        let as_dyn: Arc<dyn RefreshDriver> = self.clone();
        let weak: Weak<dyn RefreshDriver> = Arc::downgrade(&as_dyn);
        self.scheduler.arm(access_token, weak);
    }

    fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the controller's owning context as gone: restoration stops
    /// mutating state, the proactive timer stops. In-flight network
    /// calls are not aborted - they complete into the void.
    pub fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.scheduler.cancel();
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Single-flighted refresh: concurrent callers share one underlying
    /// `/auth/refresh` call.
    pub async fn refresh(&self) -> Result<String, AuthFault> {
        self.coordinator.start_refresh(|| self.raw_refresh()).await
    }

    /// The raw refresh operation the coordinator invokes. Never retried
    /// internally - a stale refresh token will not become valid by
    /// retrying.
    async fn raw_refresh(&self) -> Result<String, AuthFault> {
        let Some(refresh_token) = self.store.get(keys::REFRESH_TOKEN) else {
            // The endpoint would reject an absent token with 401
            return Err(AuthFault::InvalidCredentials);
        };

        let response = self.api.refresh(&refresh_token).await?;
        self.adopt_token(&response.access_token);
        if let Some(ref rotated) = response.refresh_token {
            self.store.set(keys::REFRESH_TOKEN, rotated);
        }
        debug!("access token refreshed");
        Ok(response.access_token)
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Startup restoration: validate-then-trust. A persisted token is
    /// expiry-checked before adoption; an expired one goes through one
    /// refresh; the identity fetch gets exactly one refresh-then-refetch
    /// retry before the session is torn down.
    pub async fn restore(self: &Arc<Self>) -> Result<(), AuthFault> {
        let Some(persisted) = self.store.get(keys::ACCESS_TOKEN) else {
            debug!("no persisted token, starting unauthenticated");
            self.apply(SessionEvent::RestoreFailed);
            return Ok(());
        };
        self.apply(SessionEvent::RestoreStarted);

        let live_token = if token::is_expired(Some(&persisted), self.config.expiry_buffer) {
            debug!("persisted token expired, refreshing before adoption");
            match self.refresh().await {
                Ok(fresh) => fresh,
                Err(fault) => {
                    warn!(fault = %fault, "restore refresh failed, tearing down");
                    if self.alive() {
                        self.teardown();
                    }
                    return Err(fault);
                }
            }
        } else {
            self.adopt_token(&persisted);
            persisted
        };
        if !self.alive() {
            return Ok(());
        }

        let identity = match self.api.me(&live_token).await {
            Ok(identity) => identity,
            Err(first_fault) => {
                if !self.alive() {
                    return Ok(());
                }
                debug!(fault = %first_fault, "identity fetch failed, retrying via refresh");
                let retried = match self.refresh().await {
                    Ok(fresh) => {
                        if !self.alive() {
                            return Ok(());
                        }
                        self.api.me(&fresh).await
                    }
                    Err(fault) => Err(fault),
                };
                match retried {
                    Ok(identity) => identity,
                    Err(fault) => {
                        warn!(fault = %fault, "restore failed after refresh retry, tearing down");
                        if self.alive() {
                            self.teardown();
                        }
                        return Err(fault);
                    }
                }
            }
        };
        if !self.alive() {
            return Ok(());
        }

        let started_at = self
            .store
            .get(keys::LOGGED_IN_AT)
            .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now);
        let session = Session::from_identity(&identity, None, started_at);
        self.store.set_json(keys::USER, &session);

        let armed_token = self.access_token().unwrap_or(live_token);
        self.arm_scheduler(&armed_token);
        self.apply(SessionEvent::RestoreSucceeded(session));
        info!("session restored");
        Ok(())
    }

    // =========================================================================
    // Login / logout
    // =========================================================================

    /// Login with bounded retry: network-shaped faults back off and try
    /// again (1s, 2s, capped), anything else surfaces immediately.
    pub async fn login(
        self: &Arc<Self>,
        username: &str,
        password: &str,
    ) -> Result<Session, AuthFault> {
        let policy = self.config.login_retry.clone();
        let result = policy.run(|| self.login_once(username, password)).await;
        if let Err(ref fault) = result {
            warn!(fault = %fault, message = fault.user_message(), "login failed");
        }
        result
    }

    async fn login_once(
        self: &Arc<Self>,
        username: &str,
        password: &str,
    ) -> Result<Session, AuthFault> {
        let response = self.api.login(username, password).await?;

        // Adopt before the identity fetch: the profile call reads the
        // token through the HTTP layer's getter
        self.store.set(keys::REFRESH_TOKEN, &response.refresh_token);
        self.adopt_token(&response.access_token);

        let identity = match self.api.me(&response.access_token).await {
            Ok(identity) => identity,
            Err(fault) => {
                // Partial state must not outlive the failed sequence
                self.clear_adopted_token();
                return Err(fault);
            }
        };

        let started_at = Utc::now();
        let session = Session::from_identity(&identity, response.role.as_deref(), started_at);
        self.store.set_json(keys::USER, &session);
        self.store.set(keys::LOGGED_IN_AT, &started_at.to_rfc3339());

        self.arm_scheduler(&response.access_token);
        self.apply(SessionEvent::LoggedIn(session.clone()));
        info!(user_id = %session.user_id, "logged in");
        Ok(session)
    }

    /// Logout: best-effort endpoint call (failure is logged, never blocks
    /// teardown), then unconditional teardown. Idempotent - a second call
    /// finds no token and makes no network call.
    pub async fn logout(&self) {
        if let Some(access_token) = self.access_token() {
            if let Err(fault) = self.api.logout(&access_token).await {
                warn!(fault = %fault, "logout endpoint call failed, continuing teardown");
            }
        }
        self.teardown();
        info!("logged out");
    }
}

#[async_trait]
impl AuthHandle for SessionController {
    fn access_token(&self) -> Option<String> {
        SessionController::access_token(self)
    }

    async fn refresh_after_unauthorized(&self) -> Result<String, AuthFault> {
        match self.refresh().await {
            Ok(access_token) => Ok(access_token),
            Err(fault) => {
                if matches!(fault, AuthFault::InvalidCredentials) {
                    // The refresh token itself was rejected; this session
                    // cannot recover
                    warn!("refresh rejected by server, forcing logout");
                    self.teardown();
                    self.events.session_invalidated();
                    self.events.navigate_to_login();
                }
                Err(fault)
            }
        }
    }

    async fn force_logout(&self) {
        self.teardown();
        self.events.session_invalidated();
        self.events.navigate_to_login();
    }
}

#[async_trait]
impl RefreshDriver for SessionController {
    async fn proactive_refresh(&self) -> Result<String, AuthFault> {
        self.refresh().await
    }
}
