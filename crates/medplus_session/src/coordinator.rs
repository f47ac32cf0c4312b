//! Session coordinator: the navigation layer's view of session and role.
//!
//! Events arrive one at a time (identity changes, route changes, role
//! switches) and each runs to completion before the next is taken. Inside
//! [`SessionCoordinator::run`] the profile lookup is the one piece of work
//! that runs beside the loop; its result comes back as just another event.

use crate::error::SessionError;
use crate::identity::Identity;
use crate::role::Role;
use crate::route::{evaluate, GuardDecision, RoutePath, RouteState};
use crate::session::{SessionProvider, Subscription};
use crate::sync::{RoleState, RoleSynchronizer, SyncOutcome};
use medplus_ids::UserId;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MAX_TRANSITION_HISTORY: usize = 64;

/// Redirect primitive of the navigation stack.
pub trait Navigator: Send + Sync {
    /// Replace the visible route with `path`.
    fn replace(&self, path: &str);
}

/// Events consumed by [`SessionCoordinator::run`].
#[derive(Debug)]
pub enum SessionEvent {
    IdentityChanged(Option<Identity>),
    RouteChanged(RoutePath),
    SwitchRole {
        role: Role,
        reply: oneshot::Sender<Result<Role, SessionError>>,
    },
    ToggleRole {
        reply: oneshot::Sender<Result<Role, SessionError>>,
    },
    Shutdown,
}

/// Sends events to a running coordinator.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SessionEvent) -> Result<(), SessionError> {
        self.tx.send(event).map_err(|_| SessionError::CoordinatorClosed)
    }

    pub fn identity_changed(&self, identity: Option<Identity>) -> Result<(), SessionError> {
        self.send(SessionEvent::IdentityChanged(identity))
    }

    pub fn navigate(&self, route: RoutePath) -> Result<(), SessionError> {
        self.send(SessionEvent::RouteChanged(route))
    }

    pub async fn switch_role(&self, role: Role) -> Result<Role, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::SwitchRole { role, reply })?;
        rx.await.map_err(|_| SessionError::CoordinatorClosed)?
    }

    pub async fn toggle_role(&self) -> Result<Role, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::ToggleRole { reply })?;
        rx.await.map_err(|_| SessionError::CoordinatorClosed)?
    }

    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionEvent::Shutdown)
    }

    /// Forward every identity change of `provider` into this handle.
    ///
    /// Dropping the returned subscription stops forwarding.
    pub fn attach(&self, provider: &dyn SessionProvider) -> Subscription {
        let tx = self.tx.clone();
        provider.subscribe(Box::new(move |identity| {
            if tx.send(SessionEvent::IdentityChanged(identity)).is_err() {
                debug!("Identity change dropped: coordinator stopped");
            }
        }))
    }
}

/// Drives the synchronizer from session events and enforces the route guard.
pub struct SessionCoordinator {
    sync: Arc<RoleSynchronizer>,
    navigator: Arc<dyn Navigator>,
    identity: Option<Identity>,
    synced_user: Option<UserId>,
    syncing_user: Option<UserId>,
    session_ready: bool,
    route: RoutePath,
    state: RouteState,
    history: VecDeque<RouteState>,
}

impl SessionCoordinator {
    /// `identity` is the session restored at startup, if any.
    pub fn new(
        sync: Arc<RoleSynchronizer>,
        navigator: Arc<dyn Navigator>,
        identity: Option<Identity>,
        route: RoutePath,
    ) -> Self {
        let state = if identity.is_some() {
            RouteState::Loading
        } else {
            RouteState::Unauthenticated
        };
        let mut history = VecDeque::with_capacity(MAX_TRANSITION_HISTORY);
        history.push_back(state);
        Self {
            sync,
            navigator,
            identity,
            synced_user: None,
            syncing_user: None,
            session_ready: false,
            route,
            state,
            history,
        }
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    pub fn route(&self) -> &RoutePath {
        &self.route
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn role_state(&self) -> RoleState {
        self.sync.snapshot()
    }

    pub fn synchronizer(&self) -> &Arc<RoleSynchronizer> {
        &self.sync
    }

    /// Route states visited so far, oldest first.
    pub fn transitions(&self) -> Vec<RouteState> {
        self.history.iter().copied().collect()
    }

    async fn load_cache(&mut self) {
        self.sync.load_cached_role().await;
        self.session_ready = true;
        self.guard();
    }

    /// Load the cached role, sync a restored session, and run the guard.
    pub async fn start(&mut self) -> GuardDecision {
        self.load_cache().await;
        if let Some(identity) = self.identity.clone() {
            self.syncing_user = Some(identity.user_id);
            let outcome = self.sync.sync_with_identity(&identity).await;
            self.finish_sync(&identity, &outcome);
        }
        self.guard()
    }

    /// Process events until `Shutdown` or until every handle is dropped.
    ///
    /// Profile lookups run in the background, including the one for a
    /// restored session, so identity changes (a logout in particular) are
    /// still handled while a lookup hangs. A newer lookup aborts the one it
    /// replaces. On exit the synchronizer is torn down and any lookup still
    /// running is aborted.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(Identity, SyncOutcome)>();
        let mut in_flight: Option<JoinHandle<()>> = None;

        if !self.session_ready {
            self.load_cache().await;
            if let Some(identity) = self.identity.clone() {
                in_flight = Some(self.spawn_sync(identity, done_tx.clone()));
            }
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    None | Some(SessionEvent::Shutdown) => break,
                    Some(SessionEvent::IdentityChanged(identity)) => {
                        if let Some(identity) = self.apply_identity(identity).await {
                            let next = self.spawn_sync(identity, done_tx.clone());
                            if let Some(replaced) = in_flight.replace(next) {
                                replaced.abort();
                            }
                        }
                        self.guard();
                    }
                    Some(event) => self.handle(event).await,
                },
                Some((identity, outcome)) = done_rx.recv() => {
                    self.finish_sync(&identity, &outcome);
                    self.guard();
                }
            }
        }

        self.sync.teardown();
        if let Some(handle) = in_flight.take() {
            handle.abort();
        }
        debug!("Session coordinator stopped in state {}", self.state);
        self
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::IdentityChanged(identity) => {
                self.handle_identity(identity).await;
            }
            SessionEvent::RouteChanged(route) => {
                self.handle_route(route);
            }
            SessionEvent::SwitchRole { role, reply } => {
                let result = self.switch_role(role).await;
                let _ = reply.send(result);
            }
            SessionEvent::ToggleRole { reply } => {
                let result = self.toggle_role().await;
                let _ = reply.send(result);
            }
            SessionEvent::Shutdown => {}
        }
    }

    /// React to the session provider reporting a new identity (or none),
    /// waiting for the profile lookup if one is needed.
    pub async fn handle_identity(&mut self, identity: Option<Identity>) -> GuardDecision {
        if let Some(identity) = self.apply_identity(identity).await {
            self.syncing_user = Some(identity.user_id);
            let outcome = self.sync.sync_with_identity(&identity).await;
            self.finish_sync(&identity, &outcome);
        }
        self.guard()
    }

    /// Record the identity change. Returns the identity whose role must be
    /// fetched, if any.
    ///
    /// Signing out resets the role state once, however many `None`
    /// notifications arrive. A different user signing in without a sign-out
    /// in between is treated as a sign-out followed by a sign-in. A token
    /// refresh for an already synced (or syncing) user needs no lookup.
    async fn apply_identity(&mut self, identity: Option<Identity>) -> Option<Identity> {
        let next = match identity {
            None => {
                if self.identity.take().is_some() {
                    self.logout().await;
                }
                return None;
            }
            Some(next) => next,
        };

        let switched_user = self
            .identity
            .as_ref()
            .is_some_and(|current| !current.same_user(&next));
        if switched_user {
            self.identity = None;
            self.logout().await;
        }
        if self.identity.is_none() {
            self.advance(RouteState::Loading);
        }
        self.identity = Some(next.clone());
        self.guard();

        let user = Some(next.user_id);
        if self.synced_user == user || self.syncing_user == user {
            None
        } else {
            Some(next)
        }
    }

    fn spawn_sync(
        &mut self,
        identity: Identity,
        done: mpsc::UnboundedSender<(Identity, SyncOutcome)>,
    ) -> JoinHandle<()> {
        self.syncing_user = Some(identity.user_id);
        let sync = Arc::clone(&self.sync);
        tokio::spawn(async move {
            let outcome = sync.sync_with_identity(&identity).await;
            let _ = done.send((identity, outcome));
        })
    }

    fn finish_sync(&mut self, identity: &Identity, outcome: &SyncOutcome) {
        // A superseded lookup may share its user with the newer one still running.
        let superseded = matches!(outcome, SyncOutcome::Superseded);
        if !superseded && self.syncing_user == Some(identity.user_id) {
            self.syncing_user = None;
        }
        match outcome {
            SyncOutcome::Applied(_) | SyncOutcome::Failed { .. } => {
                let current = self.identity.as_ref().is_some_and(|i| i.same_user(identity));
                if current {
                    self.synced_user = Some(identity.user_id);
                }
            }
            SyncOutcome::Superseded | SyncOutcome::Cancelled => {
                debug!("Discarded sync result for {}: {:?}", identity.user_id, outcome);
            }
        }
    }

    /// The visible route changed; re-run the guard against it.
    pub fn handle_route(&mut self, route: RoutePath) -> GuardDecision {
        self.route = route;
        self.guard()
    }

    /// Present the app as `role`. Only doctor accounts may switch.
    pub async fn switch_role(&mut self, role: Role) -> Result<Role, SessionError> {
        if self.identity.is_none() {
            return Err(SessionError::NotAuthenticated);
        }
        let role_state = self.sync.snapshot();
        if !role_state.can_switch_role() {
            return Err(SessionError::RoleSwitchNotPermitted {
                account: role_state.authoritative_role,
            });
        }
        self.sync.set_active_role_and_wait(role).await;
        info!("Switched presentation mode to {}", role);
        self.guard();
        Ok(role)
    }

    /// Flip between doctor and patient presentation.
    pub async fn toggle_role(&mut self) -> Result<Role, SessionError> {
        let current = self
            .sync
            .snapshot()
            .active_role
            .ok_or(SessionError::NotAuthenticated)?;
        self.switch_role(current.toggled()).await
    }

    async fn logout(&mut self) {
        self.synced_user = None;
        self.syncing_user = None;
        self.sync.reset_on_logout().await;
        self.advance(RouteState::Unauthenticated);
    }

    /// Recompute the route state and apply the guard decision.
    fn guard(&mut self) -> GuardDecision {
        let next = RouteState::derive(
            self.session_ready,
            self.identity.is_some(),
            &self.sync.snapshot(),
        );
        self.advance(next);

        let decision = evaluate(self.state, &self.route);
        if let Some(target) = &decision.redirect {
            info!("Guard redirect in {}: {} -> {}", self.state, self.route, target);
            self.navigator.replace(target);
            self.route = RoutePath::parse(target);
        }
        decision
    }

    fn advance(&mut self, next: RouteState) {
        if next == self.state {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!("Unexpected route state transition {} -> {}", self.state, next);
        }
        debug!("Route state {} -> {}", self.state, next);
        self.state = next;
        if self.history.len() == MAX_TRANSITION_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(next);
    }
}
