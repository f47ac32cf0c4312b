//! Route guard.
//!
//! The protected part of the app is split into a patient section and a
//! doctor section. The guard derives a [`RouteState`] from the session and
//! role state, and decides whether the visible route has to be replaced.
//! It never redirects while the role is still being resolved.

use crate::role::Role;
use crate::sync::RoleState;
use serde::Serialize;
use std::fmt;

/// Route of the login screen.
pub const LOGIN_ROUTE: &str = "/auth/login";

const AUTH_SEGMENT: &str = "auth";
const PROTECTED_GROUP: &str = "(protected)";

/// Route-guard states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "role", rename_all = "snake_case")]
pub enum RouteState {
    /// No identity.
    Unauthenticated,
    /// Identity known, session or cached role not loaded yet.
    Loading,
    /// Identity known, waiting for the authoritative role.
    AwaitingSync,
    /// Role resolved; the guard enforces this role's section.
    Ready(Role),
}

impl RouteState {
    /// Derive the state from the inputs the guard is allowed to look at.
    ///
    /// `session_ready` is false until the restored session has been taken
    /// into account. A missing identity is `Unauthenticated` regardless.
    pub fn derive(session_ready: bool, identity_present: bool, role: &RoleState) -> Self {
        if !identity_present {
            return RouteState::Unauthenticated;
        }
        if !session_ready || !role.cache_loaded {
            return RouteState::Loading;
        }
        match (role.has_synced, role.active_role) {
            (true, Some(active)) => RouteState::Ready(active),
            _ => RouteState::AwaitingSync,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteState::Unauthenticated => "unauthenticated",
            RouteState::Loading => "loading",
            RouteState::AwaitingSync => "awaiting_sync",
            RouteState::Ready(Role::Patient) => "ready(patient)",
            RouteState::Ready(Role::Doctor) => "ready(doctor)",
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            RouteState::Ready(role) => Some(*role),
            _ => None,
        }
    }

    /// Whether the guard may redirect in this state.
    pub fn allows_redirect(&self) -> bool {
        matches!(self, RouteState::Unauthenticated | RouteState::Ready(_))
    }

    /// Check a transition against the state machine.
    ///
    /// Staying in the same state is always allowed. Any state may fall back
    /// to `Unauthenticated`.
    pub fn can_transition_to(&self, next: RouteState) -> bool {
        if *self == next || next == RouteState::Unauthenticated {
            return true;
        }
        match (self, next) {
            (RouteState::Unauthenticated, RouteState::Loading) => true,
            (RouteState::Loading, RouteState::AwaitingSync) => true,
            (RouteState::AwaitingSync, RouteState::Ready(_)) => true,
            (RouteState::Ready(_), RouteState::Ready(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RouteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A navigation path split into segments.
///
/// Segments in parentheses are layout groups; they organize screens without
/// appearing in what the user sees, so `/(protected)/doctor/(tabs)` sits in
/// the doctor section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RoutePath {
    segments: Vec<String>,
}

impl RoutePath {
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split('/')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// The landing route `/`.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn visible_segments(&self) -> impl Iterator<Item = &str> {
        self.segments
            .iter()
            .map(String::as_str)
            .filter(|s| !is_group(s))
    }

    /// The role section this route belongs to, if any.
    pub fn section(&self) -> Option<Role> {
        self.segments.iter().find_map(|s| {
            Role::ALL
                .iter()
                .copied()
                .find(|role| role.segment() == s.as_str())
        })
    }

    /// Landing page and auth screens.
    pub fn is_public(&self) -> bool {
        if self.segments.iter().any(|s| s == PROTECTED_GROUP) {
            return false;
        }
        match self.visible_segments().next() {
            None => true,
            Some(first) => first == AUTH_SEGMENT,
        }
    }

    /// The bare protected group, reached right after login.
    pub fn is_protected_root(&self) -> bool {
        self.segments.iter().any(|s| s == PROTECTED_GROUP) && self.visible_segments().next().is_none()
    }
}

impl fmt::Display for RoutePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

fn is_group(segment: &str) -> bool {
    segment.starts_with('(') && segment.ends_with(')')
}

/// What the protected layout shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Render {
    /// Spinner while the role is being resolved.
    Loader,
    /// Ready, but the route is about to be replaced.
    Nothing,
    /// The requested screen.
    Content,
    /// Public screens while signed out.
    Public,
}

/// Outcome of one guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    pub state: RouteState,
    pub redirect: Option<String>,
    pub render: Render,
}

impl GuardDecision {
    fn stay(state: RouteState, render: Render) -> Self {
        Self {
            state,
            redirect: None,
            render,
        }
    }

    fn redirect(state: RouteState, to: &str, render: Render) -> Self {
        Self {
            state,
            redirect: Some(to.to_string()),
            render,
        }
    }
}

/// Decide what to do with `route` in `state`.
///
/// In `Ready(role)` the route must be in `role`'s section; the landing page,
/// auth screens, the bare protected root and the other section redirect to
/// the role's home. Shared screens outside both sections stay put. While
/// signed out, protected routes redirect to the login screen.
pub fn evaluate(state: RouteState, route: &RoutePath) -> GuardDecision {
    if !state.allows_redirect() {
        return GuardDecision::stay(state, Render::Loader);
    }
    match state.role() {
        Some(role) => match route.section() {
            Some(section) if section == role => GuardDecision::stay(state, Render::Content),
            Some(_) => GuardDecision::redirect(state, role.home_route(), Render::Nothing),
            None if route.is_public() || route.is_protected_root() => {
                GuardDecision::redirect(state, role.home_route(), Render::Nothing)
            }
            None => GuardDecision::stay(state, Render::Content),
        },
        None if route.is_public() => GuardDecision::stay(state, Render::Public),
        None => GuardDecision::redirect(state, LOGIN_ROUTE, Render::Public),
    }
}
