//! One CLI invocation's worth of session layer.
//!
//! Restores the stored session and last route, starts the coordinator, and
//! forwards provider notifications to it through a [`SessionHandle`]. On
//! finish, the session and the route the guard settled on are written back.

use anyhow::{Context, Result};
use medplus_ids::UserId;
use medplus_session::config::LAST_ROUTE_KEY;
use medplus_session::{
    FileStore, JsonProfileStore, LocalSessionProvider, LocalStore, Navigator, RoleState,
    RoleSynchronizer, RoutePath, RouteState, SessionConfig, SessionCoordinator, SessionEvent,
    SessionHandle, SessionProvider, Subscription,
};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Navigator that records redirects for the report.
#[derive(Default)]
pub struct CliNavigator {
    redirects: Mutex<Vec<String>>,
}

impl CliNavigator {
    pub fn redirects(&self) -> Vec<String> {
        self.redirects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Navigator for CliNavigator {
    fn replace(&self, path: &str) {
        info!("Redirecting to {}", path);
        self.redirects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(path.to_string());
    }
}

/// Where an invocation left the app.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub signed_in: bool,
    pub user_id: Option<UserId>,
    pub email: Option<String>,
    pub state: RouteState,
    pub route: String,
    pub role: RoleState,
    pub can_switch_role: bool,
    /// Redirects issued during this invocation, in order.
    pub redirects: Vec<String>,
}

pub struct Harness {
    store: Arc<FileStore>,
    provider: LocalSessionProvider,
    coordinator: SessionCoordinator,
    navigator: Arc<CliNavigator>,
    events: UnboundedReceiver<SessionEvent>,
    subscription: Subscription,
}

impl Harness {
    /// Restore local state and run the coordinator's startup.
    pub async fn open(config: &SessionConfig) -> Result<Self> {
        let store_dir = config.store_dir();
        let store = Arc::new(
            FileStore::open(&store_dir)
                .with_context(|| format!("Failed to open store at {}", store_dir.display()))?,
        );
        let profiles = Arc::new(JsonProfileStore::new(config.profiles_path()));
        let provider = LocalSessionProvider::restore(store.as_ref()).await;

        let route = match store.get(LAST_ROUTE_KEY).await {
            Ok(Some(raw)) => RoutePath::parse(&raw),
            Ok(None) => RoutePath::root(),
            Err(err) => {
                warn!("Failed to read last route: {}", err);
                RoutePath::root()
            }
        };
        debug!("Opening session harness at {} (route {})", config.home.display(), route);

        let sync = Arc::new(RoleSynchronizer::new(config.clone(), store.clone(), profiles));
        let navigator = Arc::new(CliNavigator::default());
        let mut coordinator = SessionCoordinator::new(
            sync,
            navigator.clone(),
            provider.current_identity(),
            route,
        );

        let (handle, events) = SessionHandle::channel();
        let subscription = handle.attach(&provider);
        coordinator.start().await;

        Ok(Self {
            store,
            provider,
            coordinator,
            navigator,
            events,
            subscription,
        })
    }

    pub fn provider(&self) -> &LocalSessionProvider {
        &self.provider
    }

    pub fn coordinator(&mut self) -> &mut SessionCoordinator {
        &mut self.coordinator
    }

    /// Hand queued provider notifications to the coordinator.
    pub async fn settle(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.coordinator.handle(event).await;
        }
    }

    /// Persist the session and route, then report.
    pub async fn finish(mut self) -> Result<StatusReport> {
        self.settle().await;
        self.subscription.unsubscribe();

        self.provider
            .persist(self.store.as_ref())
            .await
            .context("Failed to persist session")?;
        let route = self.coordinator.route().to_string();
        self.store
            .set(LAST_ROUTE_KEY, &route)
            .await
            .context("Failed to persist last route")?;

        let identity = self.provider.current_identity();
        let role = self.coordinator.role_state();
        let report = StatusReport {
            signed_in: identity.is_some(),
            user_id: identity.as_ref().map(|i| i.user_id),
            email: identity.and_then(|i| i.email),
            state: self.coordinator.state(),
            route,
            role,
            can_switch_role: role.can_switch_role(),
            redirects: self.navigator.redirects(),
        };
        self.coordinator.synchronizer().teardown();
        Ok(report)
    }
}
