//! Role/session synchronizer.
//!
//! Keeps the locally cached active role reconciled with the authoritative
//! role from the profile store. Every failure here is recovered locally:
//! profile and storage errors are logged and the synchronizer keeps going
//! with the best role information it has.

use crate::cancel::CancellationToken;
use crate::config::SessionConfig;
use crate::error::ProfileError;
use crate::identity::Identity;
use crate::profile::ProfileStore;
use crate::role::Role;
use crate::storage::LocalStore;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Snapshot of the synchronizer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleState {
    /// Role driving the visible section.
    pub active_role: Option<Role>,
    /// Role of record, as last fetched from the profile store.
    pub authoritative_role: Option<Role>,
    /// Cached role not yet loaded, or a sync is in flight.
    pub is_loading: bool,
    /// A sync has been attempted since the last logout.
    pub has_synced: bool,
    /// `load_cached_role` has run.
    pub cache_loaded: bool,
}

impl RoleState {
    fn initial() -> Self {
        Self {
            active_role: None,
            authoritative_role: None,
            is_loading: true,
            has_synced: false,
            cache_loaded: false,
        }
    }

    /// Whether the account may toggle between presentation modes.
    pub fn can_switch_role(&self) -> bool {
        self.authoritative_role == Some(Role::Doctor)
    }
}

/// How a call to [`RoleSynchronizer::sync_with_identity`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The fetched role was applied to both roles.
    Applied(Role),
    /// The lookup failed; previous roles kept, `has_synced` set.
    Failed { kept: Option<Role>, reason: String },
    /// A newer sync or a logout started first; result dropped.
    Superseded,
    /// The synchronizer was torn down; result dropped.
    Cancelled,
}

/// Reconciles the active role with the profile store.
///
/// Shared by reference (`Arc`) between the navigation layer and whoever
/// issues role switches. In-memory state sits behind a mutex that is never
/// held across an await; writes of the persisted role are serialized by a
/// separate async lock so the stored and in-memory values cannot interleave.
pub struct RoleSynchronizer {
    config: SessionConfig,
    store: Arc<dyn LocalStore>,
    profiles: Arc<dyn ProfileStore>,
    state: Mutex<RoleState>,
    generation: AtomicU64,
    write_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

impl RoleSynchronizer {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn LocalStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            config,
            store,
            profiles,
            state: Mutex::new(RoleState::initial()),
            generation: AtomicU64::new(0),
            write_lock: tokio::sync::Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn snapshot(&self) -> RoleState {
        *self.lock_state()
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Read the role persisted by a previous run.
    ///
    /// `None` on first launch, on a read failure, or when the stored value is
    /// not a known role. The cached role becomes the active role unless a sync
    /// has already landed.
    pub async fn load_cached_role(&self) -> Option<Role> {
        let cached = match self.store.get(&self.config.role_key).await {
            Ok(Some(raw)) => match raw.parse::<Role>() {
                Ok(role) => Some(role),
                Err(err) => {
                    warn!("Ignoring persisted role: {}", err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("Error loading role from local storage: {}", err);
                None
            }
        };

        if self.cancel.is_cancelled() {
            return cached;
        }

        let mut state = self.lock_state();
        if !state.has_synced {
            if let Some(role) = cached {
                state.active_role = Some(role);
            }
        }
        state.cache_loaded = true;
        state.is_loading = false;
        debug!("Loaded cached role: {:?}", cached);
        cached
    }

    /// Fetch the authoritative role for `identity` and make it active.
    ///
    /// Starting a new sync supersedes any sync still in flight: only the most
    /// recent call applies its result. Whatever happens, a sync that is not
    /// superseded or cancelled leaves `has_synced` set so routing can proceed.
    pub async fn sync_with_identity(&self, identity: &Identity) -> SyncOutcome {
        if self.cancel.is_cancelled() {
            return SyncOutcome::Cancelled;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_state().is_loading = true;
        debug!("Sync {} started for user {}", generation, identity.user_id);

        let lookup = self.lookup(identity).await;

        if let Some(dropped) = self.stale(generation) {
            debug!("Sync {} for user {} dropped: {:?}", generation, identity.user_id, dropped);
            return dropped;
        }

        match lookup {
            Ok(role) => {
                let _write = self.write_lock.lock().await;
                // A logout or teardown may have slipped in while waiting for the lock.
                if let Some(dropped) = self.stale(generation) {
                    return dropped;
                }
                if let Err(err) = self.store.set(&self.config.role_key, role.as_str()).await {
                    warn!("Failed to persist synced role '{}': {}", role, err);
                }
                let mut state = self.lock_state();
                state.authoritative_role = Some(role);
                state.active_role = Some(role);
                state.has_synced = true;
                state.is_loading = false;
                info!("Sync complete for {}. Identity and mode set to: {}", identity.user_id, role);
                SyncOutcome::Applied(role)
            }
            Err(err) => {
                warn!("Role lookup failed for user {}: {}", identity.user_id, err);
                let mut state = self.lock_state();
                if state.active_role.is_none() {
                    state.active_role = Some(self.config.default_role);
                }
                state.has_synced = true;
                state.is_loading = false;
                SyncOutcome::Failed {
                    kept: state.active_role,
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Switch the presentation mode without touching the authoritative role.
    ///
    /// The persisted and in-memory values are updated under one write lock.
    /// A storage failure is logged and the in-memory value still changes.
    pub async fn set_active_role(&self, role: Role) {
        let _write = self.write_lock.lock().await;
        if let Err(err) = self.store.set(&self.config.role_key, role.as_str()).await {
            warn!("Error saving role '{}': {}", role, err);
        }
        if self.cancel.is_cancelled() {
            return;
        }
        self.lock_state().active_role = Some(role);
        debug!("Active role set to {}", role);
    }

    /// [`set_active_role`](Self::set_active_role), then wait the configured
    /// settle delay so observers see the new role before the caller navigates.
    pub async fn set_active_role_and_wait(&self, role: Role) {
        self.set_active_role(role).await;
        if !self.config.role_settle.is_zero() {
            tokio::time::sleep(self.config.role_settle).await;
        }
    }

    /// Forget everything tied to the signed-out account.
    ///
    /// Any sync still in flight is superseded.
    pub async fn reset_on_logout(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let _write = self.write_lock.lock().await;
        if let Err(err) = self.store.delete(&self.config.role_key).await {
            warn!("Error clearing persisted role: {}", err);
        }
        let mut state = self.lock_state();
        state.active_role = Some(self.config.default_role);
        state.authoritative_role = None;
        state.has_synced = false;
        state.is_loading = false;
        info!("Role state reset after logout");
    }

    /// Detach from the consumer. Results of calls still in flight are dropped.
    pub fn teardown(&self) {
        self.cancel.cancel();
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!("Role synchronizer torn down");
    }

    async fn lookup(&self, identity: &Identity) -> Result<Role, ProfileError> {
        match self.config.sync_timeout {
            Some(limit) => tokio::time::timeout(limit, self.profiles.get_role(identity))
                .await
                .unwrap_or_else(|_| Err(ProfileError::Timeout(millis(limit)))),
            None => self.profiles.get_role(identity).await,
        }
    }

    /// Why a sync started as `generation` must not apply its result, if so.
    fn stale(&self, generation: u64) -> Option<SyncOutcome> {
        if self.cancel.is_cancelled() {
            Some(SyncOutcome::Cancelled)
        } else if self.generation.load(Ordering::SeqCst) != generation {
            Some(SyncOutcome::Superseded)
        } else {
            None
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RoleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use medplus_ids::UserId;

    struct FixedProfiles(Result<Role, String>);

    #[async_trait]
    impl ProfileStore for FixedProfiles {
        async fn get_role(&self, _identity: &Identity) -> Result<Role, ProfileError> {
            self.0.clone().map_err(ProfileError::Unavailable)
        }
    }

    fn synchronizer(
        profiles: FixedProfiles,
    ) -> (RoleSynchronizer, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut config = SessionConfig::with_home("/unused");
        config.role_settle = Duration::ZERO;
        let sync = RoleSynchronizer::new(config, store.clone(), Arc::new(profiles));
        (sync, store)
    }

    #[tokio::test]
    async fn test_first_launch_has_no_cached_role() {
        let (sync, _store) = synchronizer(FixedProfiles(Ok(Role::Patient)));
        assert!(sync.snapshot().is_loading);

        assert_eq!(sync.load_cached_role().await, None);
        let state = sync.snapshot();
        assert!(!state.is_loading);
        assert!(state.cache_loaded);
        assert_eq!(state.active_role, None);
    }

    #[tokio::test]
    async fn test_cached_role_becomes_active() {
        let (sync, store) = synchronizer(FixedProfiles(Ok(Role::Patient)));
        store.set("activeRole", "doctor").await.unwrap();

        assert_eq!(sync.load_cached_role().await, Some(Role::Doctor));
        assert_eq!(sync.snapshot().active_role, Some(Role::Doctor));
        assert_eq!(sync.snapshot().authoritative_role, None);
    }

    #[tokio::test]
    async fn test_malformed_cached_role_is_ignored() {
        let (sync, store) = synchronizer(FixedProfiles(Ok(Role::Patient)));
        store.set("activeRole", "nurse").await.unwrap();
        assert_eq!(sync.load_cached_role().await, None);
        assert_eq!(sync.snapshot().active_role, None);
    }

    #[tokio::test]
    async fn test_sync_applies_and_persists_role() {
        let (sync, store) = synchronizer(FixedProfiles(Ok(Role::Doctor)));
        let identity = Identity::new(UserId::new());

        let outcome = sync.sync_with_identity(&identity).await;
        assert_eq!(outcome, SyncOutcome::Applied(Role::Doctor));

        let state = sync.snapshot();
        assert_eq!(state.active_role, Some(Role::Doctor));
        assert_eq!(state.authoritative_role, Some(Role::Doctor));
        assert!(state.has_synced);
        assert!(!state.is_loading);
        assert_eq!(store.get("activeRole").await.unwrap().as_deref(), Some("doctor"));
    }

    #[tokio::test]
    async fn test_sync_overrides_toggled_mode() {
        let (sync, _store) = synchronizer(FixedProfiles(Ok(Role::Doctor)));
        let identity = Identity::new(UserId::new());
        sync.sync_with_identity(&identity).await;
        sync.set_active_role(Role::Patient).await;

        sync.sync_with_identity(&identity).await;
        assert_eq!(sync.snapshot().active_role, Some(Role::Doctor));
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_previous_role_and_marks_synced() {
        let (sync, store) = synchronizer(FixedProfiles(Err("offline".into())));
        store.set("activeRole", "doctor").await.unwrap();
        sync.load_cached_role().await;

        let outcome = sync.sync_with_identity(&Identity::new(UserId::new())).await;
        assert!(matches!(outcome, SyncOutcome::Failed { kept: Some(Role::Doctor), .. }));

        let state = sync.snapshot();
        assert!(state.has_synced);
        assert_eq!(state.active_role, Some(Role::Doctor));
        assert_eq!(state.authoritative_role, None);
    }

    #[tokio::test]
    async fn test_failed_sync_without_history_uses_default() {
        let (sync, _store) = synchronizer(FixedProfiles(Err("offline".into())));
        sync.load_cached_role().await;
        sync.sync_with_identity(&Identity::new(UserId::new())).await;
        assert_eq!(sync.snapshot().active_role, Some(Role::Patient));
    }

    #[tokio::test]
    async fn test_set_active_role_round_trips_through_storage() {
        let (sync, store) = synchronizer(FixedProfiles(Ok(Role::Doctor)));
        sync.sync_with_identity(&Identity::new(UserId::new())).await;

        sync.set_active_role_and_wait(Role::Patient).await;
        assert_eq!(store.get("activeRole").await.unwrap().as_deref(), Some("patient"));
        assert_eq!(sync.snapshot().active_role, Some(Role::Patient));
        assert_eq!(sync.snapshot().authoritative_role, Some(Role::Doctor));
    }

    #[tokio::test]
    async fn test_reset_on_logout_clears_everything() {
        let (sync, store) = synchronizer(FixedProfiles(Ok(Role::Doctor)));
        sync.sync_with_identity(&Identity::new(UserId::new())).await;

        sync.reset_on_logout().await;
        let state = sync.snapshot();
        assert_eq!(state.active_role, Some(Role::Patient));
        assert_eq!(state.authoritative_role, None);
        assert!(!state.has_synced);
        assert!(store.get("activeRole").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sync_after_teardown_is_cancelled() {
        let (sync, store) = synchronizer(FixedProfiles(Ok(Role::Doctor)));
        sync.teardown();
        let outcome = sync.sync_with_identity(&Identity::new(UserId::new())).await;
        assert_eq!(outcome, SyncOutcome::Cancelled);
        assert!(!sync.snapshot().has_synced);
        assert!(store.get("activeRole").await.unwrap().is_none());
    }

    #[test]
    fn test_only_doctors_may_switch() {
        let mut state = RoleState::initial();
        assert!(!state.can_switch_role());
        state.authoritative_role = Some(Role::Patient);
        assert!(!state.can_switch_role());
        state.authoritative_role = Some(Role::Doctor);
        assert!(state.can_switch_role());
    }
}
