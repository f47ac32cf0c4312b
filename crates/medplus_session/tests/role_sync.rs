use std::sync::Arc;
use std::time::Duration;

use medplus_session::{
    LocalStore, MemoryStore, ProfileStore, Role, RoleSynchronizer, RouteState, SessionConfig,
    SyncOutcome,
};
use medplus_test_utils::{identity, FlakyStore, Reply, ScriptedProfileStore};

fn config() -> SessionConfig {
    let mut config = SessionConfig::with_home("/unused");
    config.role_settle = Duration::ZERO;
    config
}

fn synchronizer(
    store: Arc<dyn LocalStore>,
    profiles: Arc<dyn ProfileStore>,
) -> Arc<RoleSynchronizer> {
    Arc::new(RoleSynchronizer::new(config(), store, profiles))
}

#[tokio::test]
async fn test_sync_twice_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let profiles = Arc::new(ScriptedProfileStore::returning(Role::Doctor));
    let sync = synchronizer(store.clone(), profiles.clone());
    let user = identity();

    sync.load_cached_role().await;
    sync.sync_with_identity(&user).await;
    let once = sync.snapshot();
    sync.sync_with_identity(&user).await;
    let twice = sync.snapshot();

    assert_eq!(once, twice);
    assert_eq!(twice.active_role, Some(Role::Doctor));
    assert_eq!(profiles.calls(), 2);
    assert_eq!(store.get("activeRole").await.unwrap().as_deref(), Some("doctor"));
}

#[tokio::test]
async fn test_newer_sync_supersedes_in_flight_one() {
    let store = Arc::new(MemoryStore::new());
    let profiles = Arc::new(ScriptedProfileStore::returning(Role::Doctor));
    let release = profiles.push_gated(Reply::Role(Role::Patient));
    let sync = synchronizer(store.clone(), profiles.clone());
    let user = identity();

    let first = {
        let sync = Arc::clone(&sync);
        let user = user.clone();
        tokio::spawn(async move { sync.sync_with_identity(&user).await })
    };
    profiles.wait_for_calls(1).await;

    let second = sync.sync_with_identity(&user).await;
    assert_eq!(second, SyncOutcome::Applied(Role::Doctor));

    release.send(()).unwrap();
    assert_eq!(first.await.unwrap(), SyncOutcome::Superseded);

    let state = sync.snapshot();
    assert_eq!(state.active_role, Some(Role::Doctor));
    assert_eq!(state.authoritative_role, Some(Role::Doctor));
    assert_eq!(store.get("activeRole").await.unwrap().as_deref(), Some("doctor"));
}

#[tokio::test]
async fn test_result_arriving_after_teardown_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let profiles = Arc::new(ScriptedProfileStore::returning(Role::Doctor));
    let release = profiles.push_gated(Reply::Role(Role::Doctor));
    let sync = synchronizer(store.clone(), profiles.clone());

    let in_flight = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.sync_with_identity(&identity()).await })
    };
    profiles.wait_for_calls(1).await;

    sync.teardown();
    release.send(()).unwrap();

    assert_eq!(in_flight.await.unwrap(), SyncOutcome::Cancelled);
    let state = sync.snapshot();
    assert!(!state.has_synced);
    assert_eq!(state.active_role, None);
    assert!(store.get("activeRole").await.unwrap().is_none());
}

#[tokio::test]
async fn test_logout_during_sync_drops_late_result() {
    let store = Arc::new(MemoryStore::new());
    let profiles = Arc::new(ScriptedProfileStore::returning(Role::Doctor));
    let release = profiles.push_gated(Reply::Role(Role::Doctor));
    let sync = synchronizer(store.clone(), profiles.clone());

    let in_flight = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.sync_with_identity(&identity()).await })
    };
    profiles.wait_for_calls(1).await;

    sync.reset_on_logout().await;
    release.send(()).unwrap();

    assert_eq!(in_flight.await.unwrap(), SyncOutcome::Superseded);
    let state = sync.snapshot();
    assert_eq!(state.active_role, Some(Role::Patient));
    assert_eq!(state.authoritative_role, None);
    assert!(!state.has_synced);
    assert!(store.get("activeRole").await.unwrap().is_none());
}

#[tokio::test]
async fn test_hanging_lookup_holds_awaiting_sync() {
    let profiles = Arc::new(ScriptedProfileStore::hanging());
    let sync = synchronizer(Arc::new(MemoryStore::new()), profiles.clone());
    sync.load_cached_role().await;

    let stuck = {
        let sync = Arc::clone(&sync);
        tokio::spawn(async move { sync.sync_with_identity(&identity()).await })
    };
    profiles.wait_for_calls(1).await;

    let state = sync.snapshot();
    assert!(state.is_loading);
    assert_eq!(RouteState::derive(true, true, &state), RouteState::AwaitingSync);
    stuck.abort();
}

#[tokio::test(start_paused = true)]
async fn test_sync_timeout_turns_hang_into_failure() {
    let mut config = config();
    config.sync_timeout = Some(Duration::from_millis(250));
    let sync = RoleSynchronizer::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedProfileStore::hanging()),
    );
    sync.load_cached_role().await;

    let outcome = sync.sync_with_identity(&identity()).await;
    match outcome {
        SyncOutcome::Failed { kept, reason } => {
            assert_eq!(kept, Some(Role::Patient));
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("expected timeout failure, got {other:?}"),
    }
    assert_eq!(
        RouteState::derive(true, true, &sync.snapshot()),
        RouteState::Ready(Role::Patient)
    );
}

#[tokio::test]
async fn test_malformed_remote_role_defaults_to_patient() {
    let profiles = Arc::new(ScriptedProfileStore::new(Reply::Raw("superuser".into())));
    let sync = synchronizer(Arc::new(MemoryStore::new()), profiles);

    let outcome = sync.sync_with_identity(&identity()).await;
    assert_eq!(outcome, SyncOutcome::Applied(Role::Patient));
}

#[tokio::test]
async fn test_missing_profile_is_a_soft_failure() {
    let profiles = Arc::new(ScriptedProfileStore::new(Reply::NotFound));
    let sync = synchronizer(Arc::new(MemoryStore::new()), profiles);
    sync.load_cached_role().await;

    let outcome = sync.sync_with_identity(&identity()).await;
    assert!(matches!(outcome, SyncOutcome::Failed { .. }));
    assert!(sync.snapshot().has_synced);
}

#[tokio::test]
async fn test_storage_read_failure_reads_as_first_launch() {
    let store = Arc::new(FlakyStore::new());
    store.set("activeRole", "doctor").await.unwrap();
    store.fail_reads(true);
    let sync = synchronizer(store, Arc::new(ScriptedProfileStore::returning(Role::Doctor)));

    assert_eq!(sync.load_cached_role().await, None);
    assert!(sync.snapshot().cache_loaded);
}

#[tokio::test]
async fn test_storage_write_failure_still_updates_memory() {
    let store = Arc::new(FlakyStore::new());
    let sync = synchronizer(store.clone(), Arc::new(ScriptedProfileStore::returning(Role::Doctor)));
    store.fail_writes(true);

    let outcome = sync.sync_with_identity(&identity()).await;
    assert_eq!(outcome, SyncOutcome::Applied(Role::Doctor));

    sync.set_active_role(Role::Patient).await;
    assert_eq!(sync.snapshot().active_role, Some(Role::Patient));

    sync.reset_on_logout().await;
    assert!(!sync.snapshot().has_synced);

    store.fail_writes(false);
    assert!(store.get("activeRole").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cached_role_does_not_override_landed_sync() {
    let store = Arc::new(MemoryStore::new());
    store.set("activeRole", "patient").await.unwrap();
    let sync = synchronizer(store, Arc::new(ScriptedProfileStore::returning(Role::Doctor)));

    sync.sync_with_identity(&identity()).await;
    assert_eq!(sync.load_cached_role().await, Some(Role::Doctor));
    assert_eq!(sync.snapshot().active_role, Some(Role::Doctor));
}
