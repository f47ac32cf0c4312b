//! Session provider contract and an in-process implementation.
//!
//! The provider owns the current [`Identity`] and notifies subscribers when
//! it changes. Delivery is push-only: subscribers never poll.

use crate::config::SESSION_KEY;
use crate::error::StorageResult;
use crate::identity::Identity;
use crate::storage::LocalStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info, warn};

/// Callback invoked with the new identity (or `None` on sign-out).
pub type IdentityHandler = Box<dyn Fn(Option<Identity>) + Send + Sync>;

/// Yields the current identity and notifies on change.
pub trait SessionProvider: Send + Sync {
    fn current_identity(&self) -> Option<Identity>;

    /// Register `handler`. It stays registered until the returned
    /// subscription is unsubscribed or dropped.
    fn subscribe(&self, handler: IdentityHandler) -> Subscription;
}

/// Registration handle returned by [`SessionProvider::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving notifications.
    pub fn unsubscribe(mut self) {
        self.cancel_now();
    }

    fn cancel_now(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type SharedHandler = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

struct ProviderInner {
    identity: Mutex<Option<Identity>>,
    listeners: Mutex<BTreeMap<u64, SharedHandler>>,
    next_listener: AtomicU64,
}

/// In-process session provider.
///
/// Stands in for the hosted auth SDK: sign-in, sign-out and token refresh
/// are explicit calls. Clones share the same session.
#[derive(Clone)]
pub struct LocalSessionProvider {
    inner: Arc<ProviderInner>,
}

impl LocalSessionProvider {
    pub fn new(initial: Option<Identity>) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                identity: Mutex::new(initial),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Rebuild the provider from the session persisted in `store`.
    ///
    /// An unreadable or corrupt stored session starts signed out.
    pub async fn restore(store: &dyn LocalStore) -> Self {
        let identity = match store.get(SESSION_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Identity>(&raw) {
                Ok(identity) => Some(identity),
                Err(err) => {
                    warn!("Discarding corrupt stored session: {}", err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!("Failed to read stored session: {}", err);
                None
            }
        };
        debug!("Restored session: {}", identity.is_some());
        Self::new(identity)
    }

    /// Write the current session to `store`, or clear it when signed out.
    pub async fn persist(&self, store: &dyn LocalStore) -> StorageResult<()> {
        match self.current_identity() {
            Some(identity) => {
                let json = serde_json::to_string(&identity).map_err(|source| {
                    crate::error::StorageError::Serialize {
                        key: SESSION_KEY.to_string(),
                        source,
                    }
                })?;
                store.set(SESSION_KEY, &json).await
            }
            None => store.delete(SESSION_KEY).await,
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!("Signed in as {}", identity.user_id);
        self.publish(Some(identity));
    }

    pub fn sign_out(&self) {
        info!("Signed out");
        self.publish(None);
    }

    /// Replace the current session with a freshly issued one for the same
    /// user. Returns the new identity, or `None` when signed out.
    pub fn refresh(&self) -> Option<Identity> {
        let refreshed = self.current_identity()?.refreshed();
        debug!("Refreshed session {}", refreshed.session_id);
        self.publish(Some(refreshed.clone()));
        Some(refreshed)
    }

    pub fn subscriber_count(&self) -> usize {
        lock_or_recover(&self.inner.listeners).len()
    }

    /// Store `next` and notify each live subscriber once, if it differs from
    /// the current identity.
    fn publish(&self, next: Option<Identity>) {
        {
            let mut current = lock_or_recover(&self.inner.identity);
            if *current == next {
                return;
            }
            *current = next.clone();
        }

        // Handlers run outside the lock so they may call back into the provider.
        let handlers: Vec<SharedHandler> = lock_or_recover(&self.inner.listeners)
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler(next.clone());
        }
    }
}

impl SessionProvider for LocalSessionProvider {
    fn current_identity(&self) -> Option<Identity> {
        lock_or_recover(&self.inner.identity).clone()
    }

    fn subscribe(&self, handler: IdentityHandler) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        lock_or_recover(&self.inner.listeners).insert(id, Arc::from(handler));

        let weak: Weak<ProviderInner> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock_or_recover(&inner.listeners).remove(&id);
            }
        })
    }
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use medplus_ids::UserId;

    fn recorder() -> (Arc<Mutex<Vec<Option<Identity>>>>, IdentityHandler) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: IdentityHandler = Box::new(move |identity| {
            sink.lock().unwrap().push(identity);
        });
        (seen, handler)
    }

    #[test]
    fn test_notifies_once_per_change() {
        let provider = LocalSessionProvider::new(None);
        let (seen, handler) = recorder();
        let _sub = provider.subscribe(handler);

        let identity = Identity::new(UserId::new());
        provider.sign_in(identity.clone());
        provider.sign_in(identity.clone());
        provider.sign_out();
        provider.sign_out();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![Some(identity), None]);
    }

    #[test]
    fn test_refresh_notifies_with_new_session_same_user() {
        let identity = Identity::new(UserId::new());
        let provider = LocalSessionProvider::new(Some(identity.clone()));
        let (seen, handler) = recorder();
        let _sub = provider.subscribe(handler);

        let refreshed = provider.refresh().unwrap();
        assert!(refreshed.same_user(&identity));
        assert_ne!(refreshed.session_id, identity.session_id);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_refresh_when_signed_out_is_noop() {
        let provider = LocalSessionProvider::new(None);
        assert!(provider.refresh().is_none());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let provider = LocalSessionProvider::new(None);
        let (seen, handler) = recorder();
        let sub = provider.subscribe(handler);
        assert_eq!(provider.subscriber_count(), 1);

        sub.unsubscribe();
        assert_eq!(provider.subscriber_count(), 0);

        provider.sign_in(Identity::new(UserId::new()));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let provider = LocalSessionProvider::new(None);
        {
            let (_seen, handler) = recorder();
            let _sub = provider.subscribe(handler);
            assert_eq!(provider.subscriber_count(), 1);
        }
        assert_eq!(provider.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_persist_and_restore_round_trip() {
        let store = MemoryStore::new();
        let identity = Identity::new(UserId::new()).with_email("dr@example.com");
        let provider = LocalSessionProvider::new(Some(identity.clone()));
        provider.persist(&store).await.unwrap();

        let restored = LocalSessionProvider::restore(&store).await;
        assert_eq!(restored.current_identity(), Some(identity));

        restored.sign_out();
        restored.persist(&store).await.unwrap();
        assert!(store.get(SESSION_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_ignores_corrupt_session() {
        let store = MemoryStore::new();
        store.set(SESSION_KEY, "not json").await.unwrap();
        let restored = LocalSessionProvider::restore(&store).await;
        assert!(restored.current_identity().is_none());
    }
}
