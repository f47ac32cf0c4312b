//! MedPlus Test Utilities
//!
//! Scripted stand-ins for the session layer's collaborators:
//!
//! - [`ScriptedProfileStore`]: queued replies, failures, hangs, and gated
//!   replies that only resolve when the test releases them.
//! - [`FlakyStore`]: in-memory local store whose reads/writes can be made to fail.
//! - [`RecordingNavigator`]: records every redirect.
//!
//! # Usage
//!
//! ```rust,ignore
//! let profiles = Arc::new(ScriptedProfileStore::returning(Role::Doctor));
//! let release = profiles.push_gated(Reply::Role(Role::Patient));
//! // ... start a sync, then:
//! release.send(()).unwrap();
//! ```

use async_trait::async_trait;
use medplus_session::{
    Identity, LocalStore, MemoryStore, Navigator, ProfileError, ProfileStore, Role, StorageError,
    UserId,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::{oneshot, Notify};

/// A fresh identity for a random user.
pub fn identity() -> Identity {
    Identity::new(UserId::new())
}

/// What one profile lookup answers.
#[derive(Debug, Clone)]
pub enum Reply {
    Role(Role),
    /// Raw role column value, for malformed-data cases.
    Raw(String),
    Fail(String),
    NotFound,
    /// Never resolves.
    Hang,
}

struct Step {
    reply: Reply,
    gate: Option<oneshot::Receiver<()>>,
}

/// Profile store that answers from a script.
///
/// Queued steps are consumed in order; once the queue is empty every call
/// gets the fallback reply.
pub struct ScriptedProfileStore {
    queue: Mutex<VecDeque<Step>>,
    fallback: Mutex<Reply>,
    calls: AtomicUsize,
    called: Notify,
}

impl ScriptedProfileStore {
    pub fn new(fallback: Reply) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            called: Notify::new(),
        }
    }

    pub fn returning(role: Role) -> Self {
        Self::new(Reply::Role(role))
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(Reply::Fail(reason.to_string()))
    }

    pub fn hanging() -> Self {
        Self::new(Reply::Hang)
    }

    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock().unwrap() = reply;
    }

    pub fn push(&self, reply: Reply) {
        self.queue.lock().unwrap().push_back(Step { reply, gate: None });
    }

    /// Queue a reply that is held until the returned sender fires.
    pub fn push_gated(&self, reply: Reply) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.queue.lock().unwrap().push_back(Step {
            reply,
            gate: Some(rx),
        });
        tx
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` lookups have started.
    pub async fn wait_for_calls(&self, n: usize) {
        loop {
            let notified = self.called.notified();
            if self.calls() >= n {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ProfileStore for ScriptedProfileStore {
    async fn get_role(&self, identity: &Identity) -> Result<Role, ProfileError> {
        let step = self.queue.lock().unwrap().pop_front();
        let (reply, gate) = match step {
            Some(step) => (step.reply, step.gate),
            None => (self.fallback.lock().unwrap().clone(), None),
        };
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called.notify_waiters();
        tracing::debug!("Scripted lookup for {}: {:?}", identity.user_id, reply);

        if let Some(gate) = gate {
            let _ = gate.await;
        }

        match reply {
            Reply::Role(role) => Ok(role),
            Reply::Raw(raw) => Ok(Role::parse_or_default(&raw).0),
            Reply::Fail(reason) => Err(ProfileError::Unavailable(reason)),
            Reply::NotFound => Err(ProfileError::NotFound(identity.user_id)),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Local store whose operations can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), StorageError> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::Backend(format!("injected {} failure", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check(&self.fail_reads, "read")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check(&self.fail_writes, "write")?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check(&self.fail_writes, "delete")?;
        self.inner.delete(key).await
    }
}

/// Navigator that records redirects.
#[derive(Default)]
pub struct RecordingNavigator {
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<String> {
        self.redirects.lock().unwrap().last().cloned()
    }
}

impl Navigator for RecordingNavigator {
    fn replace(&self, path: &str) {
        self.redirects.lock().unwrap().push(path.to_string());
    }
}
