//! Role/session synchronization and route guarding for MedPlus.
//!
//! A MedPlus account is either a patient or a doctor. Doctors can also use
//! the app in patient mode, so the client tracks two roles: the
//! *authoritative* role stored in the `profiles` table, and the *active* role
//! that picks which section of the app is shown.
//!
//! - [`RoleSynchronizer`] keeps the active role reconciled with the
//!   authoritative one and persists it locally.
//! - [`route`] derives the guard state and decides redirects.
//! - [`SessionCoordinator`] runs the two from session-provider events.
//!
//! Collaborators are traits ([`SessionProvider`], [`ProfileStore`],
//! [`LocalStore`], [`Navigator`]) injected at construction.
//!
//! ```rust,ignore
//! let config = SessionConfig::from_env();
//! let store = Arc::new(FileStore::open(config.store_dir())?);
//! let profiles = Arc::new(JsonProfileStore::new(config.profiles_path()));
//! let provider = LocalSessionProvider::restore(store.as_ref()).await;
//! let sync = Arc::new(RoleSynchronizer::new(config, store, profiles));
//!
//! let mut coordinator =
//!     SessionCoordinator::new(sync, navigator, provider.current_identity(), RoutePath::root());
//! coordinator.start().await;
//! ```

mod cancel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod identity;
pub mod profile;
pub mod role;
pub mod route;
pub mod session;
pub mod storage;
pub mod sync;

pub use cancel::CancellationToken;
pub use config::SessionConfig;
pub use coordinator::{Navigator, SessionCoordinator, SessionEvent, SessionHandle};
pub use error::{ProfileError, SessionError, StorageError};
pub use identity::Identity;
pub use medplus_ids::{SessionId, UserId};
pub use profile::{JsonProfileStore, ProfileRecord, ProfileStore};
pub use role::{ParseRoleError, Role};
pub use route::{GuardDecision, Render, RoutePath, RouteState};
pub use session::{IdentityHandler, LocalSessionProvider, SessionProvider, Subscription};
pub use storage::{FileStore, LocalStore, MemoryStore};
pub use sync::{RoleState, RoleSynchronizer, SyncOutcome};
