//! Session commands: login, logout, refresh, status, switch-role, navigate.

use super::harness::{Harness, StatusReport};
use anyhow::{bail, Context, Result};
use medplus_ids::UserId;
use medplus_session::{Identity, Role, RoutePath, SessionConfig, SessionProvider};
use tracing::info;

pub async fn login(
    config: &SessionConfig,
    user: Option<&str>,
    email: Option<String>,
) -> Result<StatusReport> {
    let user_id = match user {
        Some(raw) => UserId::parse(raw).with_context(|| format!("Invalid user id '{}'", raw))?,
        None => UserId::new(),
    };
    let mut identity = Identity::new(user_id);
    if let Some(email) = email {
        identity = identity.with_email(email);
    }

    let mut harness = Harness::open(config).await?;
    info!("Signing in as {}", user_id);
    harness.provider().sign_in(identity);
    harness.settle().await;
    harness.finish().await
}

pub async fn logout(config: &SessionConfig) -> Result<StatusReport> {
    let mut harness = Harness::open(config).await?;
    if harness.provider().current_identity().is_none() {
        info!("Logout requested with no active session");
    }
    harness.provider().sign_out();
    harness.settle().await;
    harness.finish().await
}

pub async fn refresh(config: &SessionConfig) -> Result<StatusReport> {
    let mut harness = Harness::open(config).await?;
    if harness.provider().refresh().is_none() {
        bail!("Not signed in; run `medplus login` first");
    }
    harness.settle().await;
    harness.finish().await
}

pub async fn status(config: &SessionConfig) -> Result<StatusReport> {
    Harness::open(config).await?.finish().await
}

/// Switch to `role`, or toggle when `None`.
pub async fn switch_role(config: &SessionConfig, role: Option<Role>) -> Result<StatusReport> {
    let mut harness = Harness::open(config).await?;
    let result = match role {
        Some(role) => harness.coordinator().switch_role(role).await,
        None => harness.coordinator().toggle_role().await,
    };
    result.context("Cannot switch role")?;
    harness.finish().await
}

pub async fn navigate(config: &SessionConfig, path: &str) -> Result<StatusReport> {
    let mut harness = Harness::open(config).await?;
    harness.coordinator().handle_route(RoutePath::parse(path));
    harness.finish().await
}
