//! `medplus profile`: edit the local profiles table.

use anyhow::{Context, Result};
use clap::Subcommand;
use medplus_ids::UserId;
use medplus_session::{JsonProfileStore, ProfileRecord, Role, SessionConfig};
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
    /// Set the account role of a user
    SetRole {
        #[arg(long)]
        user: String,

        #[arg(long)]
        role: Role,

        /// Display name stored with the profile
        #[arg(long)]
        name: Option<String>,
    },

    /// List all profiles
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(config: &SessionConfig, action: ProfileAction) -> Result<()> {
    match action {
        ProfileAction::SetRole { user, role, name } => {
            let user_id = UserId::parse(&user).with_context(|| format!("Invalid user id '{}'", user))?;
            let record = set_role(config, user_id, role, name).await?;
            println!("{} -> {}", record.id, record.role);
        }
        ProfileAction::List { json } => {
            let records = list(config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No profiles in {}", config.profiles_path().display());
            } else {
                for record in records {
                    match record.full_name {
                        Some(name) => println!("{}  {:<8} {}", record.id, record.role, name),
                        None => println!("{}  {}", record.id, record.role),
                    }
                }
            }
        }
    }
    Ok(())
}

pub async fn set_role(
    config: &SessionConfig,
    user: UserId,
    role: Role,
    full_name: Option<String>,
) -> Result<ProfileRecord> {
    let profiles = JsonProfileStore::new(config.profiles_path());
    let mut record = profiles
        .find(&user)
        .await
        .context("Failed to read profiles")?
        .unwrap_or_else(|| ProfileRecord::new(user, role));
    record.role = role.as_str().to_string();
    if full_name.is_some() {
        record.full_name = full_name;
    }
    profiles
        .upsert(record.clone())
        .await
        .with_context(|| format!("Failed to write {}", profiles.path().display()))?;
    info!("Profile {} set to {}", user, role);
    Ok(record)
}

pub async fn list(config: &SessionConfig) -> Result<Vec<ProfileRecord>> {
    JsonProfileStore::new(config.profiles_path())
        .load_all()
        .await
        .context("Failed to read profiles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_role_updates_existing_row() {
        let tmp = TempDir::new().unwrap();
        let config = SessionConfig::with_home(tmp.path());
        let user = UserId::new();

        set_role(&config, user, Role::Patient, Some("Ana Lima".into())).await.unwrap();
        let updated = set_role(&config, user, Role::Doctor, None).await.unwrap();

        assert_eq!(updated.role, "doctor");
        assert_eq!(updated.full_name.as_deref(), Some("Ana Lima"));
        assert_eq!(list(&config).await.unwrap(), vec![updated]);
    }
}
