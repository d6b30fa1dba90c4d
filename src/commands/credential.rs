//! `credential` command: prints what the SQLite store holds for a user.

use chrono::Utc;
use colored::Colorize;
use prettytable::{format, Table};

use crate::config::{Config, CredentialBackend};
use crate::error::{IntegrationsError, Result};
use crate::oauth::provider::Provider;
use crate::storage::{Credential, CredentialStore, SqliteCredentialStore};

/// Show credentials stored for `user_id`
///
/// # Errors
///
/// Fails with [`IntegrationsError::CredentialNotFound`] when a specific
/// provider was requested and nothing is stored for it, and with
/// [`IntegrationsError::Config`] when the cookie backend is selected.
pub async fn show_credentials(
    config: &Config,
    user_id: &str,
    provider: Option<&str>,
    reveal: bool,
) -> Result<()> {
    if config.storage.backend == CredentialBackend::Cookie {
        return Err(IntegrationsError::Config(
            "the cookie backend keeps credentials in the browser; nothing to show".to_string(),
        )
        .into());
    }

    let store = match &config.storage.database_path {
        Some(path) => SqliteCredentialStore::new_with_path(path.clone())?,
        None => SqliteCredentialStore::new()?,
    };

    let credentials = load(&store, user_id, provider).await?;
    if credentials.is_empty() {
        println!(
            "{}",
            format!("No credentials stored for {}.", user_id).yellow()
        );
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "Provider".bold(),
        "Access Token".bold(),
        "Refresh Token".bold(),
        "Realm".bold(),
        "Expires".bold(),
        "Updated".bold()
    ]);

    for credential in &credentials {
        let refresh = credential
            .refresh_token
            .as_deref()
            .map(|t| display_token(t, reveal))
            .unwrap_or_else(|| "-".to_string());
        let realm = credential.realm_id.as_deref().unwrap_or("-");
        let updated = credential.updated_at.format("%Y-%m-%d %H:%M").to_string();

        table.add_row(prettytable::row![
            credential.provider.as_str().cyan(),
            display_token(&credential.access_token, reveal),
            refresh,
            realm,
            expiry(credential),
            updated
        ]);
    }

    println!("\nCredentials for {}:", user_id.cyan());
    table.printstd();
    println!();

    Ok(())
}

async fn load(
    store: &SqliteCredentialStore,
    user_id: &str,
    provider: Option<&str>,
) -> Result<Vec<Credential>> {
    let Some(name) = provider else {
        return store.list_for_subject(user_id).await;
    };

    let provider: Provider = name.parse()?;
    match store.get(user_id, provider).await? {
        Some(credential) => Ok(vec![credential]),
        None => Err(IntegrationsError::CredentialNotFound {
            subject: user_id.to_string(),
            provider: provider.to_string(),
        }
        .into()),
    }
}

fn expiry(credential: &Credential) -> String {
    match credential.expires_at {
        None => "never".green().to_string(),
        Some(at) if credential.is_expired() => {
            format!("{} (expired)", at.format("%Y-%m-%d %H:%M")).red().to_string()
        }
        Some(at) => {
            let minutes = (at - Utc::now()).num_minutes();
            format!("{} ({}m)", at.format("%Y-%m-%d %H:%M"), minutes)
        }
    }
}

/// Masks all but the first four characters of a token.
fn display_token(token: &str, reveal: bool) -> String {
    if reveal {
        return token.to_string();
    }
    let prefix: String = token.chars().take(4).collect();
    format!("{}****", prefix)
}
