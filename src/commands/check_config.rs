//! `check-config` command: prints the resolved provider settings.

use colored::Colorize;
use prettytable::{format, Table};

use crate::config::{Config, CredentialBackend};
use crate::error::Result;
use crate::oauth::provider::AuthStyle;

/// Print the providers the service would start with.
///
/// The configuration has already been validated by the caller, so every
/// configured provider resolves.
pub fn run_check_config(config: &Config) -> Result<()> {
    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);

    table.add_row(prettytable::row![
        "Provider".bold(),
        "Client ID".bold(),
        "Redirect URI".bold(),
        "Token Endpoint".bold(),
        "Client Auth".bold(),
        "Nonce Cookie".bold()
    ]);

    for provider in config.providers.configured() {
        let resolved = config.provider_config(provider)?;
        let name = if provider == config.server.default_provider {
            format!("{} (default)", provider)
        } else {
            provider.to_string()
        };

        table.add_row(prettytable::row![
            name.cyan(),
            resolved.client_id,
            resolved.redirect_uri,
            resolved.token_endpoint,
            auth_style_label(resolved.auth_style),
            if resolved.csrf_cookie { "yes" } else { "no" }
        ]);
    }

    let backend = match config.storage.backend {
        CredentialBackend::Sqlite => config
            .storage
            .database_path
            .as_ref()
            .map(|p| format!("sqlite ({})", p.display()))
            .unwrap_or_else(|| "sqlite (default location)".to_string()),
        CredentialBackend::Cookie => "cookie".to_string(),
    };

    println!("{}", "Configuration is valid.".green());
    println!("  bind:      {}", config.server.bind);
    println!("  frontend:  {}", config.frontend_base());
    println!("  storage:   {}", backend);
    println!();
    table.printstd();
    println!();

    Ok(())
}

fn auth_style_label(style: AuthStyle) -> String {
    match style {
        AuthStyle::BasicAuth => "basic".to_string(),
        AuthStyle::RequestBody { encoding } => {
            format!("body ({})", format!("{:?}", encoding).to_lowercase())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::provider::BodyEncoding;

    #[test]
    fn test_auth_style_label() {
        assert_eq!(auth_style_label(AuthStyle::BasicAuth), "basic");
        assert_eq!(
            auth_style_label(AuthStyle::RequestBody {
                encoding: BodyEncoding::Json
            }),
            "body (json)"
        );
    }
}
