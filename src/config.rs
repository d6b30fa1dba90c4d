//! Configuration management for the integrations service
//!
//! This module handles loading, parsing, validating, and resolving
//! configuration from files, environment variables, and CLI overrides.
//! Configuration is read once at startup; request handlers only ever see
//! the resolved, immutable [`ProviderConfig`] values.

use crate::error::{IntegrationsError, Result};
use crate::oauth::provider::{AuthStyle, Provider, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server and redirect destinations
    #[serde(default)]
    pub server: ServerConfig,
    /// Credential persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Per-provider OAuth client settings
    #[serde(default)]
    pub providers: ProvidersConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address the HTTP server binds to
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Public base URL of this service, used to derive default redirect URIs
    #[serde(default)]
    pub server_url: Option<String>,

    /// Base URL of the frontend receiving the `status=success|error` redirect
    #[serde(default)]
    pub frontend_url: Option<String>,

    /// Provider used by `/auth/connect`
    #[serde(default = "default_provider")]
    pub default_provider: Provider,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_provider() -> Provider {
    Provider::Github
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            server_url: None,
            frontend_url: None,
            default_provider: default_provider(),
        }
    }
}

/// Where successful exchanges land
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// Server-side SQLite table keyed on (user, provider)
    #[default]
    Sqlite,
    /// Client-held HTTP-only cookies
    Cookie,
}

/// Credential storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend for credentials
    #[serde(default)]
    pub backend: CredentialBackend,

    /// SQLite database path; defaults to the platform data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Mark cookies `Secure` (disable only for plain-HTTP local development)
    #[serde(default = "default_cookie_secure")]
    pub cookie_secure: bool,
}

fn default_cookie_secure() -> bool {
    true
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: CredentialBackend::default(),
            database_path: None,
            cookie_secure: default_cookie_secure(),
        }
    }
}

/// Client settings for every supported provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// GitHub OAuth app
    #[serde(default)]
    pub github: Option<ProviderSettings>,
    /// Intuit QuickBooks Online app
    #[serde(default)]
    pub quickbooks: Option<ProviderSettings>,
}

/// Raw settings for one provider as written in the config file
///
/// Only `client_id` and `client_secret` are required; every other field
/// falls back to the provider's built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub auth_style: Option<AuthStyle>,
    /// Append `response_type=code` to the authorization URL
    #[serde(default)]
    pub response_type: Option<bool>,
    /// Enforce the nonce cookie comparison on callback
    #[serde(default)]
    pub csrf_cookie: Option<bool>,
    /// Upper bound on the token exchange request
    #[serde(default = "default_token_timeout_seconds")]
    pub token_timeout_seconds: u64,
}

fn default_token_timeout_seconds() -> u64 {
    10
}

impl ProvidersConfig {
    /// Returns the settings for `provider`, if configured
    pub fn get(&self, provider: Provider) -> Option<&ProviderSettings> {
        match provider {
            Provider::Github => self.github.as_ref(),
            Provider::Quickbooks => self.quickbooks.as_ref(),
        }
    }

    fn entry(&mut self, provider: Provider) -> &mut ProviderSettings {
        let slot = match provider {
            Provider::Github => &mut self.github,
            Provider::Quickbooks => &mut self.quickbooks,
        };
        slot.get_or_insert_with(|| ProviderSettings {
            token_timeout_seconds: default_token_timeout_seconds(),
            ..ProviderSettings::default()
        })
    }

    /// Providers that have a settings block, in declaration order
    pub fn configured(&self) -> Vec<Provider> {
        Provider::ALL
            .iter()
            .copied()
            .filter(|p| self.get(*p).is_some())
            .collect()
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            IntegrationsError::Config(format!("Failed to read config file: {}", e))
        })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| IntegrationsError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.server.bind = format!("0.0.0.0:{}", p),
                Err(_) => tracing::warn!("Invalid PORT: {}", port),
            }
        }

        if let Ok(bind) = std::env::var("INTEGRATIONS_BIND") {
            self.server.bind = bind;
        }

        if let Ok(server_url) = std::env::var("SERVER_URL") {
            self.server.server_url = Some(server_url);
        }

        if let Ok(frontend_url) = std::env::var("FRONTEND_URL") {
            self.server.frontend_url = Some(frontend_url);
        }

        if let Ok(name) = std::env::var("INTEGRATIONS_DEFAULT_PROVIDER") {
            match name.parse::<Provider>() {
                Ok(p) => self.server.default_provider = p,
                Err(_) => tracing::warn!("Invalid INTEGRATIONS_DEFAULT_PROVIDER: {}", name),
            }
        }

        if let Ok(db) = std::env::var("INTEGRATIONS_DB") {
            self.storage.database_path = Some(PathBuf::from(db));
        }

        if let Ok(backend) = std::env::var("INTEGRATIONS_CREDENTIAL_BACKEND") {
            match backend.to_lowercase().as_str() {
                "sqlite" => self.storage.backend = CredentialBackend::Sqlite,
                "cookie" => self.storage.backend = CredentialBackend::Cookie,
                _ => tracing::warn!("Invalid INTEGRATIONS_CREDENTIAL_BACKEND: {}", backend),
            }
        }

        if let Ok(secure) = std::env::var("INTEGRATIONS_COOKIE_SECURE") {
            match secure.parse::<bool>() {
                Ok(v) => self.storage.cookie_secure = v,
                Err(_) => tracing::warn!("Invalid INTEGRATIONS_COOKIE_SECURE: {}", secure),
            }
        }

        for provider in Provider::ALL {
            let prefix = provider.env_prefix();
            if let Ok(client_id) = std::env::var(format!("{prefix}_CLIENT_ID")) {
                self.providers.entry(provider).client_id = client_id;
                tracing::debug!(provider = %provider, "Env override: {prefix}_CLIENT_ID");
            }
            if let Ok(client_secret) = std::env::var(format!("{prefix}_CLIENT_SECRET")) {
                self.providers.entry(provider).client_secret = client_secret;
                tracing::debug!(provider = %provider, "Env override: {prefix}_CLIENT_SECRET");
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
        if let crate::cli::Commands::Serve { bind: Some(bind) } = &cli.command {
            self.server.bind = bind.clone();
        }
    }

    /// Validate the configuration
    ///
    /// Every check here guards a value that request handling would
    /// otherwise discover missing mid-flow, so a failure must stop the
    /// process before it accepts traffic.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::Config`] describing the first failed check
    pub fn validate(&self) -> Result<()> {
        let frontend = self.server.frontend_url.as_deref().unwrap_or("");
        if frontend.is_empty() {
            return Err(IntegrationsError::Config("FRONTEND_URL is required".to_string()).into());
        }
        Url::parse(frontend).map_err(|e| {
            IntegrationsError::Config(format!("FRONTEND_URL is not a valid URL: {}", e))
        })?;

        if self.server.bind.is_empty() {
            return Err(IntegrationsError::Config("server.bind cannot be empty".to_string()).into());
        }

        let configured = self.providers.configured();
        if configured.is_empty() {
            return Err(IntegrationsError::Config(
                "at least one provider must be configured (e.g. GITHUB_CLIENT_ID)".to_string(),
            )
            .into());
        }

        if !configured.contains(&self.server.default_provider) {
            return Err(IntegrationsError::Config(format!(
                "default provider {} is not configured",
                self.server.default_provider
            ))
            .into());
        }

        for provider in configured {
            self.provider_config(provider)?;
        }

        Ok(())
    }

    /// Resolves the immutable [`ProviderConfig`] for `provider`
    ///
    /// Missing optional fields are filled from the provider's built-in
    /// defaults; the redirect URI defaults to `{server_url}/callback`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::Config`] when the provider is not
    /// configured, credentials are blank, or an endpoint is not a valid URL.
    pub fn provider_config(&self, provider: Provider) -> Result<ProviderConfig> {
        let settings = self.providers.get(provider).ok_or_else(|| {
            IntegrationsError::Config(format!("provider {} is not configured", provider))
        })?;

        let prefix = provider.env_prefix();
        if settings.client_id.trim().is_empty() {
            return Err(IntegrationsError::Config(format!("{prefix}_CLIENT_ID is required")).into());
        }
        if settings.client_secret.trim().is_empty() {
            return Err(
                IntegrationsError::Config(format!("{prefix}_CLIENT_SECRET is required")).into(),
            );
        }

        let redirect_uri = match (&settings.redirect_uri, &self.server.server_url) {
            (Some(uri), _) => uri.clone(),
            (None, Some(base)) => format!("{}/callback", base.trim_end_matches('/')),
            (None, None) => {
                return Err(IntegrationsError::Config(format!(
                    "SERVER_URL or providers.{provider}.redirect_uri is required"
                ))
                .into())
            }
        };

        let authorization_endpoint = settings
            .authorization_endpoint
            .clone()
            .unwrap_or_else(|| provider.default_authorization_endpoint().to_string());
        let token_endpoint = settings
            .token_endpoint
            .clone()
            .unwrap_or_else(|| provider.default_token_endpoint().to_string());

        for (name, value) in [
            ("redirect_uri", &redirect_uri),
            ("authorization_endpoint", &authorization_endpoint),
            ("token_endpoint", &token_endpoint),
        ] {
            Url::parse(value).map_err(|e| {
                IntegrationsError::Config(format!("providers.{provider}.{name} is invalid: {e}"))
            })?;
        }

        if settings.token_timeout_seconds == 0 {
            return Err(IntegrationsError::Config(format!(
                "providers.{provider}.token_timeout_seconds must be greater than 0"
            ))
            .into());
        }

        Ok(ProviderConfig {
            provider,
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            redirect_uri,
            authorization_endpoint,
            token_endpoint,
            scopes: settings
                .scopes
                .clone()
                .unwrap_or_else(|| provider.default_scopes()),
            auth_style: settings
                .auth_style
                .unwrap_or_else(|| provider.default_auth_style()),
            response_type: settings
                .response_type
                .unwrap_or_else(|| provider.requires_response_type()),
            csrf_cookie: settings
                .csrf_cookie
                .unwrap_or_else(|| provider.default_csrf_cookie()),
            token_timeout: Duration::from_secs(settings.token_timeout_seconds),
        })
    }

    /// Frontend base URL without a trailing slash
    ///
    /// Only meaningful after [`Config::validate`] has succeeded.
    pub fn frontend_base(&self) -> &str {
        self.server
            .frontend_url
            .as_deref()
            .unwrap_or("")
            .trim_end_matches('/')
    }
}
