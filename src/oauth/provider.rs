//! Provider adapter: authorization URLs and code-for-token exchange
//!
//! Each [`ProviderAdapter`] wraps one provider's immutable
//! [`ProviderConfig`] and is the only place that knows how that provider
//! wants its token request shaped. Providers differ in two ways:
//!
//! - where the client credentials go ([`AuthStyle::RequestBody`] vs.
//!   [`AuthStyle::BasicAuth`]), and
//! - how the body is encoded when the credentials travel in it
//!   ([`BodyEncoding::Json`] vs. [`BodyEncoding::Form`]).
//!
//! The flow orchestrator never branches on the provider itself.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{IntegrationsError, Result};

/// Longest provider body kept in error diagnostics.
const MAX_DIAGNOSTIC_BODY: usize = 512;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A supported third-party provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// GitHub OAuth apps
    Github,
    /// Intuit QuickBooks Online
    Quickbooks,
}

impl Provider {
    /// Every supported provider.
    pub const ALL: [Provider; 2] = [Provider::Github, Provider::Quickbooks];

    /// Stable lowercase name used in URLs, storage keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Github => "github",
            Provider::Quickbooks => "quickbooks",
        }
    }

    /// Prefix of the `*_CLIENT_ID` / `*_CLIENT_SECRET` environment variables.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::Github => "GITHUB",
            Provider::Quickbooks => "QUICKBOOKS",
        }
    }

    pub fn default_authorization_endpoint(&self) -> &'static str {
        match self {
            Provider::Github => "https://github.com/login/oauth/authorize",
            Provider::Quickbooks => "https://appcenter.intuit.com/connect/oauth2",
        }
    }

    pub fn default_token_endpoint(&self) -> &'static str {
        match self {
            Provider::Github => "https://github.com/login/oauth/access_token",
            Provider::Quickbooks => "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer",
        }
    }

    pub fn default_scopes(&self) -> Vec<String> {
        match self {
            Provider::Github => vec!["user:email".to_string(), "repo".to_string()],
            Provider::Quickbooks => vec!["com.intuit.quickbooks.accounting".to_string()],
        }
    }

    /// GitHub takes the secret as a JSON body field; Intuit requires Basic auth.
    pub fn default_auth_style(&self) -> AuthStyle {
        match self {
            Provider::Github => AuthStyle::RequestBody {
                encoding: BodyEncoding::Json,
            },
            Provider::Quickbooks => AuthStyle::BasicAuth,
        }
    }

    pub fn requires_response_type(&self) -> bool {
        matches!(self, Provider::Quickbooks)
    }

    pub fn default_csrf_cookie(&self) -> bool {
        matches!(self, Provider::Quickbooks)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = IntegrationsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Provider::Github),
            "quickbooks" => Ok(Provider::Quickbooks),
            other => Err(IntegrationsError::UnknownProvider(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth style
// ---------------------------------------------------------------------------

/// Body encoding used when client credentials travel in the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    Json,
    #[default]
    Form,
}

/// Where the token request carries `client_id` / `client_secret`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthStyle {
    /// Credentials are fields of the POST body.
    RequestBody {
        #[serde(default)]
        encoding: BodyEncoding,
    },
    /// Credentials are sent as an HTTP Basic `Authorization` header and the
    /// body is form-encoded.
    BasicAuth,
}

// ---------------------------------------------------------------------------
// ProviderConfig
// ---------------------------------------------------------------------------

/// Resolved, immutable settings for one provider.
///
/// Built once at startup by [`Config::provider_config`](crate::config::Config::provider_config).
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub client_id: String,
    pub client_secret: String,
    /// Must match the redirect URI registered with the provider exactly.
    pub redirect_uri: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub scopes: Vec<String>,
    pub auth_style: AuthStyle,
    /// Append `response_type=code` to the authorization URL.
    pub response_type: bool,
    /// Require the state nonce to be echoed back in an HTTP-only cookie.
    pub csrf_cookie: bool,
    pub token_timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider", &self.provider)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("redirect_uri", &self.redirect_uri)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("scopes", &self.scopes)
            .field("auth_style", &self.auth_style)
            .field("response_type", &self.response_type)
            .field("csrf_cookie", &self.csrf_cookie)
            .field("token_timeout", &self.token_timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Token endpoint response
// ---------------------------------------------------------------------------

/// Reads `expires_in` leniently: integers, non-negative finite floats and
/// numeric strings are accepted. Anything else means the lifetime is
/// unknown, which never fails the exchange.
fn expires_in_seconds(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && *f >= 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            })
        }
        _ => None,
    }
}

/// Raw JSON response from a token endpoint.
///
/// Every field is optional because GitHub reports failures as a `200`
/// carrying `{"error": ...}` instead of an access token.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Tokens granted by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds, when the provider reports one.
    pub expires_in: Option<u64>,
}

impl TokenGrant {
    /// Absolute expiry relative to `now`, or `None` for non-expiring tokens
    /// and lifetimes too large to represent.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.expires_in?).ok()?;
        now.checked_add_signed(TimeDelta::try_seconds(secs)?)
    }
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[redacted]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// Builds authorization URLs and exchanges codes for one provider.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use integrations::oauth::provider::{AuthStyle, Provider, ProviderAdapter, ProviderConfig};
///
/// let config = ProviderConfig {
///     provider: Provider::Quickbooks,
///     client_id: "client".to_string(),
///     client_secret: "secret".to_string(),
///     redirect_uri: "https://api.example.com/callback".to_string(),
///     authorization_endpoint: "https://appcenter.intuit.com/connect/oauth2".to_string(),
///     token_endpoint: "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".to_string(),
///     scopes: vec!["com.intuit.quickbooks.accounting".to_string()],
///     auth_style: AuthStyle::BasicAuth,
///     response_type: true,
///     csrf_cookie: true,
///     token_timeout: Duration::from_secs(10),
/// };
///
/// let adapter = ProviderAdapter::new(Arc::new(reqwest::Client::new()), config);
/// let url = adapter.build_authorization_url("opaque-state").unwrap();
/// assert!(url.as_str().contains("response_type=code"));
/// ```
pub struct ProviderAdapter {
    http: Arc<reqwest::Client>,
    config: ProviderConfig,
}

impl ProviderAdapter {
    pub fn new(http: Arc<reqwest::Client>, config: ProviderConfig) -> Self {
        Self { http, config }
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Builds `{authorization_endpoint}?client_id&scope&redirect_uri&state[&response_type]`.
    ///
    /// Every value is percent-encoded by [`Url::query_pairs_mut`].
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::Config`] if the configured endpoint is
    /// not a valid URL.
    pub fn build_authorization_url(&self, state: &str) -> Result<Url> {
        let mut url = Url::parse(&self.config.authorization_endpoint).map_err(|e| {
            IntegrationsError::Config(format!("invalid authorization endpoint URL: {e}"))
        })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            query.append_pair("scope", &self.config.scopes.join(" "));
            query.append_pair("redirect_uri", &self.config.redirect_uri);
            query.append_pair("state", state);
            if self.config.response_type {
                query.append_pair("response_type", "code");
            }
        }

        Ok(url)
    }

    /// Exchanges an authorization code for tokens at the token endpoint.
    ///
    /// The request always carries `Accept: application/json` and is bounded
    /// by the configured token timeout.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::ExchangeFailed`] on transport failure or
    /// timeout (no status), on any non-2xx status, and on a 2xx response that
    /// is not JSON or lacks an `access_token`.
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        let mut fields: BTreeMap<&str, &str> = BTreeMap::new();
        fields.insert("grant_type", "authorization_code");
        fields.insert("code", code);
        fields.insert("redirect_uri", redirect_uri);

        let request = self
            .http
            .post(&self.config.token_endpoint)
            .header(ACCEPT, "application/json")
            .timeout(self.config.token_timeout);

        let request = match self.config.auth_style {
            AuthStyle::BasicAuth => request
                .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
                .form(&fields),
            AuthStyle::RequestBody { encoding } => {
                fields.insert("client_id", &self.config.client_id);
                fields.insert("client_secret", &self.config.client_secret);
                match encoding {
                    BodyEncoding::Json => request.json(&fields),
                    BodyEncoding::Form => request.form(&fields),
                }
            }
        };

        let resp = request.send().await.map_err(|e| {
            let reason = if e.is_timeout() {
                format!(
                    "token request timed out after {}s",
                    self.config.token_timeout.as_secs()
                )
            } else {
                format!("token request failed: {e}")
            };
            IntegrationsError::ExchangeFailed {
                status: None,
                body: reason,
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| IntegrationsError::ExchangeFailed {
                status: Some(status.as_u16()),
                body: format!("failed to read token response: {e}"),
            })?;

        if !status.is_success() {
            return Err(IntegrationsError::ExchangeFailed {
                status: Some(status.as_u16()),
                body: truncate_body(&body),
            }
            .into());
        }

        let raw: TokenResponse =
            serde_json::from_str(&body).map_err(|_| IntegrationsError::ExchangeFailed {
                status: Some(status.as_u16()),
                body: truncate_body(&body),
            })?;

        match raw.access_token.filter(|t| !t.is_empty()) {
            Some(access_token) if raw.error.is_none() => Ok(TokenGrant {
                access_token,
                refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
                expires_in: raw.expires_in.as_ref().and_then(expires_in_seconds),
            }),
            _ => Err(IntegrationsError::ExchangeFailed {
                status: Some(status.as_u16()),
                body: truncate_body(&body),
            }
            .into()),
        }
    }
}

/// Caps a provider body for diagnostics, respecting char boundaries.
fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_DIAGNOSTIC_BODY {
        return body.to_string();
    }
    let mut out: String = body.chars().take(MAX_DIAGNOSTIC_BODY).collect();
    out.push_str("...");
    out
}
