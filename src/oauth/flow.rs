//! OAuth 2.0 authorization code flow orchestration
//!
//! [`ConnectFlow`] drives one connect attempt through
//!
//! ```text
//! Idle -> Initiated -> CallbackReceived -> Exchanging -> Persisted -> Completed
//!                                                   \-> Failed
//! ```
//!
//! It is provider-agnostic (all request shaping lives in
//! [`ProviderAdapter`]) and store-agnostic (the caller passes the
//! [`CredentialStore`] that should receive the credential). Nothing is
//! retried: a failed exchange needs a fresh initiate, because authorization
//! codes are single-use.
//!
//! Errors returned from [`ConnectFlow::initiate`] and
//! [`ConnectFlow::complete`] are always validation failures
//! ([`IntegrationsError::is_validation`]) or an unknown provider. Exchange
//! and storage failures never escape; they become a [`CallbackOutcome`]
//! with [`FlowStage::Failed`] and an error redirect.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::config::Config;
use crate::error::{IntegrationsError, Result};
use crate::oauth::provider::{Provider, ProviderAdapter};
use crate::oauth::state::{self, PendingAuthorization};
use crate::storage::{Credential, CredentialStore};

/// Stage of a connect attempt, used for logging transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Idle,
    Initiated,
    CallbackReceived,
    Exchanging,
    Persisted,
    Completed,
    Failed,
}

impl FlowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStage::Idle => "idle",
            FlowStage::Initiated => "initiated",
            FlowStage::CallbackReceived => "callback_received",
            FlowStage::Exchanging => "exchanging",
            FlowStage::Persisted => "persisted",
            FlowStage::Completed => "completed",
            FlowStage::Failed => "failed",
        }
    }
}

impl fmt::Display for FlowStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`ConnectFlow::initiate`].
#[derive(Debug, Clone)]
pub struct Initiated {
    pub provider: Provider,
    /// Provider authorization URL the browser is redirected to.
    pub authorization_url: Url,
    /// Nonce to place in an HTTP-only cookie when the provider enforces the
    /// cookie comparison.
    pub nonce_cookie: Option<String>,
}

/// Query parameters (and the nonce cookie) received on the callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub realm_id: Option<String>,
    /// Provider-reported failure such as `access_denied`.
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub nonce_cookie: Option<String>,
}

/// Terminal outcome of a callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    /// Either [`FlowStage::Completed`] or [`FlowStage::Failed`].
    pub stage: FlowStage,
    pub provider: Provider,
    pub subject_id: String,
    /// `{frontend}/dashboard?status=success|error`
    pub redirect: String,
}

impl CallbackOutcome {
    pub fn is_success(&self) -> bool {
        self.stage == FlowStage::Completed
    }
}

/// Provider-agnostic connect flow.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use integrations::config::Config;
/// use integrations::oauth::flow::ConnectFlow;
/// use integrations::oauth::provider::Provider;
///
/// # fn example(config: &Config) -> integrations::error::Result<()> {
/// let flow = ConnectFlow::from_config(config, Arc::new(reqwest::Client::new()))?;
/// let initiated = flow.initiate(Provider::Github, Some("42"))?;
/// println!("redirect to {}", initiated.authorization_url);
/// # Ok(())
/// # }
/// ```
pub struct ConnectFlow {
    adapters: BTreeMap<Provider, ProviderAdapter>,
    default_provider: Provider,
    frontend_base: String,
}

impl ConnectFlow {
    /// Creates a flow with no providers; add them with [`ConnectFlow::with_adapter`].
    pub fn new(frontend_base: impl Into<String>, default_provider: Provider) -> Self {
        Self {
            adapters: BTreeMap::new(),
            default_provider,
            frontend_base: frontend_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn with_adapter(mut self, adapter: ProviderAdapter) -> Self {
        self.adapters.insert(adapter.provider(), adapter);
        self
    }

    /// Builds a flow with an adapter for every configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::Config`] when a provider's settings do
    /// not resolve.
    pub fn from_config(config: &Config, http: Arc<reqwest::Client>) -> Result<Self> {
        let mut flow = Self::new(config.frontend_base(), config.server.default_provider);
        for provider in config.providers.configured() {
            let provider_config = config.provider_config(provider)?;
            flow = flow.with_adapter(ProviderAdapter::new(Arc::clone(&http), provider_config));
        }
        Ok(flow)
    }

    pub fn default_provider(&self) -> Provider {
        self.default_provider
    }

    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.adapters.keys().copied()
    }

    /// Parses a provider name from a URL segment and checks it is configured.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::UnknownProvider`] otherwise.
    pub fn resolve_provider(&self, name: &str) -> Result<Provider> {
        let provider: Provider = name.parse()?;
        if self.adapters.contains_key(&provider) {
            Ok(provider)
        } else {
            Err(IntegrationsError::UnknownProvider(name.to_string()).into())
        }
    }

    fn adapter(&self, provider: Provider) -> Result<&ProviderAdapter> {
        self.adapters
            .get(&provider)
            .ok_or_else(|| IntegrationsError::UnknownProvider(provider.to_string()).into())
    }

    /// `{frontend}/dashboard?status=success|error`
    pub fn result_url(&self, success: bool) -> String {
        let status = if success { "success" } else { "error" };
        format!("{}/dashboard?status={}", self.frontend_base, status)
    }

    /// Starts a connect attempt for `subject_id`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::MissingSubject`] when `subject_id` is
    /// absent or blank, and [`IntegrationsError::UnknownProvider`] when the
    /// provider is not configured.
    pub fn initiate(&self, provider: Provider, subject_id: Option<&str>) -> Result<Initiated> {
        let subject_id = subject_id
            .filter(|s| !s.trim().is_empty())
            .ok_or(IntegrationsError::MissingSubject)?;
        let adapter = self.adapter(provider)?;

        let pending = PendingAuthorization::new(subject_id, provider);
        let token = state::encode(&pending)?;
        let authorization_url = adapter.build_authorization_url(&token)?;

        tracing::debug!(
            provider = %provider,
            subject = %subject_id,
            stage = %FlowStage::Initiated,
            "Redirecting to provider authorization endpoint"
        );

        Ok(Initiated {
            provider,
            authorization_url,
            nonce_cookie: if adapter.config().csrf_cookie {
                pending.nonce
            } else {
                None
            },
        })
    }

    /// Completes a connect attempt from the provider callback.
    ///
    /// Validation happens before any network or store call. Once the state
    /// is accepted the attempt always ends in a redirect: exchange and store
    /// failures are logged here and reported only as `status=error`.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::InvalidState`] for a missing, malformed
    /// or forged state (including a nonce cookie mismatch), and
    /// [`IntegrationsError::MissingCode`] when the code is absent.
    pub async fn complete(
        &self,
        store: &dyn CredentialStore,
        params: CallbackParams,
    ) -> Result<CallbackOutcome> {
        let token = params
            .state
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| IntegrationsError::InvalidState("missing state".to_string()))?;
        let pending = state::decode(token)?;

        let provider = pending.provider.unwrap_or(self.default_provider);
        let adapter = self.adapter(provider).map_err(|_| {
            IntegrationsError::InvalidState(format!("provider {provider} is not configured"))
        })?;

        if adapter.config().csrf_cookie {
            verify_nonce(pending.nonce.as_deref(), params.nonce_cookie.as_deref())?;
        }

        let subject_id = pending.subject_id;
        tracing::debug!(
            provider = %provider,
            subject = %subject_id,
            stage = %FlowStage::CallbackReceived,
            "OAuth callback accepted"
        );

        if let Some(error) = params.error.as_deref() {
            tracing::warn!(
                provider = %provider,
                subject = %subject_id,
                error = %error,
                description = params.error_description.as_deref().unwrap_or(""),
                "Provider denied authorization"
            );
            return Ok(self.failed(provider, subject_id));
        }

        let code = params
            .code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(IntegrationsError::MissingCode)?;

        tracing::debug!(
            provider = %provider,
            subject = %subject_id,
            stage = %FlowStage::Exchanging,
            "Exchanging authorization code"
        );

        let grant = match adapter
            .exchange_code(code, &adapter.config().redirect_uri)
            .await
        {
            Ok(grant) => grant,
            Err(e) => {
                tracing::error!(
                    provider = %provider,
                    subject = %subject_id,
                    error = %e,
                    "Token exchange failed"
                );
                return Ok(self.failed(provider, subject_id));
            }
        };

        let now = Utc::now();
        let credential = Credential {
            subject_id: subject_id.clone(),
            provider,
            expires_at: grant.expires_at(now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            realm_id: params.realm_id.filter(|r| !r.trim().is_empty()),
            updated_at: now,
        };

        if let Err(e) = store.upsert(&credential).await {
            tracing::error!(
                provider = %provider,
                subject = %subject_id,
                error = %e,
                "Failed to persist credential"
            );
            return Ok(self.failed(provider, subject_id));
        }

        tracing::debug!(
            provider = %provider,
            subject = %subject_id,
            stage = %FlowStage::Persisted,
            "Credential stored"
        );
        tracing::info!(
            provider = %provider,
            subject = %subject_id,
            expires_at = ?credential.expires_at,
            "Provider connected"
        );

        Ok(CallbackOutcome {
            stage: FlowStage::Completed,
            provider,
            subject_id,
            redirect: self.result_url(true),
        })
    }

    fn failed(&self, provider: Provider, subject_id: String) -> CallbackOutcome {
        CallbackOutcome {
            stage: FlowStage::Failed,
            provider,
            subject_id,
            redirect: self.result_url(false),
        }
    }
}

/// Compares the nonce in the state with the one echoed back in the cookie.
fn verify_nonce(expected: Option<&str>, cookie: Option<&str>) -> Result<()> {
    match (expected, cookie) {
        (Some(expected), Some(cookie)) if constant_time_eq(expected, cookie) => Ok(()),
        (None, _) => Err(IntegrationsError::InvalidState("state carries no nonce".to_string()).into()),
        (_, None) => Err(IntegrationsError::InvalidState("missing nonce cookie".to_string()).into()),
        _ => Err(IntegrationsError::InvalidState("state nonce mismatch".to_string()).into()),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
