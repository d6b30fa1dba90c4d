//! Credential persistence
//!
//! A [`Credential`] is the durable result of a successful exchange. At most
//! one credential exists per (subject, provider); writers replace it through
//! [`CredentialStore::upsert`]. Two backends implement the trait:
//!
//! - [`SqliteCredentialStore`]: server-side table keyed on the pair.
//! - [`CookieCredentialStore`]: client-held HTTP-only cookies scoped to one
//!   request/response.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::oauth::provider::Provider;

pub mod cookie;
pub mod sqlite;

pub use cookie::CookieCredentialStore;
pub use sqlite::SqliteCredentialStore;

/// Tokens granted to one subject by one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub subject_id: String,
    pub provider: Provider,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// `None` when the provider issued a non-expiring token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Provider tenant, e.g. the QuickBooks company id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Returns `true` when the access token is expired or about to expire.
    ///
    /// A 60-second buffer is applied so callers have time to reconnect
    /// before the provider rejects the token. Credentials without
    /// `expires_at` never expire.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => Utc::now() >= expires_at - chrono::Duration::seconds(60),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject_id", &self.subject_id)
            .field("provider", &self.provider)
            .field("access_token", &"[redacted]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[redacted]"),
            )
            .field("expires_at", &self.expires_at)
            .field("realm_id", &self.realm_id)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Insert-or-replace persistence keyed on (subject, provider).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Stores `credential`, replacing any credential for the same
    /// (subject, provider). Concurrent writers race; the last one wins.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationsError::Storage`](crate::error::IntegrationsError::Storage)
    /// when the backend cannot persist the record.
    async fn upsert(&self, credential: &Credential) -> Result<()>;

    /// Loads the credential for (subject, provider); `Ok(None)` when none
    /// has been stored.
    async fn get(&self, subject_id: &str, provider: Provider) -> Result<Option<Credential>>;
}
