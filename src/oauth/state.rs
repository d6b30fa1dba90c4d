//! Correlation token codec for the OAuth `state` parameter
//!
//! The state carries a [`PendingAuthorization`] across the provider redirect.
//! It identifies *whose* flow is completing; it grants nothing by itself.
//! The server keeps no session table, so everything needed to finish the
//! flow is inside the token.
//!
//! Wire format: the JSON object `{"userId", "provider", "nonce"}` encoded as
//! unpadded base64url. Decoding also accepts a bare JSON object, which is
//! what links minted before the base64 encoding carry.

use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{IntegrationsError, Result};
use crate::oauth::provider::Provider;

/// The ephemeral record round-tripped through the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAuthorization {
    /// Opaque identifier of the user who started the flow
    #[serde(rename = "userId", deserialize_with = "subject_from_json")]
    pub subject_id: String,

    /// Provider the flow was started for; absent in legacy tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,

    /// Unguessable value compared against the nonce cookie
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl PendingAuthorization {
    /// Creates a pending authorization with a fresh random nonce.
    pub fn new(subject_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            subject_id: subject_id.into(),
            provider: Some(provider),
            nonce: Some(generate_nonce()),
        }
    }
}

/// Accepts `"42"` as well as `42` for the subject, since callers built on
/// numeric user ids send the latter.
fn subject_from_json<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subject {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Subject::deserialize(deserializer)? {
        Subject::Text(s) => s,
        Subject::Number(n) => n.to_string(),
    })
}

/// Generates a cryptographically random nonce.
///
/// 16 random bytes encoded as base64url without padding.
pub fn generate_nonce() -> String {
    use rand::RngCore as _;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Encodes a pending authorization into an opaque, URL-safe state token.
///
/// # Errors
///
/// Returns [`IntegrationsError::MissingSubject`] for a blank subject.
///
/// # Examples
///
/// ```
/// use integrations::oauth::provider::Provider;
/// use integrations::oauth::state::{decode, encode, PendingAuthorization};
///
/// let pending = PendingAuthorization::new("42", Provider::Github);
/// let token = encode(&pending).unwrap();
/// assert_eq!(decode(&token).unwrap(), pending);
/// ```
pub fn encode(pending: &PendingAuthorization) -> Result<String> {
    if pending.subject_id.trim().is_empty() {
        return Err(IntegrationsError::MissingSubject.into());
    }
    let json = serde_json::to_vec(pending)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a state token produced by [`encode`] (or a legacy bare JSON state).
///
/// # Errors
///
/// Returns [`IntegrationsError::InvalidState`] when the token is empty, is
/// not base64url, is not a JSON object with a `userId`, or names an unknown
/// provider. The error never carries the raw token.
pub fn decode(token: &str) -> Result<PendingAuthorization> {
    let token = token.trim();
    if token.is_empty() {
        return Err(IntegrationsError::InvalidState("empty state".to_string()).into());
    }

    let json = if token.starts_with('{') {
        token.as_bytes().to_vec()
    } else {
        base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token.trim_end_matches('='))
            .map_err(|_| IntegrationsError::InvalidState("state is not base64url".to_string()))?
    };

    let pending: PendingAuthorization = serde_json::from_slice(&json)
        .map_err(|e| IntegrationsError::InvalidState(format!("state payload rejected: {e}")))?;

    if pending.subject_id.trim().is_empty() {
        return Err(IntegrationsError::InvalidState("state has an empty userId".to_string()).into());
    }

    Ok(pending)
}
