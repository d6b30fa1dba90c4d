//! Client-held credential store
//!
//! Instead of a server-side row, the credential travels back to the browser
//! as `HttpOnly` cookies on the final redirect. The store wraps the request's
//! [`CookieJar`]; after the flow finishes the handler takes the jar back with
//! [`CookieCredentialStore::into_jar`] and attaches it to the response.

use std::sync::Mutex;

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};

use super::{Credential, CredentialStore};
use crate::error::{IntegrationsError, Result};
use crate::oauth::provider::Provider;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const REALM_ID_COOKIE: &str = "realm_id";
pub const EXPIRES_AT_COOKIE: &str = "token_expires_at";
pub const SUBJECT_COOKIE: &str = "credential_subject";
pub const PROVIDER_COOKIE: &str = "credential_provider";
pub const UPDATED_AT_COOKIE: &str = "credential_updated_at";

/// Credential store writing to a per-request cookie jar
///
/// Cookie names are fixed (`access_token`, `realm_id`, ...), so a browser
/// holds one credential at a time: connecting a second provider replaces
/// the first, and [`CredentialStore::get`] for the earlier pair then
/// returns `None`. Use the SQLite backend when a subject needs several
/// providers connected at once.
pub struct CookieCredentialStore {
    jar: Mutex<CookieJar>,
    secure: bool,
}

impl CookieCredentialStore {
    pub fn new(jar: CookieJar, secure: bool) -> Self {
        Self {
            jar: Mutex::new(jar),
            secure,
        }
    }

    /// Returns the jar with every cookie written by [`CredentialStore::upsert`].
    pub fn into_jar(self) -> CookieJar {
        match self.jar.into_inner() {
            Ok(jar) => jar,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn cookie(&self, name: &'static str, value: String) -> Cookie<'static> {
        Cookie::build((name, value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build()
    }

    fn with_jar<T>(&self, f: impl FnOnce(&mut CookieJar) -> T) -> Result<T> {
        let mut guard = self
            .jar
            .lock()
            .map_err(|_| IntegrationsError::Storage("cookie jar lock poisoned".to_string()))?;
        Ok(f(&mut guard))
    }
}

#[async_trait]
impl CredentialStore for CookieCredentialStore {
    async fn upsert(&self, credential: &Credential) -> Result<()> {
        let max_age = credential.expires_at.map(|expires_at| {
            let secs = (expires_at - Utc::now()).num_seconds().max(0);
            time::Duration::seconds(secs)
        });

        let mut access = self.cookie(ACCESS_TOKEN_COOKIE, credential.access_token.clone());
        if let Some(max_age) = max_age {
            access.set_max_age(max_age);
        }

        let mut cookies = vec![
            access,
            self.cookie(SUBJECT_COOKIE, credential.subject_id.clone()),
            self.cookie(PROVIDER_COOKIE, credential.provider.as_str().to_string()),
            self.cookie(UPDATED_AT_COOKIE, credential.updated_at.to_rfc3339()),
        ];
        let mut stale = Vec::new();

        // Optional fields are replaced wholesale, so a missing value clears
        // whatever the previous connection left behind.
        for (name, value) in [
            (REFRESH_TOKEN_COOKIE, credential.refresh_token.clone()),
            (REALM_ID_COOKIE, credential.realm_id.clone()),
            (
                EXPIRES_AT_COOKIE,
                credential.expires_at.map(|t| t.to_rfc3339()),
            ),
        ] {
            match value {
                Some(value) => cookies.push(self.cookie(name, value)),
                None => stale.push(name),
            }
        }

        self.with_jar(|jar| {
            let mut next = std::mem::take(jar);
            for cookie in cookies {
                next = next.add(cookie);
            }
            for name in stale {
                if next.get(name).is_some() {
                    next = next.remove(Cookie::build(name).path("/"));
                }
            }
            *jar = next;
        })
    }

    async fn get(&self, subject_id: &str, provider: Provider) -> Result<Option<Credential>> {
        self.with_jar(|jar| {
            let value = |name: &str| jar.get(name).map(|c| c.value().to_string());

            if value(SUBJECT_COOKIE).as_deref() != Some(subject_id)
                || value(PROVIDER_COOKIE).as_deref() != Some(provider.as_str())
            {
                return None;
            }

            let access_token = value(ACCESS_TOKEN_COOKIE)?;
            let parse = |name: &str| {
                value(name)
                    .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
                    .map(|t| t.with_timezone(&Utc))
            };

            Some(Credential {
                subject_id: subject_id.to_string(),
                provider,
                access_token,
                refresh_token: value(REFRESH_TOKEN_COOKIE),
                expires_at: parse(EXPIRES_AT_COOKIE),
                realm_id: value(REALM_ID_COOKIE),
                updated_at: parse(UPDATED_AT_COOKIE).unwrap_or_else(Utc::now),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential() -> Credential {
        Credential {
            subject_id: "42".to_string(),
            provider: Provider::Quickbooks,
            access_token: "tok1".to_string(),
            refresh_token: Some("ref1".to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(3600)),
            realm_id: Some("9130".to_string()),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_sets_http_only_cookies() {
        let store = CookieCredentialStore::new(CookieJar::new(), true);
        store.upsert(&credential()).await.unwrap();
        let jar = store.into_jar();

        let access = jar.get(ACCESS_TOKEN_COOKIE).unwrap();
        assert_eq!(access.value(), "tok1");
        assert_eq!(access.http_only(), Some(true));
        assert_eq!(access.secure(), Some(true));
        assert_eq!(access.same_site(), Some(SameSite::Lax));
        assert!(access.max_age().is_some());

        let realm = jar.get(REALM_ID_COOKIE).unwrap();
        assert_eq!(realm.value(), "9130");
        assert_eq!(realm.http_only(), Some(true));
    }

    #[tokio::test]
    async fn test_get_returns_credential_for_matching_pair() {
        let store = CookieCredentialStore::new(CookieJar::new(), false);
        store.upsert(&credential()).await.unwrap();

        let loaded = store.get("42", Provider::Quickbooks).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok1");
        assert_eq!(loaded.refresh_token.as_deref(), Some("ref1"));
        assert_eq!(loaded.realm_id.as_deref(), Some("9130"));
        assert!(loaded.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_get_ignores_other_subject_or_provider() {
        let store = CookieCredentialStore::new(CookieJar::new(), false);
        store.upsert(&credential()).await.unwrap();

        assert!(store.get("7", Provider::Quickbooks).await.unwrap().is_none());
        assert!(store.get("42", Provider::Github).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_on_empty_jar_returns_none() {
        let store = CookieCredentialStore::new(CookieJar::new(), false);
        assert!(store.get("42", Provider::Github).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_provider_replaces_first_in_same_jar() {
        let store = CookieCredentialStore::new(CookieJar::new(), false);

        let mut github = credential();
        github.provider = Provider::Github;
        github.access_token = "gh-token".to_string();
        store.upsert(&github).await.unwrap();

        store.upsert(&credential()).await.unwrap();

        assert!(store.get("42", Provider::Github).await.unwrap().is_none());
        let current = store.get("42", Provider::Quickbooks).await.unwrap().unwrap();
        assert_eq!(current.access_token, "tok1");
    }

    #[tokio::test]
    async fn test_upsert_replaces_previous_credential() {
        let store = CookieCredentialStore::new(CookieJar::new(), false);
        store.upsert(&credential()).await.unwrap();

        let mut second = credential();
        second.access_token = "tok2".to_string();
        second.refresh_token = None;
        second.realm_id = None;
        store.upsert(&second).await.unwrap();

        let loaded = store.get("42", Provider::Quickbooks).await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok2");
        assert!(loaded.refresh_token.is_none());
        assert!(loaded.realm_id.is_none());
    }
}
