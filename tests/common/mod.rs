use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use integrations::oauth::provider::{Provider, ProviderAdapter, ProviderConfig};
use integrations::oauth::ConnectFlow;
use integrations::storage::{Credential, CredentialStore, SqliteCredentialStore};

pub const FRONTEND: &str = "https://app.example.com";
pub const REDIRECT_URI: &str = "https://api.example.com/callback";

/// In-memory store that records every call.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingStore {
    pub upserts: Mutex<Vec<Credential>>,
    pub gets: AtomicUsize,
    pub fail: bool,
}

#[allow(dead_code)]
impl RecordingStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn upserted(&self) -> Vec<Credential> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.upserts.lock().unwrap().len() + self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for RecordingStore {
    async fn upsert(&self, credential: &Credential) -> integrations::Result<()> {
        if self.fail {
            return Err(integrations::IntegrationsError::Storage(
                "database unavailable".to_string(),
            )
            .into());
        }
        self.upserts.lock().unwrap().push(credential.clone());
        Ok(())
    }

    async fn get(
        &self,
        subject_id: &str,
        provider: Provider,
    ) -> integrations::Result<Option<Credential>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .upserts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.subject_id == subject_id && c.provider == provider)
            .cloned())
    }
}

/// Provider settings pointing at a mock server.
#[allow(dead_code)]
pub fn provider_config(provider: Provider, base_url: &str) -> ProviderConfig {
    ProviderConfig {
        provider,
        client_id: "client-id".to_string(),
        client_secret: "client-secret".to_string(),
        redirect_uri: REDIRECT_URI.to_string(),
        authorization_endpoint: format!("{}/authorize", base_url),
        token_endpoint: format!("{}/token", base_url),
        scopes: provider.default_scopes(),
        auth_style: provider.default_auth_style(),
        response_type: provider.requires_response_type(),
        csrf_cookie: provider.default_csrf_cookie(),
        token_timeout: Duration::from_secs(10),
    }
}

/// Flow with GitHub (default) and QuickBooks both served by `base_url`.
#[allow(dead_code)]
pub fn flow(base_url: &str) -> ConnectFlow {
    flow_with(vec![
        provider_config(Provider::Github, base_url),
        provider_config(Provider::Quickbooks, base_url),
    ])
}

#[allow(dead_code)]
pub fn flow_with(configs: Vec<ProviderConfig>) -> ConnectFlow {
    let http = Arc::new(reqwest::Client::new());
    configs
        .into_iter()
        .fold(ConnectFlow::new(FRONTEND, Provider::Github), |flow, config| {
            flow.with_adapter(ProviderAdapter::new(Arc::clone(&http), config))
        })
}

/// Extracts a query parameter from a URL string.
#[allow(dead_code)]
pub fn query_param(url: &str, name: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

#[allow(dead_code)]
pub fn create_temp_store() -> (SqliteCredentialStore, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let store = SqliteCredentialStore::new_with_path(tmp.path().join("integrations.db"))
        .expect("failed to create sqlite store with path");
    (store, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}
