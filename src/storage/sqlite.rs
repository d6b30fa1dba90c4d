//! SQLite-backed credential store
//!
//! One row per (user_id, provider), enforced by a `UNIQUE` constraint and
//! written with `INSERT ... ON CONFLICT DO UPDATE`. rusqlite is blocking, so
//! every operation runs on the blocking thread pool.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Credential, CredentialStore};
use crate::error::{IntegrationsError, Result};
use crate::oauth::provider::Provider;

const SELECT_COLUMNS: &str = "user_id, provider, access_token, refresh_token, \
                              token_expires_at, realm_id, updated_at";

/// Storage backend for provider credentials
#[derive(Debug, Clone)]
pub struct SqliteCredentialStore {
    db_path: PathBuf,
}

impl SqliteCredentialStore {
    /// Create a store in the user's data directory
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "integrations", "integrations").ok_or_else(|| {
            IntegrationsError::Storage("Could not determine data directory".into())
        })?;

        Self::new_with_path(proj_dirs.data_dir().join("integrations.db"))
    }

    /// Create a store that uses the specified database path.
    ///
    /// Parent directories are created as needed.
    ///
    /// # Examples
    ///
    /// ```
    /// use integrations::storage::SqliteCredentialStore;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let store = SqliteCredentialStore::new_with_path(dir.path().join("creds.db")).unwrap();
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create parent directory for database")
                .map_err(|e| IntegrationsError::Storage(e.to_string()))?;
        }

        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    /// Path of the backing database file
    pub fn path(&self) -> &std::path::Path {
        &self.db_path
    }

    fn init(&self) -> Result<()> {
        let conn = open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS integrations (
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT,
                token_expires_at TEXT,
                realm_id TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, provider)
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(|e| IntegrationsError::Storage(e.to_string()))?;

        Ok(())
    }

    /// Lists every credential stored for `subject_id`, ordered by provider
    pub async fn list_for_subject(&self, subject_id: &str) -> Result<Vec<Credential>> {
        let db_path = self.db_path.clone();
        let subject_id = subject_id.to_string();

        run_blocking(move || {
            let conn = open(&db_path)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM integrations WHERE user_id = ? ORDER BY provider"
                ))
                .context("Failed to prepare query")
                .map_err(|e| IntegrationsError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(params![subject_id], read_row)
                .context("Failed to query credentials")
                .map_err(|e| IntegrationsError::Storage(e.to_string()))?;

            let mut credentials = Vec::new();
            for row in rows {
                let raw = row
                    .context("Failed to read credential row")
                    .map_err(|e| IntegrationsError::Storage(e.to_string()))?;
                credentials.push(raw.into_credential()?);
            }
            Ok(credentials)
        })
        .await
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn upsert(&self, credential: &Credential) -> Result<()> {
        let db_path = self.db_path.clone();
        let credential = credential.clone();

        run_blocking(move || {
            let conn = open(&db_path)?;
            conn.execute(
                "INSERT INTO integrations
                    (user_id, provider, access_token, refresh_token, token_expires_at, realm_id, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (user_id, provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    token_expires_at = excluded.token_expires_at,
                    realm_id = excluded.realm_id,
                    updated_at = excluded.updated_at",
                params![
                    credential.subject_id,
                    credential.provider.as_str(),
                    credential.access_token,
                    credential.refresh_token,
                    credential.expires_at.map(|t| t.to_rfc3339()),
                    credential.realm_id,
                    credential.updated_at.to_rfc3339(),
                ],
            )
            .context("Failed to upsert credential")
            .map_err(|e| IntegrationsError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    async fn get(&self, subject_id: &str, provider: Provider) -> Result<Option<Credential>> {
        let db_path = self.db_path.clone();
        let subject_id = subject_id.to_string();

        run_blocking(move || {
            let conn = open(&db_path)?;
            let raw = conn
                .query_row(
                    &format!(
                        "SELECT {SELECT_COLUMNS} FROM integrations WHERE user_id = ? AND provider = ?"
                    ),
                    params![subject_id, provider.as_str()],
                    read_row,
                )
                .optional()
                .context("Failed to query credential")
                .map_err(|e| IntegrationsError::Storage(e.to_string()))?;

            raw.map(RawCredential::into_credential).transpose()
        })
        .await
    }
}

/// Column values as stored, before timestamp and provider parsing.
struct RawCredential {
    user_id: String,
    provider: String,
    access_token: String,
    refresh_token: Option<String>,
    token_expires_at: Option<String>,
    realm_id: Option<String>,
    updated_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawCredential> {
    Ok(RawCredential {
        user_id: row.get(0)?,
        provider: row.get(1)?,
        access_token: row.get(2)?,
        refresh_token: row.get(3)?,
        token_expires_at: row.get(4)?,
        realm_id: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl RawCredential {
    fn into_credential(self) -> Result<Credential> {
        let provider = Provider::from_str(&self.provider)
            .map_err(|e| IntegrationsError::Storage(format!("corrupt provider column: {e}")))?;

        Ok(Credential {
            subject_id: self.user_id,
            provider,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .token_expires_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            realm_id: self.realm_id,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| IntegrationsError::Storage(format!("corrupt timestamp {value:?}: {e}")).into())
}

fn open(db_path: &std::path::Path) -> Result<Connection> {
    let conn = Connection::open(db_path)
        .context("Failed to open database")
        .map_err(|e| IntegrationsError::Storage(e.to_string()))?;
    // Concurrent callbacks write through separate connections.
    conn.busy_timeout(Duration::from_secs(5))
        .context("Failed to set busy timeout")
        .map_err(|e| IntegrationsError::Storage(e.to_string()))?;
    Ok(conn)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IntegrationsError::Storage(format!("storage task panicked: {e}")))?
}
