//! Integrations - OAuth connect service library
//!
//! This library links a user account in the host application to a
//! third-party provider account (GitHub, QuickBooks) through the OAuth 2.0
//! authorization code flow and stores the resulting credentials.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `oauth`: state codec, provider adapters, and the flow orchestrator
//! - `storage`: credential persistence (SQLite and cookie backends)
//! - `server`: axum routes for `/auth/...` and `/callback`
//! - `config`: configuration management and validation
//! - `error`: error types and result aliases
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use integrations::server::{self, AppState};
//! use integrations::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config: Config = serde_yaml::from_str(include_str!("../config/config.yaml"))?;
//!     config.validate()?;
//!
//!     let app = server::router(AppState::from_config(&config)?);
//!     let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod oauth;
pub mod server;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{IntegrationsError, Result};
pub use oauth::{CallbackOutcome, CallbackParams, ConnectFlow, Provider};
pub use storage::{Credential, CredentialStore};
