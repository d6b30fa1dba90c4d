//! Command-line interface definition
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the connect service and inspect what it stored.

use clap::{Parser, Subcommand};

/// Integrations - OAuth connect service for third-party providers
///
/// Runs the HTTP endpoints that link a user account to GitHub or
/// QuickBooks and stores the resulting credentials.
#[derive(Parser, Debug, Clone)]
#[command(name = "integrations")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "INTEGRATIONS_JSON_LOGS")]
    pub json_logs: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP connect service
    Serve {
        /// Address to listen on (overrides server.bind and PORT)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show credentials stored for a user
    Credential {
        /// Subject identifier used when the flow was initiated
        #[arg(short, long)]
        user_id: String,

        /// Only show this provider (github, quickbooks)
        #[arg(short, long)]
        provider: Option<String>,

        /// Print tokens instead of masking them
        #[arg(long)]
        reveal: bool,
    },

    /// Validate configuration and print the resolved providers
    CheckConfig,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
