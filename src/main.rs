//! Integrations - OAuth connect service
//!
//! Main entry point for the integrations binary.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use integrations::cli::{Cli, Commands};
use integrations::commands;
use integrations::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    match cli.command {
        Commands::Serve { .. } => {
            config.validate()?;
            tracing::info!("Starting connect service");
            commands::serve::run_serve(config).await
        }
        Commands::Credential {
            user_id,
            provider,
            reveal,
        } => {
            tracing::debug!(user = %user_id, "Showing stored credentials");
            commands::credential::show_credentials(&config, &user_id, provider.as_deref(), reveal)
                .await
        }
        Commands::CheckConfig => {
            config.validate()?;
            commands::check_config::run_check_config(&config)
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing(verbose: bool, json: bool) {
    let default_filter = if verbose {
        "integrations=debug,tower_http=debug"
    } else {
        "integrations=info,tower_http=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
