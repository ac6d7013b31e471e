//! dvarapala - identity service for multi-tenant applications
//!
//! This is the main entry point for the dvarapala application.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use dvarapala::accounts::AccountManager;
use dvarapala::auth::{PasswordHasher, TokenManager};
use dvarapala::config::{AuthConfig, Config};
use dvarapala::database::SqliteDatabase;
use dvarapala::otel::{init_tracing, Metrics, OtelProvider};
use dvarapala::server::{AppState, RateLimitConfig, RateLimiter, Server};

/// How often expired rate limit windows are swept
const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// dvarapala - identity service for multi-tenant applications
#[derive(Parser, Debug)]
#[command(name = "dvarapala")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "DVARAPALA_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Print the Argon2id digest of a password
    HashPassword { password: String },

    /// Check a password against a digest
    VerifyHash { password: String, hash: String },

    /// Replace the password of the user with the given email
    SetPassword { email: String, password: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        None | Some(Command::Serve) => serve(args.config.as_deref()).await,
        Some(Command::HashPassword { password }) => {
            let config = load_config(args.config.as_deref())?;
            let hasher = password_hasher(&config.auth)?;
            println!("{}", hasher.hash(&password)?);
            Ok(())
        }
        Some(Command::VerifyHash { password, hash }) => {
            let config = load_config(args.config.as_deref())?;
            let hasher = password_hasher(&config.auth)?;
            if hasher.verify(&password, &hash)? {
                println!("match");
                Ok(())
            } else {
                anyhow::bail!("password does not match")
            }
        }
        Some(Command::SetPassword { email, password }) => {
            set_password(args.config.as_deref(), &email, &password).await
        }
    }
}

async fn serve(config_path: Option<&str>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    config.validate().context("Invalid configuration")?;

    // Initialize OpenTelemetry provider
    let otel_provider = OtelProvider::new(&config.otel)?;

    // Initialize tracing/logging
    init_tracing(&otel_provider, &config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "Starting dvarapala"
    );

    // Initialize database
    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    info!(path = %config.database.path, "Database initialized");

    let tokens = Arc::new(TokenManager::new(
        config.auth.jwt_secret.as_bytes(),
        config.auth.token_ttl(),
    )?);
    let hasher = password_hasher(&config.auth)?;
    let metrics = Arc::new(if otel_provider.is_enabled() {
        Metrics::new(&otel_provider.meter())
    } else {
        Metrics::default()
    });

    let mut state = AppState::new(database, tokens, hasher, metrics);
    state
        .authenticator
        .warm_up()
        .await
        .context("Failed to prepare login flow")?;
    info!(
        token_ttl_secs = config.auth.token_ttl_secs,
        work_factor = config.auth.work_factor,
        "Authentication initialized"
    );

    if config.rate_limit.enabled {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&config.rate_limit)));
        spawn_rate_limit_cleanup(Arc::clone(&limiter));
        state = state.with_rate_limiter(limiter);
        info!(
            requests_per_window = config.rate_limit.requests_per_window,
            window_secs = config.rate_limit.window_secs,
            "Rate limiting enabled"
        );
    }

    let server = Server::new(config.server.clone(), state).with_cors(config.cors.clone());

    info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting HTTP server"
    );

    let result = server.run(shutdown_signal()).await;

    // Shutdown OpenTelemetry
    if let Err(e) = otel_provider.shutdown() {
        error!(error = %e, "Failed to shutdown OpenTelemetry");
    }

    info!("dvarapala shutdown complete");

    result.map_err(Into::into)
}

async fn set_password(config_path: Option<&str>, email: &str, password: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let database = Arc::new(SqliteDatabase::new(&config.database.path).await?);
    let hasher = password_hasher(&config.auth)?;
    let accounts = AccountManager::new(database, hasher);

    accounts
        .set_password(email, password)
        .await
        .with_context(|| format!("Failed to update password for {}", email))?;

    println!("password updated for {}", email);
    Ok(())
}

/// Hasher with the configured work factor, shared by the server and the CLI
fn password_hasher(auth: &AuthConfig) -> anyhow::Result<PasswordHasher> {
    PasswordHasher::new(auth.work_factor).context("Invalid auth.work_factor")
}

/// Load configuration from file or environment
///
/// Environment variables override values from the file.
fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => {
            // Use eprintln! since tracing is not yet initialized
            eprintln!("Loading configuration from file: {}", path);
            let environment = std::env::var("DVARAPALA_ENVIRONMENT").ok();
            Config::from_file_with_environment(path, environment.as_deref())
                .context("Failed to load config")?
        }
        None => {
            eprintln!("Loading configuration from environment variables");
            Config::default()
        }
    };

    config
        .apply_env_overrides()
        .context("Failed to load config")?;
    Ok(config)
}

fn spawn_rate_limit_cleanup(limiter: Arc<RateLimiter>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            limiter.cleanup();
        }
    });
}

/// Create a future that resolves when a shutdown signal is received
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
