//! Janus -- authenticating, load-balancing LLM gateway.
//!
//! Entry point. Wires together:
//!   - Configuration loading
//!   - Database initialization
//!   - Key cache warm-up and background refresh/flush
//!   - HTTP server (chat relay + admin API)
//!   - Graceful shutdown on SIGTERM / SIGINT with a final spend flush

use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use janus::AppState;
use janus::api::build_app;
use janus::config::Config;
use janus::db::Database;
use janus::tasks::spawn_background_tasks;

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = PathBuf::from("janus.toml");

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = PathBuf::from(path);
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("janus {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
janus {version} -- LLM gateway

USAGE:
    janus [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: janus.toml]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    JANUS_CONFIG           Alternative to --config flag
    JANUS_ADMIN_KEY        Bearer key for /admin routes
",
        version = env!("CARGO_PKG_VERSION")
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments
    let cli = parse_args();

    let config_path = std::env::var("JANUS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or(cli.config_path);

    // 2. Load configuration
    let config = Config::load(&config_path)?;

    // 3. Initialize tracing/logging
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        groups = config.model_groups.len(),
        "Starting janus"
    );

    // 4. Open database
    let db = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "Database opened");

    // 5. Build shared application state
    let listen_addr = config.listen_addr();
    let refresh_interval = config.background.refresh_interval();
    let (state, flusher) = AppState::new(config, db.clone())?;

    // 6. Warm the key cache. Serving with an empty cache would reject
    //    every caller, so a failure here is fatal.
    let loaded = state.key_cache.refresh(&db)?;
    tracing::info!(keys = loaded, "Key cache loaded");

    if !state.config.auth.enabled {
        tracing::warn!("Authentication is DISABLED -- every request may use every model group");
    }
    if state.config.auth.admin_key.is_none() {
        tracing::info!("No admin key configured; /admin routes are closed");
    }

    // 7. Background refresh + spend flush
    let background = spawn_background_tasks(
        db.clone(),
        Arc::clone(&state.key_cache),
        flusher.clone(),
        refresh_interval,
    );
    tracing::debug!(
        interval_secs = refresh_interval.as_secs(),
        "Background tasks spawned"
    );

    // 8. Build the router
    let app = build_app(state);

    // 9. Bind and serve
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 10. Cleanup: stop scheduling, then persist whatever is still queued.
    tracing::info!("Shutting down gracefully");
    background.abort();
    let flushed = flusher.flush(&db).await;
    tracing::info!(records = flushed, "Final spend flush complete");

    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("janus={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
