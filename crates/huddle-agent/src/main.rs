//! # huddle-agent
//!
//! `huddle` binary: wires settings, store, cluster services and the server
//! together, plus two development helpers for seeding data and minting tokens.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use huddle_auth::{JwtVerifier, issue_token};
use huddle_core::{InstanceId, PrincipalId};
use huddle_server::config::ServerConfig;
use huddle_server::server::HuddleServer;
use huddle_server::shutdown::ShutdownCoordinator;
use huddle_settings::loader::{parse_cluster_mode, validate};
use huddle_settings::{ClusterMode, HuddleSettings};
use huddle_store::{
    BlockingPool, ConnectionConfig, ConnectionPool, ConversationRepo, UserRepo, new_file,
    new_in_memory, run_migrations,
};

/// How long shutdown waits for sessions and background tasks.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Huddle real-time chat server.
#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Huddle real-time chat server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the server.
    Serve(ServeArgs),
    /// Create users (and optionally a conversation between them).
    Seed(SeedArgs),
    /// Sign a connection token with the configured secret.
    Token(TokenArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// `local` or `shared` (overrides settings).
    #[arg(long, value_parser = parse_mode)]
    mode: Option<ClusterMode>,
}

#[derive(Args, Debug)]
struct SeedArgs {
    /// Path to the `SQLite` database (overrides settings).
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Username to create; repeat for several.
    #[arg(long = "user", required = true)]
    users: Vec<String>,

    /// Also create a conversation with every seeded user.
    #[arg(long)]
    conversation: bool,
}

#[derive(Args, Debug)]
struct TokenArgs {
    /// Principal the token is issued to.
    #[arg(long)]
    user_id: i64,

    /// Lifetime in seconds.
    #[arg(long, default_value = "3600")]
    ttl_secs: i64,
}

fn parse_mode(raw: &str) -> std::result::Result<ClusterMode, String> {
    parse_cluster_mode(raw).ok_or_else(|| format!("unknown mode '{raw}', expected local or shared"))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Open (and migrate) the configured database.
fn open_store(settings: &HuddleSettings) -> Result<ConnectionPool> {
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        busy_timeout_ms: settings.store.busy_timeout_ms,
    };
    let path = huddle_settings::resolve_db_path(settings);
    let pool = if settings.store.db_path == ":memory:" {
        new_in_memory(&config).context("Failed to open in-memory database")?
    } else {
        ensure_parent_dir(&path)?;
        let raw = path
            .to_str()
            .with_context(|| format!("Database path is not UTF-8: {}", path.display()))?;
        new_file(raw, &config).with_context(|| format!("Failed to open database {raw}"))?
    };
    let conn = pool.get().context("Failed to get DB connection")?;
    let applied = run_migrations(&conn).context("Failed to run migrations")?;
    tracing::debug!(applied, "migrations applied");
    Ok(pool)
}

fn load(db_path: Option<&Path>) -> Result<HuddleSettings> {
    let path = huddle_settings::settings_path();
    let mut settings = huddle_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(db) = db_path {
        settings.store.db_path = db.to_string_lossy().into_owned();
    }
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Seed(args) => seed(&args),
        Command::Token(args) => token(&args),
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut settings = load(args.db_path.as_deref())?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(mode) = args.mode {
        settings.cluster.mode = mode;
    }
    validate(&settings).context("Invalid settings")?;

    huddle_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    if settings.cluster.mode == ClusterMode::Shared && settings.store.db_path == ":memory:" {
        bail!("shared mode needs a database file every instance can open");
    }

    let metrics = huddle_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let pool = BlockingPool::new(open_store(&settings)?);

    let config = ServerConfig::from_settings(&settings);
    let instance = InstanceId::new();
    let shutdown = ShutdownCoordinator::new();
    let mut cluster = huddle_server::cluster::start(&config, pool, instance.clone(), shutdown.token())
        .await
        .context("Failed to start cluster services")?;

    let verifier = Arc::new(JwtVerifier::new(
        &settings.auth.jwt_secret,
        settings.auth.leeway_secs,
    ));
    let server = HuddleServer::new(
        config,
        verifier,
        cluster.services.clone(),
        instance,
        shutdown.clone(),
    )
    .with_metrics(metrics);

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Huddle listening on http://{addr}");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let mut handles = vec![handle];
    handles.extend(cluster.tasks.drain(..));
    shutdown
        .graceful_shutdown(handles, Some(SHUTDOWN_TIMEOUT))
        .await;
    cluster.withdraw().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn seed(args: &SeedArgs) -> Result<()> {
    let settings = load(args.db_path.as_deref())?;
    huddle_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
    let pool = open_store(&settings)?;
    let conn = pool.get().context("Failed to get DB connection")?;

    let mut ids: Vec<PrincipalId> = Vec::with_capacity(args.users.len());
    for name in &args.users {
        let user = UserRepo::create(&conn, name)
            .with_context(|| format!("Failed to create user {name}"))?;
        println!("user {} {}", user.id, user.username);
        ids.push(user.id);
    }
    if args.conversation {
        let conversation =
            ConversationRepo::create(&conn, &ids).context("Failed to create conversation")?;
        println!("conversation {}", conversation.id);
    }
    Ok(())
}

fn token(args: &TokenArgs) -> Result<()> {
    let settings = load(None)?;
    let token = issue_token(
        &settings.auth.jwt_secret,
        PrincipalId::new(args.user_id),
        args.ttl_secs,
    )
    .context("Failed to sign token")?;
    println!("{token}");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_without_overrides() {
        let cli = Cli::parse_from(["huddle", "serve"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert!(args.host.is_none());
        assert!(args.port.is_none());
        assert!(args.mode.is_none());
    }

    #[test]
    fn serve_with_overrides() {
        let cli = Cli::parse_from([
            "huddle", "serve", "--host", "0.0.0.0", "--port", "8080", "--mode", "shared",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.port, Some(8080));
        assert_eq!(args.mode, Some(ClusterMode::Shared));
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["huddle", "serve", "--mode", "mesh"]).is_err());
    }

    #[test]
    fn seed_takes_repeated_users() {
        let cli = Cli::parse_from([
            "huddle", "seed", "--user", "alice", "--user", "bob", "--conversation",
        ]);
        let Command::Seed(args) = cli.command else {
            panic!("expected seed");
        };
        assert_eq!(args.users, ["alice", "bob"]);
        assert!(args.conversation);
    }

    #[test]
    fn seed_requires_a_user() {
        assert!(Cli::try_parse_from(["huddle", "seed"]).is_err());
    }

    #[test]
    fn token_default_ttl() {
        let cli = Cli::parse_from(["huddle", "token", "--user-id", "3"]);
        let Command::Token(args) = cli.command else {
            panic!("expected token");
        };
        assert_eq!(args.user_id, 3);
        assert_eq!(args.ttl_secs, 3600);
    }

    #[test]
    fn open_store_creates_parent_dirs_and_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = HuddleSettings::default();
        settings.store.db_path = dir
            .path()
            .join("nested/huddle.db")
            .to_string_lossy()
            .into_owned();
        let pool = open_store(&settings).unwrap();
        let conn = pool.get().unwrap();
        let user = UserRepo::create(&conn, "alice").unwrap();
        assert_eq!(user.username, "alice");
    }
}
