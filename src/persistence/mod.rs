//! Persistence Layer
//!
//! SQLite storage for the paper account through sqlx.
//!
//! # Database Schema
//!
//! ## accounts
//! - id: user id
//! - balance: realized cash balance
//!
//! ## positions
//! - one row per open position, deleted when the position is settled
//!
//! ## trades
//! - immutable closed-position records with entry and exit context
//!
//! ## bot_status
//! - single row (id = 1): running flag, daily trade counter and its date,
//!   last trade / last check timestamps

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

/// Open the pool and bring the schema up to date.
///
/// File databases get their parent directory created. An in-memory database
/// lives in a single connection that is never recycled, so every caller sees
/// the same data.
pub async fn init_database(database_url: &str) -> Result<DbPool, DatabaseError> {
    init_database_with(&DatabaseConfig {
        url: database_url.to_string(),
        ..DatabaseConfig::default()
    })
    .await
}

pub async fn init_database_with(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    let database_url = config.url.as_str();
    info!("Initializing database: {}", database_url);

    let in_memory = is_in_memory(database_url);
    if !in_memory {
        if let Some(db_path) = database_url.strip_prefix("sqlite://") {
            let db_path = db_path.split('?').next().unwrap_or(db_path);
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                    })?;
                }
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await?
    };

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    let statements: [(&str, &str); 8] = [
        (
            "accounts table",
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY,
                balance REAL NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        ),
        (
            "positions table",
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                market_type TEXT NOT NULL CHECK(market_type IN ('stock', 'forex', 'crypto')),
                side TEXT NOT NULL CHECK(side IN ('long', 'short')),
                entry_price REAL NOT NULL,
                quantity REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                entry_reason TEXT NOT NULL DEFAULT '',
                opened_at DATETIME NOT NULL
            )
            "#,
        ),
        (
            "trades table",
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                position_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                market_type TEXT NOT NULL,
                side TEXT NOT NULL CHECK(side IN ('long', 'short')),
                entry_price REAL NOT NULL,
                exit_price REAL NOT NULL,
                quantity REAL NOT NULL,
                stop_loss REAL NOT NULL,
                take_profit REAL NOT NULL,
                profit_loss REAL NOT NULL,
                profit_loss_percent REAL NOT NULL,
                entry_reason TEXT NOT NULL DEFAULT '',
                exit_reason TEXT NOT NULL,
                opened_at DATETIME NOT NULL,
                closed_at DATETIME NOT NULL
            )
            "#,
        ),
        (
            "bot_status table",
            r#"
            CREATE TABLE IF NOT EXISTS bot_status (
                id INTEGER PRIMARY KEY CHECK(id = 1),
                running BOOLEAN NOT NULL DEFAULT 0,
                trades_today INTEGER NOT NULL DEFAULT 0,
                counter_date TEXT NOT NULL,
                last_trade_at DATETIME,
                last_check_at DATETIME
            )
            "#,
        ),
        (
            "bot_status row",
            "INSERT OR IGNORE INTO bot_status (id, counter_date) VALUES (1, date('now'))",
        ),
        (
            "index",
            "CREATE INDEX IF NOT EXISTS idx_positions_user_symbol ON positions(user_id, symbol)",
        ),
        (
            "index",
            "CREATE INDEX IF NOT EXISTS idx_trades_user_closed_at ON trades(user_id, closed_at)",
        ),
        (
            "index",
            "CREATE INDEX IF NOT EXISTS idx_trades_position_id ON trades(position_id)",
        ),
    ];

    for (what, sql) in statements {
        sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create {}: {}", what, e)))?;
    }

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/paperdesk.db")
    pub url: String,

    /// Maximum number of connections in the pool (file databases only)
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/paperdesk.db".to_string(),
            max_connections: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        Self {
            url,
            max_connections,
        }
    }
}
