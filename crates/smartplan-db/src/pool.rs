use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::{info, warn};

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/smartplan-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Create a connection pool with sensible defaults.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let options = config.connect_options()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "failed to connect to database at {}",
                config.redacted_url()
            )
        })?;
    Ok(pool)
}

/// Run all pending embedded migrations against the pool.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!("migrations applied successfully");
    Ok(())
}

/// What [`ensure_database_exists`] found on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseStatus {
    /// The database was already there.
    Existing,
    /// The database was missing and has been created.
    Created,
    /// The maintenance database could not be reached, which is normal on
    /// managed hosts; the target is assumed to be provisioned already.
    Unverified,
}

/// `CREATE DATABASE` statement for `name`.
///
/// The statement takes no bind parameters, so only ASCII letters, digits and
/// underscores are accepted.
fn create_database_sql(name: &str) -> Result<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("database name {name:?} contains invalid characters");
    }
    Ok(format!("CREATE DATABASE {name}"))
}

/// Make sure the target database exists, creating it when it is missing.
///
/// A server that refuses the `postgres` maintenance connection yields
/// [`DatabaseStatus::Unverified`] instead of an error; the subsequent pool
/// connection decides whether the database is really usable.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<DatabaseStatus> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;

    let connected = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(config.maintenance_options()?)
        .await;
    let maint_pool = match connected {
        Ok(pool) => pool,
        Err(e) => {
            warn!(
                db = db_name,
                error = %e,
                "maintenance database unavailable, skipping create"
            );
            return Ok(DatabaseStatus::Unverified);
        }
    };

    let status = create_if_missing(&maint_pool, db_name).await;
    maint_pool.close().await;
    status
}

async fn create_if_missing(pool: &PgPool, db_name: &str) -> Result<DatabaseStatus> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(pool)
            .await
            .context("failed to query pg_database")?;
    if exists {
        info!(db = db_name, "database already exists");
        return Ok(DatabaseStatus::Existing);
    }

    let create_sql = create_database_sql(db_name)?;
    pool.execute(create_sql.as_str())
        .await
        .with_context(|| format!("failed to create database {db_name}"))?;
    info!(db = db_name, "database created");
    Ok(DatabaseStatus::Created)
}
