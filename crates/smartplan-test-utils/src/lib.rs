//! Shared PostgreSQL fixture for smartplan integration tests.
//!
//! One server is shared by every test in a binary; each test gets a freshly
//! migrated database of its own inside it. The server comes from
//! `SMARTPLAN_TEST_PG_URL` when that is set (e.g. a CI service container),
//! otherwise from a testcontainers-managed `postgres` image started on first
//! use.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use smartplan_db::config::DbConfig;
use smartplan_db::pool;

struct Server {
    /// Server root URL, no database component.
    root_url: String,
    /// Keeps the container alive for the life of the test binary.
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<Server> = OnceCell::const_new();

async fn start_server() -> Server {
    if let Ok(url) = std::env::var("SMARTPLAN_TEST_PG_URL") {
        return Server {
            root_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    Server {
        root_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

async fn server() -> &'static Server {
    SERVER.get_or_init(start_server).await
}

async fn maintenance_pool() -> PgPool {
    let url = format!("{}/postgres", server().await.root_url);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated, uniquely named database. Call [`TestDb::cleanup`] at the end
/// of the test to drop it.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
    url: String,
}

impl TestDb {
    /// Store config pointing at this database, for code paths that build
    /// their own pool.
    pub fn config(&self) -> DbConfig {
        DbConfig::new(self.url.clone())
    }

    /// Close the pool and drop the database, terminating stray connections.
    pub async fn cleanup(self) {
        self.pool.close().await;

        let maint = maintenance_pool().await;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.name
        );
        let _ = maint.execute(terminate.as_str()).await;
        let drop = format!("DROP DATABASE IF EXISTS {}", self.name);
        let _ = maint.execute(drop.as_str()).await;
        maint.close().await;
    }
}

/// Create a database with all migrations applied.
pub async fn create_test_db() -> TestDb {
    let maint = maintenance_pool().await;
    let name = format!("smartplan_test_{}", Uuid::new_v4().simple());
    maint
        .execute(format!("CREATE DATABASE {name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create test database {name}: {e}"));
    maint.close().await;

    let url = format!("{}/{name}", server().await.root_url);
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to test database {name}: {e}"));

    pool::run_migrations(&pool)
        .await
        .expect("migrations should succeed");

    TestDb { pool, name, url }
}
