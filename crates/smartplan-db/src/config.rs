use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::postgres::PgConnectOptions;

/// Plan store connection settings.
///
/// The URL identifies the managed PostgreSQL endpoint. The access credential
/// is kept separate from the URL so it can come from a secret store or env
/// var without being written into connection strings; when present it
/// overrides any password embedded in the URL.
#[derive(Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Access credential for the store.
    pub password: Option<String>,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("database_url", &self.redacted_url())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl DbConfig {
    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            password: None,
        }
    }

    /// Attach the store access credential.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Connection options for the configured database.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&self.database_url)
            .with_context(|| format!("invalid database URL {:?}", self.redacted_url()))?;
        Ok(match &self.password {
            Some(password) => options.password(password),
            None => options,
        })
    }

    /// Connection options for the `postgres` maintenance database on the same
    /// host. Used to issue `CREATE DATABASE` when the target DB does not yet
    /// exist.
    pub fn maintenance_options(&self) -> Result<PgConnectOptions> {
        Ok(self.connect_options()?.database("postgres"))
    }

    /// Extract the database name from the URL.
    ///
    /// Returns `None` if the URL has no path component. Query parameters such
    /// as `?sslmode=require` are ignored.
    pub fn database_name(&self) -> Option<&str> {
        let without_query = self
            .database_url
            .split_once('?')
            .map_or(self.database_url.as_str(), |(head, _)| head);
        let (_, name) = without_query.split_once("://")?.1.split_once('/')?;
        Some(name).filter(|s| !s.is_empty())
    }

    /// The URL with any embedded password masked, for log and error output.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.database_url.split_once("://") else {
            return self.database_url.clone();
        };
        let Some((userinfo, host)) = rest.split_once('@') else {
            return self.database_url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.database_url.clone(),
        }
    }
}
