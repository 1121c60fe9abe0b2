//! PostgreSQL-backed plan store: connection config, pooling, embedded
//! migrations, row models and queries.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
