//! Relational persistence.
//!
//! One [`Store`] over a PostgreSQL pool; entity-specific operations live in
//! their own files as `impl Store` blocks:
//!
//! - `machines` - machine/sensor upsert for the historian feed
//! - `settings` - typed KV settings store
//! - `predictions` - append-only prediction history
//! - `state_store` - state snapshots, transitions (append-only), alerts,
//!   thresholds, statistics
//! - `profiles` - profiles, baseline lifecycle, bands, templates
//! - `alarms` - alarms, tickets, transactional incident application

pub mod alarms;
pub mod db;
pub mod machines;
pub mod predictions;
pub mod profiles;
pub mod settings;
pub mod state_store;

pub use db::{create_pool, run_migrations};

use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Shared handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
