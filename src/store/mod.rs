//! Relational store for templates, stacks, instances, and overrides.
//!
//! Backed by PostgreSQL through `sqlx`. All read paths filter soft-deleted
//! rows; uniqueness constraints are scoped to live rows by partial unique
//! indexes. `stacks.updated_at` is bumped by triggers on every owned row
//! change, which makes the plan token (a hash over timestamps) sensitive
//! to any change under a stack.

use crate::error::{Error, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

mod children;
mod instances;
mod lock;
mod migrate;
mod stacks;
mod templates;

pub use instances::{InstanceUpdate, NewInstance, OverrideGroup};
pub use lock::StackLock;
pub use migrate::{migrate_down, migrate_up};
pub use stacks::{DesiredRow, NewStack, StackUpdate};
pub use templates::{NewTemplate, TemplateUpdate};

/// Handle to the relational store
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    /// Connect to the store with a small pool sized for a local control
    /// plane
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("connected to relational store");
        Ok(Self { pool })
    }

    /// Wrap an existing pool (tests)
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Map a unique-constraint violation onto a duplicate error; everything
/// else passes through as a store error.
pub(crate) fn map_unique(kind: &'static str, name: &str, err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some("23505") {
            return Error::duplicate(kind, name);
        }
    }
    Error::from(err)
}
