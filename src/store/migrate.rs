//! Schema migration runner.
//!
//! Applies ordered `*.up.sql` files in lexicographic order, each inside
//! its own transaction, recording the version in `schema_migrations` on
//! success. `migrate_down` reverts the newest applied version from its
//! `*.down.sql` counterpart.

use crate::error::{Error, Result};
use sqlx::PgPool;
use std::path::Path;
use tracing::info;

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

async fn ensure_version_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations ( \
            version TEXT PRIMARY KEY, \
            applied_at TIMESTAMPTZ NOT NULL DEFAULT now() \
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn list_versions(dir: &Path, suffix: &str) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| Error::io(format!("read migrations dir {}", dir.display()), e))?;

    let mut versions = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io("read migrations dir entry", e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(version) = name.strip_suffix(suffix) {
            versions.push(version.to_string());
        }
    }
    versions.sort();
    Ok(versions)
}

/// Apply every pending `*.up.sql` migration. Returns the versions applied
/// this run, in order.
pub async fn migrate_up(pool: &PgPool, dir: &Path) -> Result<Vec<String>> {
    ensure_version_table(pool).await?;

    let applied: Vec<String> =
        sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version")
            .fetch_all(pool)
            .await?;

    let mut newly_applied = Vec::new();
    for version in list_versions(dir, UP_SUFFIX).await? {
        if applied.contains(&version) {
            continue;
        }
        let path = dir.join(format!("{version}{UP_SUFFIX}"));
        let sql = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::io(format!("read {}", path.display()), e))?;

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(&sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version) VALUES ($1)")
            .bind(&version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = %version, "applied migration");
        newly_applied.push(version);
    }
    Ok(newly_applied)
}

/// Revert the newest applied migration from its `*.down.sql` file.
/// Returns the reverted version, or `None` when nothing is applied.
pub async fn migrate_down(pool: &PgPool, dir: &Path) -> Result<Option<String>> {
    ensure_version_table(pool).await?;

    let newest: Option<String> =
        sqlx::query_scalar("SELECT version FROM schema_migrations ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    let Some(version) = newest else {
        return Ok(None);
    };

    let path = dir.join(format!("{version}{DOWN_SUFFIX}"));
    let sql = tokio::fs::read_to_string(&path)
        .await
        .map_err(|e| Error::io(format!("read {}", path.display()), e))?;

    let mut tx = pool.begin().await?;
    sqlx::raw_sql(&sql).execute(&mut *tx).await?;
    sqlx::query("DELETE FROM schema_migrations WHERE version = $1")
        .bind(&version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(version = %version, "reverted migration");
    Ok(Some(version))
}
