//! Stack persistence.
//!
//! Stacks are soft-deleted; every query here filters tombstones, and name
//! uniqueness is enforced by a partial unique index over live rows.
//! Rename and clone run in a single transaction because derived container
//! names must move with the stack name.

use super::children::{self, INSTANCE_TABLES};
use super::{map_unique, Store};
use crate::error::{Error, Result};
use crate::model::Stack;
use crate::naming;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tracing::info;

/// Input for creating a stack
#[derive(Debug, Clone)]
pub struct NewStack {
    /// Unique stack name
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Explicit network name; `None` derives the default
    pub network_name: Option<String>,
    /// Whether instance start/restart is allowed
    pub enabled: bool,
}

/// Update of a stack's mutable fields (name changes go through rename)
#[derive(Debug, Clone)]
pub struct StackUpdate {
    /// Free-form description
    pub description: String,
    /// Explicit network name; `None` derives the default
    pub network_name: Option<String>,
    /// Whether instance start/restart is allowed
    pub enabled: bool,
}

/// One desired instance as the planner consumes it
#[derive(Debug, Clone, FromRow)]
pub struct DesiredRow {
    /// Instance id within the stack
    pub instance_id: String,
    /// Backing template name
    pub template_name: String,
    /// Derived container name
    pub container_name: String,
    /// Whether the instance should be running
    pub enabled: bool,
}

const STACK_COLUMNS: &str =
    "id, name, description, network_name, enabled, created_at, updated_at, deleted_at";

impl Store {
    /// Create a stack
    pub async fn create_stack(&self, new: &NewStack) -> Result<Stack> {
        naming::validate_name(&new.name)?;

        let stack: Stack = sqlx::query_as(&format!(
            "INSERT INTO stacks (name, description, network_name, enabled) \
             VALUES ($1, $2, $3, $4) RETURNING {STACK_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.network_name)
        .bind(new.enabled)
        .fetch_one(self.pool())
        .await
        .map_err(|e| map_unique("stack", &new.name, e))?;

        info!(stack = %new.name, id = stack.id, "created stack");
        Ok(stack)
    }

    /// List live stacks
    pub async fn list_stacks(&self) -> Result<Vec<Stack>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {STACK_COLUMNS} FROM stacks WHERE deleted_at IS NULL ORDER BY name"
        ))
        .fetch_all(self.pool())
        .await?)
    }

    /// Fetch a live stack by name
    pub async fn get_stack(&self, name: &str) -> Result<Stack> {
        sqlx::query_as(&format!(
            "SELECT {STACK_COLUMNS} FROM stacks WHERE name = $1 AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("stack", name))
    }

    /// Fetch a live stack by id
    pub async fn get_stack_by_id(&self, id: i64) -> Result<Stack> {
        sqlx::query_as(&format!(
            "SELECT {STACK_COLUMNS} FROM stacks WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("stack", id.to_string()))
    }

    /// Update a stack's mutable fields
    pub async fn update_stack(&self, name: &str, update: &StackUpdate) -> Result<Stack> {
        sqlx::query_as(&format!(
            "UPDATE stacks SET description = $2, network_name = $3, enabled = $4 \
             WHERE name = $1 AND deleted_at IS NULL RETURNING {STACK_COLUMNS}"
        ))
        .bind(name)
        .bind(&update.description)
        .bind(&update.network_name)
        .bind(update.enabled)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("stack", name))
    }

    /// Enable or disable a stack
    pub async fn set_stack_enabled(&self, name: &str, enabled: bool) -> Result<Stack> {
        sqlx::query_as(&format!(
            "UPDATE stacks SET enabled = $2 WHERE name = $1 AND deleted_at IS NULL \
             RETURNING {STACK_COLUMNS}"
        ))
        .bind(name)
        .bind(enabled)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("stack", name))
    }

    /// Rename a stack, recomputing every owned container name.
    ///
    /// Fails if any derived name would exceed the runtime limit; nothing
    /// is changed in that case.
    pub async fn rename_stack(&self, name: &str, new_name: &str) -> Result<Stack> {
        naming::validate_name(new_name)?;

        let mut tx = self.pool().begin().await?;
        let stack: Stack = sqlx::query_as(&format!(
            "SELECT {STACK_COLUMNS} FROM stacks WHERE name = $1 AND deleted_at IS NULL FOR UPDATE"
        ))
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found("stack", name))?;

        let instance_ids: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, instance_id FROM service_instances \
             WHERE stack_id = $1 AND deleted_at IS NULL",
        )
        .bind(stack.id)
        .fetch_all(&mut *tx)
        .await?;

        // Derive every new container name before touching anything.
        let mut renames = Vec::with_capacity(instance_ids.len());
        for (row_id, instance_id) in &instance_ids {
            renames.push((*row_id, naming::container_name(new_name, instance_id)?));
        }

        let renamed: Stack = sqlx::query_as(&format!(
            "UPDATE stacks SET name = $2 WHERE id = $1 RETURNING {STACK_COLUMNS}"
        ))
        .bind(stack.id)
        .bind(new_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique("stack", new_name, e))?;

        for (row_id, container_name) in &renames {
            sqlx::query("UPDATE service_instances SET container_name = $2 WHERE id = $1")
                .bind(row_id)
                .bind(container_name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(from = name, to = new_name, "renamed stack");
        Ok(renamed)
    }

    /// Deep-copy a stack: instances and all their override rows
    pub async fn clone_stack(&self, name: &str, new_name: &str) -> Result<Stack> {
        naming::validate_name(new_name)?;

        let mut tx = self.pool().begin().await?;
        let source: Stack = sqlx::query_as(&format!(
            "SELECT {STACK_COLUMNS} FROM stacks WHERE name = $1 AND deleted_at IS NULL"
        ))
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::not_found("stack", name))?;

        let clone: Stack = sqlx::query_as(&format!(
            "INSERT INTO stacks (name, description, network_name, enabled) \
             VALUES ($1, $2, NULL, $3) RETURNING {STACK_COLUMNS}"
        ))
        .bind(new_name)
        .bind(&source.description)
        .bind(source.enabled)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique("stack", new_name, e))?;

        let instances: Vec<(i64, String, i64, String, bool)> = sqlx::query_as(
            "SELECT id, instance_id, template_service_id, description, enabled \
             FROM service_instances WHERE stack_id = $1 AND deleted_at IS NULL",
        )
        .bind(source.id)
        .fetch_all(&mut *tx)
        .await?;

        for (src_row_id, instance_id, template_id, description, enabled) in &instances {
            let container_name = naming::container_name(new_name, instance_id)?;
            let new_row_id: i64 = sqlx::query_scalar(
                "INSERT INTO service_instances \
                 (stack_id, instance_id, template_service_id, container_name, description, enabled) \
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
            )
            .bind(clone.id)
            .bind(instance_id)
            .bind(template_id)
            .bind(&container_name)
            .bind(description)
            .bind(enabled)
            .fetch_one(&mut *tx)
            .await?;

            children::copy_children(&mut tx, INSTANCE_TABLES, *src_row_id, new_row_id).await?;
        }
        tx.commit().await?;

        info!(from = name, to = new_name, instances = instances.len(), "cloned stack");
        Ok(clone)
    }

    /// Soft-delete a stack and its instances
    pub async fn delete_stack(&self, name: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let stack_id: Option<i64> = sqlx::query_scalar(
            "UPDATE stacks SET deleted_at = now() \
             WHERE name = $1 AND deleted_at IS NULL RETURNING id",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;
        let stack_id = stack_id.ok_or_else(|| Error::not_found("stack", name))?;

        sqlx::query(
            "UPDATE service_instances SET deleted_at = now() \
             WHERE stack_id = $1 AND deleted_at IS NULL",
        )
        .bind(stack_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!(stack = name, "soft-deleted stack");
        Ok(())
    }

    /// Load the timestamps the plan token hashes: the stack's
    /// `updated_at` and every live instance's, keyed by instance id
    pub async fn stack_timestamps(
        &self,
        stack_id: i64,
    ) -> Result<(DateTime<Utc>, Vec<(String, DateTime<Utc>)>)> {
        let stack_ts: DateTime<Utc> = sqlx::query_scalar(
            "SELECT updated_at FROM stacks WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(stack_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("stack", stack_id.to_string()))?;

        let instance_ts: Vec<(String, DateTime<Utc>)> = sqlx::query_as(
            "SELECT instance_id, updated_at FROM service_instances \
             WHERE stack_id = $1 AND deleted_at IS NULL ORDER BY instance_id",
        )
        .bind(stack_id)
        .fetch_all(self.pool())
        .await?;

        Ok((stack_ts, instance_ts))
    }

    /// Load the desired set the planner diffs against observation
    pub async fn desired_instances(&self, stack_id: i64) -> Result<Vec<DesiredRow>> {
        Ok(sqlx::query_as(
            "SELECT si.instance_id, s.name AS template_name, si.container_name, si.enabled \
             FROM service_instances si JOIN services s ON s.id = si.template_service_id \
             WHERE si.stack_id = $1 AND si.deleted_at IS NULL ORDER BY si.instance_id",
        )
        .bind(stack_id)
        .fetch_all(self.pool())
        .await?)
    }
}
