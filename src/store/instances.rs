//! Instance and override persistence.
//!
//! Override writes replace one field group at a time, matching the API's
//! per-group PUT surface. Every write lands in a transaction; triggers
//! bump the instance's and the owning stack's `updated_at`, which is what
//! makes the plan token change.

use super::children::{self, validate_children, INSTANCE_TABLES};
use super::{map_unique, Store};
use crate::error::{Error, Result};
use crate::model::{
    ConfigFile, Dependency, DomainRule, EnvVar, Healthcheck, InstanceDetail, LabelPair,
    PortMapping, ServiceChildren, ServiceInstance, VolumeMapping,
};
use crate::naming;
use tracing::info;

/// Input for creating an instance
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// Instance id within the stack
    pub instance_id: String,
    /// Backing template
    pub template_service_id: i64,
    /// Free-form description
    pub description: String,
    /// Whether the instance should be running
    pub enabled: bool,
}

/// Update of an instance's mutable fields
#[derive(Debug, Clone)]
pub struct InstanceUpdate {
    /// Free-form description
    pub description: String,
    /// Whether the instance should be running
    pub enabled: bool,
}

/// One override field group, as replaced by a per-group PUT
#[derive(Debug, Clone)]
pub enum OverrideGroup {
    /// Replace the port set
    Ports(Vec<PortMapping>),
    /// Replace the volume set
    Volumes(Vec<VolumeMapping>),
    /// Replace the env-var set
    EnvVars(Vec<EnvVar>),
    /// Replace the label set
    Labels(Vec<LabelPair>),
    /// Replace the domain set
    Domains(Vec<DomainRule>),
    /// Replace the dependency set
    Dependencies(Vec<Dependency>),
    /// Replace or clear the healthcheck
    Healthcheck(Option<Healthcheck>),
    /// Replace the config-file set
    ConfigFiles(Vec<ConfigFile>),
}

const INSTANCE_COLUMNS: &str = "id, stack_id, instance_id, template_service_id, container_name, \
                                description, enabled, created_at, updated_at, deleted_at";

impl Store {
    /// Create an instance inside a stack
    pub async fn create_instance(
        &self,
        stack_name: &str,
        new: &NewInstance,
    ) -> Result<InstanceDetail> {
        let container_name = naming::container_name(stack_name, &new.instance_id)?;
        let stack = self.get_stack(stack_name).await?;

        // Weak reference check: the template must exist up front so the
        // error is a clean not-found rather than an FK violation.
        let template_exists: Option<i64> =
            sqlx::query_scalar("SELECT id FROM services WHERE id = $1")
                .bind(new.template_service_id)
                .fetch_optional(self.pool())
                .await?;
        if template_exists.is_none() {
            return Err(Error::not_found(
                "template",
                new.template_service_id.to_string(),
            ));
        }

        let instance: ServiceInstance = sqlx::query_as(&format!(
            "INSERT INTO service_instances \
             (stack_id, instance_id, template_service_id, container_name, description, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(stack.id)
        .bind(&new.instance_id)
        .bind(new.template_service_id)
        .bind(&container_name)
        .bind(&new.description)
        .bind(new.enabled)
        .fetch_one(self.pool())
        .await
        .map_err(|e| map_unique("instance", &new.instance_id, e))?;

        info!(stack = stack_name, instance = %new.instance_id, "created instance");
        Ok(InstanceDetail {
            instance,
            overrides: ServiceChildren::default(),
        })
    }

    /// List a stack's live instances
    pub async fn list_instances(&self, stack_id: i64) -> Result<Vec<ServiceInstance>> {
        Ok(sqlx::query_as(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM service_instances \
             WHERE stack_id = $1 AND deleted_at IS NULL ORDER BY instance_id"
        ))
        .bind(stack_id)
        .fetch_all(self.pool())
        .await?)
    }

    /// Fetch a live instance row
    pub async fn get_instance_row(
        &self,
        stack_id: i64,
        instance_id: &str,
    ) -> Result<ServiceInstance> {
        sqlx::query_as(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM service_instances \
             WHERE stack_id = $1 AND instance_id = $2 AND deleted_at IS NULL"
        ))
        .bind(stack_id)
        .bind(instance_id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("instance", instance_id))
    }

    /// Fetch a live instance with its override rows
    pub async fn get_instance(&self, stack_id: i64, instance_id: &str) -> Result<InstanceDetail> {
        let instance = self.get_instance_row(stack_id, instance_id).await?;
        let overrides =
            children::load_children(self.pool(), INSTANCE_TABLES, instance.id).await?;
        Ok(InstanceDetail {
            instance,
            overrides,
        })
    }

    /// Update an instance's mutable fields
    pub async fn update_instance(
        &self,
        stack_id: i64,
        instance_id: &str,
        update: &InstanceUpdate,
    ) -> Result<ServiceInstance> {
        sqlx::query_as(&format!(
            "UPDATE service_instances SET description = $3, enabled = $4 \
             WHERE stack_id = $1 AND instance_id = $2 AND deleted_at IS NULL \
             RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(stack_id)
        .bind(instance_id)
        .bind(&update.description)
        .bind(update.enabled)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("instance", instance_id))
    }

    /// Rename an instance, recomputing its container name
    pub async fn rename_instance(
        &self,
        stack_name: &str,
        stack_id: i64,
        instance_id: &str,
        new_instance_id: &str,
    ) -> Result<ServiceInstance> {
        let container_name = naming::container_name(stack_name, new_instance_id)?;

        sqlx::query_as(&format!(
            "UPDATE service_instances SET instance_id = $3, container_name = $4 \
             WHERE stack_id = $1 AND instance_id = $2 AND deleted_at IS NULL \
             RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(stack_id)
        .bind(instance_id)
        .bind(new_instance_id)
        .bind(&container_name)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_unique("instance", new_instance_id, e))?
        .ok_or_else(|| Error::not_found("instance", instance_id))
    }

    /// Duplicate an instance inside its stack, copying every override row
    pub async fn duplicate_instance(
        &self,
        stack_name: &str,
        stack_id: i64,
        instance_id: &str,
        new_instance_id: &str,
    ) -> Result<InstanceDetail> {
        let container_name = naming::container_name(stack_name, new_instance_id)?;
        let source = self.get_instance_row(stack_id, instance_id).await?;

        let mut tx = self.pool().begin().await?;
        let copy: ServiceInstance = sqlx::query_as(&format!(
            "INSERT INTO service_instances \
             (stack_id, instance_id, template_service_id, container_name, description, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {INSTANCE_COLUMNS}"
        ))
        .bind(stack_id)
        .bind(new_instance_id)
        .bind(source.template_service_id)
        .bind(&container_name)
        .bind(&source.description)
        .bind(source.enabled)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique("instance", new_instance_id, e))?;

        children::copy_children(&mut tx, INSTANCE_TABLES, source.id, copy.id).await?;
        tx.commit().await?;

        info!(stack = stack_name, from = instance_id, to = new_instance_id, "duplicated instance");
        self.get_instance(stack_id, new_instance_id).await
    }

    /// Soft-delete an instance
    pub async fn delete_instance(&self, stack_id: i64, instance_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE service_instances SET deleted_at = now() \
             WHERE stack_id = $1 AND instance_id = $2 AND deleted_at IS NULL",
        )
        .bind(stack_id)
        .bind(instance_id)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("instance", instance_id));
        }
        info!(instance = instance_id, "soft-deleted instance");
        Ok(())
    }

    /// Replace one override field group for an instance.
    ///
    /// The new rows fully replace the group; an empty set restores
    /// template inheritance for replace-if-present groups.
    pub async fn replace_override_group(
        &self,
        stack_id: i64,
        instance_id: &str,
        group: OverrideGroup,
    ) -> Result<InstanceDetail> {
        let staged = group.as_children();
        validate_children(&staged)?;

        let instance = self.get_instance_row(stack_id, instance_id).await?;
        let mut tx = self.pool().begin().await?;
        let t = INSTANCE_TABLES;
        let table = match &group {
            OverrideGroup::Ports(_) => t.ports,
            OverrideGroup::Volumes(_) => t.volumes,
            OverrideGroup::EnvVars(_) => t.env_vars,
            OverrideGroup::Labels(_) => t.labels,
            OverrideGroup::Domains(_) => t.domains,
            OverrideGroup::Dependencies(_) => t.dependencies,
            OverrideGroup::Healthcheck(_) => t.healthcheck,
            OverrideGroup::ConfigFiles(_) => t.config_files,
        };
        sqlx::query(&format!("DELETE FROM {table} WHERE {} = $1", t.key))
            .bind(instance.id)
            .execute(&mut *tx)
            .await?;
        children::insert_children(&mut tx, t, instance.id, &staged).await?;
        tx.commit().await?;

        self.get_instance(stack_id, instance_id).await
    }

    /// Fetch one config-file override by path
    pub async fn get_config_file(
        &self,
        stack_id: i64,
        instance_id: &str,
        file_path: &str,
    ) -> Result<ConfigFile> {
        let instance = self.get_instance_row(stack_id, instance_id).await?;
        sqlx::query_as(
            "SELECT file_path, content, mode, is_template FROM instance_config_files \
             WHERE instance_id = $1 AND file_path = $2",
        )
        .bind(instance.id)
        .bind(file_path)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("config file", file_path))
    }

    /// Create or update one config-file override (conflict-aware upsert)
    pub async fn put_config_file(
        &self,
        stack_id: i64,
        instance_id: &str,
        file: &ConfigFile,
    ) -> Result<ConfigFile> {
        crate::materialize::sanitize_file_path(&file.file_path)?;
        crate::materialize::parse_mode(&file.mode)?;

        let instance = self.get_instance_row(stack_id, instance_id).await?;
        Ok(sqlx::query_as(
            "INSERT INTO instance_config_files (instance_id, file_path, content, mode, is_template) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (instance_id, file_path) \
             DO UPDATE SET content = EXCLUDED.content, mode = EXCLUDED.mode, \
                           is_template = EXCLUDED.is_template \
             RETURNING file_path, content, mode, is_template",
        )
        .bind(instance.id)
        .bind(&file.file_path)
        .bind(&file.content)
        .bind(&file.mode)
        .bind(file.is_template)
        .fetch_one(self.pool())
        .await?)
    }

    /// Delete one config-file override by path
    pub async fn delete_config_file(
        &self,
        stack_id: i64,
        instance_id: &str,
        file_path: &str,
    ) -> Result<()> {
        let instance = self.get_instance_row(stack_id, instance_id).await?;
        let result = sqlx::query(
            "DELETE FROM instance_config_files WHERE instance_id = $1 AND file_path = $2",
        )
        .bind(instance.id)
        .bind(file_path)
        .execute(self.pool())
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("config file", file_path));
        }
        Ok(())
    }
}

impl OverrideGroup {
    /// Stage the group inside an otherwise-empty children set so the
    /// shared validation and insert helpers apply
    fn as_children(&self) -> ServiceChildren {
        let mut children = ServiceChildren::default();
        match self {
            Self::Ports(rows) => children.ports = rows.clone(),
            Self::Volumes(rows) => children.volumes = rows.clone(),
            Self::EnvVars(rows) => children.env_vars = rows.clone(),
            Self::Labels(rows) => children.labels = rows.clone(),
            Self::Domains(rows) => children.domains = rows.clone(),
            Self::Dependencies(rows) => children.dependencies = rows.clone(),
            Self::Healthcheck(row) => children.healthcheck = row.clone(),
            Self::ConfigFiles(rows) => children.config_files = rows.clone(),
        }
        children
    }
}
