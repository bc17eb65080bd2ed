//! Template persistence.

use super::children::{self, TEMPLATE_TABLES};
use super::{map_unique, Store};
use crate::error::{Error, Result};
use crate::model::{ServiceChildren, ServiceTemplate, TemplateDetail};
use crate::naming;
use tracing::info;

/// Input for creating a template
#[derive(Debug, Clone)]
pub struct NewTemplate {
    /// Unique template name
    pub name: String,
    /// Image repository
    pub image: String,
    /// Image tag
    pub tag: String,
    /// Compose restart policy
    pub restart_policy: String,
    /// Optional command override
    pub command: Option<String>,
    /// Optional user spec
    pub user_spec: Option<String>,
    /// Whether instances may be started
    pub enabled: bool,
    /// Initial child collections
    pub children: ServiceChildren,
}

/// Full-field template update (PUT semantics)
#[derive(Debug, Clone)]
pub struct TemplateUpdate {
    /// Image repository
    pub image: String,
    /// Image tag
    pub tag: String,
    /// Compose restart policy
    pub restart_policy: String,
    /// Optional command override
    pub command: Option<String>,
    /// Optional user spec
    pub user_spec: Option<String>,
    /// Whether instances may be started
    pub enabled: bool,
}

const TEMPLATE_COLUMNS: &str =
    "id, name, image, tag, restart_policy, command, user_spec, enabled, created_at, updated_at";

impl Store {
    /// Create a template with its child collections
    pub async fn create_template(&self, new: &NewTemplate) -> Result<TemplateDetail> {
        naming::validate_name(&new.name)?;
        children::validate_children(&new.children)?;

        let mut tx = self.pool().begin().await?;
        let template: ServiceTemplate = sqlx::query_as(&format!(
            "INSERT INTO services (name, image, tag, restart_policy, command, user_spec, enabled) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {TEMPLATE_COLUMNS}"
        ))
        .bind(&new.name)
        .bind(&new.image)
        .bind(&new.tag)
        .bind(&new.restart_policy)
        .bind(&new.command)
        .bind(&new.user_spec)
        .bind(new.enabled)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique("template", &new.name, e))?;

        children::insert_children(&mut tx, TEMPLATE_TABLES, template.id, &new.children).await?;
        tx.commit().await?;

        info!(template = %new.name, id = template.id, "created template");
        Ok(TemplateDetail {
            template,
            children: new.children.clone(),
        })
    }

    /// Fetch a template with children by id
    pub async fn get_template(&self, id: i64) -> Result<TemplateDetail> {
        let template: ServiceTemplate =
            sqlx::query_as(&format!("SELECT {TEMPLATE_COLUMNS} FROM services WHERE id = $1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?
                .ok_or_else(|| Error::not_found("template", id.to_string()))?;

        let children = children::load_children(self.pool(), TEMPLATE_TABLES, id).await?;
        Ok(TemplateDetail { template, children })
    }

    /// Fetch a template with children by name
    pub async fn get_template_by_name(&self, name: &str) -> Result<TemplateDetail> {
        let template: ServiceTemplate =
            sqlx::query_as(&format!("SELECT {TEMPLATE_COLUMNS} FROM services WHERE name = $1"))
                .bind(name)
                .fetch_optional(self.pool())
                .await?
                .ok_or_else(|| Error::not_found("template", name))?;

        let children =
            children::load_children(self.pool(), TEMPLATE_TABLES, template.id).await?;
        Ok(TemplateDetail { template, children })
    }

    /// List all templates (rows only, no children)
    pub async fn list_templates(&self) -> Result<Vec<ServiceTemplate>> {
        Ok(
            sqlx::query_as(&format!("SELECT {TEMPLATE_COLUMNS} FROM services ORDER BY name"))
                .fetch_all(self.pool())
                .await?,
        )
    }

    /// Update a template's scalar fields
    pub async fn update_template(&self, id: i64, update: &TemplateUpdate) -> Result<TemplateDetail> {
        let template: ServiceTemplate = sqlx::query_as(&format!(
            "UPDATE services SET image = $2, tag = $3, restart_policy = $4, command = $5, \
             user_spec = $6, enabled = $7 WHERE id = $1 RETURNING {TEMPLATE_COLUMNS}"
        ))
        .bind(id)
        .bind(&update.image)
        .bind(&update.tag)
        .bind(&update.restart_policy)
        .bind(&update.command)
        .bind(&update.user_spec)
        .bind(update.enabled)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| Error::not_found("template", id.to_string()))?;

        let children = children::load_children(self.pool(), TEMPLATE_TABLES, id).await?;
        Ok(TemplateDetail { template, children })
    }

    /// Replace a template's child collections wholesale
    pub async fn replace_template_children(
        &self,
        id: i64,
        new_children: &ServiceChildren,
    ) -> Result<TemplateDetail> {
        children::validate_children(new_children)?;

        let mut tx = self.pool().begin().await?;
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM services WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(Error::not_found("template", id.to_string()));
        }

        children::delete_children(&mut tx, TEMPLATE_TABLES, id).await?;
        children::insert_children(&mut tx, TEMPLATE_TABLES, id, new_children).await?;
        tx.commit().await?;

        self.get_template(id).await
    }

    /// Delete a template. Fails while any live instance references it.
    pub async fn delete_template(&self, id: i64) -> Result<()> {
        let references: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM service_instances \
             WHERE template_service_id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_one(self.pool())
        .await?;
        if references > 0 {
            return Err(Error::validation(format!(
                "template {id} is referenced by {references} instance(s)"
            )));
        }

        let mut tx = self.pool().begin().await?;
        children::delete_children(&mut tx, TEMPLATE_TABLES, id).await?;
        let result = sqlx::query("DELETE FROM services WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("template", id.to_string()));
        }
        tx.commit().await?;

        info!(id, "deleted template");
        Ok(())
    }
}
