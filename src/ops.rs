//! Control-plane operations: plan, apply, and single-instance lifecycle.
//!
//! [`ControlPlane`] ties the store, the resolver, the generator, the
//! materializer, and the runtime adapter together. Planning is read-only;
//! apply runs under the per-stack advisory lock and revalidates the plan
//! token before touching the runtime.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::generate::{self, PathRewrite, ResolvedService};
use crate::materialize::{self, InstanceFiles};
use crate::model::Stack;
use crate::naming;
use crate::plan::{self, DesiredInstance, StackPlan};
use crate::resolver::{self, EffectiveConfig};
use crate::runtime::Runtime;
use crate::store::Store;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use tracing::{info, warn};

/// Result of a successful apply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Always `"applied"` on success
    pub status: String,
    /// Runtime output from `compose up`
    pub output: String,
}

/// What deleting a stack would touch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletePreview {
    /// Stack name
    pub stack: String,
    /// Live instance ids that would be tombstoned
    pub instances: Vec<String>,
    /// Containers currently carrying the stack's identity label
    pub containers: Vec<String>,
}

/// The assembled control plane
#[derive(Debug, Clone)]
pub struct ControlPlane {
    store: Store,
    runtime: Runtime,
    settings: Settings,
}

impl ControlPlane {
    /// Assemble the control plane from its collaborators
    #[must_use]
    pub fn new(store: Store, runtime: Runtime, settings: Settings) -> Self {
        Self {
            store,
            runtime,
            settings,
        }
    }

    /// The underlying store, for the CRUD surface
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Compose project name for a stack
    #[must_use]
    pub fn project_name(stack: &str) -> String {
        format!("devarch-{stack}")
    }

    fn stack_filters(stack: &str) -> Vec<(String, String)> {
        vec![
            (
                naming::LABEL_MANAGED_BY.to_string(),
                naming::MANAGED_BY_VALUE.to_string(),
            ),
            (naming::LABEL_STACK_ID.to_string(), stack.to_string()),
        ]
    }

    fn path_rewrite(&self) -> Option<PathRewrite> {
        self.settings.host_project_root.as_ref().map(|host| PathRewrite {
            from: self.settings.project_root.clone(),
            to: host.clone(),
        })
    }

    /// Resolve one instance's effective configuration
    pub async fn effective_config(
        &self,
        stack_name: &str,
        instance_id: &str,
    ) -> Result<EffectiveConfig> {
        let stack = self.store.get_stack(stack_name).await?;
        let detail = self.store.get_instance(stack.id, instance_id).await?;
        let template = self.load_template_for(&detail.instance).await?;
        Ok(resolver::resolve(
            &stack.name,
            &template,
            &detail.instance,
            &detail.overrides,
        ))
    }

    /// Render the stack's Compose manifest without touching the runtime
    pub async fn compose_preview(&self, stack_name: &str) -> Result<(String, Vec<String>)> {
        let stack = self.store.get_stack(stack_name).await?;
        let resolved = self.resolved_services(&stack, None).await?;
        generate::generate(
            &stack.name,
            &stack.network(),
            &resolved,
            self.path_rewrite().as_ref(),
        )
    }

    /// Compute a plan for a stack: changes, token, and warnings.
    ///
    /// An unreachable runtime degrades to an empty observed set with a
    /// warning; the plan is still useful.
    pub async fn plan_stack(&self, stack_name: &str) -> Result<StackPlan> {
        let stack = self.store.get_stack(stack_name).await?;
        let desired: Vec<DesiredInstance> = self
            .store
            .desired_instances(stack.id)
            .await?
            .into_iter()
            .map(|row| DesiredInstance {
                instance_id: row.instance_id,
                template_name: row.template_name,
                container_name: row.container_name,
                enabled: row.enabled,
            })
            .collect();

        let mut warnings = Vec::new();
        let observed = match self
            .runtime
            .list_containers_by_label(&Self::stack_filters(&stack.name), false)
            .await
        {
            Ok(names) => names,
            Err(e) => {
                warn!(stack = %stack.name, error = %e, "runtime unreachable at plan time");
                warnings.push(format!(
                    "runtime unreachable, observed set treated as empty: {e}"
                ));
                Vec::new()
            }
        };

        let changes = plan::plan(&desired, &observed);
        let (stack_ts, instance_ts) = self.store.stack_timestamps(stack.id).await?;
        Ok(StackPlan {
            changes,
            token: plan::plan_token(stack_ts, &instance_ts),
            generated_at: Utc::now(),
            warnings,
        })
    }

    /// Apply a stack under its exclusive lock.
    ///
    /// `token` must match a token from a plan taken after the last change
    /// to the stack; anything else is a stale-plan conflict.
    pub async fn apply_stack(&self, stack_name: &str, token: &str) -> Result<ApplyOutcome> {
        let stack = self.store.get_stack(stack_name).await?;

        let Some(lock) = self.store.try_lock_stack(stack.id).await? else {
            return Err(Error::concurrent_apply(&stack.name));
        };

        let result = self.apply_locked(&stack, token).await;
        if let Err(e) = lock.release().await {
            warn!(stack = %stack.name, error = %e, "failed to release apply lock");
        }
        result
    }

    async fn apply_locked(&self, stack: &Stack, token: &str) -> Result<ApplyOutcome> {
        // Revalidate inside the lock so no competing apply can slip a
        // change between check and use.
        let (stack_ts, instance_ts) = self.store.stack_timestamps(stack.id).await?;
        if plan::plan_token(stack_ts, &instance_ts) != token {
            return Err(Error::stale_plan(&stack.name));
        }

        self.runtime
            .create_network(&stack.network(), &stack_labels(&stack.name))
            .await?;

        let resolved = self.resolved_services(stack, None).await?;

        let result = self.materialize_and_up(stack, &resolved).await;
        if result.is_err() {
            if let Err(cleanup) =
                materialize::remove_stack_dir(&self.settings.stacks_root(), &stack.name).await
            {
                warn!(stack = %stack.name, error = %cleanup, "failed to clean up config tree");
            }
        }
        result
    }

    async fn materialize_and_up(
        &self,
        stack: &Stack,
        resolved: &[ResolvedService],
    ) -> Result<ApplyOutcome> {
        let files: Vec<InstanceFiles> = resolved
            .iter()
            .filter(|svc| !svc.config.config_files.is_empty())
            .map(|svc| InstanceFiles {
                instance_id: svc.instance_id.clone(),
                files: svc.config.config_files.clone(),
            })
            .collect();
        materialize::materialize_stack(&self.settings.stacks_root(), &stack.name, &files).await?;

        let (yaml, gen_warnings) = generate::generate(
            &stack.name,
            &stack.network(),
            resolved,
            self.path_rewrite().as_ref(),
        )?;
        for warning in &gen_warnings {
            warn!(stack = %stack.name, "{warning}");
        }

        let manifest = stage_manifest(&yaml)?;
        let project = Self::project_name(&stack.name);
        let output = self
            .runtime
            .run_compose(
                manifest.path(),
                &["--project-name", project.as_str(), "up", "-d"],
            )
            .await?;

        self.converge_stragglers(stack).await?;

        info!(stack = %stack.name, "applied stack");
        Ok(ApplyOutcome {
            status: "applied".to_string(),
            output,
        })
    }

    /// Post-up convergence: stop containers of disabled instances, and
    /// stop + remove containers carrying the stack label that no instance
    /// accounts for. `compose up` alone leaves both behind.
    async fn converge_stragglers(&self, stack: &Stack) -> Result<()> {
        let desired = self.store.desired_instances(stack.id).await?;
        let desired_names: BTreeSet<&str> =
            desired.iter().map(|d| d.container_name.as_str()).collect();
        let disabled_names: BTreeSet<&str> = desired
            .iter()
            .filter(|d| !d.enabled)
            .map(|d| d.container_name.as_str())
            .collect();

        let filters = Self::stack_filters(&stack.name);
        let running = self.runtime.list_containers_by_label(&filters, false).await?;
        for name in &running {
            if disabled_names.contains(name.as_str()) {
                info!(container = %name, "stopping disabled instance");
                self.runtime.stop_container(name).await?;
            }
        }

        let all = self.runtime.list_containers_by_label(&filters, true).await?;
        for name in &all {
            if !desired_names.contains(name.as_str()) {
                info!(container = %name, "removing orphan container");
                if running.contains(name) {
                    self.runtime.stop_container(name).await?;
                }
                self.runtime.remove_container(name).await?;
            }
        }
        Ok(())
    }

    /// Start one instance, bypassing planning. Refused while the stack is
    /// disabled.
    pub async fn start_instance(&self, stack_name: &str, instance_id: &str) -> Result<String> {
        let stack = self.store.get_stack(stack_name).await?;
        if !stack.enabled {
            return Err(Error::validation(format!(
                "stack '{stack_name}' is disabled; enable it before starting instances"
            )));
        }
        self.compose_service_op(&stack, instance_id, ServiceOp::Start)
            .await
    }

    /// Stop one instance. Allowed regardless of stack enablement.
    pub async fn stop_instance(&self, stack_name: &str, instance_id: &str) -> Result<String> {
        let stack = self.store.get_stack(stack_name).await?;
        self.compose_service_op(&stack, instance_id, ServiceOp::Stop)
            .await
    }

    /// Restart one instance. Refused while the stack is disabled.
    pub async fn restart_instance(&self, stack_name: &str, instance_id: &str) -> Result<String> {
        let stack = self.store.get_stack(stack_name).await?;
        if !stack.enabled {
            return Err(Error::validation(format!(
                "stack '{stack_name}' is disabled; enable it before restarting instances"
            )));
        }
        self.compose_service_op(&stack, instance_id, ServiceOp::Restart)
            .await
    }

    async fn compose_service_op(
        &self,
        stack: &Stack,
        instance_id: &str,
        op: ServiceOp,
    ) -> Result<String> {
        // The manifest is scoped to the enabled set plus the target, so
        // an explicitly started instance is present even while disabled.
        let resolved = self.resolved_services(stack, Some(instance_id)).await?;
        if !resolved.iter().any(|svc| svc.instance_id == instance_id) {
            return Err(Error::not_found("instance", instance_id));
        }

        let (yaml, _) = generate::generate(
            &stack.name,
            &stack.network(),
            &resolved,
            self.path_rewrite().as_ref(),
        )?;
        let project = Self::project_name(&stack.name);

        match op {
            ServiceOp::Start => {
                self.runtime
                    .create_network(&stack.network(), &stack_labels(&stack.name))
                    .await?;
                self.runtime
                    .start_compose_service(&project, &yaml, instance_id)
                    .await
            }
            ServiceOp::Stop => {
                self.runtime
                    .stop_compose_service(&project, &yaml, instance_id)
                    .await
            }
            ServiceOp::Restart => {
                self.runtime
                    .restart_compose_service(&project, &yaml, instance_id)
                    .await
            }
        }
    }

    /// What deleting the stack would touch
    pub async fn delete_preview(&self, stack_name: &str) -> Result<DeletePreview> {
        let stack = self.store.get_stack(stack_name).await?;
        let instances = self
            .store
            .list_instances(stack.id)
            .await?
            .into_iter()
            .map(|i| i.instance_id)
            .collect();
        let containers = self
            .runtime
            .list_containers_by_label(&Self::stack_filters(&stack.name), true)
            .await
            .unwrap_or_default();
        Ok(DeletePreview {
            stack: stack.name,
            instances,
            containers,
        })
    }

    /// Load, resolve, and collect the stack's services for generation.
    ///
    /// Enabled instances only, unless `include` names a disabled instance
    /// to pull in (single-instance lifecycle).
    async fn resolved_services(
        &self,
        stack: &Stack,
        include: Option<&str>,
    ) -> Result<Vec<ResolvedService>> {
        let instances = self.store.list_instances(stack.id).await?;
        let mut resolved = Vec::new();
        for instance in instances {
            if !instance.enabled && include != Some(instance.instance_id.as_str()) {
                continue;
            }
            let detail = self.store.get_instance(stack.id, &instance.instance_id).await?;
            let template = self.load_template_for(&detail.instance).await?;
            let config = resolver::resolve(
                &stack.name,
                &template,
                &detail.instance,
                &detail.overrides,
            );
            resolved.push(ResolvedService {
                instance_id: detail.instance.instance_id,
                container_name: detail.instance.container_name,
                config,
            });
        }
        Ok(resolved)
    }

    /// Template references are weak: the row must still exist. Orphaned
    /// override rows cannot occur (foreign keys), so a missing template
    /// is the one dangling-reference case and surfaces as not-found.
    async fn load_template_for(
        &self,
        instance: &crate::model::ServiceInstance,
    ) -> Result<crate::model::TemplateDetail> {
        self.store.get_template(instance.template_service_id).await
    }
}

#[derive(Debug, Clone, Copy)]
enum ServiceOp {
    Start,
    Stop,
    Restart,
}

fn stack_labels(stack: &str) -> std::collections::BTreeMap<String, String> {
    let mut labels = std::collections::BTreeMap::new();
    labels.insert(
        naming::LABEL_MANAGED_BY.to_string(),
        naming::MANAGED_BY_VALUE.to_string(),
    );
    labels.insert(naming::LABEL_STACK_ID.to_string(), stack.to_string());
    labels
}

/// Write the manifest to a temp file for the compose invocation
fn stage_manifest(yaml: &str) -> Result<tempfile::NamedTempFile> {
    let mut manifest = tempfile::Builder::new()
        .prefix("devarch-apply-")
        .suffix(".yaml")
        .tempfile()
        .map_err(|e| Error::io("create manifest temp file", e))?;
    manifest
        .write_all(yaml.as_bytes())
        .map_err(|e| Error::io("write manifest temp file", e))?;
    manifest
        .flush()
        .map_err(|e| Error::io("flush manifest temp file", e))?;
    Ok(manifest)
}
