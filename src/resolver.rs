//! Effective-configuration resolver.
//!
//! Merges a service template with one instance's overrides into the
//! configuration the generator and materializer consume. Each field group
//! has its own merge policy:
//!
//! - scalars (`image`, `tag`, `restart_policy`, `command`, `user_spec`)
//!   come from the template verbatim
//! - `ports`, `volumes`, `domains`, `dependencies`: the instance set, when
//!   non-empty, replaces the template set wholesale
//! - `healthcheck`: the instance row wholly replaces the template row
//! - `env_vars`, `labels`, `config_files`: keyed union, instance wins on
//!   collision
//! - identity labels are appended last, only for keys not already present

use crate::model::{
    ConfigFile, Dependency, DomainRule, Healthcheck, PortMapping, ServiceChildren,
    ServiceInstance, TemplateDetail, VolumeMapping,
};
use crate::naming;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which field groups had an instance override applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridesApplied {
    /// Instance replaced the template's port set
    pub ports: bool,
    /// Instance replaced the template's volume set
    pub volumes: bool,
    /// Instance replaced the template's domain set
    pub domains: bool,
    /// Instance replaced the template's dependency set
    pub dependencies: bool,
    /// Instance replaced the template's healthcheck
    pub healthcheck: bool,
    /// Instance contributed or overrode environment variables
    pub env_vars: bool,
    /// Instance contributed or overrode labels
    pub labels: bool,
    /// Instance contributed or overrode config files
    pub config_files: bool,
}

/// The merged configuration for one instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    /// Backing template id
    pub template_id: i64,
    /// Image repository (from the template)
    pub image: String,
    /// Image tag (from the template)
    pub tag: String,
    /// Restart policy (from the template)
    pub restart_policy: String,
    /// Command override (from the template)
    pub command: Option<String>,
    /// User spec (from the template)
    pub user_spec: Option<String>,
    /// Effective port mappings
    pub ports: Vec<PortMapping>,
    /// Effective volume mappings
    pub volumes: Vec<VolumeMapping>,
    /// Effective domain rules
    pub domains: Vec<DomainRule>,
    /// Effective dependencies (instance ids within the same stack)
    pub dependencies: Vec<Dependency>,
    /// Effective healthcheck
    pub healthcheck: Option<Healthcheck>,
    /// Effective environment, sorted by key
    pub env_vars: BTreeMap<String, String>,
    /// Effective labels including the identity set, sorted by key
    pub labels: BTreeMap<String, String>,
    /// Effective config files, sorted by path
    pub config_files: Vec<ConfigFile>,
    /// Per-group override report
    pub overrides_applied: OverridesApplied,
}

impl EffectiveConfig {
    /// The full image reference, `<image>:<tag>`
    #[must_use]
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

/// Merge a template with an instance's overrides.
///
/// `stack_name` is needed to build the identity label set; the instance's
/// own `instance_id` and the template id supply the rest.
#[must_use]
pub fn resolve(
    stack_name: &str,
    template: &TemplateDetail,
    instance: &ServiceInstance,
    overrides: &ServiceChildren,
) -> EffectiveConfig {
    let t = &template.template;
    let tc = &template.children;
    let mut applied = OverridesApplied::default();

    let ports = replace_if_present(&tc.ports, &overrides.ports, &mut applied.ports);
    let volumes = replace_if_present(&tc.volumes, &overrides.volumes, &mut applied.volumes);
    let domains = replace_if_present(&tc.domains, &overrides.domains, &mut applied.domains);
    let dependencies =
        replace_if_present(&tc.dependencies, &overrides.dependencies, &mut applied.dependencies);

    let healthcheck = match &overrides.healthcheck {
        Some(hc) => {
            applied.healthcheck = true;
            Some(hc.clone())
        }
        None => tc.healthcheck.clone(),
    };

    let mut env_vars: BTreeMap<String, String> = tc
        .env_vars
        .iter()
        .map(|e| (e.key.clone(), e.value.clone()))
        .collect();
    if !overrides.env_vars.is_empty() {
        applied.env_vars = true;
        for e in &overrides.env_vars {
            env_vars.insert(e.key.clone(), e.value.clone());
        }
    }

    let mut labels: BTreeMap<String, String> = tc
        .labels
        .iter()
        .map(|l| (l.key.clone(), l.value.clone()))
        .collect();
    if !overrides.labels.is_empty() {
        applied.labels = true;
        for l in &overrides.labels {
            labels.insert(l.key.clone(), l.value.clone());
        }
    }
    // Identity labels go in last; user-written keys are never displaced.
    for (key, value) in naming::identity_labels(stack_name, &instance.instance_id, t.id) {
        labels.entry(key).or_insert(value);
    }

    let mut config_files: BTreeMap<String, ConfigFile> = tc
        .config_files
        .iter()
        .map(|f| (f.file_path.clone(), f.clone()))
        .collect();
    if !overrides.config_files.is_empty() {
        applied.config_files = true;
        for f in &overrides.config_files {
            config_files.insert(f.file_path.clone(), f.clone());
        }
    }

    EffectiveConfig {
        template_id: t.id,
        image: t.image.clone(),
        tag: t.tag.clone(),
        restart_policy: t.restart_policy.clone(),
        command: t.command.clone(),
        user_spec: t.user_spec.clone(),
        ports,
        volumes,
        domains,
        dependencies,
        healthcheck,
        env_vars,
        labels,
        config_files: config_files.into_values().collect(),
        overrides_applied: applied,
    }
}

fn replace_if_present<T: Clone>(template: &[T], instance: &[T], applied: &mut bool) -> Vec<T> {
    if instance.is_empty() {
        template.to_vec()
    } else {
        *applied = true;
        instance.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnvVar, LabelPair, ServiceTemplate};
    use chrono::Utc;

    fn template() -> TemplateDetail {
        TemplateDetail {
            template: ServiceTemplate {
                id: 7,
                name: "nginx".to_string(),
                image: "nginx".to_string(),
                tag: "1.27-alpine".to_string(),
                restart_policy: "unless-stopped".to_string(),
                command: None,
                user_spec: None,
                enabled: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            children: ServiceChildren {
                ports: vec![PortMapping {
                    host_ip: None,
                    host_port: 8080,
                    container_port: 80,
                    protocol: "tcp".to_string(),
                }],
                env_vars: vec![EnvVar {
                    key: "A".to_string(),
                    value: "1".to_string(),
                }],
                labels: vec![LabelPair {
                    key: "app.tier".to_string(),
                    value: "web".to_string(),
                }],
                ..Default::default()
            },
        }
    }

    fn instance() -> ServiceInstance {
        ServiceInstance {
            id: 1,
            stack_id: 1,
            instance_id: "app1".to_string(),
            template_service_id: 7,
            container_name: "web-app1".to_string(),
            description: String::new(),
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_scalars_inherited_verbatim() {
        let eff = resolve("web", &template(), &instance(), &ServiceChildren::default());
        assert_eq!(eff.image, "nginx");
        assert_eq!(eff.tag, "1.27-alpine");
        assert_eq!(eff.restart_policy, "unless-stopped");
        assert_eq!(eff.image_ref(), "nginx:1.27-alpine");
    }

    #[test]
    fn test_no_overrides_means_template_values() {
        let eff = resolve("web", &template(), &instance(), &ServiceChildren::default());
        assert_eq!(eff.ports.len(), 1);
        assert_eq!(eff.ports[0].host_port, 8080);
        assert_eq!(eff.overrides_applied, OverridesApplied::default());
    }

    #[test]
    fn test_ports_replace_if_present() {
        let overrides = ServiceChildren {
            ports: vec![PortMapping {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: 9090,
                container_port: 80,
                protocol: "tcp".to_string(),
            }],
            ..Default::default()
        };
        let eff = resolve("web", &template(), &instance(), &overrides);
        assert_eq!(eff.ports.len(), 1);
        assert_eq!(eff.ports[0].host_port, 9090);
        assert!(eff.overrides_applied.ports);
        assert!(!eff.overrides_applied.env_vars);
    }

    #[test]
    fn test_env_union_instance_wins() {
        let overrides = ServiceChildren {
            env_vars: vec![
                EnvVar {
                    key: "A".to_string(),
                    value: "2".to_string(),
                },
                EnvVar {
                    key: "B".to_string(),
                    value: "3".to_string(),
                },
            ],
            ..Default::default()
        };
        let eff = resolve("web", &template(), &instance(), &overrides);
        assert_eq!(eff.env_vars.get("A").unwrap(), "2");
        assert_eq!(eff.env_vars.get("B").unwrap(), "3");
        assert_eq!(eff.env_vars.len(), 2);
        assert!(eff.overrides_applied.env_vars);
    }

    #[test]
    fn test_identity_labels_injected() {
        let eff = resolve("web", &template(), &instance(), &ServiceChildren::default());
        assert_eq!(eff.labels.get("devarch.managed_by").unwrap(), "devarch");
        assert_eq!(eff.labels.get("devarch.stack_id").unwrap(), "web");
        assert_eq!(eff.labels.get("devarch.instance_id").unwrap(), "app1");
        assert_eq!(eff.labels.get("devarch.template_id").unwrap(), "7");
        // user label survives
        assert_eq!(eff.labels.get("app.tier").unwrap(), "web");
    }

    #[test]
    fn test_user_label_not_displaced_by_identity() {
        // Reservation makes this unreachable through the API, but the
        // resolver still preserves a pre-existing key.
        let overrides = ServiceChildren {
            labels: vec![LabelPair {
                key: "devarch.stack_id".to_string(),
                value: "spoofed".to_string(),
            }],
            ..Default::default()
        };
        let eff = resolve("web", &template(), &instance(), &overrides);
        assert_eq!(eff.labels.get("devarch.stack_id").unwrap(), "spoofed");
    }

    #[test]
    fn test_healthcheck_whole_row_replace() {
        let mut tpl = template();
        tpl.children.healthcheck = Some(Healthcheck {
            test: "curl -f http://localhost/".to_string(),
            interval: Some("10s".to_string()),
            timeout: Some("5s".to_string()),
            retries: Some(3),
            start_period: None,
        });

        let eff = resolve("web", &tpl, &instance(), &ServiceChildren::default());
        assert_eq!(eff.healthcheck.as_ref().unwrap().retries, Some(3));
        assert!(!eff.overrides_applied.healthcheck);

        let overrides = ServiceChildren {
            healthcheck: Some(Healthcheck {
                test: "wget -q -O /dev/null http://localhost/".to_string(),
                interval: None,
                timeout: None,
                retries: None,
                start_period: None,
            }),
            ..Default::default()
        };
        let eff = resolve("web", &tpl, &instance(), &overrides);
        let hc = eff.healthcheck.unwrap();
        assert!(hc.test.starts_with("wget"));
        // whole-row replace: template's interval is gone
        assert_eq!(hc.interval, None);
        assert!(eff.overrides_applied.healthcheck);
    }

    #[test]
    fn test_config_files_union_by_path() {
        let mut tpl = template();
        tpl.children.config_files = vec![
            ConfigFile {
                file_path: "nginx.conf".to_string(),
                content: "template".to_string(),
                mode: "0644".to_string(),
                is_template: false,
            },
            ConfigFile {
                file_path: "mime.types".to_string(),
                content: "types {}".to_string(),
                mode: "0644".to_string(),
                is_template: false,
            },
        ];
        let overrides = ServiceChildren {
            config_files: vec![ConfigFile {
                file_path: "nginx.conf".to_string(),
                content: "instance".to_string(),
                mode: "0600".to_string(),
                is_template: false,
            }],
            ..Default::default()
        };
        let eff = resolve("web", &tpl, &instance(), &overrides);
        assert_eq!(eff.config_files.len(), 2);
        let nginx = eff
            .config_files
            .iter()
            .find(|f| f.file_path == "nginx.conf")
            .unwrap();
        assert_eq!(nginx.content, "instance");
        assert_eq!(nginx.mode, "0600");
        assert!(eff.overrides_applied.config_files);
    }
}
