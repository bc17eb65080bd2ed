//! Cross-module tests: resolver output fed through the Compose generator.

use chrono::{TimeZone, Utc};
use devarch_control::resolver::resolve;
use devarch_control::{
    ConfigFile, Dependency, EnvVar, Healthcheck, LabelPair, PathRewrite, PortMapping,
    ResolvedService, ServiceChildren, ServiceInstance, ServiceTemplate, TemplateDetail,
    VolumeMapping,
};
use std::path::PathBuf;

fn template(id: i64, name: &str) -> TemplateDetail {
    let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    TemplateDetail {
        template: ServiceTemplate {
            id,
            name: name.to_string(),
            image: "nginx".to_string(),
            tag: "1.27-alpine".to_string(),
            restart_policy: "unless-stopped".to_string(),
            command: None,
            user_spec: Some("101:101".to_string()),
            enabled: true,
            created_at: ts,
            updated_at: ts,
        },
        children: ServiceChildren {
            ports: vec![PortMapping {
                host_ip: None,
                host_port: 8080,
                container_port: 80,
                protocol: "tcp".to_string(),
            }],
            volumes: vec![VolumeMapping {
                source: "/srv/devarch/shared".to_string(),
                target: "/srv/shared".to_string(),
                read_only: true,
            }],
            env_vars: vec![EnvVar {
                key: "A".to_string(),
                value: "1".to_string(),
            }],
            labels: vec![LabelPair {
                key: "app.tier".to_string(),
                value: "web".to_string(),
            }],
            healthcheck: Some(Healthcheck {
                test: "curl -f http://localhost/".to_string(),
                interval: Some("10s".to_string()),
                timeout: Some("5s".to_string()),
                retries: Some(3),
                start_period: None,
            }),
            config_files: vec![ConfigFile {
                file_path: "nginx.conf".to_string(),
                content: "server {}".to_string(),
                mode: "0644".to_string(),
                is_template: false,
            }],
            ..Default::default()
        },
    }
}

fn instance(stack_id: i64, instance_id: &str, template_id: i64) -> ServiceInstance {
    let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    ServiceInstance {
        id: 1,
        stack_id,
        instance_id: instance_id.to_string(),
        template_service_id: template_id,
        container_name: format!("web-{instance_id}"),
        description: String::new(),
        enabled: true,
        created_at: ts,
        updated_at: ts,
        deleted_at: None,
    }
}

fn resolved(instance_id: &str, overrides: &ServiceChildren) -> ResolvedService {
    let tpl = template(7, "nginx");
    let inst = instance(1, instance_id, 7);
    let config = resolve("web", &tpl, &inst, overrides);
    ResolvedService {
        instance_id: instance_id.to_string(),
        container_name: format!("web-{instance_id}"),
        config,
    }
}

#[test]
fn test_effective_config_env_merge_scenario() {
    // template env {A: 1}, instance env {A: 2, B: 3}
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
    let tpl = template(7, "nginx");
    let inst = instance(1, "app1", 7);
    let eff = resolve("web", &tpl, &inst, &overrides);

    assert_eq!(eff.env_vars.get("A").map(String::as_str), Some("2"));
    assert_eq!(eff.env_vars.get("B").map(String::as_str), Some("3"));
    assert!(eff.overrides_applied.env_vars);
    assert!(!eff.overrides_applied.ports);
}

#[test]
fn test_full_pipeline_deterministic() {
    let overrides = ServiceChildren {
        env_vars: vec![EnvVar {
            key: "B".to_string(),
            value: "3".to_string(),
        }],
        ..Default::default()
    };
    let services = vec![
        resolved("app2", &ServiceChildren::default()),
        resolved("app1", &overrides),
    ];

    let (first, _) =
        devarch_control::generate::generate("web", "devarch-web-net", &services, None).unwrap();
    let (second, _) =
        devarch_control::generate::generate("web", "devarch-web-net", &services, None).unwrap();
    assert_eq!(first, second, "generator must be byte-stable");

    // service keys appear sorted
    let app1_pos = first.find("app1:").unwrap();
    let app2_pos = first.find("app2:").unwrap();
    assert!(app1_pos < app2_pos);
}

#[test]
fn test_full_pipeline_yaml_shape() {
    let services = vec![resolved("app1", &ServiceChildren::default())];
    let rewrite = PathRewrite {
        from: PathBuf::from("/srv/devarch"),
        to: PathBuf::from("/home/dev/project"),
    };
    let (yaml, warnings) =
        devarch_control::generate::generate("web", "devarch-web-net", &services, Some(&rewrite))
            .unwrap();
    assert!(warnings.is_empty());

    // parses back as a mapping with the expected top-level keys
    let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
    assert!(doc.get("services").is_some());
    assert!(doc.get("networks").is_some());

    let app1 = &doc["services"]["app1"];
    assert_eq!(app1["container_name"], "web-app1");
    assert_eq!(app1["image"], "nginx:1.27-alpine");
    assert_eq!(app1["restart"], "unless-stopped");
    assert_eq!(app1["user"], "101:101");
    assert_eq!(app1["ports"][0], "0.0.0.0:8080:80/tcp");
    assert_eq!(app1["volumes"][0], "/home/dev/project/shared:/srv/shared:ro");
    assert_eq!(app1["environment"]["A"], "1");
    assert_eq!(app1["labels"]["devarch.stack_id"], "web");
    assert_eq!(app1["healthcheck"]["retries"], 3);
    assert_eq!(doc["networks"]["default"]["name"], "devarch-web-net");
    assert_eq!(doc["networks"]["default"]["external"], true);
}

#[test]
fn test_dependency_cycle_rejected_end_to_end() {
    let dep_on = |name: &str| ServiceChildren {
        dependencies: vec![Dependency {
            depends_on: name.to_string(),
        }],
        ..Default::default()
    };
    let services = vec![resolved("app1", &dep_on("app2")), resolved("app2", &dep_on("app1"))];
    let err =
        devarch_control::generate::generate("web", "devarch-web-net", &services, None).unwrap_err();
    assert_eq!(err.category(), "invariant");
}
