//! Compose manifest generator.
//!
//! Renders a stack's resolved instances into a Compose-format YAML
//! document. Output is deterministic: instances are sorted by instance id,
//! service keys are emitted in a fixed order, and every map is backed by a
//! `BTreeMap`, so unchanged inputs produce byte-identical YAML.
//!
//! Dependencies reference other instances by instance id within the same
//! stack. A dependency naming an absent instance is dropped with a warning;
//! a dependency cycle is a hard error and produces no YAML.

use crate::error::{Error, Result};
use crate::resolver::EffectiveConfig;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// One resolved instance ready for rendering
#[derive(Debug, Clone)]
pub struct ResolvedService {
    /// Instance id; becomes the Compose service key
    pub instance_id: String,
    /// Derived container name
    pub container_name: String,
    /// Merged configuration
    pub config: EffectiveConfig,
}

/// Bind-mount source rewrite from the in-container project root to the
/// host-side project root
#[derive(Debug, Clone)]
pub struct PathRewrite {
    /// Prefix to replace (the API process's `PROJECT_ROOT`)
    pub from: PathBuf,
    /// Replacement prefix (the host's `HOST_PROJECT_ROOT`)
    pub to: PathBuf,
}

impl PathRewrite {
    /// Rewrite `source` when it falls under the `from` prefix; other
    /// sources pass through unchanged.
    #[must_use]
    pub fn apply(&self, source: &str) -> String {
        let from = self.from.to_string_lossy();
        match source.strip_prefix(from.as_ref()) {
            Some(rest) => format!("{}{rest}", self.to.to_string_lossy()),
            None => source.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ComposeDocument {
    services: BTreeMap<String, ComposeService>,
    networks: BTreeMap<String, ComposeNetwork>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    volumes: BTreeMap<String, ComposeNamedVolume>,
}

#[derive(Debug, Serialize)]
struct ComposeService {
    container_name: String,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    restart: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    volumes: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    environment: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    healthcheck: Option<ComposeHealthcheck>,
    networks: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ComposeHealthcheck {
    test: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retries: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_period: Option<String>,
}

#[derive(Debug, Serialize)]
struct ComposeNetwork {
    name: String,
    external: bool,
}

/// Named volumes carry no options; they serialize as empty mappings
#[derive(Debug, Serialize)]
struct ComposeNamedVolume {}

/// Render a stack's resolved services into Compose YAML.
///
/// `network` is attached as the external `default` network. Returns the
/// YAML plus warnings for dropped dependencies.
pub fn generate(
    stack_name: &str,
    network: &str,
    services: &[ResolvedService],
    rewrite: Option<&PathRewrite>,
) -> Result<(String, Vec<String>)> {
    let mut warnings = Vec::new();

    let mut sorted: Vec<&ResolvedService> = services.iter().collect();
    sorted.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));

    let present: BTreeSet<&str> = sorted.iter().map(|s| s.instance_id.as_str()).collect();

    // Resolve depends_on edges up front so cycle detection sees exactly
    // what the manifest will contain.
    let mut edges: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for svc in &sorted {
        let mut deps: Vec<&str> = Vec::new();
        for dep in &svc.config.dependencies {
            if present.contains(dep.depends_on.as_str()) {
                deps.push(dep.depends_on.as_str());
            } else {
                warnings.push(format!(
                    "instance '{}' depends on '{}' which is not in stack '{stack_name}'; dependency dropped",
                    svc.instance_id, dep.depends_on
                ));
            }
        }
        deps.sort_unstable();
        deps.dedup();
        edges.insert(svc.instance_id.as_str(), deps);
    }

    if let Some(cycle) = find_cycle(&edges) {
        return Err(Error::invariant(format!(
            "dependency cycle in stack '{stack_name}': {}",
            cycle.join(" -> ")
        )));
    }

    let mut compose_services = BTreeMap::new();
    let mut named_volumes = BTreeMap::new();

    for svc in &sorted {
        let cfg = &svc.config;

        let mut volume_entries = Vec::new();
        for vol in &cfg.volumes {
            let source = if vol.is_named() {
                named_volumes.insert(vol.source.clone(), ComposeNamedVolume {});
                vol.source.clone()
            } else if let Some(rw) = rewrite {
                rw.apply(&vol.source)
            } else {
                vol.source.clone()
            };
            let suffix = if vol.read_only { ":ro" } else { "" };
            volume_entries.push(format!("{source}:{}{suffix}", vol.target));
        }

        let healthcheck = cfg.healthcheck.as_ref().map(|hc| ComposeHealthcheck {
            test: hc.test.clone(),
            interval: hc.interval.clone(),
            timeout: hc.timeout.clone(),
            retries: hc.retries,
            start_period: hc.start_period.clone(),
        });

        compose_services.insert(
            svc.instance_id.clone(),
            ComposeService {
                container_name: svc.container_name.clone(),
                image: cfg.image_ref(),
                command: cfg.command.clone(),
                user: cfg.user_spec.clone(),
                restart: cfg.restart_policy.clone(),
                ports: cfg.ports.iter().map(|p| p.compose_entry()).collect(),
                volumes: volume_entries,
                environment: cfg.env_vars.clone(),
                labels: cfg.labels.clone(),
                depends_on: edges[svc.instance_id.as_str()]
                    .iter()
                    .map(|d| (*d).to_string())
                    .collect(),
                healthcheck,
                networks: vec!["default".to_string()],
            },
        );
    }

    let mut networks = BTreeMap::new();
    networks.insert(
        "default".to_string(),
        ComposeNetwork {
            name: network.to_string(),
            external: true,
        },
    );

    let document = ComposeDocument {
        services: compose_services,
        networks,
        volumes: named_volumes,
    };

    let yaml = serde_yaml::to_string(&document)?;
    Ok((yaml, warnings))
}

/// DFS cycle detection over the resolved dependency edges. Returns the
/// members of one cycle when present.
fn find_cycle(edges: &BTreeMap<&str, Vec<&str>>) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        White,
        Grey,
        Black,
    }

    fn visit<'a>(
        node: &'a str,
        edges: &BTreeMap<&'a str, Vec<&'a str>>,
        marks: &mut BTreeMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        marks.insert(node, Mark::Grey);
        path.push(node);
        for &dep in edges.get(node).into_iter().flatten() {
            match marks.get(dep).copied().unwrap_or(Mark::White) {
                Mark::Grey => {
                    let start = path.iter().position(|&n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|n| (*n).to_string()).collect();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
                Mark::White => {
                    if let Some(cycle) = visit(dep, edges, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Black => {}
            }
        }
        path.pop();
        marks.insert(node, Mark::Black);
        None
    }

    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
    let mut path = Vec::new();
    let nodes: Vec<&str> = edges.keys().copied().collect();
    for node in nodes {
        if marks.get(node).copied().unwrap_or(Mark::White) == Mark::White {
            if let Some(cycle) = visit(node, edges, &mut marks, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}
