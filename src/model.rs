//! Core data model: templates, stacks, instances, and their child rows.
//!
//! Templates are reusable service definitions; stacks group concrete
//! instances, each derived from a template with per-instance overrides.
//! Override rows mirror the template child rows exactly, so one Rust type
//! serves both the `service_*` and `instance_*` tables.

use crate::naming;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A reusable service definition shared by instances
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceTemplate {
    /// Primary key
    pub id: i64,
    /// Unique template name (subject to the naming rule)
    pub name: String,
    /// Image repository, e.g. `nginx`
    pub image: String,
    /// Image tag, e.g. `1.27-alpine`
    pub tag: String,
    /// Compose restart policy, e.g. `unless-stopped`
    pub restart_policy: String,
    /// Optional container command override
    pub command: Option<String>,
    /// Optional `user` spec, e.g. `1000:1000`
    pub user_spec: Option<String>,
    /// Whether new instances of this template may be started
    pub enabled: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp
    pub updated_at: DateTime<Utc>,
}

/// A port mapping row (template child or instance override)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PortMapping {
    /// Host interface to bind; `None` binds all interfaces
    pub host_ip: Option<String>,
    /// Host port
    pub host_port: i32,
    /// Container port
    pub container_port: i32,
    /// `tcp` or `udp`
    pub protocol: String,
}

impl PortMapping {
    /// Render as a Compose port entry: `<host_ip>:<host>:<container>/<proto>`
    #[must_use]
    pub fn compose_entry(&self) -> String {
        let ip = self.host_ip.as_deref().unwrap_or("0.0.0.0");
        format!(
            "{ip}:{host}:{container}/{proto}",
            host = self.host_port,
            container = self.container_port,
            proto = self.protocol
        )
    }
}

/// A volume mapping row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VolumeMapping {
    /// Bind-mount source path or named-volume name
    pub source: String,
    /// Mount target inside the container
    pub target: String,
    /// Mount read-only
    pub read_only: bool,
}

impl VolumeMapping {
    /// A source that is not an absolute or relative path is a named volume
    #[must_use]
    pub fn is_named(&self) -> bool {
        !self.source.starts_with('/')
            && !self.source.starts_with("./")
            && !self.source.starts_with("../")
    }
}

/// An environment variable row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EnvVar {
    /// Variable name, unique per owner
    pub key: String,
    /// Variable value
    pub value: String,
}

/// A container label row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LabelPair {
    /// Label key, unique per owner; `devarch.` prefix is reserved
    pub key: String,
    /// Label value
    pub value: String,
}

/// A domain routing hint consumed by the (external) proxy config generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DomainRule {
    /// Fully qualified domain name
    pub domain: String,
    /// Container port the domain routes to; `None` uses the service default
    pub container_port: Option<i32>,
}

/// A healthcheck row; at most one per template or instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Healthcheck {
    /// Check command in shell form
    pub test: String,
    /// Interval between checks, e.g. `10s`
    pub interval: Option<String>,
    /// Per-check timeout, e.g. `5s`
    pub timeout: Option<String>,
    /// Consecutive failures before unhealthy
    pub retries: Option<i32>,
    /// Grace period after start, e.g. `30s`
    pub start_period: Option<String>,
}

/// A dependency edge; references a template name (template rows) or an
/// instance id within the same stack (override rows)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Dependency {
    /// Name of the service this one depends on
    pub depends_on: String,
}

/// A config file blob materialized into the instance's directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ConfigFile {
    /// Path relative to the instance directory; sandboxed on write
    pub file_path: String,
    /// File content
    pub content: String,
    /// Octal mode string, `0000`-`0777`
    pub mode: String,
    /// Informational flag; content templating happens elsewhere
    pub is_template: bool,
}

/// Child collections shared by templates and instance overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceChildren {
    /// Port mappings
    pub ports: Vec<PortMapping>,
    /// Volume mappings
    pub volumes: Vec<VolumeMapping>,
    /// Environment variables
    pub env_vars: Vec<EnvVar>,
    /// Container labels
    pub labels: Vec<LabelPair>,
    /// Domain routing hints
    pub domains: Vec<DomainRule>,
    /// Dependency edges
    pub dependencies: Vec<Dependency>,
    /// Healthcheck, if any
    pub healthcheck: Option<Healthcheck>,
    /// Config file blobs
    pub config_files: Vec<ConfigFile>,
}

/// A template together with its child collections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDetail {
    /// The template row
    pub template: ServiceTemplate,
    /// Child collections
    pub children: ServiceChildren,
}

/// A named deployment group owning instances
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Stack {
    /// Primary key
    pub id: i64,
    /// Unique name among non-deleted stacks; immutable except via rename
    pub name: String,
    /// Free-form description
    pub description: String,
    /// Explicit network name; `None` derives `devarch-<stack>-net`
    pub network_name: Option<String>,
    /// Disabled stacks refuse instance start/restart
    pub enabled: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Advances on any change to the stack or its owned rows
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Stack {
    /// The network this stack's containers attach to
    #[must_use]
    pub fn network(&self) -> String {
        self.network_name
            .clone()
            .unwrap_or_else(|| naming::default_network_name(&self.name))
    }
}

/// A concrete service inside a stack, derived from a template
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ServiceInstance {
    /// Primary key
    pub id: i64,
    /// Owning stack
    pub stack_id: i64,
    /// Instance name, unique per stack among non-deleted instances
    pub instance_id: String,
    /// The template this instance derives from
    pub template_service_id: i64,
    /// Derived `<stack>-<instance>` container name
    pub container_name: String,
    /// Free-form description
    pub description: String,
    /// Disabled instances are excluded from generated manifests
    pub enabled: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp
    pub updated_at: DateTime<Utc>,
    /// Soft-delete tombstone
    pub deleted_at: Option<DateTime<Utc>>,
}

/// An instance together with its override rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDetail {
    /// The instance row
    pub instance: ServiceInstance,
    /// Override collections; empty collections mean "inherit from template"
    pub overrides: ServiceChildren,
}
