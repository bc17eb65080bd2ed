//! # devarch-control
//!
//! A container-stack control plane for local development.
//!
//! The crate stores a desired model of *stacks* (named groups of service
//! instances), each instance derived from a reusable *service template*
//! with per-instance overrides, and reconciles that model against an
//! OCI-compatible container runtime: it renders a Compose-format manifest
//! per stack, materializes per-instance config files onto disk, and
//! drives `compose up` to converge actual containers toward the desired
//! set.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use devarch_control::{ControlPlane, Runtime, Settings, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), devarch_control::Error> {
//!     let settings = Settings::from_env()?;
//!     let store = Store::connect(&settings.database_url).await?;
//!     let runtime = Runtime::new(settings.container_socket.clone())?;
//!     let control = ControlPlane::new(store, runtime, settings);
//!
//!     // Plan, then apply with the plan's freshness token.
//!     let plan = control.plan_stack("web").await?;
//!     println!("{} change(s) pending", plan.changes.len());
//!     let outcome = control.apply_stack("web", &plan.token).await?;
//!     println!("{}", outcome.output);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`naming`] - name validation, container-name derivation, identity labels
//! - [`store`] - relational persistence, advisory locks, migrations
//! - [`resolver`] - template + override merging into effective configs
//! - [`materialize`] - per-instance config-file trees on disk
//! - [`generate`] - deterministic Compose YAML generation
//! - [`runtime`] - the container runtime adapter
//! - [`plan`] - desired/observed diffing and the plan token
//! - [`ops`] - the assembled control plane: plan, apply, lifecycle

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub use config::Settings;
pub use error::{Error, Result};
pub use generate::{PathRewrite, ResolvedService};
pub use model::{
    ConfigFile, Dependency, DomainRule, EnvVar, Healthcheck, InstanceDetail, LabelPair,
    PortMapping, ServiceChildren, ServiceInstance, ServiceTemplate, Stack, TemplateDetail,
    VolumeMapping,
};
pub use ops::{ApplyOutcome, ControlPlane, DeletePreview};
pub use plan::{Change, ChangeAction, DesiredInstance, FieldDelta, StackPlan};
pub use resolver::{EffectiveConfig, OverridesApplied};
pub use runtime::{CommandOutput, Runtime};
pub use store::{
    InstanceUpdate, NewInstance, NewStack, NewTemplate, OverrideGroup, StackLock, StackUpdate,
    Store, TemplateUpdate,
};

pub mod config;
pub mod error;
pub mod generate;
pub mod materialize;
pub mod model;
pub mod naming;
pub mod ops;
pub mod plan;
pub mod resolver;
pub mod runtime;
pub mod store;

/// The version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
