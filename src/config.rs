//! Environment-driven configuration.
//!
//! All configuration comes from environment variables so the control plane
//! can run unchanged inside a container or directly on the host.

use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment variable holding the relational store DSN
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

/// Environment variable overriding the container runtime socket
pub const ENV_CONTAINER_SOCKET: &str = "CONTAINER_SOCKET";

/// Environment variable for the in-container project root
pub const ENV_PROJECT_ROOT: &str = "PROJECT_ROOT";

/// Environment variable for the host-side project root
pub const ENV_HOST_PROJECT_ROOT: &str = "HOST_PROJECT_ROOT";

/// Environment variable holding the API key required by the HTTP surface
pub const ENV_API_KEY: &str = "DEVARCH_API_KEY";

/// Environment variable pointing at the migration files
pub const ENV_MIGRATIONS_DIR: &str = "MIGRATIONS_DIR";

/// Resolved control-plane settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Relational store DSN
    pub database_url: String,
    /// Container runtime socket, exported as `DOCKER_HOST` when set;
    /// `None` lets the runtime auto-detect
    pub container_socket: Option<String>,
    /// Root for in-container paths used during materialization
    pub project_root: PathBuf,
    /// Host-side root used to rewrite bind-mount sources in generated
    /// Compose; `None` disables rewriting
    pub host_project_root: Option<PathBuf>,
    /// When set, the HTTP surface requires this value as `X-API-Key`
    pub api_key: Option<String>,
    /// Directory holding ordered `*.up.sql` / `*.down.sql` files
    pub migrations_dir: PathBuf,
}

impl Settings {
    /// Load settings from the environment.
    ///
    /// `DATABASE_URL` is required; everything else has a sensible default
    /// or is optional.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var(ENV_DATABASE_URL)
            .map_err(|_| Error::validation(format!("{ENV_DATABASE_URL} is not set")))?;

        let project_root = env::var(ENV_PROJECT_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Ok(Self {
            database_url,
            container_socket: env::var(ENV_CONTAINER_SOCKET).ok(),
            project_root,
            host_project_root: env::var(ENV_HOST_PROJECT_ROOT).ok().map(PathBuf::from),
            api_key: env::var(ENV_API_KEY).ok(),
            migrations_dir: env::var(ENV_MIGRATIONS_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("migrations")),
        })
    }

    /// Directory under which stack config trees are materialized:
    /// `<project_root>/compose/stacks`
    #[must_use]
    pub fn stacks_root(&self) -> PathBuf {
        self.project_root.join("compose").join("stacks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stacks_root() {
        let settings = Settings {
            database_url: "postgres://localhost/devarch".to_string(),
            container_socket: None,
            project_root: PathBuf::from("/srv/devarch"),
            host_project_root: None,
            api_key: None,
            migrations_dir: PathBuf::from("migrations"),
        };
        assert_eq!(
            settings.stacks_root(),
            PathBuf::from("/srv/devarch/compose/stacks")
        );
    }
}
