//! Container runtime adapter.
//!
//! The only module allowed to touch the container runtime. Drives the
//! `docker` CLI over `tokio::process`; the socket is selected by exporting
//! `DOCKER_HOST` when a `CONTAINER_SOCKET` is configured. Calls are
//! synchronous from the caller's point of view and may block for seconds;
//! failures bubble up with stdout and stderr concatenated. Subprocesses
//! are killed when the owning future is dropped, so request cancellation
//! propagates best-effort.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;
use tracing::debug;

/// Output captured from a runtime subprocess
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code (-1 when terminated by signal)
    pub exit_code: i32,
    /// Whether the command succeeded
    pub success: bool,
}

impl CommandOutput {
    /// Stdout and stderr concatenated, for error reporting
    #[must_use]
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Handle to the container runtime
#[derive(Debug, Clone)]
pub struct Runtime {
    binary: PathBuf,
    socket: Option<String>,
}

impl Runtime {
    /// Locate the runtime binary on `PATH`.
    ///
    /// `socket`, when set, is exported as `DOCKER_HOST` on every call;
    /// `None` lets the CLI auto-detect its endpoint.
    pub fn new(socket: Option<String>) -> Result<Self> {
        let binary = which::which("docker").map_err(|_| Error::RuntimeNotFound)?;
        debug!(binary = %binary.display(), "located container runtime binary");
        Ok(Self { binary, socket })
    }

    /// Build a runtime handle around an explicit binary path (tests)
    #[must_use]
    pub fn with_binary(binary: PathBuf, socket: Option<String>) -> Self {
        Self { binary, socket }
    }

    async fn run(&self, operation: &str, args: Vec<String>) -> Result<CommandOutput> {
        let mut cmd = TokioCommand::new(&self.binary);
        cmd.args(&args);
        if let Some(socket) = &self.socket {
            cmd.env("DOCKER_HOST", socket);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!(operation, ?args, "invoking container runtime");
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::runtime(operation.to_string(), e.to_string()))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            success: output.status.success(),
        })
    }

    async fn run_checked(&self, operation: &str, args: Vec<String>) -> Result<CommandOutput> {
        let output = self.run(operation, args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(Error::runtime(operation.to_string(), output.combined()))
        }
    }

    /// Create a network with the given labels. Idempotent: an existing
    /// network with the same name is not an error.
    pub async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let args = network_create_args(name, labels);
        let output = self.run("network create", args).await?;
        if output.success || output.stderr.contains("already exists") {
            Ok(())
        } else {
            Err(Error::runtime("network create", output.combined()))
        }
    }

    /// List container names matching every given label filter.
    ///
    /// `all` includes stopped containers; the planner observes running
    /// containers only, while pruning considers everything.
    pub async fn list_containers_by_label(
        &self,
        filters: &[(String, String)],
        all: bool,
    ) -> Result<Vec<String>> {
        let args = ps_args(filters, all);
        let output = self.run_checked("ps", args).await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Stop a container by name
    pub async fn stop_container(&self, name: &str) -> Result<()> {
        self.run_checked("stop", vec!["stop".to_string(), name.to_string()])
            .await?;
        Ok(())
    }

    /// Remove a stopped container by name
    pub async fn remove_container(&self, name: &str) -> Result<()> {
        self.run_checked("rm", vec!["rm".to_string(), name.to_string()])
            .await?;
        Ok(())
    }

    /// Start one service of a project from a manifest
    pub async fn start_compose_service(
        &self,
        project: &str,
        yaml: &str,
        service: &str,
    ) -> Result<String> {
        self.compose_service_op(project, yaml, "up", Some("--detach"), service)
            .await
    }

    /// Stop one service of a project from a manifest
    pub async fn stop_compose_service(
        &self,
        project: &str,
        yaml: &str,
        service: &str,
    ) -> Result<String> {
        self.compose_service_op(project, yaml, "stop", None, service)
            .await
    }

    /// Restart one service of a project from a manifest
    pub async fn restart_compose_service(
        &self,
        project: &str,
        yaml: &str,
        service: &str,
    ) -> Result<String> {
        self.compose_service_op(project, yaml, "restart", None, service)
            .await
    }

    async fn compose_service_op(
        &self,
        project: &str,
        yaml: &str,
        subcommand: &str,
        extra: Option<&str>,
        service: &str,
    ) -> Result<String> {
        let manifest = stage_manifest(yaml).await?;
        let args = compose_service_args(
            manifest.path(),
            project,
            subcommand,
            extra,
            service,
        );
        let operation = format!("compose {subcommand} {service}");
        let output = self.run_checked(&operation, args).await?;
        Ok(output.combined())
    }

    /// Generic compose passthrough against an already-written manifest.
    ///
    /// Returns stdout and stderr concatenated whether or not the command
    /// succeeds; non-zero exit is an error carrying the same output.
    pub async fn run_compose(&self, manifest: &Path, args: &[&str]) -> Result<String> {
        let mut full = vec![
            "compose".to_string(),
            "-f".to_string(),
            manifest.display().to_string(),
        ];
        full.extend(args.iter().map(|a| (*a).to_string()));
        let operation = format!("compose {}", args.join(" "));
        let output = self.run_checked(&operation, full).await?;
        Ok(output.combined())
    }

    /// Execute a command inside a running container
    pub async fn exec(&self, container: &str, argv: &[String]) -> Result<String> {
        let mut args = vec!["exec".to_string(), container.to_string()];
        args.extend(argv.iter().cloned());
        let output = self
            .run_checked(&format!("exec {container}"), args)
            .await?;
        Ok(output.combined())
    }
}

/// Write manifest bytes to a temp file that lives for the duration of the
/// runtime call
async fn stage_manifest(yaml: &str) -> Result<tempfile::NamedTempFile> {
    let manifest = tempfile::Builder::new()
        .prefix("devarch-compose-")
        .suffix(".yaml")
        .tempfile()
        .map_err(|e| Error::io("create manifest temp file", e))?;
    let mut file = tokio::fs::File::create(manifest.path())
        .await
        .map_err(|e| Error::io("open manifest temp file", e))?;
    file.write_all(yaml.as_bytes())
        .await
        .map_err(|e| Error::io("write manifest temp file", e))?;
    file.flush()
        .await
        .map_err(|e| Error::io("flush manifest temp file", e))?;
    Ok(manifest)
}

fn network_create_args(name: &str, labels: &BTreeMap<String, String>) -> Vec<String> {
    let mut args = vec!["network".to_string(), "create".to_string()];
    for (key, value) in labels {
        args.push("--label".to_string());
        args.push(format!("{key}={value}"));
    }
    args.push(name.to_string());
    args
}

fn ps_args(filters: &[(String, String)], all: bool) -> Vec<String> {
    let mut args = vec!["ps".to_string()];
    if all {
        args.push("--all".to_string());
    }
    for (key, value) in filters {
        args.push("--filter".to_string());
        args.push(format!("label={key}={value}"));
    }
    args.push("--format".to_string());
    args.push("{{.Names}}".to_string());
    args
}

fn compose_service_args(
    manifest: &Path,
    project: &str,
    subcommand: &str,
    extra: Option<&str>,
    service: &str,
) -> Vec<String> {
    let mut args = vec![
        "compose".to_string(),
        "-f".to_string(),
        manifest.display().to_string(),
        "--project-name".to_string(),
        project.to_string(),
        subcommand.to_string(),
    ];
    if let Some(extra) = extra {
        args.push(extra.to_string());
    }
    args.push(service.to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_create_args() {
        let mut labels = BTreeMap::new();
        labels.insert("devarch.managed_by".to_string(), "devarch".to_string());
        labels.insert("devarch.stack_id".to_string(), "web".to_string());
        let args = network_create_args("devarch-web-net", &labels);
        assert_eq!(
            args,
            vec![
                "network",
                "create",
                "--label",
                "devarch.managed_by=devarch",
                "--label",
                "devarch.stack_id=web",
                "devarch-web-net",
            ]
        );
    }

    #[test]
    fn test_ps_args_running_only() {
        let filters = vec![("devarch.stack_id".to_string(), "web".to_string())];
        let args = ps_args(&filters, false);
        assert_eq!(
            args,
            vec![
                "ps",
                "--filter",
                "label=devarch.stack_id=web",
                "--format",
                "{{.Names}}",
            ]
        );
    }

    #[test]
    fn test_ps_args_multi_filter_all() {
        let filters = vec![
            ("devarch.managed_by".to_string(), "devarch".to_string()),
            ("devarch.stack_id".to_string(), "web".to_string()),
        ];
        let args = ps_args(&filters, true);
        assert!(args.contains(&"--all".to_string()));
        assert_eq!(
            args.iter().filter(|a| *a == "--filter").count(),
            2,
            "one --filter per label"
        );
    }

    #[test]
    fn test_compose_service_args() {
        let args = compose_service_args(
            Path::new("/tmp/m.yaml"),
            "devarch-web",
            "up",
            Some("--detach"),
            "app1",
        );
        assert_eq!(
            args,
            vec![
                "compose",
                "-f",
                "/tmp/m.yaml",
                "--project-name",
                "devarch-web",
                "up",
                "--detach",
                "app1",
            ]
        );
    }

    #[test]
    fn test_command_output_combined() {
        let output = CommandOutput {
            stdout: "created".to_string(),
            stderr: "warning".to_string(),
            exit_code: 0,
            success: true,
        };
        assert_eq!(output.combined(), "created\nwarning");

        let stderr_only = CommandOutput {
            stdout: String::new(),
            stderr: "boom".to_string(),
            exit_code: 1,
            success: false,
        };
        assert_eq!(stderr_only.combined(), "boom");
    }
}
