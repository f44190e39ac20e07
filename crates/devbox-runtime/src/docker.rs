//! Docker CLI backend
//!
//! Drives the `docker` binary with argument vectors through
//! `tokio::process`. Every call runs under a deadline and the child is
//! killed if the deadline passes.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::commands;
use crate::config::{RuntimeConfig, MANAGED_LABEL, SESSION_LABEL};
use crate::error::RuntimeError;
use crate::runtime::WorkspaceRuntime;
use crate::types::{ExecOutput, ShellProcess, WorkspaceHandle};

/// Workspace runtime backed by the Docker CLI
#[derive(Debug)]
pub struct DockerRuntime {
    config: RuntimeConfig,
    image: OnceCell<()>,
}

impl DockerRuntime {
    /// Create a runtime with the given configuration
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            image: OnceCell::new(),
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Dockerfile of the workspace base image, fed to `docker build -`
    #[must_use]
    pub fn dockerfile(&self) -> String {
        let workdir = &self.config.workspace_dir;
        format!(
            "FROM {base}\n\
RUN apt-get update -qq \\\n    && apt-get install -y -qq --no-install-recommends \\\n       bash util-linux coreutils findutils procps ca-certificates git python3 \\\n    && rm -rf /var/lib/apt/lists/*\n\
RUN mkdir -p {workdir} && chmod 755 {workdir}\n\
ENV TERM=xterm-256color\n\
WORKDIR {workdir}\n\
CMD [\"sleep\", \"infinity\"]\n",
            base = self.config.base_image,
        )
    }

    /// Arguments of the `docker run` call provisioning a workspace
    #[must_use]
    pub fn run_args(&self, session_id: &str, handle: &WorkspaceHandle) -> Vec<String> {
        let limits = handle.limits();
        let memory = format!("{}m", limits.memory_mb);
        vec![
            "run".to_string(),
            "-d".to_string(),
            "--name".to_string(),
            handle.container().to_string(),
            "--label".to_string(),
            format!("{MANAGED_LABEL}=true"),
            "--label".to_string(),
            format!("{SESSION_LABEL}={session_id}"),
            "--hostname".to_string(),
            "devbox".to_string(),
            "--memory".to_string(),
            memory.clone(),
            "--memory-swap".to_string(),
            memory,
            "--cpu-shares".to_string(),
            limits.cpu_shares.to_string(),
            "--pids-limit".to_string(),
            limits.pids.to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "-v".to_string(),
            format!("{}:{}", handle.host_path().display(), self.config.workspace_dir),
            "-w".to_string(),
            self.config.workspace_dir.clone(),
            self.config.image_tag.clone(),
            "sleep".to_string(),
            "infinity".to_string(),
        ]
    }

    /// Arguments of a `docker exec` call
    #[must_use]
    pub fn exec_args(&self, handle: &WorkspaceHandle, argv: &[String], interactive: bool) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if interactive {
            args.extend(["-i".to_string(), "-e".to_string(), "TERM=xterm-256color".to_string()]);
        }
        args.extend([
            "-w".to_string(),
            self.config.workspace_dir.clone(),
            handle.container().to_string(),
        ]);
        args.extend(argv.iter().cloned());
        args
    }

    /// Run the CLI once, optionally feeding stdin, under a deadline
    async fn run_cli(
        &self,
        op: &'static str,
        args: &[String],
        stdin: Option<Vec<u8>>,
        deadline: Duration,
    ) -> Result<ExecOutput, RuntimeError> {
        let mut cmd = Command::new(&self.config.docker_binary);
        cmd.args(args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            program: self.config.docker_binary.clone(),
            source,
        })?;
        let pipe = child.stdin.take();

        let run = async move {
            let feed = async move {
                if let (Some(mut pipe), Some(bytes)) = (pipe, stdin) {
                    pipe.write_all(&bytes).await?;
                    pipe.shutdown().await?;
                }
                Ok::<(), std::io::Error>(())
            };
            let (fed, output) = tokio::join!(feed, child.wait_with_output());
            if let Err(e) = fed {
                debug!(op, error = %e, "stdin closed early");
            }
            output
        };

        let output = tokio::time::timeout(deadline, run)
            .await
            .map_err(|_| RuntimeError::Timeout {
                op,
                secs: deadline.as_secs(),
            })??;

        Ok(ExecOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
        })
    }

    /// Run the CLI and turn a non-zero exit into an error
    async fn run_checked(
        &self,
        op: &'static str,
        args: &[String],
        stdin: Option<Vec<u8>>,
        target: &str,
    ) -> Result<ExecOutput, RuntimeError> {
        let output = self
            .run_cli(op, args, stdin, self.config.command_timeout())
            .await?;
        if output.success() {
            return Ok(output);
        }
        if is_missing_container(&output.stderr) {
            return Err(RuntimeError::NotFound(target.to_string()));
        }
        Err(RuntimeError::CommandFailed {
            op,
            code: output.exit_code,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// `docker rm -f -v`, treating an already-removed container as success
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let args = vec![
            "rm".to_string(),
            "-f".to_string(),
            "-v".to_string(),
            name.to_string(),
        ];
        match self.run_checked("remove", &args, None, name).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_already_gone() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl WorkspaceRuntime for DockerRuntime {
    fn backend_name(&self) -> &'static str {
        "docker"
    }

    async fn build_base_image(&self) -> Result<(), RuntimeError> {
        self.image
            .get_or_try_init(|| async {
                let tag = self.config.image_tag.as_str();
                info!(tag, base = %self.config.base_image, "building workspace base image");

                let args: Vec<String> = ["build", "-t", tag, "-"].into_iter().map(String::from).collect();
                let output = self
                    .run_cli(
                        "build_base_image",
                        &args,
                        Some(self.dockerfile().into_bytes()),
                        self.config.build_timeout(),
                    )
                    .await
                    .map_err(|e| RuntimeError::ImageBuild(e.to_string()))?;

                if !output.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    return Err(RuntimeError::ImageBuild(stderr.trim().to_string()));
                }

                info!(tag, "workspace base image ready");
                Ok::<(), RuntimeError>(())
            })
            .await
            .map(|_| ())
    }

    async fn create_workspace(&self, session_id: &str) -> Result<WorkspaceHandle, RuntimeError> {
        let name = self.config.container_name(session_id);
        let host_path = self.config.host_path(session_id);

        self.remove_container(&name).await?;
        prepare_host_dir(&host_path).await?;

        let handle = WorkspaceHandle::new(name, host_path, self.config.limits);
        let args = self.run_args(session_id, &handle);
        if let Err(err) = self
            .run_checked("create_workspace", &args, None, handle.container())
            .await
        {
            warn!(container = %handle, error = %err, "workspace creation failed, cleaning up");
            if let Err(e) = self.remove_container(handle.container()).await {
                debug!(container = %handle, error = %e, "partial container removal failed");
            }
            if let Err(e) = remove_host_dir(handle.host_path()).await {
                debug!(container = %handle, error = %e, "host directory removal failed");
            }
            return Err(err);
        }

        info!(container = %handle, host_path = %handle.host_path().display(), "workspace created");
        Ok(handle)
    }

    async fn exec(
        &self,
        handle: &WorkspaceHandle,
        argv: &[String],
    ) -> Result<ExecOutput, RuntimeError> {
        let args = self.exec_args(handle, argv, false);
        let output = self
            .run_cli("exec", &args, None, self.config.command_timeout())
            .await?;
        if !output.success() && is_missing_container(&output.stderr) {
            return Err(RuntimeError::NotFound(handle.container().to_string()));
        }
        Ok(output)
    }

    async fn inject_archive(
        &self,
        handle: &WorkspaceHandle,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let target = format!("{}:{}", handle.container(), self.config.workspace_dir);
        let args = vec!["cp".to_string(), "-".to_string(), target];
        self.run_checked("inject_archive", &args, Some(archive), handle.container())
            .await
            .map(|_| ())
    }

    async fn spawn_shell(&self, handle: &WorkspaceHandle) -> Result<ShellProcess, RuntimeError> {
        let args = self.exec_args(handle, &self.config.shell_command, true);
        let mut child = Command::new(&self.config.docker_binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: self.config.docker_binary.clone(),
                source,
            })?;

        let input = child
            .stdin
            .take()
            .ok_or_else(|| RuntimeError::Shell("shell stdin was not captured".to_string()))?;
        let output = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::Shell("shell stdout was not captured".to_string()))?;

        debug!(container = %handle, pid = ?child.id(), "shell attached");
        Ok(ShellProcess::new(input, output).with_child(child))
    }

    async fn stop_and_remove(&self, handle: &WorkspaceHandle) -> Result<(), RuntimeError> {
        match self.exec(handle, &commands::wipe_workspace()).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                debug!(container = %handle, code = ?output.exit_code, "workspace wipe incomplete");
            }
            Err(e) => debug!(container = %handle, error = %e, "workspace wipe skipped"),
        }

        let mut first_error = self.remove_container(handle.container()).await.err();
        if let Err(e) = remove_host_dir(handle.host_path()).await {
            first_error.get_or_insert(e);
        }

        match first_error {
            None => {
                info!(container = %handle, "workspace removed");
                Ok(())
            }
            Some(e) => Err(e),
        }
    }

    async fn list_managed(&self) -> Result<Vec<String>, RuntimeError> {
        let args: Vec<String> = vec![
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("label={MANAGED_LABEL}=true"),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ];
        let output = self.run_checked("list_managed", &args, None, "").await?;
        Ok(output
            .stdout_text()
            .lines()
            .map(str::trim)
            .filter(|name| self.config.is_managed_name(name))
            .map(String::from)
            .collect())
    }

    async fn remove_named(&self, name: &str) -> Result<(), RuntimeError> {
        self.remove_container(name).await?;
        if let Some(path) = self.config.host_path_for_container(name) {
            remove_host_dir(&path).await?;
            debug!(container = name, path = %path.display(), "host directory removed");
        }
        Ok(())
    }
}

/// Whether CLI error output says the container does not exist
fn is_missing_container(stderr: &[u8]) -> bool {
    String::from_utf8_lossy(stderr)
        .to_ascii_lowercase()
        .contains("no such container")
}

/// Create an empty, world-readable host directory, wiping any stale one
///
/// # Errors
/// Returns [`RuntimeError::HostStorage`] if the directory cannot be
/// removed or created.
pub async fn prepare_host_dir(path: &Path) -> Result<(), RuntimeError> {
    let storage_error = |source| RuntimeError::HostStorage {
        path: path.to_path_buf(),
        source,
    };

    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => debug!(path = %path.display(), "removed stale host directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(storage_error(e)),
    }

    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o755);
    builder.create(path).await.map_err(storage_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(storage_error)?;
    }
    Ok(())
}

/// Remove a host directory, treating a missing one as removed
///
/// # Errors
/// Returns [`RuntimeError::HostStorage`] on any other failure.
pub async fn remove_host_dir(path: &Path) -> Result<(), RuntimeError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RuntimeError::HostStorage {
            path: path.to_path_buf(),
            source,
        }),
    }
}
