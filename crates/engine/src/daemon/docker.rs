// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Docker CLI implementation of [`ContainerDaemon`].

use super::{ContainerDaemon, ContainerInfo, CreateOptions, DaemonError, ExecOptions, ExecOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

/// Shells out to `docker`. `DOCKER_HOST` in the environment is passed
/// through untouched, so remote daemons work as they do for the CLI.
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    pub fn new() -> Self {
        Self
    }
}

/// Run a docker CLI command and return stdout on success.
async fn run_docker(args: &[&str]) -> Result<String, DaemonError> {
    let output = tokio::process::Command::new("docker")
        .args(args)
        .output()
        .await
        .map_err(|e| DaemonError::Unavailable(format!("failed to exec docker: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.contains("No such container") || stderr.contains("No such object") {
            return Err(DaemonError::NotFound(stderr.to_string()));
        }
        Err(DaemonError::CommandFailed(format!(
            "docker {} failed: {}",
            args.first().unwrap_or(&""),
            stderr
        )))
    }
}

#[async_trait]
impl ContainerDaemon for DockerCli {
    async fn ping(&self) -> Result<(), DaemonError> {
        run_docker(&["version", "--format", "{{.Server.Version}}"]).await.map(|_| ())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, DaemonError> {
        match run_docker(&["image", "inspect", image, "--format", "{{.Id}}"]).await {
            Ok(_) => Ok(true),
            Err(DaemonError::NotFound(_)) | Err(DaemonError::CommandFailed(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn build_image(&self, image: &str, dockerfile: &str) -> Result<(), DaemonError> {
        // `docker build -` reads the Dockerfile from stdin; no build context
        // is shipped, which is all the sandbox image needs.
        let mut child = tokio::process::Command::new("docker")
            .args(["build", "-t", image, "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DaemonError::Unavailable(format!("failed to exec docker: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(dockerfile.as_bytes()).await?;
            drop(stdin);
        }

        let output = child.wait_with_output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(DaemonError::CommandFailed(format!(
                "docker build failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn ensure_network(&self, network: &str) -> Result<(), DaemonError> {
        let existing = run_docker(&["network", "ls", "--format", "{{.Name}}"]).await?;
        if existing.lines().any(|n| n == network) {
            return Ok(());
        }
        run_docker(&["network", "create", network]).await.map(|_| ())
    }

    async fn create(&self, opts: &CreateOptions) -> Result<(), DaemonError> {
        let cpus = format!("{}", opts.cpus);
        let memory = format!("{}m", opts.memory_mb);
        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            opts.name.clone(),
            "--cpus".into(),
            cpus,
            "--memory".into(),
            memory,
        ];
        if let Some(ref network) = opts.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        for (key, value) in &opts.labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &opts.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        // Warm sandboxes idle until a command is exec'd into them.
        args.push(opts.image.clone());
        args.extend(["sleep".into(), "infinity".into()]);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_docker(&arg_refs).await.map(|_| ())
    }

    async fn start(&self, name: &str) -> Result<(), DaemonError> {
        run_docker(&["start", name]).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> Result<(), DaemonError> {
        run_docker(&["stop", "-t", "5", name]).await.map(|_| ())
    }

    async fn remove(&self, name: &str) -> Result<(), DaemonError> {
        run_docker(&["rm", "-f", name]).await.map(|_| ())
    }

    async fn is_running(&self, name: &str) -> Result<bool, DaemonError> {
        match run_docker(&["inspect", "--format", "{{.State.Running}}", name]).await {
            Ok(out) => Ok(out == "true"),
            Err(DaemonError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list_labeled(&self, label: &str) -> Result<Vec<ContainerInfo>, DaemonError> {
        let filter = format!("label={label}");
        let out = run_docker(&[
            "ps",
            "-a",
            "--filter",
            &filter,
            "--format",
            "{{.Names}}\t{{.State}}\t{{.CreatedAt}}",
        ])
        .await?;

        let mut infos = Vec::new();
        for line in out.lines() {
            let mut parts = line.split('\t');
            let Some(name) = parts.next() else { continue };
            let state = parts.next().unwrap_or_default();
            let created_at_ms = parts
                .next()
                .and_then(|s| {
                    // docker prints e.g. "2026-07-31 10:15:04 +0000 UTC"
                    let trimmed = s.rsplit_once(' ').map(|(head, _)| head).unwrap_or(s);
                    chrono::DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S %z").ok()
                })
                .map(|dt| dt.timestamp_millis())
                .unwrap_or(0);
            let labels = self.container_labels(name).await.unwrap_or_default();
            infos.push(ContainerInfo {
                name: name.to_string(),
                running: state == "running",
                labels,
                created_at_ms,
            });
        }
        Ok(infos)
    }

    async fn exec(
        &self,
        name: &str,
        cmd: &[&str],
        opts: &ExecOptions,
    ) -> Result<ExecOutput, DaemonError> {
        let mut args: Vec<&str> = vec!["exec"];
        if let Some(ref user) = opts.user {
            args.push("-u");
            args.push(user);
        }
        if let Some(ref workdir) = opts.workdir {
            args.push("-w");
            args.push(workdir);
        }
        args.push(name);
        args.extend_from_slice(cmd);

        let output = tokio::process::Command::new("docker")
            .args(&args)
            .output()
            .await
            .map_err(|e| DaemonError::Unavailable(format!("failed to exec docker: {e}")))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn copy_workspace_in(
        &self,
        name: &str,
        host_path: &Path,
        excludes: &[&str],
    ) -> Result<(), DaemonError> {
        // tar on the host piped into `docker cp -`, which unpacks the stream
        // at the destination path inside the container.
        let host = host_path.display().to_string();
        let mut tar_args: Vec<String> = vec!["-C".into(), host, "-cf".into(), "-".into()];
        for pattern in excludes {
            tar_args.push(format!("--exclude={pattern}"));
        }
        tar_args.push(".".into());

        let mut tar = tokio::process::Command::new("tar")
            .args(&tar_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let dest = format!("{name}:/workspace");
        let mut cp = tokio::process::Command::new("docker")
            .args(["cp", "-", &dest])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DaemonError::Unavailable(format!("failed to exec docker: {e}")))?;

        if let (Some(mut tar_out), Some(mut cp_in)) = (tar.stdout.take(), cp.stdin.take()) {
            tokio::io::copy(&mut tar_out, &mut cp_in).await?;
        }

        let tar_status = tar.wait_with_output().await?;
        let cp_status = cp.wait_with_output().await?;
        if !tar_status.status.success() {
            return Err(DaemonError::CommandFailed(format!(
                "tar failed: {}",
                String::from_utf8_lossy(&tar_status.stderr).trim()
            )));
        }
        if !cp_status.status.success() {
            return Err(DaemonError::CommandFailed(format!(
                "docker cp failed: {}",
                String::from_utf8_lossy(&cp_status.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl DockerCli {
    async fn container_labels(&self, name: &str) -> Result<HashMap<String, String>, DaemonError> {
        let out = run_docker(&["inspect", "--format", "{{json .Config.Labels}}", name]).await?;
        Ok(serde_json::from_str(&out).unwrap_or_default())
    }
}
