//! Docker execution backend.
//!
//! Runs the artifact in a throwaway container: probe the daemon (absence
//! is the one fatal condition), create a container from the configured
//! image with the artifact substituted into the command template, wait
//! bounded by the sandbox timeout, collect combined stdout/stderr, and
//! force-remove the container. Container-level failures (missing image,
//! non-zero exit, timeout) degrade to a failed verdict; they describe
//! the artifact or the environment, not the orchestrator.

use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::models::ContainerCreateBody;
use bollard::query_parameters::{
    CreateContainerOptions, LogsOptionsBuilder, RemoveContainerOptionsBuilder,
    StartContainerOptions, WaitContainerOptions,
};
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::config::SandboxSection;
use crate::sandbox::{Sandbox, SandboxError, SandboxVerdict};

/// Placeholder in the command template replaced by the artifact text.
const ARTIFACT_PLACEHOLDER: &str = "{artifact}";

pub struct DockerSandbox {
    image: String,
    command: Vec<String>,
}

impl DockerSandbox {
    pub fn new(config: &SandboxSection) -> Self {
        Self {
            image: config.image.clone(),
            command: config.command.clone(),
        }
    }

    fn render_command(&self, artifact: &Artifact) -> Vec<String> {
        self.command
            .iter()
            .map(|part| part.replace(ARTIFACT_PLACEHOLDER, artifact.as_str()))
            .collect()
    }

    async fn connect(&self) -> Result<Docker, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        Ok(docker)
    }

    async fn collect_logs(&self, docker: &Docker, container_id: &str) -> String {
        let options = LogsOptionsBuilder::default()
            .stdout(true)
            .stderr(true)
            .build();
        let mut stream = docker.logs(container_id, Some(options));
        let mut combined = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    combined.push_str(&String::from_utf8_lossy(&output.into_bytes()));
                }
                Err(error) => {
                    warn!(%error, "failed to read container logs");
                    break;
                }
            }
        }
        combined
    }

    async fn remove_container(&self, docker: &Docker, container_id: &str) {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        if let Err(error) = docker.remove_container(container_id, Some(options)).await {
            warn!(%error, container_id, "failed to remove sandbox container");
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    fn name(&self) -> &str {
        "docker"
    }

    async fn execute(
        &self,
        artifact: &Artifact,
        timeout: Duration,
    ) -> Result<SandboxVerdict, SandboxError> {
        let docker = self.connect().await?;

        let body = ContainerCreateBody {
            image: Some(self.image.clone()),
            cmd: Some(self.render_command(artifact)),
            network_disabled: Some(true),
            ..Default::default()
        };
        let container = match docker
            .create_container(None::<CreateContainerOptions>, body)
            .await
        {
            Ok(container) => container,
            Err(error) => {
                return Ok(SandboxVerdict::failed(
                    -1,
                    format!("container creation failed: {error}"),
                ));
            }
        };
        let container_id = container.id;
        debug!(container_id = %container_id, image = %self.image, "sandbox container created");

        if let Err(error) = docker
            .start_container(&container_id, None::<StartContainerOptions>)
            .await
        {
            self.remove_container(&docker, &container_id).await;
            return Ok(SandboxVerdict::failed(
                -1,
                format!("container start failed: {error}"),
            ));
        }

        let mut wait_stream =
            docker.wait_container(&container_id, None::<WaitContainerOptions>);
        let waited = tokio::time::timeout(timeout, wait_stream.next()).await;

        let verdict = match waited {
            Err(_) => {
                let output = self.collect_logs(&docker, &container_id).await;
                SandboxVerdict::failed(
                    -1,
                    format!(
                        "execution exceeded {}s timeout\n{output}",
                        timeout.as_secs()
                    ),
                )
            }
            Ok(None) => {
                let output = self.collect_logs(&docker, &container_id).await;
                SandboxVerdict::failed(-1, format!("wait stream ended early\n{output}"))
            }
            Ok(Some(Err(error))) => {
                // bollard surfaces non-zero container exits as errors on
                // the wait stream; the logs still tell the real story.
                let output = self.collect_logs(&docker, &container_id).await;
                SandboxVerdict::failed(-1, format!("{error}\n{output}"))
            }
            Ok(Some(Ok(response))) => {
                let output = self.collect_logs(&docker, &container_id).await;
                let exit_status = response.status_code;
                SandboxVerdict {
                    ok: exit_status == 0,
                    exit_status,
                    combined_output: output,
                }
            }
        };

        self.remove_container(&docker, &container_id).await;
        Ok(verdict)
    }
}
