//! Docker runtime adapter.
//!
//! Drives the `docker` CLI as a subprocess. Blocking containers run in the
//! foreground with inherited stdio so their output lands in the CI log;
//! detached containers return as soon as docker reports them running.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DEFAULT_DOCKER_BINARY;
use crate::domain::spec::SERVICE_DOCKERFILE;
use crate::domain::PipelineSpec;

use super::{ContainerConfig, ContainerRuntime};

/// Docker adapter using the CLI
pub struct DockerCli {
    /// Path to the docker binary (default: "docker")
    binary_path: String,

    /// Build context for `build_and_run`
    context_dir: PathBuf,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Create an adapter using `docker` from PATH and the current directory as build context
    pub fn new() -> Self {
        Self {
            binary_path: DEFAULT_DOCKER_BINARY.to_string(),
            context_dir: PathBuf::from("."),
        }
    }

    /// Create an adapter with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            ..Self::new()
        }
    }

    pub fn with_context_dir(mut self, context_dir: impl Into<PathBuf>) -> Self {
        self.context_dir = context_dir.into();
        self
    }

    /// Unique container name for a spec, e.g. `eazy-orders-1f2e3d4c`
    pub fn container_name(spec: &PipelineSpec) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("eazy-{}-{}", spec.slug(), &suffix[..8])
    }

    /// Arguments for `docker run`
    pub fn run_args(name: &str, image: &str, config: &ContainerConfig) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--name".to_string(), name.to_string()];

        if config.attach {
            args.push("-i".to_string());
            args.push("-t".to_string());
        } else if !config.wait {
            args.push("-d".to_string());
        }

        if config.host_network {
            args.push("--network".to_string());
            args.push("host".to_string());
        } else {
            for link in &config.links {
                args.push("--link".to_string());
                args.push(link.to_string());
            }
        }

        if config.expose_ports {
            args.push("-P".to_string());
        }

        for entry in &config.env {
            args.push("-e".to_string());
            args.push(entry.clone());
        }

        for mount in &config.mounts {
            let mut volume = format!("{}:{}", mount.host.display(), mount.container);
            if mount.read_only {
                volume.push_str(":ro");
            }
            args.push("-v".to_string());
            args.push(volume);
        }

        if let Some(user) = &config.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }

        args.push(image.to_string());
        args.extend(config.command.iter().cloned());
        args
    }

    /// Build the image for `config` and return its tag
    async fn build_image(&self, spec: &PipelineSpec, config: &ContainerConfig) -> Result<String> {
        let dockerfile = config.dockerfile.as_deref().unwrap_or(SERVICE_DOCKERFILE);
        let tag = if config.root_image {
            spec.service_image()
        } else {
            spec.integration_image()
        };
        let dockerfile_path = self.context_dir.join(dockerfile);

        info!(spec = %spec.name, %tag, dockerfile, "Building image");

        let status = Command::new(&self.binary_path)
            .arg("build")
            .arg("-f")
            .arg(&dockerfile_path)
            .arg("-t")
            .arg(&tag)
            .arg(&self.context_dir)
            .stdin(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to spawn docker build for '{}'", spec.name))?;

        if !status.success() {
            anyhow::bail!(
                "docker build of {} from {} failed with exit code {}",
                tag,
                dockerfile_path.display(),
                status.code().unwrap_or(-1)
            );
        }

        Ok(tag)
    }

    /// Start a container and return its name
    async fn run_container(
        &self,
        spec: &PipelineSpec,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<String> {
        let name = config
            .name
            .clone()
            .unwrap_or_else(|| Self::container_name(spec));
        let args = Self::run_args(&name, image, config);
        debug!(?args, "docker run");

        if config.is_blocking() {
            let stdin = if config.attach {
                Stdio::inherit()
            } else {
                Stdio::null()
            };
            let status = Command::new(&self.binary_path)
                .args(&args)
                .stdin(stdin)
                .status()
                .await
                .with_context(|| format!("Failed to spawn docker run for '{}'", name))?;

            if !status.success() {
                anyhow::bail!(
                    "container {} ({}) exited with code {}",
                    name,
                    image,
                    status.code().unwrap_or(-1)
                );
            }
        } else {
            let output = Command::new(&self.binary_path)
                .args(&args)
                .stdin(Stdio::null())
                .output()
                .await
                .with_context(|| format!("Failed to spawn docker run for '{}'", name))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                anyhow::bail!(
                    "container {} ({}) failed to start: {}",
                    name,
                    image,
                    stderr.trim()
                );
            }
            info!(container = %name, %image, "Container running");
        }

        Ok(name)
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    fn name(&self) -> &str {
        "docker"
    }

    fn reserve_id(&self, spec: &PipelineSpec) -> String {
        Self::container_name(spec)
    }

    async fn build_and_run(&self, spec: &PipelineSpec, config: &ContainerConfig) -> Result<String> {
        let tag = self.build_image(spec, config).await?;
        self.run_container(spec, &tag, config).await
    }

    async fn start_by_reference(
        &self,
        spec: &PipelineSpec,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<String> {
        let image = if image.is_empty() {
            spec.service_image()
        } else {
            image.to_string()
        };
        self.run_container(spec, &image, config).await
    }

    async fn kill(&self, container_id: &str) -> Result<()> {
        let output = Command::new(&self.binary_path)
            .args(["kill", container_id])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn docker kill for '{}'", container_id))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("docker kill {} failed: {}", container_id, stderr.trim());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Mount;
    use crate::domain::Link;
    use std::path::Path;

    fn spec(name: &str) -> PipelineSpec {
        PipelineSpec {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_docker_adapter_creation() {
        let adapter = DockerCli::new();
        assert_eq!(adapter.name(), "docker");
        assert_eq!(adapter.binary_path, "docker");
    }

    #[test]
    fn test_custom_binary_path() {
        let adapter = DockerCli::with_binary_path("/usr/local/bin/podman");
        assert_eq!(adapter.binary_path, "/usr/local/bin/podman");
    }

    #[test]
    fn test_container_name_is_sanitized() {
        let name = DockerCli::container_name(&spec("Orders API"));
        assert!(name.starts_with("eazy-orders-api-"));
        assert_eq!(name.len(), "eazy-orders-api-".len() + 8);
    }

    #[test]
    fn test_reserved_ids_are_unique() {
        let adapter = DockerCli::new();
        let first = adapter.reserve_id(&spec("orders"));
        let second = adapter.reserve_id(&spec("orders"));

        assert!(first.starts_with("eazy-orders-"));
        assert_ne!(first, second);
    }

    #[test]
    fn test_detached_service_args() {
        let config = ContainerConfig {
            links: vec![Link::new("eazy-pg-1", "postgres")],
            env: vec!["PORT=8080".to_string()],
            ..ContainerConfig::service()
        };

        let args = DockerCli::run_args("eazy-api-1", "api:latest", &config);
        assert_eq!(
            args,
            vec![
                "run", "--name", "eazy-api-1", "-d", "--link", "eazy-pg-1:postgres", "-P",
                "-e", "PORT=8080", "api:latest"
            ]
        );
    }

    #[test]
    fn test_host_network_drops_links() {
        let config = ContainerConfig {
            host_network: true,
            links: vec![Link::new("eazy-pg-1", "postgres")],
            ..ContainerConfig::blocking(vec!["make".to_string(), "test".to_string()])
        };

        let args = DockerCli::run_args("eazy-api-2", "api-integration:latest", &config);
        assert!(args.contains(&"host".to_string()));
        assert!(!args.contains(&"--link".to_string()));
        assert!(!args.contains(&"-d".to_string()));
        assert_eq!(&args[args.len() - 2..], ["make", "test"]);
    }

    #[test]
    fn test_interactive_workspace_args() {
        let config = ContainerConfig::blocking(vec!["/bin/bash".to_string()])
            .interactive()
            .with_workspace(Path::new("/src/app"), "/eazy", "root");

        let args = DockerCli::run_args("eazy-api-3", "rust:1.80", &config);
        assert!(args.contains(&"-i".to_string()));
        assert!(args.contains(&"-t".to_string()));
        assert!(args.contains(&"/src/app:/eazy".to_string()));
        assert!(args.windows(2).any(|w| w == ["--user", "root"]));
    }

    #[test]
    fn test_read_only_mount() {
        let config = ContainerConfig {
            mounts: vec![Mount {
                host: PathBuf::from("/etc/certs"),
                container: "/certs".to_string(),
                read_only: true,
            }],
            ..ContainerConfig::blocking(Vec::new())
        };

        let args = DockerCli::run_args("eazy-x-1", "x", &config);
        assert!(args.contains(&"/etc/certs:/certs:ro".to_string()));
    }
}
