//! Adapter interfaces for external systems.
//!
//! The pipeline core never talks to docker, git or ssh directly; it goes
//! through these traits so the state machine can be driven by fakes in tests.

pub mod docker;
pub mod fake;
pub mod git;
pub mod ssh;
pub mod terminal;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{Link, PipelineSpec, SourceRef};

// Re-export the concrete adapters
pub use docker::DockerCli;
pub use git::GitFetcher;
pub use ssh::SshAgentProvisioner;
pub use terminal::SttyTerminal;

/// A bind mount from the host into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    /// Read-write bind mount
    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }
}

/// How a container should be started
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Name reserved with [`ContainerRuntime::reserve_id`] before the start call
    pub name: Option<String>,

    /// `KEY=VALUE` environment
    pub env: Vec<String>,

    /// Dockerfile to build from (only used by `build_and_run`)
    pub dockerfile: Option<String>,

    /// Command override; empty runs the image default
    pub command: Vec<String>,

    /// Block until the container's process exits
    pub wait: bool,

    /// Join the host network
    pub host_network: bool,

    /// Publish the image's exposed ports
    pub expose_ports: bool,

    /// Attach an interactive terminal (implies `wait`)
    pub attach: bool,

    /// Tag the built image as the service image instead of the integration image
    pub root_image: bool,

    /// Containers this one must be able to reach
    pub links: Vec<Link>,

    pub mounts: Vec<Mount>,

    /// User to run as inside the container
    pub user: Option<String>,
}

impl ContainerConfig {
    /// Blocking, non-interactive container running `command`
    pub fn blocking(command: Vec<String>) -> Self {
        Self {
            command,
            wait: true,
            ..Default::default()
        }
    }

    /// Detached service container with published ports
    pub fn service() -> Self {
        Self {
            expose_ports: true,
            root_image: true,
            ..Default::default()
        }
    }

    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = Some(dockerfile.into());
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn interactive(mut self) -> Self {
        self.attach = true;
        self.wait = true;
        self
    }

    /// Mount the working directory read-write and run as `user`
    pub fn with_workspace(mut self, host: &Path, container: &str, user: &str) -> Self {
        self.mounts.push(Mount::read_write(host, container));
        self.user = Some(user.to_string());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.wait || self.attach
    }
}

/// Container runtime collaborator
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Human-readable runtime name
    fn name(&self) -> &str;

    /// Pick the id of the next container for `spec`. The caller registers it
    /// and passes it back through `ContainerConfig::name`, so a container
    /// still starting when cleanup runs is already known to cleanup.
    fn reserve_id(&self, spec: &PipelineSpec) -> String;

    /// Build an image from the spec's source and start a container from it.
    /// Returns the container id.
    async fn build_and_run(&self, spec: &PipelineSpec, config: &ContainerConfig)
        -> Result<String>;

    /// Start a container from an existing image. An empty reference means the
    /// spec's service image. Returns the container id.
    async fn start_by_reference(
        &self,
        spec: &PipelineSpec,
        image: &str,
        config: &ContainerConfig,
    ) -> Result<String>;

    /// Stop a container. Fails if the container is already gone.
    async fn kill(&self, container_id: &str) -> Result<()>;
}

/// Fetches a dependency's spec from its source
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_spec(&self, source: &SourceRef, key_path: Option<&Path>)
        -> Result<PipelineSpec>;
}

/// Sets up credentials for source fetches. Safe to call more than once.
#[async_trait]
pub trait CredentialProvisioner: Send + Sync {
    async fn set_up(&self) -> Result<()>;
}

/// Restores terminal state after interactive containers (best effort)
#[async_trait]
pub trait TerminalController: Send + Sync {
    async fn restore_state(&self);
}
