//! Main orchestrator for pipeline execution.
//!
//! Drives the fixed pipeline shape: resolve the graph, start peer units,
//! start dependency units, then run the root spec's bootstrap, build,
//! deploy, health check and terminal action. Every container id is
//! registered before the next step runs, and any failure ends the run.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::adapters::{ContainerConfig, ContainerRuntime, CredentialProvisioner, SourceFetcher};
use crate::config::{RunOptions, BUILD_MOUNT_PATH, ELEVATED_USER, INTERACTIVE_SHELL};
use crate::domain::spec::{INTEGRATION_DOCKERFILE, SERVICE_DOCKERFILE};
use crate::domain::{
    BuildStage, DependencyUnit, Link, PipelineSpec, PipelineState, RunReport, Session,
    TerminalAction,
};
use crate::error::{PipelineError, PipelineResult};

use super::cleanup::{CleanupController, CleanupOutcome};
use super::registry::{LiveRegistry, Registration};
use super::resolver::DependencyResolver;

/// Where a container's image comes from
enum ImageSource<'a> {
    /// Build from the spec's source using `config.dockerfile`
    Build,

    /// Existing image; empty means the spec's service image
    Reference(&'a str),
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    fetcher: Arc<dyn SourceFetcher>,
    credentials: Arc<dyn CredentialProvisioner>,
    registry: Arc<LiveRegistry>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        fetcher: Arc<dyn SourceFetcher>,
        credentials: Arc<dyn CredentialProvisioner>,
        registry: Arc<LiveRegistry>,
        options: RunOptions,
    ) -> Self {
        Self {
            runtime,
            fetcher,
            credentials,
            registry,
            options,
        }
    }

    pub fn registry(&self) -> &Arc<LiveRegistry> {
        &self.registry
    }

    /// Run the pipeline, then hand off to cleanup with the result.
    pub async fn run_to_completion(
        &self,
        root: &PipelineSpec,
        cleanup: &CleanupController,
    ) -> (RunReport, CleanupOutcome) {
        let mut session = Session::new(&root.name);
        let result = self.run(root, &mut session).await;

        let containers = self.registry.containers();
        let links = self.registry.links();

        let outcome = match result {
            Ok(()) => cleanup.cleanup(0, None).await,
            Err(e) => {
                session.fail(e.to_string());
                cleanup.cleanup(e.exit_code(), Some(&e)).await
            }
        };

        let report = RunReport {
            session,
            containers,
            links,
        };
        (report, outcome)
    }

    /// Execute every pipeline stage for `root`. Stops at the first error.
    #[instrument(skip(self, root, session), fields(spec = %root.name, session = %session.id))]
    pub async fn run(&self, root: &PipelineSpec, session: &mut Session) -> PipelineResult<()> {
        info!("Starting pipeline");

        session.transition(PipelineState::ResolvingGraph);
        let graph = DependencyResolver::new(
            self.fetcher.as_ref(),
            self.credentials.as_ref(),
            self.options.key_path.as_deref(),
        )
        .resolve(root)
        .await?;

        session.transition(PipelineState::StartingPeers);
        for unit in &graph.peers {
            self.start_unit(PipelineState::StartingPeers, unit).await?;
        }

        session.transition(PipelineState::StartingDependencies);
        for unit in &graph.dependencies {
            self.start_unit(PipelineState::StartingDependencies, unit).await?;
        }

        if root.has_bootstrap() {
            session.transition(PipelineState::RootBootstrap);
            self.root_bootstrap(root).await?;
        }

        if !self.options.dev {
            if let Some(build) = &root.build {
                session.transition(PipelineState::RootBuild);
                self.root_build(root, build).await?;
            }

            session.transition(PipelineState::RootDeploy);
            self.root_deploy(root).await?;

            if root.has_health_check() {
                session.transition(PipelineState::RootHealthCheck);
                self.root_health_check(root).await?;
            }
        }

        session.transition(PipelineState::TerminalAction);
        match self.options.terminal_action() {
            TerminalAction::Shell => self.interactive_shell(root).await?,
            TerminalAction::Test => self.run_tests(root).await?,
        }

        session.succeed();
        info!("Pipeline completed");
        Ok(())
    }

    /// Start one peer or dependency unit: optional bootstrap, the detached
    /// service container, then an optional health check.
    #[instrument(skip(self, unit), fields(unit = %unit.name(), source = %unit.source))]
    pub async fn start_unit(
        &self,
        stage: PipelineState,
        unit: &DependencyUnit,
    ) -> PipelineResult<()> {
        let spec = &unit.spec;
        let integration_image = spec.integration_image();

        if spec.has_bootstrap() {
            info!("Bootstrapping unit");
            self.launch(
                stage,
                spec,
                ImageSource::Reference(&integration_image),
                ContainerConfig::blocking(spec.integration.bootstrap.clone()),
            )
            .await?;
        }

        let container_id = self
            .launch(
                stage,
                spec,
                ImageSource::Reference(""),
                ContainerConfig::service().with_env(spec.deployment.env.clone()),
            )
            .await?;
        info!(container = %container_id, "Unit service started");

        if spec.has_health_check() {
            info!("Checking unit health");
            self.launch(
                stage,
                spec,
                ImageSource::Reference(&integration_image),
                ContainerConfig::blocking(spec.deployment.health.clone()),
            )
            .await?;
        }

        Ok(())
    }

    async fn root_bootstrap(&self, root: &PipelineSpec) -> PipelineResult<()> {
        info!("Running root bootstrap");
        let config = ContainerConfig::blocking(root.integration.bootstrap.clone())
            .with_dockerfile(INTEGRATION_DOCKERFILE)
            .with_env(self.options.root_env(root));
        self.launch(PipelineState::RootBootstrap, root, ImageSource::Build, config)
            .await
            .map(drop)
    }

    async fn root_build(&self, root: &PipelineSpec, build: &BuildStage) -> PipelineResult<()> {
        info!(image = %build.image, "Running build stage");
        let config = ContainerConfig::blocking(build.command.clone())
            .with_workspace(&self.options.workdir, BUILD_MOUNT_PATH, ELEVATED_USER)
            .with_env(self.options.root_env(root));
        self.launch(
            PipelineState::RootBuild,
            root,
            ImageSource::Reference(&build.image),
            config,
        )
        .await
        .map(drop)
    }

    async fn root_deploy(&self, root: &PipelineSpec) -> PipelineResult<()> {
        info!("Deploying root service");
        let config = ContainerConfig::service()
            .with_dockerfile(SERVICE_DOCKERFILE)
            .with_env(self.options.root_env(root));
        let container_id = self
            .launch(PipelineState::RootDeploy, root, ImageSource::Build, config)
            .await?;
        info!(container = %container_id, "Root service started");
        Ok(())
    }

    async fn root_health_check(&self, root: &PipelineSpec) -> PipelineResult<()> {
        info!("Checking root service health");
        let config = ContainerConfig::blocking(root.deployment.health.clone())
            .with_dockerfile(INTEGRATION_DOCKERFILE)
            .with_env(self.options.root_env(root));
        self.launch(PipelineState::RootHealthCheck, root, ImageSource::Build, config)
            .await
            .map(drop)
    }

    async fn interactive_shell(&self, root: &PipelineSpec) -> PipelineResult<()> {
        info!("Attaching interactive shell. Exit the shell to tear down.");
        let shell = vec![INTERACTIVE_SHELL.to_string()];
        let env = self.options.root_env(root);

        match &root.build {
            Some(build) => {
                let config = ContainerConfig::blocking(shell)
                    .interactive()
                    .with_workspace(&self.options.workdir, BUILD_MOUNT_PATH, ELEVATED_USER)
                    .with_env(env);
                self.launch(
                    PipelineState::TerminalAction,
                    root,
                    ImageSource::Reference(&build.image),
                    config,
                )
                .await?;
            }
            None => {
                let config = ContainerConfig::blocking(shell)
                    .interactive()
                    .with_dockerfile(INTEGRATION_DOCKERFILE)
                    .with_env(env);
                self.launch(PipelineState::TerminalAction, root, ImageSource::Build, config)
                    .await?;
            }
        }

        Ok(())
    }

    async fn run_tests(&self, root: &PipelineSpec) -> PipelineResult<()> {
        info!("Running tests");
        let config = ContainerConfig::blocking(root.integration.run_test.clone())
            .with_dockerfile(INTEGRATION_DOCKERFILE)
            .with_env(self.options.root_env(root));
        self.launch(PipelineState::TerminalAction, root, ImageSource::Build, config)
            .await
            .map(drop)
    }

    /// Reserve and register a container id, start the container under it,
    /// and publish its link if it exposes ports.
    ///
    /// The config always receives the session's host-network setting and a
    /// snapshot of every link published so far. The id is registered before
    /// the runtime call, so cleanup sees a container that is still starting.
    async fn launch(
        &self,
        stage: PipelineState,
        spec: &PipelineSpec,
        image: ImageSource<'_>,
        mut config: ContainerConfig,
    ) -> PipelineResult<String> {
        let reserved = self.runtime.reserve_id(spec);
        if self.registry.register(&reserved) == Registration::Closed {
            return Err(PipelineError::Interrupted);
        }

        config.name = Some(reserved);
        config.host_network = self.options.host_network;
        config.links = self.registry.links();

        let result = match image {
            ImageSource::Build => self.runtime.build_and_run(spec, &config).await,
            ImageSource::Reference(image) => {
                self.runtime.start_by_reference(spec, image, &config).await
            }
        };
        let container_id = result.map_err(|e| PipelineError::runtime(stage, e))?;

        // Cleanup may have drained the registry while the container started
        if self.registry.register(&container_id) == Registration::Closed {
            if let Err(e) = self.runtime.kill(&container_id).await {
                warn!(container = %container_id, error = %e, "Container already shut down");
            }
            return Err(PipelineError::Interrupted);
        }

        if config.expose_ports {
            self.registry.add_link(Link::new(&container_id, spec.slug()));
        }

        Ok(container_id)
    }
}
