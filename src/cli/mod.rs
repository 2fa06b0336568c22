//! Command-line interface for eazy.
//!
//! A single command: read the spec, run the pipeline, tear everything down,
//! and exit 0 on success or 1 on any failure or interrupt.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use crate::adapters::{
    ContainerRuntime, DockerCli, GitFetcher, SshAgentProvisioner, SttyTerminal, TerminalController,
};
use crate::config::{expand_home, RunOptions, DEFAULT_DOCKER_BINARY, DEFAULT_SPEC_FILE};
use crate::core::{spawn_interrupt_listener, CleanupController, LiveRegistry, Orchestrator};
use crate::domain::{PipelineSpec, RunReport};

/// eazy - containerized CI/CD pipeline runner
#[derive(Parser, Debug)]
#[command(name = "eazy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The eazy CI file
    #[arg(short = 'f', long = "file", env = "EAZY_FILE", default_value = DEFAULT_SPEC_FILE)]
    pub file: PathBuf,

    /// Environment variable for root containers (repeat for multiple)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Run dependencies and peer dependencies, then open a shell
    #[arg(short = 'd', long)]
    pub dev: bool,

    /// Run dependencies, peer dependencies and the deployed service, then open a shell
    #[arg(short = 'i', long)]
    pub integration: bool,

    /// Run every container on the host network
    #[arg(short = 'H', long = "host-network")]
    pub host_network: bool,

    /// SSH private key for dependency repository access
    #[arg(short = 'k', long = "key", env = "EAZY_KEY_PATH")]
    pub key_path: Option<PathBuf>,

    /// Container runtime binary
    #[arg(long, env = "EAZY_DOCKER", default_value = DEFAULT_DOCKER_BINARY)]
    pub docker: String,

    /// Write the run report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl Cli {
    /// Resolve flags into run options for `workdir`
    pub fn run_options(&self, workdir: PathBuf) -> RunOptions {
        RunOptions {
            env_overrides: self.env.clone(),
            dev: self.dev,
            integration: self.integration,
            host_network: self.host_network,
            key_path: self.key_path.as_deref().map(expand_home),
            workdir,
        }
    }

    /// Execute the pipeline and return the process exit code
    pub async fn execute(self) -> i32 {
        let workdir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let options = self.run_options(workdir.clone());

        let registry = Arc::new(LiveRegistry::new());
        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(DockerCli::with_binary_path(&self.docker).with_context_dir(&workdir));
        let terminal: Arc<dyn TerminalController> = Arc::new(SttyTerminal);
        let cleanup = Arc::new(CleanupController::new(
            registry.clone(),
            runtime.clone(),
            terminal,
        ));
        spawn_interrupt_listener(cleanup.clone());

        let root = match options
            .validate()
            .and_then(|()| PipelineSpec::from_file(&self.file))
        {
            Ok(spec) => spec,
            Err(e) => return cleanup.cleanup(e.exit_code(), Some(&e)).await.exit_code,
        };

        let credentials = Arc::new(SshAgentProvisioner::new(options.key_path.clone()));
        let orchestrator = Orchestrator::new(
            runtime,
            Arc::new(GitFetcher::new()),
            credentials,
            registry,
            options,
        );

        let (report, outcome) = orchestrator.run_to_completion(&root, &cleanup).await;
        info!(
            spec = %report.session.spec_name,
            states = ?report.session.history,
            containers = report.containers.len(),
            stopped = outcome.stopped.len(),
            already_stopped = outcome.already_stopped.len(),
            "Run finished"
        );

        if let Some(path) = &self.report {
            if let Err(e) = write_report(&report, path) {
                let message = format!("{:#}", e);
                warn!(error = %message, "Failed to write run report");
            }
        }

        outcome.exit_code
    }
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report: {}", path.display()))
}
