//! Run configuration for eazy.
//!
//! Configuration sources (highest priority first):
//! 1. CLI flags
//! 2. Environment variables (EAZY_FILE, EAZY_KEY_PATH, EAZY_DOCKER)
//! 3. Defaults (./eazy.yml, docker on PATH)
//!
//! Paths beginning with `~/` are expanded against the user's home directory.

use std::path::{Path, PathBuf};

use crate::domain::spec::is_env_assignment;
use crate::domain::{PipelineSpec, TerminalAction};
use crate::error::{PipelineError, PipelineResult};

/// Spec file read when no `-f` is given
pub const DEFAULT_SPEC_FILE: &str = "./eazy.yml";

/// Name of the spec file inside a fetched dependency source
pub const SPEC_FILE_NAME: &str = "eazy.yml";

/// Where the working directory is mounted inside build containers
pub const BUILD_MOUNT_PATH: &str = "/eazy";

/// User that build and dev-shell containers run as
pub const ELEVATED_USER: &str = "root";

/// Command for the interactive shell terminal action
pub const INTERACTIVE_SHELL: &str = "/bin/bash";

/// Default container runtime binary
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

/// Resolved options for a single run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// `KEY=VALUE` overrides applied to every root container
    pub env_overrides: Vec<String>,

    /// Start dependencies and drop into a shell; skip build and deploy
    pub dev: bool,

    /// Deploy the root service, then drop into a shell instead of testing
    pub integration: bool,

    /// Run every container on the host network
    pub host_network: bool,

    /// Private key for dependency source authentication
    pub key_path: Option<PathBuf>,

    /// Directory mounted into build and dev-shell containers
    pub workdir: PathBuf,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            env_overrides: Vec::new(),
            dev: false,
            integration: false,
            host_network: false,
            key_path: None,
            workdir: PathBuf::from("."),
        }
    }
}

impl RunOptions {
    /// Reject malformed env overrides up front
    pub fn validate(&self) -> PipelineResult<()> {
        for entry in &self.env_overrides {
            if !is_env_assignment(entry) {
                return Err(PipelineError::Config(format!(
                    "invalid env override '{}' (expected KEY=VALUE)",
                    entry
                )));
            }
        }
        Ok(())
    }

    pub fn terminal_action(&self) -> TerminalAction {
        TerminalAction::select(self.dev, self.integration)
    }

    /// Root container environment: the spec's deployment env with
    /// overrides applied on top. Later entries replace earlier keys.
    pub fn root_env(&self, spec: &PipelineSpec) -> Vec<String> {
        merge_env(&spec.deployment.env, &self.env_overrides)
    }
}

/// Merge two `KEY=VALUE` lists, keeping first-seen key order
pub fn merge_env(base: &[String], overrides: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(base.len() + overrides.len());

    for entry in base.iter().chain(overrides) {
        let key = env_key(entry);
        match merged.iter_mut().find(|existing| env_key(existing) == key) {
            Some(existing) => *existing = entry.clone(),
            None => merged.push(entry.clone()),
        }
    }

    merged
}

fn env_key(entry: &str) -> &str {
    entry.split_once('=').map(|(k, _)| k).unwrap_or(entry)
}

/// Expand a leading `~/` against the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
