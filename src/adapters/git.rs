//! Git source fetcher.
//!
//! Shallow-clones a dependency repository into a temporary directory and
//! reads its `eazy.yml`. References that name an existing local directory are
//! read in place without cloning.

use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SPEC_FILE_NAME;
use crate::domain::{PipelineSpec, SourceRef};

use super::SourceFetcher;

/// Fetches specs with the `git` CLI
pub struct GitFetcher {
    /// Path to the git binary (default: "git")
    binary_path: String,
}

impl Default for GitFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl GitFetcher {
    pub fn new() -> Self {
        Self {
            binary_path: "git".to_string(),
        }
    }

    /// `GIT_SSH_COMMAND` that pins the given private key
    pub fn ssh_command(key_path: &Path) -> String {
        format!(
            "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
            key_path.display()
        )
    }

    fn read_spec(dir: &Path, source: &SourceRef) -> Result<PipelineSpec> {
        let path = dir.join(SPEC_FILE_NAME);
        let spec = PipelineSpec::from_file(&path)
            .with_context(|| format!("Invalid {} in '{}'", SPEC_FILE_NAME, source))?;
        Ok(spec)
    }

    async fn clone_into(
        &self,
        source: &SourceRef,
        key_path: Option<&Path>,
        dest: &Path,
    ) -> Result<()> {
        let mut command = Command::new(&self.binary_path);
        command
            .args(["clone", "--depth", "1", "--quiet", source.as_str()])
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(key) = key_path {
            command.env("GIT_SSH_COMMAND", Self::ssh_command(key));
        }

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to spawn git clone for '{}'", source))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!("{}", stderr.trim()))
                .with_context(|| format!("git clone of '{}' failed", source));
        }

        Ok(())
    }
}

#[async_trait]
impl SourceFetcher for GitFetcher {
    async fn fetch_spec(
        &self,
        source: &SourceRef,
        key_path: Option<&Path>,
    ) -> Result<PipelineSpec> {
        let local = Path::new(source.as_str());
        if local.is_dir() {
            debug!(%source, "Reading spec from local directory");
            return Self::read_spec(local, source);
        }

        let checkout = tempfile::Builder::new()
            .prefix("eazy-src-")
            .tempdir()
            .context("Failed to create checkout directory")?;

        info!(%source, "Fetching dependency spec");
        self.clone_into(source, key_path, checkout.path()).await?;

        Self::read_spec(checkout.path(), source)
    }
}
