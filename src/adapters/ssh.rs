//! SSH agent credential provisioning.
//!
//! When a dependency fetch fails on credentials, the pipeline asks this
//! provisioner to make sure an ssh-agent is running with the user's keys
//! loaded, then retries the fetch once.

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use super::CredentialProvisioner;

/// Starts `ssh-agent` if needed and loads keys with `ssh-add`
pub struct SshAgentProvisioner {
    /// Key to add; `None` lets ssh-add pick the default identities
    key_path: Option<PathBuf>,
}

impl SshAgentProvisioner {
    pub fn new(key_path: Option<PathBuf>) -> Self {
        Self { key_path }
    }

    /// Parse `NAME=value;` assignments out of `ssh-agent -s` output
    pub fn parse_agent_env(output: &str) -> Vec<(String, String)> {
        output
            .lines()
            .filter_map(|line| line.split(';').next())
            .filter_map(|assignment| assignment.split_once('='))
            .filter(|(name, _)| name.starts_with("SSH_"))
            .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
            .collect()
    }

    async fn start_agent(&self) -> Result<()> {
        let output = Command::new("ssh-agent")
            .arg("-s")
            .stdin(Stdio::null())
            .output()
            .await
            .context("Failed to spawn ssh-agent")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ssh-agent failed: {}", stderr.trim());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let vars = Self::parse_agent_env(&stdout);
        if vars.is_empty() {
            anyhow::bail!("ssh-agent did not report SSH_AUTH_SOCK");
        }

        for (name, value) in vars {
            std::env::set_var(&name, &value);
        }
        info!("Started ssh-agent");
        Ok(())
    }
}

#[async_trait]
impl CredentialProvisioner for SshAgentProvisioner {
    async fn set_up(&self) -> Result<()> {
        if std::env::var_os("SSH_AUTH_SOCK").is_none() {
            self.start_agent().await?;
        }

        let mut command = Command::new("ssh-add");
        if let Some(key) = &self.key_path {
            command.arg(key);
        }

        let output = command
            .stdin(Stdio::inherit())
            .output()
            .await
            .context("Failed to spawn ssh-add")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ssh-add failed: {}", stderr.trim());
        }

        info!("SSH keys loaded into agent");
        Ok(())
    }
}
