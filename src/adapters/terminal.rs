//! Terminal state restoration after interactive containers.

use std::io::IsTerminal;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::TerminalController;

/// Resets the controlling terminal with `stty sane`
#[derive(Debug, Default)]
pub struct SttyTerminal;

#[async_trait]
impl TerminalController for SttyTerminal {
    async fn restore_state(&self) {
        if !std::io::stdin().is_terminal() {
            return;
        }

        let result = Command::new("stty")
            .arg("sane")
            .stdin(Stdio::inherit())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        if let Err(e) = result {
            debug!(error = %e, "Could not restore terminal state");
        }
    }
}
