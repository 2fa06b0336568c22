//! Session state for a single pipeline run.
//!
//! A Session records the linear progression of the pipeline state machine
//! so the final report shows exactly which stages ran.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// States of the pipeline, in the only order they can be visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    ResolvingGraph,
    StartingPeers,
    StartingDependencies,
    RootBootstrap,
    RootBuild,
    RootDeploy,
    RootHealthCheck,
    TerminalAction,
    Done,
}

impl PipelineState {
    /// Position in the linear state order
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::ResolvingGraph => 1,
            Self::StartingPeers => 2,
            Self::StartingDependencies => 3,
            Self::RootBootstrap => 4,
            Self::RootBuild => 5,
            Self::RootDeploy => 6,
            Self::RootHealthCheck => 7,
            Self::TerminalAction => 8,
            Self::Done => 9,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingGraph => "resolving_graph",
            Self::StartingPeers => "starting_peers",
            Self::StartingDependencies => "starting_dependencies",
            Self::RootBootstrap => "root_bootstrap",
            Self::RootBuild => "root_build",
            Self::RootDeploy => "root_deploy",
            Self::RootHealthCheck => "root_health_check",
            Self::TerminalAction => "terminal_action",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
        }
    }
}

/// The terminal step chosen for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalAction {
    /// Interactive blocking shell container
    Shell,

    /// Declared test commands, blocking and non-interactive
    Test,
}

impl TerminalAction {
    /// Dev mode always wins; integration mode alone also selects the shell
    pub fn select(dev: bool, integration: bool) -> Self {
        if dev || integration {
            Self::Shell
        } else {
            Self::Test
        }
    }
}

/// A routable endpoint exposed by a started container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    /// Container name or id
    pub container: String,

    /// Hostname other containers use to reach it
    pub alias: String,
}

impl Link {
    pub fn new(container: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            alias: alias.into(),
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.alias)
    }
}

/// Mutable record of one pipeline session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session
    pub id: Uuid,

    /// Name of the root spec
    pub spec_name: String,

    /// Current state
    pub state: PipelineState,

    /// Every state visited, in order
    pub history: Vec<PipelineState>,

    /// Outcome once the session reached `Done`
    pub outcome: Option<Outcome>,

    /// Error message if the session failed
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(spec_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec_name: spec_name.into(),
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
            outcome: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Advance to the next state. States only move forward.
    pub fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            next.ordinal() > self.state.ordinal(),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!(session = %self.id, from = %self.state, to = %next, "State transition");
        self.state = next;
        self.history.push(next);
    }

    /// Jump to `Done(success)`
    pub fn succeed(&mut self) {
        self.finish(Outcome::Success, None);
    }

    /// Jump to `Done(failure)` from whatever state failed
    pub fn fail(&mut self, error: impl Into<String>) {
        self.finish(Outcome::Failure, Some(error.into()));
    }

    fn finish(&mut self, outcome: Outcome, error: Option<String>) {
        if self.state != PipelineState::Done {
            self.transition(PipelineState::Done);
        }
        self.outcome = Some(outcome);
        self.error = error;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn visited(&self, state: PipelineState) -> bool {
        self.history.contains(&state)
    }
}

/// Summary written at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub session: Session,

    /// Containers owned by the session, in start order
    pub containers: Vec<String>,

    /// Routable links published during the session
    pub links: Vec<Link>,
}
