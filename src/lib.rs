//! eazy - Containerized CI/CD pipeline runner
//!
//! Runs a project's CI/CD pipeline in containers, driven by a declarative
//! `eazy.yml`: dependencies and shared peer dependencies are fetched and
//! started first, their addresses are linked into every later container, and
//! then the project's own bootstrap, build, deploy, health check and tests run.
//!
//! # Architecture
//!
//! One sequential pipeline drives a linear state machine:
//! - The resolver turns the spec into ordered peer and dependency units
//! - Every started container is registered in the session's live registry
//! - Cleanup tears the registry down exactly once, on success, failure or Ctrl-C
//!
//! # Modules
//!
//! - `adapters`: Docker, git and ssh collaborators behind traits, plus fakes
//! - `core`: Resolver, registry, orchestrator and cleanup
//! - `domain`: Data structures (PipelineSpec, DependencyUnit, Session)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Full pipeline: dependencies, build, deploy, health check, tests
//! eazy -f ./eazy.yml
//!
//! # Dependencies only, then an interactive shell
//! eazy -d
//!
//! # Deploy the service, then an interactive shell
//! eazy -i -e LOG_LEVEL=debug
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use core::{CleanupController, LiveRegistry, Orchestrator};
pub use domain::{DependencyUnit, PipelineSpec, PipelineState, Session, SourceRef};
pub use error::{PipelineError, PipelineResult};
