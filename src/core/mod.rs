//! Core orchestration logic.
//!
//! This module contains:
//! - Resolver: Dependency and peer-dependency graph resolution
//! - Registry: Live containers and routable links for the session
//! - Orchestrator: Pipeline state machine
//! - Cleanup: Exactly-once teardown

pub mod cleanup;
pub mod orchestrator;
pub mod registry;
pub mod resolver;

// Re-export commonly used types
pub use cleanup::{
    on_interrupt, spawn_interrupt_listener, terminate, CleanupController, CleanupOutcome,
};
pub use orchestrator::Orchestrator;
pub use registry::{LiveRegistry, Registration};
pub use resolver::DependencyResolver;
