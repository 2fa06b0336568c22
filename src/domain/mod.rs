//! Domain types for the eazy pipeline.
//!
//! This module contains the core data structures:
//! - Spec: Declarative project description (`eazy.yml`)
//! - Unit: Resolved dependency units
//! - Run: Session state, links and the final report

pub mod run;
pub mod spec;
pub mod unit;

// Re-export commonly used types
pub use run::{Link, Outcome, PipelineState, RunReport, Session, TerminalAction};
pub use spec::{BuildStage, Deployment, Integration, PipelineSpec, SourceRef};
pub use unit::{DependencyUnit, ResolvedGraph};
