//! Core domain types for the jobgraph pipeline generator.
//!
//! This crate contains:
//! - Job identifiers and the error taxonomy
//! - Stage configuration and raw job declarations
//! - Resolved jobs and the immutable job graph
//! - Run parameters describing the triggering event
//! - Optimization decisions and the optimized graph
//! - The change-detection and history collaborator traits

pub mod decision;
pub mod declaration;
pub mod error;
pub mod graph;
pub mod id;
pub mod job;
pub mod parameters;
pub mod predicate;
pub mod stage;

pub use decision::{DecisionReason, OptimizationDecision, OptimizedGraph, Replacement};
pub use declaration::{Attributes, JobDeclaration, Need, OptimizationPolicy, merge_attributes};
pub use error::{Error, Result};
pub use graph::JobGraph;
pub use id::JobId;
pub use job::{Job, JobDigest};
pub use parameters::{NULL_REVISION, RefProtection, RunParameters, TriggerKind, is_null_revision};
pub use predicate::{ChangeDetector, HistoryIndex};
pub use stage::{RawJob, StageConfig};
