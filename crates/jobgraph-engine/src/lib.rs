//! Job graph generation for jobgraph.
//!
//! Loads stage declarations, assembles them into the full job graph, selects
//! the targets of a run, replaces jobs by prior results where it is safe, and
//! renders the pipeline documents for the CI platform.

pub mod assembler;
pub mod changes;
pub mod emit;
pub mod generator;
pub mod history;
pub mod loader;
pub mod optimizer;
pub mod registry;
mod retry;
pub mod target;
pub mod transforms;

pub use assembler::assemble;
pub use changes::{GitChangeDetector, StaticChangeSet, paths_match};
pub use emit::{Artifacts, MAIN_DOCUMENT, RunOutput, emit, pipeline_documents, stage_order};
pub use generator::{Generation, Generator};
pub use history::{HttpHistoryIndex, NoHistory, StaticHistoryIndex};
pub use loader::{InlineLoader, Loader, ManifestLoader};
pub use optimizer::Optimizer;
pub use registry::Registry;
pub use target::{TargetContext, TargetSelection, TargetStrategy, select_targets};
pub use transforms::{Transform, TransformContext, TransformFailure, run_transforms};
