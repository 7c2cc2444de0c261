//! A3S Build Engine - Dockerfile interpretation.
//!
//! Resolves variable references, executes instructions against a build
//! state, snapshots the filesystem into layers and writes OCI image layouts.

#![allow(clippy::result_large_err)]

pub mod args;
pub mod build;
pub mod dockerfile;
pub mod executor;
pub mod instruction;
pub mod oci;
pub mod resolve;
pub mod signal;
pub mod snapshot;
pub mod state;

// Re-export common types
pub use args::BuildArgs;
pub use build::{build, BuildConfig, BuildResult};
pub use dockerfile::{BaseImage, Dockerfile};
pub use executor::{BuildFailure, BuildOutcome, CancelToken, Executor};
pub use instruction::{BuildCommand, CommandForm, ExecContext, Instruction};
pub use oci::{write_layout, LayoutInfo, OciConfig};
pub use resolve::{resolve, resolve_list, MissingPolicy, ReplacementEnv, Resolver};
pub use signal::{LinuxSignals, SignalTable};
pub use snapshot::{LayerInfo, LayerSnapshotter, Snapshotter};
pub use state::{BuildState, HistoryEntry, ImageConfig};
