//! End-to-end image build from a Dockerfile.
//!
//! Parses the Dockerfile, seeds the build state from a local base image
//! config, runs the executor with a layer-writing snapshotter and writes the
//! result as an OCI image layout.

use std::collections::HashMap;
use std::path::PathBuf;

use a3s_build_core::error::{BuildError, Result};
use a3s_build_core::event::EventEmitter;

use crate::args::BuildArgs;
use crate::dockerfile::Dockerfile;
use crate::executor::{BuildFailure, CancelToken, Executor};
use crate::oci::{write_layout, OciConfig};
use crate::resolve::DEFAULT_ESCAPE;
use crate::signal::LinuxSignals;
use crate::snapshot::LayerSnapshotter;
use crate::state::{BuildState, HistoryEntry, ImageConfig};

/// Configuration for a build operation.
#[derive(Clone)]
pub struct BuildConfig {
    /// Path to the build context directory
    pub context_dir: PathBuf,
    /// Path to the Dockerfile (relative to context or absolute)
    pub dockerfile_path: PathBuf,
    /// Directory that receives the OCI image layout
    pub output_dir: PathBuf,
    /// Image tag recorded in `index.json` (e.g., "myimage:latest")
    pub tag: Option<String>,
    /// Build arguments (ARG overrides)
    pub build_args: HashMap<String, String>,
    /// OCI image config JSON of the base image
    pub base_config: Option<PathBuf>,
    /// Escape character used when the Dockerfile has no `# escape=` directive
    pub escape: char,
    /// Step progress receiver
    pub events: Option<EventEmitter>,
    pub cancel: CancelToken,
}

impl BuildConfig {
    pub fn new(context_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let context_dir = context_dir.into();
        Self {
            dockerfile_path: context_dir.join("Dockerfile"),
            context_dir,
            output_dir: output_dir.into(),
            tag: None,
            build_args: HashMap::new(),
            base_config: None,
            escape: DEFAULT_ESCAPE,
            events: None,
            cancel: CancelToken::new(),
        }
    }
}

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildResult {
    /// Resolved `FROM` reference
    pub base_image: String,
    /// Manifest digest
    pub digest: String,
    /// Total size of config and layer blobs in bytes
    pub size: u64,
    /// Number of layers
    pub layer_count: usize,
    pub history: Vec<HistoryEntry>,
    pub config: ImageConfig,
    pub output_dir: PathBuf,
}

/// Execute a full image build from a Dockerfile.
///
/// # Process
///
/// 1. Parse the Dockerfile and resolve `FROM` with the meta arguments
/// 2. Load the base image config, if one was given
/// 3. Execute each instruction, creating a layer per non-empty snapshot
/// 4. Write the OCI image layout to the output directory
pub fn build(config: BuildConfig) -> Result<BuildResult> {
    let dockerfile_path = if config.dockerfile_path.is_absolute() {
        config.dockerfile_path.clone()
    } else {
        config.context_dir.join(&config.dockerfile_path)
    };
    let dockerfile = Dockerfile::from_file(&dockerfile_path, config.escape)?;

    let mut meta_args = BuildArgs::new(config.build_args.clone());
    let base_image = dockerfile.resolve_base(&mut meta_args)?;
    tracing::info!(
        dockerfile = %dockerfile_path.display(),
        base = %base_image,
        instructions = dockerfile.instructions.len(),
        "Starting build"
    );

    let image_config = match &config.base_config {
        Some(path) => OciConfig::load(path)?.config.to_image_config(),
        None => {
            tracing::debug!(base = %base_image, "No base image config given, starting from scratch");
            ImageConfig::default()
        }
    };

    let build_dir = tempfile::TempDir::new().map_err(|e| {
        BuildError::Other(format!("Failed to create build directory: {}", e))
    })?;
    let rootfs_dir = build_dir.path().join("rootfs");
    let layers_dir = build_dir.path().join("layers");
    std::fs::create_dir_all(&rootfs_dir).map_err(|e| {
        BuildError::Other(format!("Failed to create rootfs directory: {}", e))
    })?;
    std::fs::create_dir_all(&layers_dir).map_err(|e| {
        BuildError::Other(format!("Failed to create layers directory: {}", e))
    })?;

    let signals = LinuxSignals;
    let mut snapshotter = LayerSnapshotter::new(&rootfs_dir, &layers_dir);
    let outcome = {
        let mut executor = Executor::new(&mut snapshotter, &signals)
            .context_dir(&config.context_dir)
            .escape(dockerfile.escape)
            .cancel_token(config.cancel.clone());
        if let Some(events) = &config.events {
            executor = executor.events(events.clone());
        }
        executor
            .run(
                &dockerfile.instructions,
                BuildState::new(image_config, &rootfs_dir),
                meta_args.fresh_scope(),
            )
            .map_err(|failure| step_error(&dockerfile, failure))?
    };

    let layers = snapshotter.into_layers();
    let oci_config = OciConfig::render(
        &outcome.state.config,
        &outcome.history,
        &layers,
        chrono::Utc::now(),
    );
    let layout = write_layout(
        &config.output_dir,
        &oci_config,
        &layers,
        config.tag.as_deref(),
    )?;
    tracing::info!(
        digest = %layout.manifest_digest,
        layers = layers.len(),
        output = %config.output_dir.display(),
        "Build complete"
    );

    Ok(BuildResult {
        base_image,
        digest: layout.manifest_digest,
        size: layout.size,
        layer_count: layers.len(),
        history: outcome.history,
        config: outcome.state.config,
        output_dir: config.output_dir,
    })
}

/// Attach the Dockerfile line to a failed step.
fn step_error(dockerfile: &Dockerfile, failure: BuildFailure) -> BuildError {
    match failure.source {
        BuildError::Cancelled => BuildError::Cancelled,
        source => BuildError::Step {
            line: dockerfile.line_of(failure.step).unwrap_or_default(),
            step: failure.step + 1,
            instruction: failure.instruction,
            source: Box::new(source),
        },
    }
}
