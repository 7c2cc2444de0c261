//! Mutable state threaded through instruction execution.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Shell used for shell-form CMD/ENTRYPOINT/RUN when no SHELL was set.
pub const DEFAULT_SHELL: &[&str] = &["/bin/sh", "-c"];

/// Image runtime configuration being built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageConfig {
    /// Environment variables, in first-definition order
    pub env: Vec<(String, String)>,
    /// Entrypoint
    pub entrypoint: Option<Vec<String>>,
    /// Default command
    pub cmd: Option<Vec<String>>,
    /// Working directory
    pub working_dir: Option<String>,
    /// Signal sent to stop the container
    pub stop_signal: Option<String>,
    /// Labels
    pub labels: BTreeMap<String, String>,
    /// Exposed ports (`<port>/<proto>`)
    pub exposed_ports: BTreeSet<String>,
    /// Volume mount points
    pub volumes: BTreeSet<String>,
    /// User
    pub user: Option<String>,
    /// Shell for shell-form commands
    pub shell: Option<Vec<String>>,
    /// Triggers recorded by ONBUILD
    pub on_build: Vec<String>,
}

impl ImageConfig {
    /// Set an environment variable, replacing an existing entry in place.
    pub fn set_env(&mut self, key: &str, value: String) {
        match self.env.iter_mut().find(|(k, _)| k == key) {
            Some(existing) => existing.1 = value,
            None => self.env.push((key.to_string(), value)),
        }
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Effective shell for shell-form commands.
    pub fn shell_or_default(&self) -> Vec<String> {
        match &self.shell {
            Some(shell) => shell.clone(),
            None => DEFAULT_SHELL.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Effective working directory ("/" when unset).
    pub fn working_dir_or_root(&self) -> &str {
        self.working_dir.as_deref().unwrap_or("/")
    }
}

/// State owned by the executor for one build.
#[derive(Debug, Clone)]
pub struct BuildState {
    /// Image configuration
    pub config: ImageConfig,
    /// Root of the filesystem being built
    pub rootfs: PathBuf,
    /// Whether CMD was set by this build (ENTRYPOINT keeps it when true)
    pub cmd_set: bool,
}

impl BuildState {
    pub fn new(config: ImageConfig, rootfs: impl Into<PathBuf>) -> Self {
        Self {
            config,
            rootfs: rootfs.into(),
            cmd_set: false,
        }
    }

    /// Map an image-absolute path to its location under the rootfs.
    pub fn host_path(&self, image_path: &Path) -> PathBuf {
        let relative = image_path.strip_prefix("/").unwrap_or(image_path);
        self.rootfs.join(relative)
    }
}

/// A single history entry for the image config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Source-faithful rendering of the instruction
    pub created_by: String,
    /// True when the instruction produced no layer
    pub empty_layer: bool,
}

/// Resolve a path relative to a working directory.
///
/// If `path` is absolute, return it as-is. Otherwise, join with `workdir`.
pub fn resolve_path(workdir: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    }
}
