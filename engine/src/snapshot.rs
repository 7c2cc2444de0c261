//! Filesystem snapshots and layer creation.
//!
//! [`DirSnapshot`] records a rootfs tree so RUN can report what a command
//! changed. [`LayerSnapshotter`] turns the paths an instruction reports into
//! one tar.gz layer per non-empty snapshot call.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use a3s_build_core::error::{BuildError, Result};
use sha2::{Digest, Sha256};

/// Receives the paths each successful instruction touched.
pub trait Snapshotter {
    /// Capture `paths` (image-absolute). A path missing from the rootfs was
    /// deleted. An empty list records nothing.
    fn snapshot(&mut self, paths: &[PathBuf]) -> Result<()>;
}

/// Metadata for a single file in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Relative path from rootfs root
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Modification time (nanoseconds since epoch)
    pub mtime: u128,
    /// Permission bits
    pub mode: u32,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// A snapshot of a directory's file state.
#[derive(Debug, Clone)]
pub struct DirSnapshot {
    /// Map of relative path → file entry
    pub entries: HashMap<PathBuf, FileEntry>,
}

impl DirSnapshot {
    /// Take a snapshot of a directory, recording all files and their metadata.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        walk_dir(root, root, &mut entries)?;
        Ok(DirSnapshot { entries })
    }

    /// Paths added, modified or deleted between this snapshot (before) and
    /// `after`, sorted.
    ///
    /// A directory present in both snapshots is reported only when its
    /// permissions change; entries created under it are reported on their
    /// own. A deleted directory is reported once, without its contents.
    pub fn diff(&self, after: &DirSnapshot) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = after
            .entries
            .iter()
            .filter(|(path, entry)| match self.entries.get(*path) {
                None => true,
                Some(before) if before.is_dir && entry.is_dir => before.mode != entry.mode,
                Some(before) => {
                    before.is_dir != entry.is_dir
                        || before.size != entry.size
                        || before.mtime != entry.mtime
                        || before.mode != entry.mode
                }
            })
            .map(|(path, _)| path.clone())
            .collect();
        changed.extend(self.deleted(after));
        changed.sort();
        changed
    }

    /// Topmost paths present here but missing from `after`.
    fn deleted(&self, after: &DirSnapshot) -> Vec<PathBuf> {
        let gone = |path: &Path| {
            self.entries.contains_key(path) && !after.entries.contains_key(path)
        };
        self.entries
            .keys()
            .filter(|path| gone(path.as_path()))
            .filter(|path| !path.ancestors().skip(1).any(|parent| gone(parent)))
            .cloned()
            .collect()
    }
}

fn walk_dir(root: &Path, current: &Path, entries: &mut HashMap<PathBuf, FileEntry>) -> Result<()> {
    let read_dir = std::fs::read_dir(current).map_err(|e| {
        BuildError::Snapshot(format!(
            "Failed to read directory {}: {}",
            current.display(),
            e
        ))
    })?;

    for entry in read_dir {
        let entry = entry
            .map_err(|e| BuildError::Snapshot(format!("Failed to read directory entry: {}", e)))?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| {
                BuildError::Snapshot(format!(
                    "Failed to compute relative path for {}: {}",
                    path.display(),
                    e
                ))
            })?
            .to_path_buf();

        // Symlinks are recorded, not followed.
        let metadata = std::fs::symlink_metadata(&path).map_err(|e| {
            BuildError::Snapshot(format!(
                "Failed to read metadata for {}: {}",
                path.display(),
                e
            ))
        })?;

        let mtime = metadata
            .modified()
            .map(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_nanos()
            })
            .unwrap_or(0);

        entries.insert(
            relative.clone(),
            FileEntry {
                path: relative,
                size: metadata.len(),
                mtime,
                mode: file_mode(&metadata),
                is_dir: metadata.is_dir(),
            },
        );

        if metadata.is_dir() {
            walk_dir(root, &path, entries)?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Information about a created layer.
#[derive(Debug, Clone)]
pub struct LayerInfo {
    /// Path to the layer tar.gz file
    pub path: PathBuf,
    /// SHA256 of the compressed layer (hex, no prefix)
    pub digest: String,
    /// SHA256 of the uncompressed tar (hex, no prefix)
    pub diff_id: String,
    /// Size in bytes
    pub size: u64,
}

impl LayerInfo {
    /// Get the digest with "sha256:" prefix.
    pub fn prefixed_digest(&self) -> String {
        format!("sha256:{}", self.digest)
    }

    /// Get the diff ID with "sha256:" prefix.
    pub fn prefixed_diff_id(&self) -> String {
        format!("sha256:{}", self.diff_id)
    }
}

/// Writes one tar.gz layer per non-empty snapshot call.
#[derive(Debug)]
pub struct LayerSnapshotter {
    rootfs: PathBuf,
    layers_dir: PathBuf,
    layers: Vec<LayerInfo>,
}

impl LayerSnapshotter {
    pub fn new(rootfs: impl Into<PathBuf>, layers_dir: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
            layers_dir: layers_dir.into(),
            layers: Vec::new(),
        }
    }

    /// Layers written so far, oldest first.
    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    pub fn into_layers(self) -> Vec<LayerInfo> {
        self.layers
    }
}

impl Snapshotter for LayerSnapshotter {
    fn snapshot(&mut self, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let relative: Vec<PathBuf> = paths
            .iter()
            .map(|p| p.strip_prefix("/").unwrap_or(p).to_path_buf())
            .collect();
        let output = self
            .layers_dir
            .join(format!("layer_{}.tar.gz", self.layers.len()));
        let layer = create_layer(&self.rootfs, &relative, &output)?;
        tracing::debug!(
            layer = %output.display(),
            digest = %layer.digest,
            size = layer.size,
            "Layer created"
        );
        self.layers.push(layer);
        Ok(())
    }
}

/// Passes bytes through while hashing them.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Create a tar.gz layer from paths relative to `rootfs`.
///
/// Directories are added recursively. A path that no longer exists is
/// recorded as a deletion with a `.wh.<name>` whiteout entry. The diff ID
/// is hashed from the uncompressed stream as it is written.
pub fn create_layer(rootfs: &Path, paths: &[PathBuf], output_path: &Path) -> Result<LayerInfo> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut members = BTreeSet::new();
    let mut whiteouts = BTreeSet::new();
    for relative in paths {
        collect_members(rootfs, relative, &mut members, &mut whiteouts)?;
    }

    let file = File::create(output_path).map_err(|e| {
        BuildError::Snapshot(format!(
            "Failed to create layer file {}: {}",
            output_path.display(),
            e
        ))
    })?;
    let writer = HashingWriter {
        inner: GzEncoder::new(file, Compression::default()),
        hasher: Sha256::new(),
    };
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for relative in &members {
        let full_path = rootfs.join(relative);
        builder
            .append_path_with_name(&full_path, relative)
            .map_err(|e| {
                BuildError::Snapshot(format!(
                    "Failed to add {} to layer: {}",
                    relative.display(),
                    e
                ))
            })?;
    }

    for deleted in &whiteouts {
        let name = whiteout_name(deleted);
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(0);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder
            .append_data(&mut header, &name, std::io::empty())
            .map_err(|e| {
                BuildError::Snapshot(format!(
                    "Failed to add whiteout for {} to layer: {}",
                    deleted.display(),
                    e
                ))
            })?;
    }

    let writer = builder
        .into_inner()
        .map_err(|e| BuildError::Snapshot(format!("Failed to finalize layer: {}", e)))?;
    let diff_id = hex::encode(writer.hasher.finalize());
    writer
        .inner
        .finish()
        .map_err(|e| BuildError::Snapshot(format!("Failed to finalize layer: {}", e)))?;

    let digest = sha256_file(output_path)?;
    let size = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);

    Ok(LayerInfo {
        path: output_path.to_path_buf(),
        digest,
        diff_id,
        size,
    })
}

/// `.wh.<name>` entry marking `deleted` as removed by this layer.
fn whiteout_name(deleted: &Path) -> PathBuf {
    let name = deleted.file_name().unwrap_or(deleted.as_os_str());
    let mut marker = std::ffi::OsString::from(".wh.");
    marker.push(name);
    match deleted.parent() {
        Some(parent) => parent.join(marker),
        None => PathBuf::from(marker),
    }
}

fn collect_members(
    rootfs: &Path,
    relative: &Path,
    members: &mut BTreeSet<PathBuf>,
    whiteouts: &mut BTreeSet<PathBuf>,
) -> Result<()> {
    let full_path = rootfs.join(relative);
    let metadata = match std::fs::symlink_metadata(&full_path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if !relative.as_os_str().is_empty() {
                whiteouts.insert(relative.to_path_buf());
            }
            return Ok(());
        }
        Err(e) => {
            return Err(BuildError::Snapshot(format!(
                "Failed to read metadata for {}: {}",
                full_path.display(),
                e
            )))
        }
    };
    // An empty path is the rootfs itself: only its contents are added.
    if !relative.as_os_str().is_empty() {
        members.insert(relative.to_path_buf());
    }

    if metadata.is_dir() {
        let entries = std::fs::read_dir(&full_path).map_err(|e| {
            BuildError::Snapshot(format!(
                "Failed to read directory {}: {}",
                full_path.display(),
                e
            ))
        })?;
        for entry in entries {
            let entry =
                entry.map_err(|e| BuildError::Snapshot(format!("Failed to read entry: {}", e)))?;
            collect_members(rootfs, &relative.join(entry.file_name()), members, whiteouts)?;
        }
    }
    Ok(())
}

/// Compute SHA256 digest of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        BuildError::Snapshot(format!(
            "Failed to read file for hashing {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
