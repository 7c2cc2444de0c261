//! OCI image configuration and image layout output.
//!
//! [`OciConfig`] mirrors the OCI image config JSON. A base config is read
//! from disk to seed the build state, and the final config (with history
//! and diff IDs) is written together with the layers as an OCI image layout.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use a3s_build_core::error::{BuildError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::{sha256_bytes, LayerInfo};
use crate::state::{HistoryEntry, ImageConfig};

pub const MEDIA_TYPE_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Annotation carrying the image tag in `index.json`.
const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// Runtime section (`config`) of an OCI image config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposed_ports: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_build: Option<Vec<String>>,
}

impl ContainerConfig {
    /// Convert to the build state's image configuration.
    pub fn to_image_config(&self) -> ImageConfig {
        let mut config = ImageConfig::default();
        for entry in self.env.iter().flatten() {
            if let Some((key, value)) = entry.split_once('=') {
                config.set_env(key, value.to_string());
            }
        }
        config.entrypoint = self.entrypoint.clone();
        config.cmd = self.cmd.clone();
        config.working_dir = self.working_dir.clone().filter(|w| !w.is_empty());
        config.stop_signal = self.stop_signal.clone();
        config.labels = self.labels.clone().unwrap_or_default();
        config.exposed_ports = self.exposed_ports.iter().flatten().map(|(p, _)| p.clone()).collect();
        config.volumes = self.volumes.iter().flatten().map(|(v, _)| v.clone()).collect();
        config.user = self.user.clone().filter(|u| !u.is_empty());
        config.shell = self.shell.clone();
        config.on_build = self.on_build.clone().unwrap_or_default();
        config
    }

    /// Render the build state's image configuration.
    pub fn from_image_config(config: &ImageConfig) -> Self {
        let empty_set = |items: &BTreeSet<String>| -> Option<BTreeMap<String, serde_json::Value>> {
            (!items.is_empty()).then(|| {
                items
                    .iter()
                    .map(|item| (item.clone(), serde_json::json!({})))
                    .collect()
            })
        };

        Self {
            user: config.user.clone(),
            exposed_ports: empty_set(&config.exposed_ports),
            env: (!config.env.is_empty()).then(|| {
                config
                    .env
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect()
            }),
            entrypoint: config.entrypoint.clone(),
            cmd: config.cmd.clone(),
            volumes: empty_set(&config.volumes),
            working_dir: config.working_dir.clone(),
            labels: (!config.labels.is_empty()).then(|| config.labels.clone()),
            stop_signal: config.stop_signal.clone(),
            shell: config.shell.clone(),
            on_build: (!config.on_build.is_empty()).then(|| config.on_build.clone()),
        }
    }
}

/// `rootfs` section of an OCI image config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,
    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// One `history` entry of an OCI image config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

/// OCI image config document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OciConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub config: ContainerConfig,
    #[serde(default)]
    pub rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<History>,
}

impl OciConfig {
    /// Read an image config JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::ConfigError(format!(
                "Failed to read image config at {}: {}",
                path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            BuildError::SerializationError(format!(
                "Failed to parse image config {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Final image config for a built image.
    pub fn render(
        config: &ImageConfig,
        history: &[HistoryEntry],
        layers: &[LayerInfo],
        created: DateTime<Utc>,
    ) -> Self {
        let created = created.to_rfc3339();
        Self {
            created: Some(created.clone()),
            architecture: host_architecture().to_string(),
            os: "linux".to_string(),
            config: ContainerConfig::from_image_config(config),
            rootfs: RootFs {
                fs_type: "layers".to_string(),
                diff_ids: layers.iter().map(LayerInfo::prefixed_diff_id).collect(),
            },
            history: history
                .iter()
                .map(|h| History {
                    created: Some(created.clone()),
                    created_by: Some(h.created_by.clone()),
                    empty_layer: h.empty_layer,
                })
                .collect(),
        }
    }
}

/// OCI architecture name of the host.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// Digests of a written image layout.
#[derive(Debug, Clone)]
pub struct LayoutInfo {
    /// Manifest digest with `sha256:` prefix
    pub manifest_digest: String,
    /// Config digest with `sha256:` prefix
    pub config_digest: String,
    /// Total size of the config and layer blobs in bytes
    pub size: u64,
}

/// Write an OCI image layout (`oci-layout`, `index.json`, `blobs/`) to
/// `output_dir`.
pub fn write_layout(
    output_dir: &Path,
    config: &OciConfig,
    layers: &[LayerInfo],
    tag: Option<&str>,
) -> Result<LayoutInfo> {
    let blobs_dir = output_dir.join("blobs").join("sha256");
    std::fs::create_dir_all(&blobs_dir).map_err(|e| {
        BuildError::Other(format!(
            "Failed to create output blobs dir {}: {}",
            blobs_dir.display(),
            e
        ))
    })?;

    let mut layer_descriptors = Vec::with_capacity(layers.len());
    for (i, layer) in layers.iter().enumerate() {
        let blob_path = blobs_dir.join(&layer.digest);
        if !blob_path.exists() {
            std::fs::copy(&layer.path, &blob_path).map_err(|e| {
                BuildError::Other(format!("Failed to copy layer {}: {}", i, e))
            })?;
        }
        layer_descriptors.push(serde_json::json!({
            "mediaType": MEDIA_TYPE_LAYER_GZIP,
            "digest": layer.prefixed_digest(),
            "size": layer.size
        }));
    }

    let config_bytes = serde_json::to_vec_pretty(config)?;
    let config_digest = sha256_bytes(&config_bytes);
    write_blob(&blobs_dir, &config_digest, &config_bytes)?;

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_MANIFEST,
        "config": {
            "mediaType": MEDIA_TYPE_CONFIG,
            "digest": format!("sha256:{}", config_digest),
            "size": config_bytes.len()
        },
        "layers": layer_descriptors
    });
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    let manifest_digest = sha256_bytes(&manifest_bytes);
    write_blob(&blobs_dir, &manifest_digest, &manifest_bytes)?;

    let mut descriptor = serde_json::json!({
        "mediaType": MEDIA_TYPE_MANIFEST,
        "digest": format!("sha256:{}", manifest_digest),
        "size": manifest_bytes.len()
    });
    if let Some(tag) = tag {
        descriptor["annotations"] = serde_json::json!({ REF_NAME_ANNOTATION: tag });
    }
    let index = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_INDEX,
        "manifests": [descriptor]
    });
    std::fs::write(
        output_dir.join("index.json"),
        serde_json::to_string_pretty(&index)?,
    )
    .map_err(|e| BuildError::Other(format!("Failed to write index.json: {}", e)))?;

    std::fs::write(
        output_dir.join("oci-layout"),
        r#"{"imageLayoutVersion":"1.0.0"}"#,
    )
    .map_err(|e| BuildError::Other(format!("Failed to write oci-layout: {}", e)))?;

    let size = config_bytes.len() as u64 + layers.iter().map(|l| l.size).sum::<u64>();
    Ok(LayoutInfo {
        manifest_digest: format!("sha256:{}", manifest_digest),
        config_digest: format!("sha256:{}", config_digest),
        size,
    })
}

fn write_blob(blobs_dir: &Path, digest: &str, bytes: &[u8]) -> Result<()> {
    std::fs::write(blobs_dir.join(digest), bytes)
        .map_err(|e| BuildError::Other(format!("Failed to write blob {}: {}", digest, e)))
}
