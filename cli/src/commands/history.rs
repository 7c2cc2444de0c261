//! `a3s-build history` command: show the history of a built image layout.

use std::path::{Path, PathBuf};

use a3s_build_engine::OciConfig;
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct HistoryArgs {
    /// OCI image layout directory written by `a3s-build build`
    pub layout: PathBuf,
    /// Only show layer diff IDs
    #[arg(short, long)]
    pub quiet: bool,
    /// Do not truncate output
    #[arg(long)]
    pub no_trunc: bool,
}

pub async fn execute(args: HistoryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = read_manifest(&args.layout)?;
    let config_digest = manifest["config"]["digest"]
        .as_str()
        .ok_or("No config digest in manifest")?;
    let config = OciConfig::load(&blob_path(&args.layout, config_digest))?;

    if args.quiet {
        for id in &config.rootfs.diff_ids {
            println!("{id}");
        }
        return Ok(());
    }

    let layer_sizes: Vec<u64> = manifest["layers"]
        .as_array()
        .map(|layers| {
            layers
                .iter()
                .map(|l| l["size"].as_u64().unwrap_or(0))
                .collect()
        })
        .unwrap_or_default();

    let mut table = output::new_table(&["CREATED", "CREATED BY", "SIZE"]);
    let mut layer_idx = 0;
    for entry in &config.history {
        let created = entry
            .created
            .as_deref()
            .map(format_timestamp)
            .unwrap_or_else(|| "<unknown>".to_string());

        let created_by = entry.created_by.clone().unwrap_or_default();
        let created_by = if args.no_trunc {
            created_by
        } else {
            output::truncate_str(&created_by, 60)
        };

        let size = if entry.empty_layer {
            "0 B".to_string()
        } else {
            let s = layer_sizes.get(layer_idx).copied().unwrap_or(0);
            layer_idx += 1;
            output::format_bytes(s)
        };

        table.add_row([&created, &created_by, &size]);
    }

    println!("{table}");
    Ok(())
}

fn read_manifest(layout: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let index_content = std::fs::read_to_string(layout.join("index.json"))
        .map_err(|e| format!("Failed to read index.json: {e}"))?;
    let index: serde_json::Value = serde_json::from_str(&index_content)?;
    let manifest_digest = index["manifests"][0]["digest"]
        .as_str()
        .ok_or("No manifest digest in index.json")?;
    let manifest_content = std::fs::read_to_string(blob_path(layout, manifest_digest))
        .map_err(|e| format!("Failed to read manifest: {e}"))?;
    Ok(serde_json::from_str(&manifest_content)?)
}

fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
    match digest.split_once(':') {
        Some((algorithm, hash)) => root_dir.join("blobs").join(algorithm).join(hash),
        None => root_dir.join("blobs").join("sha256").join(digest),
    }
}

fn format_timestamp(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| output::format_ago(&dt.with_timezone(&chrono::Utc)))
        .unwrap_or_else(|_| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_path_with_prefix() {
        let root = Path::new("/builds/app");
        assert_eq!(
            blob_path(root, "sha256:abc123"),
            PathBuf::from("/builds/app/blobs/sha256/abc123")
        );
    }

    #[test]
    fn test_blob_path_without_prefix() {
        let root = Path::new("/builds/app");
        assert_eq!(
            blob_path(root, "abc123"),
            PathBuf::from("/builds/app/blobs/sha256/abc123")
        );
    }

    #[test]
    fn test_format_timestamp_invalid_passthrough() {
        assert_eq!(format_timestamp("yesterday"), "yesterday");
    }

    #[tokio::test]
    async fn test_history_of_built_layout() {
        let ctx = tempfile::TempDir::new().unwrap();
        let out = tempfile::TempDir::new().unwrap();
        std::fs::write(ctx.path().join("Dockerfile"), "FROM scratch\nSTOPSIGNAL 15\n").unwrap();
        a3s_build_engine::build(a3s_build_engine::BuildConfig::new(ctx.path(), out.path()))
            .unwrap();

        let manifest = read_manifest(out.path()).unwrap();
        assert!(manifest["config"]["digest"].as_str().unwrap().starts_with("sha256:"));

        let args = HistoryArgs {
            layout: out.path().to_path_buf(),
            quiet: false,
            no_trunc: true,
        };
        execute(args).await.unwrap();
    }
}
