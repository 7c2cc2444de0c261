//! `a3s-build build` command: build an image from a Dockerfile.
//!
//! Parses a Dockerfile, executes its instructions against a fresh rootfs
//! and writes the result as an OCI image layout.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use a3s_build_core::event::{events, BuildEvent, EventEmitter};
use a3s_build_core::BuilderConfig;
use a3s_build_engine::{BuildConfig, BuildResult, CancelToken};
use clap::Args;
use tokio::sync::broadcast;

use crate::output;

#[derive(Args)]
pub struct BuildArgs {
    /// Build context directory (contains Dockerfile and source files)
    #[arg(default_value = ".")]
    pub path: String,

    /// Name and optionally tag for the image (e.g., "myimage:latest")
    #[arg(short = 't', long = "tag")]
    pub tag: Option<String>,

    /// Path to Dockerfile (default: <PATH>/Dockerfile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Output directory for the OCI image layout
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Set build-time variables (KEY=VALUE), can be repeated
    #[arg(long = "build-arg")]
    pub build_arg: Vec<String>,

    /// OCI image config JSON of the base image
    #[arg(long = "base-config")]
    pub base_config: Option<PathBuf>,

    /// Suppress build output
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: BuildArgs,
    builder: &BuilderConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let context_dir = PathBuf::from(&args.path)
        .canonicalize()
        .map_err(|e| format!("Invalid build context path '{}': {}", args.path, e))?;

    if !context_dir.is_dir() {
        return Err(format!(
            "Build context '{}' is not a directory",
            context_dir.display()
        )
        .into());
    }

    // Resolve Dockerfile path
    let dockerfile_path = match &args.file {
        Some(f) => {
            let p = PathBuf::from(f);
            if p.is_absolute() {
                p
            } else {
                context_dir.join(p)
            }
        }
        None => context_dir.join("Dockerfile"),
    };

    if !dockerfile_path.exists() {
        return Err(format!("Dockerfile not found at {}", dockerfile_path.display()).into());
    }

    // Configured defaults first, command-line values override
    let mut build_args = builder.build_args.clone();
    build_args.extend(parse_build_args(&args.build_arg)?);

    let output_dir = args.output.clone().unwrap_or_else(|| {
        builder
            .output_dir
            .join(layout_dir_name(args.tag.as_deref()))
    });

    let emitter = EventEmitter::new(256);
    let progress = (!args.quiet).then(|| tokio::spawn(print_progress(emitter.subscribe())));

    let cancel = CancelToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, stopping after the current instruction");
                cancel.cancel();
            }
        })
    };

    let config = BuildConfig {
        context_dir,
        dockerfile_path,
        output_dir,
        tag: args.tag.clone(),
        build_args,
        base_config: args.base_config.clone(),
        escape: builder.escape,
        events: Some(emitter),
        cancel,
    };

    let result = tokio::task::spawn_blocking(move || a3s_build_engine::build(config)).await;
    interrupt.abort();
    // The emitter was moved into the build, so the progress stream has ended.
    if let Some(progress) = progress {
        let _ = progress.await;
    }
    let result = result??;

    if args.quiet {
        println!("{}", result.digest);
    } else {
        print_summary(&result);
    }

    Ok(())
}

/// Parse KEY=VALUE pairs into a HashMap.
fn parse_build_args(args: &[String]) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for arg in args {
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| format!("Invalid build arg (expected KEY=VALUE): {arg}"))?;
        map.insert(key.to_string(), value.to_string());
    }
    Ok(map)
}

/// Directory name for a layout under the configured output directory.
fn layout_dir_name(tag: Option<&str>) -> String {
    match tag {
        Some(tag) => tag
            .chars()
            .map(|c| if matches!(c, '/' | ':' | '@') { '_' } else { c })
            .collect(),
        None => "untagged".to_string(),
    }
}

async fn print_progress(mut rx: broadcast::Receiver<BuildEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = progress_line(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn progress_line(event: &BuildEvent) -> Option<String> {
    let field = |name: &str| event.field(name).cloned().unwrap_or_default();
    match event.key.as_str() {
        events::BUILD_STEP_STARTED => Some(format!(
            "Step {}/{}: {}",
            field("step"),
            field("total"),
            field("instruction").as_str().unwrap_or_default()
        )),
        events::BUILD_FAILED => Some(format!(
            "Step {} failed: {}",
            field("step"),
            field("error").as_str().unwrap_or_default()
        )),
        _ => None,
    }
}

fn print_summary(result: &BuildResult) {
    let mut table = output::new_table(&["#", "CREATED BY", "LAYER"]);
    for (i, entry) in result.history.iter().enumerate() {
        let layer = if entry.empty_layer { "" } else { "yes" };
        table.add_row([
            (i + 1).to_string(),
            output::truncate_str(&entry.created_by, 60),
            layer.to_string(),
        ]);
    }
    println!("{table}");
    println!(
        "Successfully built {} from {} ({} layers, {})",
        result.digest,
        result.base_image,
        result.layer_count,
        output::format_bytes(result.size)
    );
    println!("OCI layout written to {}", display_path(&result.output_dir));
}

fn display_path(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_args_valid() {
        let args = vec!["VERSION=1.0".to_string(), "DEBUG=true".to_string()];
        let result = parse_build_args(&args).unwrap();
        assert_eq!(result.get("VERSION"), Some(&"1.0".to_string()));
        assert_eq!(result.get("DEBUG"), Some(&"true".to_string()));
    }

    #[test]
    fn test_parse_build_args_invalid() {
        let args = vec!["NOEQUALS".to_string()];
        assert!(parse_build_args(&args).is_err());
    }

    #[test]
    fn test_parse_build_args_value_with_equals() {
        let args = vec!["URL=http://example.com?a=1".to_string()];
        let result = parse_build_args(&args).unwrap();
        assert_eq!(
            result.get("URL"),
            Some(&"http://example.com?a=1".to_string())
        );
    }

    #[test]
    fn test_layout_dir_name() {
        assert_eq!(layout_dir_name(Some("ghcr.io/a3s/app:1.0")), "ghcr.io_a3s_app_1.0");
        assert_eq!(layout_dir_name(None), "untagged");
    }

    #[test]
    fn test_progress_line() {
        let mut fields = HashMap::new();
        fields.insert("step".to_string(), serde_json::json!(2));
        fields.insert("total".to_string(), serde_json::json!(3));
        fields.insert("instruction".to_string(), serde_json::json!("STOPSIGNAL $SIG"));
        let started = BuildEvent::with_map(events::BUILD_STEP_STARTED, fields);
        assert_eq!(
            progress_line(&started).as_deref(),
            Some("Step 2/3: STOPSIGNAL $SIG")
        );

        let completed = BuildEvent::empty(events::BUILD_COMPLETED);
        assert_eq!(progress_line(&completed), None);
    }
}
