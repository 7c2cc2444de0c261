//! Integration test: build OCI image layouts from Dockerfiles.
//!
//! Drives the public `build()` entry point end to end:
//!
//! 1. Write a Dockerfile and context files into a temp directory
//! 2. Build into an output directory
//! 3. Read the layout back (`index.json` → manifest → config)
//! 4. Check layers, history and the runtime config
//!
//! ## Running
//!
//! ```bash
//! cargo test -p a3s-build-engine --test build_integration
//! ```

use std::collections::HashMap;
use std::path::Path;

use a3s_build_core::event::{events, EventEmitter};
use a3s_build_core::BuildError;
use a3s_build_engine::{build, BuildConfig, CancelToken};
use tempfile::TempDir;

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

fn blob(out: &Path, digest: &str) -> serde_json::Value {
    let hex = digest.trim_start_matches("sha256:");
    read_json(&out.join("blobs").join("sha256").join(hex))
}

/// Returns (manifest, config) of the single image in the layout.
fn read_image(out: &Path) -> (serde_json::Value, serde_json::Value) {
    let index = read_json(&out.join("index.json"));
    assert_eq!(index["schemaVersion"], 2);
    let manifest = blob(out, index["manifests"][0]["digest"].as_str().unwrap());
    let config = blob(out, manifest["config"]["digest"].as_str().unwrap());
    (manifest, config)
}

fn created_by(config: &serde_json::Value) -> Vec<String> {
    config["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["created_by"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_stop_signal_from_env() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(
        ctx.path().join("Dockerfile"),
        "FROM alpine:3.19\nENV MYSIG=SIGHUP\nSTOPSIGNAL $MYSIG\n",
    )
    .unwrap();

    let result = build(BuildConfig::new(ctx.path(), out.path())).unwrap();
    assert_eq!(result.layer_count, 0);

    let (manifest, config) = read_image(out.path());
    assert!(manifest["layers"].as_array().unwrap().is_empty());
    assert_eq!(config["config"]["StopSignal"], "SIGHUP");
    assert_eq!(config["config"]["Env"], serde_json::json!(["MYSIG=SIGHUP"]));
    assert_eq!(
        created_by(&config),
        vec!["ENV MYSIG=SIGHUP", "STOPSIGNAL $MYSIG"]
    );
    assert_eq!(config["history"][1]["empty_layer"], true);
}

#[test]
fn test_copy_and_workdir_create_layers() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::create_dir_all(ctx.path().join("src")).unwrap();
    std::fs::write(ctx.path().join("src/main.py"), "print('hi')\n").unwrap();
    std::fs::write(ctx.path().join("requirements.txt"), "flask\n").unwrap();
    std::fs::write(
        ctx.path().join("Dockerfile"),
        r#"
# Application image
FROM python:3.12-slim
ARG APP_DIR=/app
WORKDIR ${APP_DIR}
COPY requirements.txt ./
COPY src/ src/
EXPOSE 8080
ENTRYPOINT ["python"]
CMD ["src/main.py"]
"#,
    )
    .unwrap();

    let result = build(BuildConfig::new(ctx.path(), out.path())).unwrap();
    assert_eq!(result.base_image, "python:3.12-slim");
    assert_eq!(result.layer_count, 3);

    let (manifest, config) = read_image(out.path());
    let layers = manifest["layers"].as_array().unwrap();
    assert_eq!(layers.len(), 3);
    assert_eq!(
        layers[0]["mediaType"],
        "application/vnd.oci.image.layer.v1.tar+gzip"
    );
    assert_eq!(config["rootfs"]["diff_ids"].as_array().unwrap().len(), 3);

    let runtime = &config["config"];
    assert_eq!(runtime["WorkingDir"], "/app");
    assert_eq!(runtime["Entrypoint"], serde_json::json!(["python"]));
    assert_eq!(runtime["Cmd"], serde_json::json!(["src/main.py"]));
    assert_eq!(runtime["ExposedPorts"], serde_json::json!({"8080/tcp": {}}));

    let empty: Vec<bool> = config["history"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["empty_layer"].as_bool().unwrap_or(false))
        .collect();
    assert_eq!(empty, vec![true, false, false, false, true, true, true]);
}

#[test]
fn test_base_config_is_inherited() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let base = ctx.path().join("base.json");
    std::fs::write(
        &base,
        r#"{"architecture":"amd64","os":"linux","config":{
            "Env":["PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"],
            "Cmd":["nginx","-g","daemon off;"],
            "StopSignal":"SIGQUIT"}}"#,
    )
    .unwrap();
    std::fs::write(
        ctx.path().join("Dockerfile"),
        "FROM nginx\nENV PATH=/opt/bin:$PATH\nENTRYPOINT [\"/docker-entrypoint.sh\"]\n",
    )
    .unwrap();

    let mut config = BuildConfig::new(ctx.path(), out.path());
    config.base_config = Some(base);
    config.tag = Some("web:latest".to_string());
    build(config).unwrap();

    let index = read_json(&out.path().join("index.json"));
    assert_eq!(
        index["manifests"][0]["annotations"]["org.opencontainers.image.ref.name"],
        "web:latest"
    );
    let (_, image) = read_image(out.path());
    let runtime = &image["config"];
    assert_eq!(
        runtime["Env"],
        serde_json::json!([
            "PATH=/opt/bin:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
        ])
    );
    assert_eq!(runtime["StopSignal"], "SIGQUIT");
    // ENTRYPOINT resets a CMD inherited from the base image
    assert!(runtime.get("Cmd").is_none());
}

#[test]
fn test_build_args_and_meta_args() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(
        ctx.path().join("Dockerfile"),
        "ARG VERSION=3.18\nFROM alpine:${VERSION}\nARG VERSION\nARG SIG=TERM\nLABEL version=$VERSION\nSTOPSIGNAL $SIG\n",
    )
    .unwrap();

    let mut config = BuildConfig::new(ctx.path(), out.path());
    config.build_args = HashMap::from([
        ("VERSION".to_string(), "3.19".to_string()),
        ("SIG".to_string(), "USR1".to_string()),
        ("UNUSED".to_string(), "x".to_string()),
    ]);
    let result = build(config).unwrap();

    assert_eq!(result.base_image, "alpine:3.19");
    assert_eq!(result.config.labels["version"], "3.19");
    assert_eq!(result.config.stop_signal.as_deref(), Some("SIGUSR1"));
}

#[test]
fn test_failure_stops_build() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(ctx.path().join("a.txt"), "a").unwrap();
    std::fs::write(
        ctx.path().join("Dockerfile"),
        "FROM scratch\nCOPY a.txt /a.txt\nSTOPSIGNAL $UNSET\nCOPY a.txt /b.txt\n",
    )
    .unwrap();

    let err = build(BuildConfig::new(ctx.path(), out.path())).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Dockerfile line 3"), "{}", message);
    assert!(message.contains("STOPSIGNAL $UNSET"), "{}", message);
    assert!(message.contains("Undefined variable: UNSET"), "{}", message);
    assert!(!out.path().join("index.json").exists());

    match err {
        BuildError::Step { line, source, .. } => {
            assert_eq!(line, 3);
            assert!(matches!(*source, BuildError::UndefinedVariable { ref name } if name == "UNSET"));
        }
        other => panic!("expected a step error, got {other:?}"),
    }
}

#[test]
fn test_copy_outside_context_rejected() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(
        ctx.path().join("Dockerfile"),
        "FROM scratch\nCOPY ../secret /secret\n",
    )
    .unwrap();

    assert!(build(BuildConfig::new(ctx.path(), out.path())).is_err());
}

#[test]
fn test_events_are_published() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(
        ctx.path().join("Dockerfile"),
        "FROM scratch\nUSER nobody\nSTOPSIGNAL 9\n",
    )
    .unwrap();

    let emitter = EventEmitter::new(64);
    let mut rx = emitter.subscribe();
    let mut config = BuildConfig::new(ctx.path(), out.path());
    config.events = Some(emitter);
    build(config).unwrap();

    let mut keys = Vec::new();
    while let Ok(event) = rx.try_recv() {
        keys.push(event.key);
    }
    assert_eq!(
        keys,
        vec![
            events::BUILD_STEP_STARTED,
            events::BUILD_STEP_COMPLETED,
            events::BUILD_STEP_STARTED,
            events::BUILD_STEP_COMPLETED,
            events::BUILD_COMPLETED,
        ]
    );
}

#[test]
fn test_cancelled_build() {
    let ctx = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    std::fs::write(ctx.path().join("Dockerfile"), "FROM scratch\nUSER nobody\n").unwrap();

    let token = CancelToken::new();
    token.cancel();
    let mut config = BuildConfig::new(ctx.path(), out.path());
    config.cancel = token;

    assert!(matches!(build(config), Err(BuildError::Cancelled)));
}
