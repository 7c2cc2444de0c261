//! Instructions that write into the rootfs.

use std::path::{Path, PathBuf};

use a3s_build_core::error::{BuildError, Result};

use super::{BuildCommand, CommandForm, ExecContext};
use crate::resolve::MissingPolicy;
use crate::state::{resolve_path, BuildState, ImageConfig};

/// PATH given to RUN when the image does not set one.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Collapse `.` and `..` segments of an image path and make it absolute.
pub(crate) fn clean_image_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Path of a COPY source inside the build context, or `None` when it
/// would escape the context.
fn context_relative(src: &str) -> Option<PathBuf> {
    let mut parts: Vec<&str> = Vec::new();
    for part in src.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            p => parts.push(p),
        }
    }
    Some(parts.iter().collect())
}

/// Image-absolute form of a path under the rootfs.
fn image_path(rootfs: &Path, host: &Path) -> PathBuf {
    Path::new("/").join(host.strip_prefix(rootfs).unwrap_or(host))
}

fn require_rootfs(state: &BuildState, instruction: &str) -> Result<()> {
    if state.rootfs.is_dir() {
        Ok(())
    } else {
        Err(BuildError::Execution(format!(
            "{} needs a rootfs, but {} is not a directory",
            instruction,
            state.rootfs.display()
        )))
    }
}

/// `WORKDIR path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkdirCommand {
    pub path: String,
    created: Option<PathBuf>,
}

impl WorkdirCommand {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            created: None,
        }
    }
}

impl BuildCommand for WorkdirCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        self.created = None;
        let path = ctx.resolve_word(&self.path, MissingPolicy::Empty)?;
        if path.is_empty() {
            return Err(BuildError::validation(
                "WORKDIR",
                &self.path,
                "path must not be empty",
            ));
        }
        let full = clean_image_path(&resolve_path(
            ctx.state.config.working_dir_or_root(),
            &path,
        ));

        require_rootfs(ctx.state, "WORKDIR")?;
        let host = ctx.state.host_path(Path::new(&full));
        if !host.exists() {
            std::fs::create_dir_all(&host).map_err(|e| {
                BuildError::Execution(format!(
                    "Failed to create WORKDIR {}: {}",
                    host.display(),
                    e
                ))
            })?;
            self.created = Some(PathBuf::from(&full));
        }
        ctx.state.config.working_dir = Some(full);
        Ok(())
    }

    fn snapshot_targets(&self) -> Vec<PathBuf> {
        self.created.iter().cloned().collect()
    }

    fn describe(&self) -> String {
        format!("WORKDIR {}", self.path)
    }
}

/// `COPY src... dest`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyCommand {
    pub sources: Vec<String>,
    pub dest: String,
    written: Vec<PathBuf>,
}

impl CopyCommand {
    pub fn new(sources: Vec<String>, dest: impl Into<String>) -> Self {
        Self {
            sources,
            dest: dest.into(),
            written: Vec::new(),
        }
    }
}

impl BuildCommand for CopyCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        self.written.clear();
        let sources = ctx.resolve_words(&self.sources, MissingPolicy::Empty)?;
        let dest = ctx.resolve_word(&self.dest, MissingPolicy::Empty)?;
        if dest.is_empty() {
            return Err(BuildError::validation(
                "COPY",
                &self.dest,
                "destination must not be empty",
            ));
        }

        let mut host_sources = Vec::with_capacity(sources.len());
        for (raw, src) in self.sources.iter().zip(&sources) {
            let relative = context_relative(src).ok_or_else(|| {
                BuildError::validation("COPY", raw, "source is outside the build context")
            })?;
            let host = ctx.context_dir.join(relative);
            if !host.exists() {
                return Err(BuildError::Execution(format!(
                    "COPY source not found: {} (in context {})",
                    src,
                    ctx.context_dir.display()
                )));
            }
            host_sources.push(host);
        }

        require_rootfs(ctx.state, "COPY")?;
        let dest_image = clean_image_path(&resolve_path(
            ctx.state.config.working_dir_or_root(),
            &dest,
        ));
        let dest_host = ctx.state.host_path(Path::new(&dest_image));
        let into_dir = dest.ends_with('/') || sources.len() > 1 || dest_host.is_dir();

        let mut copier = Copier {
            rootfs: &ctx.state.rootfs,
            written: Vec::new(),
        };
        for src in &host_sources {
            if src.is_dir() {
                copier.copy_dir(src, &dest_host)?;
            } else if into_dir {
                copier.create_dir(&dest_host)?;
                let name = src.file_name().unwrap_or_default();
                copier.copy_file(src, &dest_host.join(name))?;
            } else {
                if let Some(parent) = dest_host.parent() {
                    copier.create_dir(parent)?;
                }
                copier.copy_file(src, &dest_host)?;
            }
        }
        self.written = copier.written;
        Ok(())
    }

    fn snapshot_targets(&self) -> Vec<PathBuf> {
        self.written.clone()
    }

    fn describe(&self) -> String {
        format!("COPY {} {}", self.sources.join(" "), self.dest)
    }
}

/// Copies into the rootfs, remembering every image path it writes.
struct Copier<'a> {
    rootfs: &'a Path,
    written: Vec<PathBuf>,
}

impl Copier<'_> {
    fn create_dir(&mut self, dir: &Path) -> Result<()> {
        if dir.is_dir() {
            return Ok(());
        }
        std::fs::create_dir_all(dir).map_err(|e| {
            BuildError::Execution(format!(
                "Failed to create directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        self.written.push(image_path(self.rootfs, dir));
        Ok(())
    }

    fn copy_file(&mut self, src: &Path, dst: &Path) -> Result<()> {
        std::fs::copy(src, dst).map_err(|e| {
            BuildError::Execution(format!(
                "Failed to copy {} to {}: {}",
                src.display(),
                dst.display(),
                e
            ))
        })?;
        self.written.push(image_path(self.rootfs, dst));
        Ok(())
    }

    /// Copy the contents of `src` into `dst`.
    fn copy_dir(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.create_dir(dst)?;
        let entries = std::fs::read_dir(src).map_err(|e| {
            BuildError::Execution(format!(
                "Failed to read directory {}: {}",
                src.display(),
                e
            ))
        })?;
        for entry in entries {
            let entry =
                entry.map_err(|e| BuildError::Execution(format!("Failed to read entry: {}", e)))?;
            let src_path = entry.path();
            let dst_path = dst.join(entry.file_name());
            let file_type = entry.file_type()?;

            if file_type.is_dir() {
                self.copy_dir(&src_path, &dst_path)?;
            } else if file_type.is_symlink() {
                self.copy_symlink(&src_path, &dst_path)?;
            } else {
                self.copy_file(&src_path, &dst_path)?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn copy_symlink(&mut self, src: &Path, dst: &Path) -> Result<()> {
        let target = std::fs::read_link(src)?;
        if dst.symlink_metadata().is_ok() {
            std::fs::remove_file(dst)?;
        }
        std::os::unix::fs::symlink(&target, dst).map_err(|e| {
            BuildError::Execution(format!("Failed to link {}: {}", dst.display(), e))
        })?;
        self.written.push(image_path(self.rootfs, dst));
        Ok(())
    }

    #[cfg(not(unix))]
    fn copy_symlink(&mut self, src: &Path, dst: &Path) -> Result<()> {
        self.copy_file(src, dst)
    }
}

/// `RUN command`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub form: CommandForm,
    changed: Vec<PathBuf>,
}

impl RunCommand {
    pub fn new(form: CommandForm) -> Self {
        Self {
            form,
            changed: Vec::new(),
        }
    }

    /// Arguments passed to `chroot` after the rootfs.
    fn chroot_args(&self, config: &ImageConfig) -> Vec<String> {
        let argv = self.form.argv(config.shell_or_default());
        match config.working_dir.as_deref() {
            Some(dir) if dir != "/" => {
                let mut args: Vec<String> = [
                    "/bin/sh",
                    "-c",
                    "cd \"$1\" && shift && exec \"$@\"",
                    "sh",
                    dir,
                ]
                .iter()
                .map(|s| s.to_string())
                .collect();
                args.extend(argv);
                args
            }
            _ => argv,
        }
    }

    /// Run the command inside the rootfs and return the image paths it
    /// added, modified or deleted.
    #[cfg(target_os = "linux")]
    fn run_in_chroot(&self, ctx: &ExecContext<'_>) -> Result<Vec<PathBuf>> {
        use crate::snapshot::DirSnapshot;

        let rootfs = &ctx.state.rootfs;
        let before = DirSnapshot::capture(rootfs)?;

        let mut cmd = std::process::Command::new("chroot");
        cmd.arg(rootfs);
        cmd.args(self.chroot_args(&ctx.state.config));
        cmd.env_clear();
        cmd.env("PATH", DEFAULT_PATH);
        cmd.env("HOME", "/root");
        cmd.envs(Self::environment(ctx));

        let output = cmd
            .output()
            .map_err(|e| BuildError::Execution(format!("Failed to execute RUN command: {}", e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BuildError::Execution(format!(
                "RUN command failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let after = DirSnapshot::capture(rootfs)?;
        Ok(before
            .diff(&after)
            .into_iter()
            .map(|p| Path::new("/").join(p))
            .collect())
    }

    #[cfg(not(target_os = "linux"))]
    fn run_in_chroot(&self, _ctx: &ExecContext<'_>) -> Result<Vec<PathBuf>> {
        Err(BuildError::Execution(
            "RUN requires a Linux host".to_string(),
        ))
    }

    /// Image environment plus declared build arguments the image does not
    /// override.
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    fn environment(ctx: &ExecContext<'_>) -> Vec<(String, String)> {
        let mut env = ctx.state.config.env.clone();
        for (name, value) in ctx.args.declared() {
            if let Some(value) = value {
                if ctx.state.config.get_env(name).is_none() {
                    env.push((name.clone(), value.clone()));
                }
            }
        }
        env
    }
}

impl BuildCommand for RunCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        self.changed.clear();
        require_rootfs(ctx.state, "RUN")?;
        self.changed = self.run_in_chroot(ctx)?;
        Ok(())
    }

    fn snapshot_targets(&self) -> Vec<PathBuf> {
        self.changed.clone()
    }

    fn describe(&self) -> String {
        format!("RUN {}", self.form.render())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::instruction::test_support::Fixture;

    struct Workspace {
        _rootfs: TempDir,
        _context: TempDir,
        fixture: Fixture,
    }

    fn workspace() -> Workspace {
        let rootfs = TempDir::new().unwrap();
        let context = TempDir::new().unwrap();
        let mut fixture = Fixture::new();
        fixture.state.rootfs = rootfs.path().to_path_buf();
        fixture.context_dir = context.path().to_path_buf();
        Workspace {
            _rootfs: rootfs,
            _context: context,
            fixture,
        }
    }

    fn targets(command: &dyn BuildCommand) -> Vec<String> {
        let mut paths: Vec<String> = command
            .snapshot_targets()
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn test_clean_image_path() {
        assert_eq!(clean_image_path("/app/./src/../bin/"), "/app/bin");
        assert_eq!(clean_image_path("/../.."), "/");
        assert_eq!(clean_image_path("a//b"), "/a/b");
    }

    #[test]
    fn test_context_relative() {
        assert_eq!(context_relative("./src/a"), Some(PathBuf::from("src/a")));
        assert_eq!(context_relative("/etc/hosts"), Some(PathBuf::from("etc/hosts")));
        assert_eq!(context_relative("."), Some(PathBuf::new()));
        assert_eq!(context_relative("../secret"), None);
        assert_eq!(context_relative("a/../../b"), None);
    }

    #[test]
    fn test_workdir_creates_directory() {
        let mut ws = workspace();
        let mut workdir = WorkdirCommand::new("/app/src");
        ws.fixture.run(&mut workdir).unwrap();

        assert_eq!(ws.fixture.state.config.working_dir.as_deref(), Some("/app/src"));
        assert!(ws.fixture.state.rootfs.join("app/src").is_dir());
        assert_eq!(targets(&workdir), vec!["/app/src"]);

        // Existing directory: nothing to snapshot.
        let mut again = WorkdirCommand::new("/app/src");
        ws.fixture.run(&mut again).unwrap();
        assert!(again.snapshot_targets().is_empty());
    }

    #[test]
    fn test_workdir_relative_to_previous() {
        let mut ws = workspace();
        ws.fixture.state.config.set_env("NAME", "svc".to_string());
        ws.fixture.run(&mut WorkdirCommand::new("/opt")).unwrap();
        ws.fixture.run(&mut WorkdirCommand::new("$NAME/../data")).unwrap();
        assert_eq!(ws.fixture.state.config.working_dir.as_deref(), Some("/opt/data"));
    }

    #[test]
    fn test_workdir_without_rootfs_fails() {
        let mut fixture = Fixture::new();
        let err = fixture.run(&mut WorkdirCommand::new("/app")).unwrap_err();
        assert!(matches!(err, BuildError::Execution(_)));
        assert_eq!(fixture.state.config.working_dir, None);
    }

    #[test]
    fn test_copy_file_to_path() {
        let mut ws = workspace();
        fs::write(ws.fixture.context_dir.join("app.py"), "print('hi')").unwrap();

        let mut copy = CopyCommand::new(vec!["app.py".to_string()], "/srv/main.py");
        ws.fixture.run(&mut copy).unwrap();

        let copied = ws.fixture.state.rootfs.join("srv/main.py");
        assert_eq!(fs::read_to_string(copied).unwrap(), "print('hi')");
        assert_eq!(targets(&copy), vec!["/srv", "/srv/main.py"]);
        assert_eq!(copy.describe(), "COPY app.py /srv/main.py");
    }

    #[test]
    fn test_copy_into_workdir() {
        let mut ws = workspace();
        fs::write(ws.fixture.context_dir.join("a.txt"), "a").unwrap();
        fs::write(ws.fixture.context_dir.join("b.txt"), "b").unwrap();
        ws.fixture.run(&mut WorkdirCommand::new("/app")).unwrap();

        let mut copy = CopyCommand::new(vec!["a.txt".to_string(), "b.txt".to_string()], ".");
        ws.fixture.run(&mut copy).unwrap();

        assert!(ws.fixture.state.rootfs.join("app/a.txt").is_file());
        assert!(ws.fixture.state.rootfs.join("app/b.txt").is_file());
        assert_eq!(targets(&copy), vec!["/app/a.txt", "/app/b.txt"]);
    }

    #[test]
    fn test_copy_directory_contents() {
        let mut ws = workspace();
        let src = ws.fixture.context_dir.join("src");
        fs::create_dir_all(src.join("lib")).unwrap();
        fs::write(src.join("main.rs"), "fn main() {}").unwrap();
        fs::write(src.join("lib/mod.rs"), "").unwrap();

        let mut copy = CopyCommand::new(vec!["src".to_string()], "/code/");
        ws.fixture.run(&mut copy).unwrap();

        assert!(ws.fixture.state.rootfs.join("code/main.rs").is_file());
        assert!(ws.fixture.state.rootfs.join("code/lib/mod.rs").is_file());
        assert_eq!(
            targets(&copy),
            vec!["/code", "/code/lib", "/code/lib/mod.rs", "/code/main.rs"]
        );
    }

    #[test]
    fn test_copy_resolves_variables() {
        let mut ws = workspace();
        fs::write(ws.fixture.context_dir.join("config.yaml"), "x: 1").unwrap();
        ws.fixture.args.declare("CONF", Some("config.yaml".to_string()));
        ws.fixture.state.config.set_env("DEST", "/etc/app".to_string());

        let mut copy = CopyCommand::new(vec!["$CONF".to_string()], "${DEST}/");
        ws.fixture.run(&mut copy).unwrap();
        assert!(ws.fixture.state.rootfs.join("etc/app/config.yaml").is_file());
        assert_eq!(copy.describe(), "COPY $CONF ${DEST}/");
    }

    #[test]
    fn test_copy_rejects_escaping_source() {
        let mut ws = workspace();
        let err = ws
            .fixture
            .run(&mut CopyCommand::new(vec!["../etc/passwd".to_string()], "/x"))
            .unwrap_err();
        assert!(matches!(err, BuildError::Validation { .. }));
    }

    #[test]
    fn test_copy_missing_source() {
        let mut ws = workspace();
        let mut copy = CopyCommand::new(vec!["nope".to_string()], "/x");
        let err = ws.fixture.run(&mut copy).unwrap_err();
        assert!(err.to_string().contains("COPY source not found"));
        assert!(copy.snapshot_targets().is_empty());
    }

    #[test]
    fn test_run_chroot_args() {
        let mut config = ImageConfig::default();
        let run = RunCommand::new(CommandForm::Shell("make install".to_string()));
        assert_eq!(run.chroot_args(&config), vec!["/bin/sh", "-c", "make install"]);

        config.working_dir = Some("/src".to_string());
        let exec = RunCommand::new(CommandForm::Exec(vec!["make".to_string()]));
        let args = exec.chroot_args(&config);
        assert_eq!(args[0], "/bin/sh");
        assert_eq!(&args[3..], &["sh", "/src", "make"]);
    }

    #[test]
    fn test_run_environment_includes_declared_args() {
        let mut fixture = Fixture::new().with_env("MODE", "release");
        fixture.args.declare("MODE", Some("debug".to_string()));
        fixture.args.declare("JOBS", Some("4".to_string()));
        fixture.args.declare("UNSET", None);

        let ctx = ExecContext::new(
            &mut fixture.state,
            &mut fixture.args,
            &crate::signal::LinuxSignals,
            &fixture.context_dir,
        );
        let env = RunCommand::environment(&ctx);
        assert_eq!(
            env,
            vec![
                ("MODE".to_string(), "release".to_string()),
                ("JOBS".to_string(), "4".to_string()),
            ]
        );
    }

    #[test]
    fn test_run_describe() {
        let run = RunCommand::new(CommandForm::Shell("echo $HOME".to_string()));
        assert_eq!(run.describe(), "RUN echo $HOME");
        let run = RunCommand::new(CommandForm::Exec(vec!["ls".to_string(), "-l".to_string()]));
        assert_eq!(run.describe(), r#"RUN ["ls","-l"]"#);
    }
}
