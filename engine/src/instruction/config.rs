//! Metadata-only instructions: they change the image configuration and never
//! touch the filesystem.

use a3s_build_core::error::{BuildError, Result};

use super::{render_json_array, BuildCommand, CommandForm, ExecContext};
use crate::resolve::MissingPolicy;

/// Protocols accepted by EXPOSE.
const PROTOCOLS: &[&str] = &["tcp", "udp", "sctp"];

/// Triggers ONBUILD refuses to record.
const FORBIDDEN_TRIGGERS: &[&str] = &["ONBUILD", "FROM", "MAINTAINER"];

/// `LABEL key=value ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCommand {
    pub pairs: Vec<(String, String)>,
}

impl BuildCommand for LabelCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let mut resolved = Vec::with_capacity(self.pairs.len());
        for (key, value) in &self.pairs {
            let key = ctx.resolve_word(key, MissingPolicy::Empty)?;
            if key.is_empty() {
                return Err(BuildError::validation(
                    "LABEL",
                    format!("={}", value),
                    "label key must not be empty",
                ));
            }
            resolved.push((key, ctx.resolve_word(value, MissingPolicy::Empty)?));
        }
        ctx.state.config.labels.extend(resolved);
        Ok(())
    }

    fn describe(&self) -> String {
        let pairs: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("LABEL {}", pairs.join(" "))
    }
}

/// `EXPOSE port[/proto] ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposeCommand {
    pub ports: Vec<String>,
}

impl BuildCommand for ExposeCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let resolved = ctx.resolve_words(&self.ports, MissingPolicy::Empty)?;
        let mut ports = Vec::new();
        // A variable may expand to several ports.
        for spec in resolved.iter().flat_map(|s| s.split_whitespace()) {
            ports.push(parse_port_spec(spec)?);
        }
        ctx.state.config.exposed_ports.extend(ports);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("EXPOSE {}", self.ports.join(" "))
    }
}

/// Validate `port`, `port/proto` or `start-end/proto` and return it with an
/// explicit lowercase protocol.
fn parse_port_spec(spec: &str) -> Result<String> {
    let invalid = |reason: &str| BuildError::validation("EXPOSE", spec, reason);

    let (range, proto) = match spec.split_once('/') {
        Some((range, proto)) => (range, proto.to_ascii_lowercase()),
        None => (spec, "tcp".to_string()),
    };
    if !PROTOCOLS.contains(&proto.as_str()) {
        return Err(invalid("protocol must be tcp, udp or sctp"));
    }

    let port = |text: &str| -> Result<u16> {
        match text.parse::<u16>() {
            Ok(0) | Err(_) => Err(invalid("port must be between 1 and 65535")),
            Ok(n) => Ok(n),
        }
    };
    match range.split_once('-') {
        Some((start, end)) => {
            if port(start)? > port(end)? {
                return Err(invalid("port range start exceeds end"));
            }
        }
        None => {
            port(range)?;
        }
    }

    Ok(format!("{}/{}", range, proto))
}

/// `USER user[:group]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCommand {
    pub user: String,
}

impl BuildCommand for UserCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let user = ctx.resolve_word(&self.user, MissingPolicy::Empty)?;
        if user.is_empty() {
            return Err(BuildError::validation(
                "USER",
                &self.user,
                "user must not be empty",
            ));
        }
        ctx.state.config.user = Some(user);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("USER {}", self.user)
    }
}

/// `VOLUME path ...` or `VOLUME ["path", ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeCommand {
    pub paths: Vec<String>,
    /// Written in JSON form
    pub json: bool,
}

impl BuildCommand for VolumeCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let resolved = ctx.resolve_words(&self.paths, MissingPolicy::Empty)?;
        if let Some(pos) = resolved.iter().position(|p| p.trim().is_empty()) {
            return Err(BuildError::validation(
                "VOLUME",
                &self.paths[pos],
                "volume path must not be empty",
            ));
        }
        ctx.state.config.volumes.extend(resolved);
        Ok(())
    }

    fn describe(&self) -> String {
        if self.json {
            format!("VOLUME {}", render_json_array(&self.paths))
        } else {
            format!("VOLUME {}", self.paths.join(" "))
        }
    }
}

/// `SHELL ["executable", "flag"]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub shell: Vec<String>,
}

impl BuildCommand for ShellCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        if self.shell.is_empty() {
            return Err(BuildError::validation(
                "SHELL",
                "[]",
                "shell must name an executable",
            ));
        }
        ctx.state.config.shell = Some(self.shell.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("SHELL {}", render_json_array(&self.shell))
    }
}

/// `ONBUILD <instruction>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnBuildCommand {
    pub trigger: String,
}

impl BuildCommand for OnBuildCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let keyword = self
            .trigger
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if keyword.is_empty() {
            return Err(BuildError::validation(
                "ONBUILD",
                &self.trigger,
                "trigger must not be empty",
            ));
        }
        if FORBIDDEN_TRIGGERS.contains(&keyword.as_str()) {
            return Err(BuildError::validation(
                "ONBUILD",
                &self.trigger,
                format!("{} is not allowed as an ONBUILD trigger", keyword),
            ));
        }

        // Stored as written; the child build expands it in its own scope.
        ctx.state.config.on_build.push(self.trigger.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("ONBUILD {}", self.trigger)
    }
}

/// `ENTRYPOINT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrypointCommand {
    pub form: CommandForm,
}

impl BuildCommand for EntrypointCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let argv = self.form.argv(ctx.state.config.shell_or_default());
        ctx.state.config.entrypoint = Some(argv);
        // A CMD inherited from the base image no longer fits the new entrypoint.
        if !ctx.state.cmd_set {
            ctx.state.config.cmd = None;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("ENTRYPOINT {}", self.form.render())
    }
}

/// `CMD`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdCommand {
    pub form: CommandForm,
}

impl BuildCommand for CmdCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        let argv = self.form.argv(ctx.state.config.shell_or_default());
        ctx.state.config.cmd = Some(argv);
        ctx.state.cmd_set = true;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("CMD {}", self.form.render())
    }
}
