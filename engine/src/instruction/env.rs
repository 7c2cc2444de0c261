use a3s_build_core::error::{BuildError, Result};

use super::{BuildCommand, ExecContext};
use crate::resolve::MissingPolicy;

/// `ARG name[=default]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgCommand {
    pub name: String,
    /// Default value as written
    pub default: Option<String>,
}

impl ArgCommand {
    pub fn new(name: impl Into<String>, default: Option<String>) -> Self {
        Self {
            name: name.into(),
            default,
        }
    }
}

impl BuildCommand for ArgCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        if self.name.is_empty() {
            return Err(BuildError::validation("ARG", "", "name must not be empty"));
        }
        let default = match &self.default {
            Some(raw) => Some(ctx.resolve_word(raw, MissingPolicy::Empty)?),
            None => None,
        };
        ctx.args.declare(&self.name, default);
        Ok(())
    }

    fn describe(&self) -> String {
        match &self.default {
            Some(default) => format!("ARG {}={}", self.name, default),
            None => format!("ARG {}", self.name),
        }
    }
}

/// `ENV key=value ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvCommand {
    /// Pairs as written
    pub pairs: Vec<(String, String)>,
}

impl EnvCommand {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }
}

impl BuildCommand for EnvCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        // Every pair sees the environment as it was before this instruction.
        let mut resolved = Vec::with_capacity(self.pairs.len());
        for (key, value) in &self.pairs {
            let key = ctx.resolve_word(key, MissingPolicy::Empty)?;
            if key.is_empty() {
                return Err(BuildError::validation(
                    "ENV",
                    format!("={}", value),
                    "variable name must not be empty",
                ));
            }
            let value = ctx.resolve_word(value, MissingPolicy::Empty)?;
            resolved.push((key, value));
        }

        for (key, value) in resolved {
            ctx.state.config.set_env(&key, value);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        let pairs: Vec<String> = self
            .pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        format!("ENV {}", pairs.join(" "))
    }
}
