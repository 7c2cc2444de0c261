//! Build instructions and the execution contract they share.
//!
//! Every instruction kind implements [`BuildCommand`]:
//!
//! - `execute` resolves the instruction's variable references, validates the
//!   result and applies it to the [`BuildState`];
//! - `snapshot_targets` lists the image paths the last `execute` touched
//!   (empty for metadata-only instructions);
//! - `describe` renders the instruction with its original, unresolved
//!   arguments for the image history.
//!
//! [`Instruction`] is the closed set of kinds; it dispatches the contract to
//! the per-kind command types.

mod config;
mod env;
mod fs;
mod stopsignal;

use std::path::{Path, PathBuf};

use a3s_build_core::error::Result;

use crate::args::BuildArgs;
use crate::resolve::{MissingPolicy, ReplacementEnv, Resolver, DEFAULT_ESCAPE};
use crate::signal::SignalTable;
use crate::state::BuildState;

pub use config::{
    CmdCommand, EntrypointCommand, ExposeCommand, LabelCommand, OnBuildCommand, ShellCommand,
    UserCommand, VolumeCommand,
};
pub use env::{ArgCommand, EnvCommand};
pub use fs::{CopyCommand, RunCommand, WorkdirCommand};
pub use stopsignal::StopSignalCommand;

/// The execution contract every instruction kind satisfies.
pub trait BuildCommand {
    /// Apply the instruction to the build state.
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()>;

    /// Image-absolute paths changed by the last `execute`.
    fn snapshot_targets(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Keyword followed by the unresolved argument text.
    fn describe(&self) -> String;
}

/// Everything an instruction may read or mutate during one `execute` call.
pub struct ExecContext<'a> {
    pub state: &'a mut BuildState,
    pub args: &'a mut BuildArgs,
    pub signals: &'a dyn SignalTable,
    /// Build context directory (COPY sources)
    pub context_dir: &'a Path,
    /// Dockerfile escape character
    pub escape: char,
}

impl<'a> ExecContext<'a> {
    pub fn new(
        state: &'a mut BuildState,
        args: &'a mut BuildArgs,
        signals: &'a dyn SignalTable,
        context_dir: &'a Path,
    ) -> Self {
        Self {
            state,
            args,
            signals,
            context_dir,
            escape: DEFAULT_ESCAPE,
        }
    }

    pub fn with_escape(mut self, escape: char) -> Self {
        self.escape = escape;
        self
    }

    /// Resolve one argument as a Dockerfile word: references substituted,
    /// quotes removed.
    pub fn resolve_word(&self, raw: &str, policy: MissingPolicy) -> Result<String> {
        let env = ReplacementEnv::new(&self.state.config.env, self.args);
        Resolver::new(&env, policy)
            .escape(self.escape)
            .strip_quotes(true)
            .resolve(raw)
    }

    /// Resolve several arguments as Dockerfile words.
    pub fn resolve_words(&self, raw: &[String], policy: MissingPolicy) -> Result<Vec<String>> {
        let env = ReplacementEnv::new(&self.state.config.env, self.args);
        Resolver::new(&env, policy)
            .escape(self.escape)
            .strip_quotes(true)
            .resolve_all(raw)
    }
}

/// Exec (JSON) or shell form of CMD, ENTRYPOINT and RUN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandForm {
    /// `["executable", "arg"]`
    Exec(Vec<String>),
    /// `command text`, run through the image shell
    Shell(String),
}

impl CommandForm {
    /// Argument vector, prepending `shell` for the shell form.
    pub fn argv(&self, shell: Vec<String>) -> Vec<String> {
        match self {
            CommandForm::Exec(argv) => argv.clone(),
            CommandForm::Shell(text) => {
                let mut argv = shell;
                argv.push(text.clone());
                argv
            }
        }
    }

    /// Source rendering: JSON for exec form, raw text for shell form.
    pub fn render(&self) -> String {
        match self {
            CommandForm::Exec(argv) => render_json_array(argv),
            CommandForm::Shell(text) => text.clone(),
        }
    }
}

pub(crate) fn render_json_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| format!("{:?}", items))
}

/// One parsed Dockerfile instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Arg(ArgCommand),
    Env(EnvCommand),
    Label(LabelCommand),
    Expose(ExposeCommand),
    User(UserCommand),
    Workdir(WorkdirCommand),
    Volume(VolumeCommand),
    StopSignal(StopSignalCommand),
    Shell(ShellCommand),
    OnBuild(OnBuildCommand),
    Entrypoint(EntrypointCommand),
    Cmd(CmdCommand),
    Copy(CopyCommand),
    Run(RunCommand),
}

impl Instruction {
    /// Dockerfile keyword for this instruction.
    pub fn keyword(&self) -> &'static str {
        match self {
            Instruction::Arg(_) => "ARG",
            Instruction::Env(_) => "ENV",
            Instruction::Label(_) => "LABEL",
            Instruction::Expose(_) => "EXPOSE",
            Instruction::User(_) => "USER",
            Instruction::Workdir(_) => "WORKDIR",
            Instruction::Volume(_) => "VOLUME",
            Instruction::StopSignal(_) => "STOPSIGNAL",
            Instruction::Shell(_) => "SHELL",
            Instruction::OnBuild(_) => "ONBUILD",
            Instruction::Entrypoint(_) => "ENTRYPOINT",
            Instruction::Cmd(_) => "CMD",
            Instruction::Copy(_) => "COPY",
            Instruction::Run(_) => "RUN",
        }
    }

    fn command(&self) -> &dyn BuildCommand {
        match self {
            Instruction::Arg(c) => c,
            Instruction::Env(c) => c,
            Instruction::Label(c) => c,
            Instruction::Expose(c) => c,
            Instruction::User(c) => c,
            Instruction::Workdir(c) => c,
            Instruction::Volume(c) => c,
            Instruction::StopSignal(c) => c,
            Instruction::Shell(c) => c,
            Instruction::OnBuild(c) => c,
            Instruction::Entrypoint(c) => c,
            Instruction::Cmd(c) => c,
            Instruction::Copy(c) => c,
            Instruction::Run(c) => c,
        }
    }

    fn command_mut(&mut self) -> &mut dyn BuildCommand {
        match self {
            Instruction::Arg(c) => c,
            Instruction::Env(c) => c,
            Instruction::Label(c) => c,
            Instruction::Expose(c) => c,
            Instruction::User(c) => c,
            Instruction::Workdir(c) => c,
            Instruction::Volume(c) => c,
            Instruction::StopSignal(c) => c,
            Instruction::Shell(c) => c,
            Instruction::OnBuild(c) => c,
            Instruction::Entrypoint(c) => c,
            Instruction::Cmd(c) => c,
            Instruction::Copy(c) => c,
            Instruction::Run(c) => c,
        }
    }
}

impl BuildCommand for Instruction {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        self.command_mut().execute(ctx)
    }

    fn snapshot_targets(&self) -> Vec<PathBuf> {
        self.command().snapshot_targets()
    }

    fn describe(&self) -> String {
        self.command().describe()
    }
}
