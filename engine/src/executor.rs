//! Sequential instruction executor.
//!
//! Runs instructions strictly in order against one [`BuildState`], stopping
//! at the first failure. After each successful instruction the paths it
//! reports are handed to the [`Snapshotter`] and a history entry is
//! recorded. All build diagnostics (tracing and events) come from here.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use a3s_build_core::error::BuildError;
use a3s_build_core::event::{events, BuildEvent, EventEmitter};

use crate::args::BuildArgs;
use crate::instruction::{BuildCommand, ExecContext, Instruction};
use crate::resolve::DEFAULT_ESCAPE;
use crate::signal::SignalTable;
use crate::snapshot::Snapshotter;
use crate::state::{BuildState, HistoryEntry};

/// Shared flag that stops a build between instructions.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a build that ran every instruction.
#[derive(Debug)]
pub struct BuildOutcome {
    pub state: BuildState,
    pub args: BuildArgs,
    /// One entry per instruction, in order
    pub history: Vec<HistoryEntry>,
}

/// A build stopped by a failing instruction.
#[derive(Debug)]
pub struct BuildFailure {
    /// Zero-based index of the failing instruction
    pub step: usize,
    /// `describe()` of the failing instruction
    pub instruction: String,
    pub source: BuildError,
    /// State after the last successful instruction
    pub state: BuildState,
    /// History of the instructions that completed
    pub history: Vec<HistoryEntry>,
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} ({}) failed: {}",
            self.step + 1,
            self.instruction,
            self.source
        )
    }
}

impl std::error::Error for BuildFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Executes instructions against a build state.
pub struct Executor<'a> {
    snapshotter: &'a mut dyn Snapshotter,
    signals: &'a dyn SignalTable,
    context_dir: PathBuf,
    escape: char,
    events: Option<EventEmitter>,
    cancel: CancelToken,
}

impl<'a> Executor<'a> {
    pub fn new(snapshotter: &'a mut dyn Snapshotter, signals: &'a dyn SignalTable) -> Self {
        Self {
            snapshotter,
            signals,
            context_dir: PathBuf::from("."),
            escape: DEFAULT_ESCAPE,
            events: None,
            cancel: CancelToken::new(),
        }
    }

    /// Directory COPY reads its sources from.
    pub fn context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = dir.into();
        self
    }

    pub fn escape(mut self, escape: char) -> Self {
        self.escape = escape;
        self
    }

    /// Publish step events to `emitter`.
    pub fn events(mut self, emitter: EventEmitter) -> Self {
        self.events = Some(emitter);
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run `instructions` in order.
    ///
    /// The parsed instructions are not modified: each one is cloned before
    /// it executes.
    pub fn run(
        &mut self,
        instructions: &[Instruction],
        mut state: BuildState,
        mut args: BuildArgs,
    ) -> Result<BuildOutcome, BuildFailure> {
        let total = instructions.len();
        let mut history = Vec::with_capacity(total);

        for (step, instruction) in instructions.iter().enumerate() {
            let mut command = instruction.clone();
            let description = command.describe();

            if self.cancel.is_cancelled() {
                return Err(self.fail(step, description, BuildError::Cancelled, state, history));
            }

            tracing::info!(step = step + 1, total, instruction = %description, "Executing instruction");
            let mut fields = step_fields(step, &description);
            fields.insert("total".to_string(), total.into());
            self.emit(events::BUILD_STEP_STARTED, fields);

            let outcome = {
                let mut ctx = ExecContext::new(
                    &mut state,
                    &mut args,
                    self.signals,
                    &self.context_dir,
                )
                .with_escape(self.escape);
                command.execute(&mut ctx)
            };
            if let Err(e) = outcome {
                return Err(self.fail(step, description, e, state, history));
            }

            let targets = command.snapshot_targets();
            if let Err(e) = self.snapshotter.snapshot(&targets) {
                return Err(self.fail(step, description, e, state, history));
            }

            tracing::debug!(
                step = step + 1,
                paths = targets.len(),
                "Instruction completed"
            );
            let mut fields = step_fields(step, &description);
            fields.insert("paths".to_string(), targets.len().into());
            self.emit(events::BUILD_STEP_COMPLETED, fields);

            history.push(HistoryEntry {
                created_by: description,
                empty_layer: targets.is_empty(),
            });
        }

        for name in args.unconsumed() {
            tracing::warn!(arg = name, "Build argument was not consumed by any ARG instruction");
        }

        let mut fields = HashMap::new();
        fields.insert("steps".to_string(), total.into());
        self.emit(events::BUILD_COMPLETED, fields);

        Ok(BuildOutcome {
            state,
            args,
            history,
        })
    }

    fn fail(
        &self,
        step: usize,
        instruction: String,
        source: BuildError,
        state: BuildState,
        history: Vec<HistoryEntry>,
    ) -> BuildFailure {
        tracing::error!(
            step = step + 1,
            instruction = %instruction,
            error = %source,
            "Build step failed"
        );
        let mut fields = step_fields(step, &instruction);
        fields.insert("error".to_string(), source.to_string().into());
        self.emit(events::BUILD_FAILED, fields);

        BuildFailure {
            step,
            instruction,
            source,
            state,
            history,
        }
    }

    fn emit(&self, key: &str, fields: HashMap<String, serde_json::Value>) {
        if let Some(emitter) = &self.events {
            emitter.emit(BuildEvent::with_map(key, fields));
        }
    }
}

fn step_fields(step: usize, instruction: &str) -> HashMap<String, serde_json::Value> {
    let mut fields = HashMap::new();
    fields.insert("step".to_string(), (step + 1).into());
    fields.insert("instruction".to_string(), instruction.into());
    fields
}
