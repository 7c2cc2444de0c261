use a3s_build_core::error::Result;

use super::{BuildCommand, ExecContext};
use crate::resolve::MissingPolicy;

/// `STOPSIGNAL signal`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopSignalCommand {
    /// Signal text as written, e.g. `SIGTERM`, `9` or `$MYSIG`
    pub signal: String,
}

impl StopSignalCommand {
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
        }
    }
}

impl BuildCommand for StopSignalCommand {
    fn execute(&mut self, ctx: &mut ExecContext<'_>) -> Result<()> {
        // An unresolvable signal is an error, never an empty string.
        let resolved = ctx.resolve_word(&self.signal, MissingPolicy::Error)?;
        let canonical = ctx.signals.parse(&resolved)?;
        ctx.state.config.stop_signal = Some(canonical);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("STOPSIGNAL {}", self.signal)
    }
}

#[cfg(test)]
mod tests {
    use a3s_build_core::error::BuildError;

    use super::*;
    use crate::instruction::test_support::Fixture;

    #[test]
    fn test_sets_named_signal() {
        let mut fixture = Fixture::new();
        fixture.run(&mut StopSignalCommand::new("SIGTERM")).unwrap();
        assert_eq!(fixture.state.config.stop_signal.as_deref(), Some("SIGTERM"));
    }

    #[test]
    fn test_sets_numeric_signal() {
        let mut fixture = Fixture::new();
        fixture.run(&mut StopSignalCommand::new("9")).unwrap();
        assert_eq!(fixture.state.config.stop_signal.as_deref(), Some("9"));
    }

    #[test]
    fn test_canonicalizes_short_name() {
        let mut fixture = Fixture::new();
        fixture.run(&mut StopSignalCommand::new("quit")).unwrap();
        assert_eq!(fixture.state.config.stop_signal.as_deref(), Some("SIGQUIT"));
    }

    #[test]
    fn test_invalid_signal_leaves_state_unchanged() {
        let mut fixture = Fixture::new();
        fixture.state.config.stop_signal = Some("SIGINT".to_string());
        let before = fixture.state.config.clone();

        let err = fixture
            .run(&mut StopSignalCommand::new("NOTASIGNAL"))
            .unwrap_err();
        assert!(matches!(err, BuildError::Validation { .. }));
        assert_eq!(fixture.state.config, before);
    }

    #[test]
    fn test_resolves_from_env() {
        let mut fixture = Fixture::new().with_env("MYSIG", "SIGHUP");
        fixture.run(&mut StopSignalCommand::new("$MYSIG")).unwrap();
        assert_eq!(fixture.state.config.stop_signal.as_deref(), Some("SIGHUP"));
    }

    #[test]
    fn test_resolves_from_declared_arg() {
        let mut fixture = Fixture::new();
        fixture.args.declare("SIG", Some("SIGUSR1".to_string()));
        fixture.run(&mut StopSignalCommand::new("${SIG}")).unwrap();
        assert_eq!(fixture.state.config.stop_signal.as_deref(), Some("SIGUSR1"));
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let mut fixture = Fixture::new();
        let err = fixture
            .run(&mut StopSignalCommand::new("$MISSING"))
            .unwrap_err();
        match err {
            BuildError::UndefinedVariable { name } => assert_eq!(name, "MISSING"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fixture.state.config.stop_signal, None);
    }

    #[test]
    fn test_quoted_signal() {
        let mut fixture = Fixture::new();
        fixture.run(&mut StopSignalCommand::new("\"SIGKILL\"")).unwrap();
        assert_eq!(fixture.state.config.stop_signal.as_deref(), Some("SIGKILL"));
    }

    #[test]
    fn test_describe_keeps_raw_text() {
        let mut fixture = Fixture::new().with_env("MYSIG", "SIGHUP");
        let mut command = StopSignalCommand::new("$MYSIG");
        fixture.run(&mut command).unwrap();
        assert_eq!(command.describe(), "STOPSIGNAL $MYSIG");
    }

    #[test]
    fn test_no_snapshot_targets() {
        let mut fixture = Fixture::new();
        let mut command = StopSignalCommand::new("SIGTERM");
        assert!(command.snapshot_targets().is_empty());
        fixture.run(&mut command).unwrap();
        assert!(command.snapshot_targets().is_empty());
    }
}
