//! Signal table used to validate STOPSIGNAL values.

use a3s_build_core::error::{BuildError, Result};

/// Lowest real-time signal number on Linux.
pub const SIGRTMIN: u32 = 34;
/// Highest real-time signal number on Linux.
pub const SIGRTMAX: u32 = 64;

/// Validates a candidate signal and returns its canonical form.
pub trait SignalTable: Send + Sync {
    fn parse(&self, candidate: &str) -> Result<String>;
}

/// Standard UNIX signal numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Signal {
    SIGHUP = 1,
    SIGINT = 2,
    SIGQUIT = 3,
    SIGILL = 4,
    SIGTRAP = 5,
    SIGABRT = 6,
    SIGBUS = 7,
    SIGFPE = 8,
    SIGKILL = 9,
    SIGUSR1 = 10,
    SIGSEGV = 11,
    SIGUSR2 = 12,
    SIGPIPE = 13,
    SIGALRM = 14,
    SIGTERM = 15,
    SIGSTKFLT = 16,
    SIGCHLD = 17,
    SIGCONT = 18,
    SIGSTOP = 19,
    SIGTSTP = 20,
    SIGTTIN = 21,
    SIGTTOU = 22,
    SIGURG = 23,
    SIGXCPU = 24,
    SIGXFSZ = 25,
    SIGVTALRM = 26,
    SIGPROF = 27,
    SIGWINCH = 28,
    SIGIO = 29,
    SIGPWR = 30,
    SIGSYS = 31,
}

impl Signal {
    pub const ALL: [Signal; 31] = [
        Signal::SIGHUP,
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGILL,
        Signal::SIGTRAP,
        Signal::SIGABRT,
        Signal::SIGBUS,
        Signal::SIGFPE,
        Signal::SIGKILL,
        Signal::SIGUSR1,
        Signal::SIGSEGV,
        Signal::SIGUSR2,
        Signal::SIGPIPE,
        Signal::SIGALRM,
        Signal::SIGTERM,
        Signal::SIGSTKFLT,
        Signal::SIGCHLD,
        Signal::SIGCONT,
        Signal::SIGSTOP,
        Signal::SIGTSTP,
        Signal::SIGTTIN,
        Signal::SIGTTOU,
        Signal::SIGURG,
        Signal::SIGXCPU,
        Signal::SIGXFSZ,
        Signal::SIGVTALRM,
        Signal::SIGPROF,
        Signal::SIGWINCH,
        Signal::SIGIO,
        Signal::SIGPWR,
        Signal::SIGSYS,
    ];

    /// Get signal number
    pub fn number(&self) -> u32 {
        *self as u32
    }

    /// Convert from signal number
    pub fn from_number(n: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.number() == n)
    }

    /// Canonical name, e.g. `SIGTERM`.
    pub fn name(&self) -> &'static str {
        match self {
            Signal::SIGHUP => "SIGHUP",
            Signal::SIGINT => "SIGINT",
            Signal::SIGQUIT => "SIGQUIT",
            Signal::SIGILL => "SIGILL",
            Signal::SIGTRAP => "SIGTRAP",
            Signal::SIGABRT => "SIGABRT",
            Signal::SIGBUS => "SIGBUS",
            Signal::SIGFPE => "SIGFPE",
            Signal::SIGKILL => "SIGKILL",
            Signal::SIGUSR1 => "SIGUSR1",
            Signal::SIGSEGV => "SIGSEGV",
            Signal::SIGUSR2 => "SIGUSR2",
            Signal::SIGPIPE => "SIGPIPE",
            Signal::SIGALRM => "SIGALRM",
            Signal::SIGTERM => "SIGTERM",
            Signal::SIGSTKFLT => "SIGSTKFLT",
            Signal::SIGCHLD => "SIGCHLD",
            Signal::SIGCONT => "SIGCONT",
            Signal::SIGSTOP => "SIGSTOP",
            Signal::SIGTSTP => "SIGTSTP",
            Signal::SIGTTIN => "SIGTTIN",
            Signal::SIGTTOU => "SIGTTOU",
            Signal::SIGURG => "SIGURG",
            Signal::SIGXCPU => "SIGXCPU",
            Signal::SIGXFSZ => "SIGXFSZ",
            Signal::SIGVTALRM => "SIGVTALRM",
            Signal::SIGPROF => "SIGPROF",
            Signal::SIGWINCH => "SIGWINCH",
            Signal::SIGIO => "SIGIO",
            Signal::SIGPWR => "SIGPWR",
            Signal::SIGSYS => "SIGSYS",
        }
    }

    /// Look up by name, case-insensitive, with or without the `SIG` prefix.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        // Aliases used by Go and Docker
        let bare = match bare {
            "IOT" => "ABRT",
            "POLL" => "IO",
            "CLD" => "CHLD",
            other => other,
        };
        Self::ALL.iter().copied().find(|s| &s.name()[3..] == bare)
    }
}

/// Linux signal table: the standard signals plus `RTMIN+n` / `RTMAX-n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinuxSignals;

impl LinuxSignals {
    fn parse_realtime(bare: &str) -> Option<String> {
        let offset = |digits: &str| -> Option<u32> {
            if digits.is_empty() {
                Some(0)
            } else {
                digits.parse::<u32>().ok()
            }
        };

        let number = if let Some(rest) = bare.strip_prefix("RTMIN") {
            let n = match rest.strip_prefix('+') {
                Some(digits) => offset(digits)?,
                None if rest.is_empty() => 0,
                None => return None,
            };
            SIGRTMIN.checked_add(n)?
        } else if let Some(rest) = bare.strip_prefix("RTMAX") {
            let n = match rest.strip_prefix('-') {
                Some(digits) => offset(digits)?,
                None if rest.is_empty() => 0,
                None => return None,
            };
            SIGRTMAX.checked_sub(n)?
        } else {
            return None;
        };

        if !(SIGRTMIN..=SIGRTMAX).contains(&number) {
            return None;
        }
        let canonical = if number == SIGRTMIN {
            "SIGRTMIN".to_string()
        } else if number == SIGRTMAX {
            "SIGRTMAX".to_string()
        } else {
            format!("SIGRTMIN+{}", number - SIGRTMIN)
        };
        Some(canonical)
    }
}

impl SignalTable for LinuxSignals {
    fn parse(&self, candidate: &str) -> Result<String> {
        let invalid = |reason: &str| BuildError::validation("STOPSIGNAL", candidate, reason);
        let trimmed = candidate.trim();

        if trimmed.is_empty() {
            return Err(invalid("signal must not be empty"));
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            let number: u32 = trimmed
                .parse()
                .map_err(|_| invalid("signal number out of range"))?;
            let known =
                Signal::from_number(number).is_some() || (SIGRTMIN..=SIGRTMAX).contains(&number);
            if !known {
                return Err(invalid("unknown signal number"));
            }
            return Ok(number.to_string());
        }

        if let Some(signal) = Signal::from_name(trimmed) {
            return Ok(signal.name().to_string());
        }

        let upper = trimmed.to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        Self::parse_realtime(bare).ok_or_else(|| invalid("unknown signal name"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_numbers_round_trip() {
        for signal in Signal::ALL {
            assert_eq!(Signal::from_number(signal.number()), Some(signal));
        }
        assert_eq!(Signal::from_number(0), None);
        assert_eq!(Signal::from_number(32), None);
    }

    #[test]
    fn test_from_name_variants() {
        assert_eq!(Signal::from_name("SIGTERM"), Some(Signal::SIGTERM));
        assert_eq!(Signal::from_name("term"), Some(Signal::SIGTERM));
        assert_eq!(Signal::from_name("SigKill"), Some(Signal::SIGKILL));
        assert_eq!(Signal::from_name("IOT"), Some(Signal::SIGABRT));
        assert_eq!(Signal::from_name("SIGNOPE"), None);
    }

    #[test]
    fn test_parse_names_are_canonicalized() {
        let table = LinuxSignals;
        assert_eq!(table.parse("SIGTERM").unwrap(), "SIGTERM");
        assert_eq!(table.parse("hup").unwrap(), "SIGHUP");
        assert_eq!(table.parse("sigusr1").unwrap(), "SIGUSR1");
    }

    #[test]
    fn test_parse_numbers_kept_numeric() {
        let table = LinuxSignals;
        assert_eq!(table.parse("9").unwrap(), "9");
        assert_eq!(table.parse("15").unwrap(), "15");
        assert_eq!(table.parse("40").unwrap(), "40");
    }

    #[test]
    fn test_parse_rejects_unknown_numbers() {
        let table = LinuxSignals;
        for bad in ["0", "32", "33", "65", "99999999999"] {
            assert!(table.parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_parse_realtime_names() {
        let table = LinuxSignals;
        assert_eq!(table.parse("RTMIN").unwrap(), "SIGRTMIN");
        assert_eq!(table.parse("SIGRTMIN+3").unwrap(), "SIGRTMIN+3");
        assert_eq!(table.parse("rtmax-1").unwrap(), "SIGRTMIN+29");
        assert_eq!(table.parse("SIGRTMAX").unwrap(), "SIGRTMAX");
        assert!(table.parse("RTMIN+31").is_err());
        assert!(table.parse("RTMINX").is_err());
    }

    #[test]
    fn test_parse_invalid_is_validation_error() {
        let err = LinuxSignals.parse("NOTASIGNAL").unwrap_err();
        match err {
            BuildError::Validation {
                instruction, value, ..
            } => {
                assert_eq!(instruction, "STOPSIGNAL");
                assert_eq!(value, "NOTASIGNAL");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_empty_rejected() {
        assert!(LinuxSignals.parse("").is_err());
        assert!(LinuxSignals.parse("  ").is_err());
    }
}
