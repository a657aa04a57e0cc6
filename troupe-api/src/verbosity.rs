//! Log severity and verbosity model.
//!
//! Severities are what log records carry; verbosity is what operators
//! configure. The mapping between the two lives here so every collaborator
//! (CLI flags, HTTP log endpoints, the runtime's own tracing bootstrap)
//! agrees on it.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A severity level was outside the supported range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported severity level")]
pub struct UnsupportedSeverity;

/// Severity of a log record, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Unsupported,
    Crash,
    Critical,
    Error,
    Warning,
    Processing,
    Status,
    Info,
    Debug,
}

impl Severity {
    /// Stable wire name of the severity.
    pub fn as_str(self) -> Result<&'static str, UnsupportedSeverity> {
        match self {
            Severity::Crash => Ok("crash"),
            Severity::Critical => Ok("critical"),
            Severity::Error => Ok("error"),
            Severity::Warning => Ok("warning"),
            Severity::Processing => Ok("processing"),
            Severity::Status => Ok("status"),
            Severity::Info => Ok("info"),
            Severity::Debug => Ok("debug"),
            Severity::Unsupported => Err(UnsupportedSeverity),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Ok(s) => f.write_str(s),
            Err(_) => f.write_str("unsupported"),
        }
    }
}

impl FromStr for Severity {
    type Err = UnsupportedSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "crash" => Severity::Crash,
            "critical" => Severity::Critical,
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            "processing" => Severity::Processing,
            "status" => Severity::Status,
            "info" => Severity::Info,
            "debug" => Severity::Debug,
            _ => return Err(UnsupportedSeverity),
        })
    }
}

/// Operator-facing verbosity knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    #[default]
    Undefined,
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl Verbosity {
    /// The minimum severity a given verbosity lets through.
    pub fn severity(self) -> Severity {
        match self {
            Verbosity::Lowest => Severity::Error,
            Verbosity::Low => Severity::Warning,
            Verbosity::Undefined | Verbosity::Normal | Verbosity::High => Severity::Info,
            Verbosity::Highest => Severity::Debug,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_string_round_trip() {
        for sev in [
            Severity::Crash,
            Severity::Critical,
            Severity::Error,
            Severity::Warning,
            Severity::Processing,
            Severity::Status,
            Severity::Info,
            Severity::Debug,
        ] {
            let s = sev.as_str().unwrap();
            assert_eq!(s.parse::<Severity>().unwrap(), sev);
        }
    }

    #[test]
    fn unsupported_severity_has_no_name() {
        assert_eq!(Severity::Unsupported.as_str(), Err(UnsupportedSeverity));
        assert_eq!("loud".parse::<Severity>(), Err(UnsupportedSeverity));
    }

    #[test]
    fn verbosity_maps_to_severity() {
        assert_eq!(Verbosity::Lowest.severity(), Severity::Error);
        assert_eq!(Verbosity::Undefined.severity(), Severity::Info);
        assert_eq!(Verbosity::Highest.severity(), Severity::Debug);
    }
}
