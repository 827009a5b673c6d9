use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Severity of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Debug
    Debug,
    /// Info
    Info,
    /// Warning
    Warning,
    /// Error
    Error,
    /// Critical
    Critical,
}

impl Level {
    /// Wire name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown level name.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown level {0:?}")]
pub struct ParseLevelError(String);

/// Accepts the wire names plus the common aliases used by logging frameworks.
impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warning" | "warn" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "critical" | "fatal" => Ok(Level::Critical),
            _ => Err(ParseLevelError(s.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("debug", Level::Debug ; "debug")]
    #[test_case("WARN", Level::Warning ; "warn alias")]
    #[test_case("fatal", Level::Critical ; "fatal alias")]
    fn parse(input: &str, expected: Level) {
        assert_eq!(expected, input.parse().unwrap());
    }

    #[test]
    fn parse_unknown() {
        assert!("loud".parse::<Level>().is_err());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!("\"warning\"", serde_json::to_string(&Level::Warning).unwrap());
    }
}
