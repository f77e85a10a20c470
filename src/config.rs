use crate::environment::DEFAULT_RECURSION_LIMIT;
use serde::Deserialize;
use std::{fs, io, path::Path};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// Every visit and continuation goes through the work queue.
    Async,
    /// Visits recurse directly.
    Sync,
}

impl Default for Scheduling {
    fn default() -> Self {
        Scheduling::Async
    }
}

/// What a CASE with no matching clause produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseFallthrough {
    /// An empty record, silently.
    Empty,
    /// An empty record plus an evaluation diagnostic.
    Report,
}

impl Default for CaseFallthrough {
    fn default() -> Self {
        CaseFallthrough::Empty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompilerConfig {
    pub recursion_limit: usize,
    pub scheduling: Scheduling,
    pub case_fallthrough: CaseFallthrough,
    /// Snapshot version to accept; any version when unset.
    pub version: Option<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            scheduling: Scheduling::default(),
            case_fallthrough: CaseFallthrough::default(),
            version: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid config: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl CompilerConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn with_scheduling(self, scheduling: Scheduling) -> Self {
        Self { scheduling, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_field_has_a_default() {
        assert_eq!(CompilerConfig::from_json("{}").unwrap(), CompilerConfig::default());
    }

    #[test]
    fn fields_are_read_from_json() {
        let config = CompilerConfig::from_json(
            r#"{"scheduling": "sync", "case_fallthrough": "report", "recursion_limit": 50}"#,
        )
        .unwrap();
        assert_eq!(config.scheduling, Scheduling::Sync);
        assert_eq!(config.case_fallthrough, CaseFallthrough::Report);
        assert_eq!(config.recursion_limit, 50);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            CompilerConfig::from_json(r#"{"recursion": 5}"#),
            Err(ConfigError::Invalid(_))
        ));
    }
}
