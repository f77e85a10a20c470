use crate::source::{Coord, Location, Position};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiagnosticKind {
    Lexical,
    Syntax,
    Check,
    Evaluation,
    Internal,
}

/// A problem reported to whoever drives the compiler, positioned by line and column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub from: Position,
    pub to: Position,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, coord: Option<Coord>, kind: DiagnosticKind) -> Self {
        let coord = coord.unwrap_or_default();
        Self {
            message: message.into(),
            from: coord.from,
            to: coord.to,
            kind,
        }
    }

    pub fn at(message: impl Into<String>, location: Location, kind: DiagnosticKind) -> Self {
        Self::new(message, Some(location.coord), kind)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({}-{})", self.kind, self.message, self.from, self.to)
    }
}
