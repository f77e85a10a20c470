use crate::{ast::NodeId, node_store::SnapshotError, source::Coord};
use miette::Diagnostic;
use thiserror::Error;

/// Failures that end a compile call outright. Problems in the program itself are
/// reported as [`Diagnostic`](crate::diagnostic::Diagnostic)s instead.
#[derive(Error, Diagnostic, Debug)]
pub enum CompileError {
    #[error("Node {id} is referenced but missing from the program")]
    MissingNode { id: NodeId },
    #[error("Runaway recursion: more than {limit} nested scopes while calling '{name}'")]
    #[diagnostic(help("a function keeps calling itself without reaching a base case"))]
    RunawayRecursion {
        limit: usize,
        name: String,
        /// The application that went one scope too deep.
        at: Option<Coord>,
    },
    #[error("Evaluation finished without producing a value")]
    Unresolved,
    #[error("Invalid program snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("Snapshot version {found} does not match the expected version {expected}")]
    VersionMismatch { expected: String, found: String },
}

impl CompileError {
    pub fn coord(&self) -> Option<Coord> {
        match self {
            CompileError::RunawayRecursion { at, .. } => *at,
            _ => None,
        }
    }

    /// Attaches `coord` to an error that does not have a position yet.
    pub(crate) fn located(self, coord: Option<Coord>) -> Self {
        match self {
            CompileError::RunawayRecursion {
                limit,
                name,
                at: None,
            } => CompileError::RunawayRecursion {
                limit,
                name,
                at: coord,
            },
            other => other,
        }
    }
}
