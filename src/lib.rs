pub mod ast;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod environment;
mod folder;
pub mod lexicon;
pub mod node_store;
pub mod number;
pub mod parser;
pub mod scanner;
mod source;
mod source_reference;
mod stack;
pub mod value;

pub use ast::{NodeId, Tag, Tree};
pub use compiler::{CompileError, Compiled, Compiler};
pub use config::{CaseFallthrough, CompilerConfig, ConfigError, Scheduling};
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use lexicon::Lexicon;
pub use node_store::{NodeStore, Snapshot, SnapshotError};
pub use parser::{parse, Cls, ParseOutput, ParseSession, Parser, ParserError, ParserOpts, Step};
pub use scanner::{Scanner, ScannerError};
pub use source::{Coord, Position, SourceOffset, SourceSpan};
pub use source_reference::SourceReference;
pub use value::Value;
