//! Evaluates a program snapshot against external data.
//!
//! Three phases run over the same store: the [`Checker`](checker::Checker) looks for
//! operands of the wrong shape, the [`Transformer`](transformer::Transformer) computes
//! the program's value, and the [`Renderer`](renderer::Renderer) turns that value into
//! JSON for whoever asked.

mod checker;
mod environment;
mod error;
mod pattern;
mod renderer;
mod transformer;
mod visitor;

use crate::{
    ast::NodeId,
    config::{CompilerConfig, Scheduling},
    diagnostic::{Diagnostic, DiagnosticKind},
    node_store::{NodeStore, Snapshot},
    stack,
    value::Value,
};
use checker::Checker;
use renderer::Renderer;
use std::rc::Rc;
use tracing::{debug, warn};
use transformer::Transformer;

pub use environment::{Scope, ScopeRef};
pub use error::CompileError;
pub use visitor::{Resume, Scheduler, Visitor};

/// Per-visit evaluation context.
#[derive(Debug, Clone)]
pub struct Options {
    pub env: ScopeRef,
    /// Arguments of the innermost function application.
    pub args: Option<Rc<Vec<Value>>>,
    /// Recurse directly instead of queueing.
    pub sync: bool,
}

impl Options {
    pub fn new(scheduling: Scheduling) -> Self {
        Self {
            env: Scope::global(),
            args: None,
            sync: scheduling == Scheduling::Sync,
        }
    }

    pub fn synchronous(&self) -> Self {
        Self {
            sync: true,
            ..self.clone()
        }
    }
}

/// A loaded program: the node store plus its root.
#[derive(Debug)]
pub struct Program {
    pub store: NodeStore,
    pub root: NodeId,
}

impl Program {
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, CompileError> {
        Ok(Self {
            store: NodeStore::from_snapshot(snapshot)?,
            root: snapshot.root,
        })
    }

    /// A diagnostic positioned at `nid`, when the snapshot carried coordinates for it.
    pub fn diagnostic(
        &self,
        nid: NodeId,
        message: impl Into<String>,
        kind: DiagnosticKind,
    ) -> Diagnostic {
        Diagnostic::new(message, self.store.coord(nid), kind)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub diagnostics: Vec<Diagnostic>,
    /// Absent when checking failed or evaluation was cut short.
    pub value: Option<serde_json::Value>,
}

impl Compiled {
    fn failed(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            diagnostics,
            value: None,
        }
    }
}

pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn compile(&self, snapshot: &Snapshot, data: &serde_json::Value) -> Compiled {
        match self.try_compile(snapshot, data) {
            Ok(compiled) => compiled,
            Err(error) => {
                warn!(%error, "compile aborted");
                Compiled::failed(vec![Diagnostic::new(
                    error.to_string(),
                    error.coord(),
                    DiagnosticKind::Internal,
                )])
            }
        }
    }

    /// Compiles on a worker thread with room for the configured recursion limit.
    pub fn try_compile(
        &self,
        snapshot: &Snapshot,
        data: &serde_json::Value,
    ) -> Result<Compiled, CompileError> {
        let limit = self.config.recursion_limit;
        match stack::with_room_for(limit, || self.compile_here(snapshot, data)) {
            Ok(compiled) => compiled,
            Err(error) => {
                warn!(%error, "compiling on the calling thread");
                self.compile_here(snapshot, data)
            }
        }
    }

    fn compile_here(
        &self,
        snapshot: &Snapshot,
        data: &serde_json::Value,
    ) -> Result<Compiled, CompileError> {
        if let Some(expected) = &self.config.version {
            if *expected != snapshot.version {
                return Err(CompileError::VersionMismatch {
                    expected: expected.clone(),
                    found: snapshot.version.clone(),
                });
            }
        }
        let program = Rc::new(Program::from_snapshot(snapshot)?);
        debug!(nodes = program.store.len(), root = %program.root, "compiling");

        let options = Options::new(self.config.scheduling);
        let mut checker = Checker::new(program.clone());
        let (diagnostics, _) = checker.run(program.root, options.clone())?;
        if !diagnostics.is_empty() {
            debug!(count = diagnostics.len(), "check failed");
            return Ok(Compiled::failed(diagnostics));
        }

        let data = Value::from_json(data);
        let mut transformer = Transformer::new(program.clone(), &self.config, data);
        let (diagnostics, value) = transformer.run(program.root, options)?;
        debug!(diagnostics = diagnostics.len(), "evaluated");
        Ok(Compiled {
            diagnostics,
            value: Some(Renderer::render(&value)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::CaseFallthrough,
        parser::{parse, ParserOpts},
        source::Position,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn compile_with(source: &str, config: CompilerConfig, data: serde_json::Value) -> Compiled {
        let output = parse(source, ParserOpts::default());
        assert!(!output.has_errors(), "{:?}", output.diagnostics());
        let snapshot = output.snapshot().unwrap();
        Compiler::new(config).compile(&snapshot, &data)
    }

    /// Evaluates under both scheduling modes, which must agree.
    fn eval(source: &str) -> serde_json::Value {
        let queued = compile_with(source, CompilerConfig::default(), json!(null));
        let direct = compile_with(
            source,
            CompilerConfig::default().with_scheduling(Scheduling::Sync),
            json!(null),
        );
        assert!(queued.diagnostics.is_empty(), "{:?}", queued.diagnostics);
        assert_eq!(queued, direct);
        queued.value.unwrap()
    }

    fn messages(compiled: &Compiled) -> Vec<String> {
        compiled.diagnostics.iter().map(|d| d.message.clone()).collect()
    }

    #[test]
    fn decimal_arithmetic_is_exact() {
        assert_eq!(eval("map <x: x + 0.2> [0.1]"), json!([0.3]));
    }

    #[test]
    fn lists_keep_source_order() {
        assert_eq!(
            eval("map <x: [x, x * 2, x + 1, x]> [3, 5]"),
            json!([[3, 6, 4, 3], [5, 10, 6, 5]])
        );
    }

    #[test]
    fn records_keep_declaration_order() {
        assert_eq!(
            eval("{ z: 1, a: 'b', m: [] }").to_string(),
            r#"{"z":1,"a":"b","m":[]}"#
        );
    }

    #[test]
    fn checker_failures_stop_evaluation() {
        let compiled = compile_with("not [1]", CompilerConfig::default(), json!(null));
        assert_eq!(compiled.value, None);
        assert_eq!(compiled.diagnostics.len(), 1);
        assert_eq!(compiled.diagnostics[0].kind, DiagnosticKind::Check);
    }

    #[test]
    fn external_data_overrides_defaults() {
        let compiled = compile_with(
            "data { name: 'world', greeting: 'hello' }",
            CompilerConfig::default(),
            json!({"name": "graft"}),
        );
        assert_eq!(compiled.value, Some(json!({"name": "graft", "greeting": "hello"})));
    }

    #[test]
    fn case_fallthrough_is_configurable() {
        let source = "<x: case x of 1: 'one' end> 2";
        let quiet = compile_with(source, CompilerConfig::default(), json!(null));
        assert_eq!(quiet.value, Some(json!({})));
        assert!(quiet.diagnostics.is_empty());

        let config = CompilerConfig {
            case_fallthrough: CaseFallthrough::Report,
            ..CompilerConfig::default()
        };
        let loud = compile_with(source, config, json!(null));
        assert_eq!(loud.value, Some(json!({})));
        assert_eq!(messages(&loud), vec!["No case matched the value 2."]);
    }

    #[test]
    fn version_mismatch_is_reported() {
        let config = CompilerConfig {
            version: Some("0".into()),
            ..CompilerConfig::default()
        };
        let compiled = compile_with("1", config, json!(null));
        assert_eq!(compiled.value, None);
        assert_eq!(compiled.diagnostics[0].kind, DiagnosticKind::Internal);
        assert_eq!(
            compiled.diagnostics[0].message,
            "Snapshot version 1 does not match the expected version 0"
        );
    }

    #[test]
    fn snapshots_survive_json() {
        let output = parse("let sq x = x * x.. map <n: sq n> [1, 2, 3]", ParserOpts::default());
        let text = output.snapshot().unwrap().to_json().unwrap();
        let snapshot = Snapshot::from_json(&text).unwrap();
        let compiled = Compiler::new(CompilerConfig::default()).compile(&snapshot, &json!(null));
        assert_eq!(compiled.value, Some(json!([1, 4, 9])));
    }

    #[test]
    fn cyclic_snapshots_are_refused() {
        let text = r#"{"version":"1","root":2,"nodes":{
            "1":{"tag":"NEG","elts":[2]},
            "2":{"tag":"PROG","elts":[1]}
        }}"#;
        let snapshot = Snapshot::from_json(text).unwrap();
        let compiled = Compiler::new(CompilerConfig::default()).compile(&snapshot, &json!(null));
        assert_eq!(compiled.value, None);
        assert_eq!(compiled.diagnostics[0].kind, DiagnosticKind::Internal);
        assert_eq!(
            compiled.diagnostics[0].message,
            "Invalid program snapshot: Node #1 refers to node #2, which does not come before it"
        );
    }

    #[test]
    fn runaway_calls_stop_at_the_default_limit() {
        for scheduling in [Scheduling::Async, Scheduling::Sync] {
            let config = CompilerConfig::default().with_scheduling(scheduling);
            let source = "map <f: apply f [f]> [<g: apply g [g]>]";
            let compiled = compile_with(source, config, json!(null));
            assert_eq!(compiled.value, None);
            assert_eq!(
                messages(&compiled),
                vec!["Runaway recursion: more than 380 nested scopes while calling 'lambda'"]
            );
            let diagnostic = &compiled.diagnostics[0];
            assert_eq!(diagnostic.kind, DiagnosticKind::Internal);
            assert_ne!(diagnostic.from, Position::default());
        }
    }
}
