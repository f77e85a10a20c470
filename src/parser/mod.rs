//! Token-at-a-time parser.
//!
//! The grammar runs as an explicit pushdown machine: every pending piece of work is a
//! [`Frame`] on `frames`, and partially built nodes wait on the `nodes` builder stack.
//! [`Parser::feed`] consumes exactly one token and returns, so the caller can stop
//! between any two tokens and resume later with nothing held on the native stack.

mod frame;
mod session;

use crate::{
    ast::{Elt, NodeId, Tag},
    diagnostic::{Diagnostic, DiagnosticKind},
    environment::{Environment, RunawayRecursion, DEFAULT_RECURSION_LIMIT},
    folder::Folder,
    lexicon::Lexicon,
    node_store::{NodeStore, Snapshot, SNAPSHOT_VERSION},
    scanner::{ScannerError, Token, TokenType},
    source::{Coord, Location},
    stack,
};
use frame::{Flow, Frame, ProgramStage};
use miette::Diagnostic as MietteDiagnostic;
use std::rc::Rc;
use strum::{Display, IntoStaticStr};
use thiserror::Error;
use tracing::{debug, warn};

pub use session::{ParseSession, Step};

#[derive(Error, MietteDiagnostic, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("Expecting {expected}, found {found}.")]
    UnexpectedToken {
        expected: String,
        found: String,
        #[label("Found {found} here")]
        at: Location,
    },
    #[error("Name '{name}' not found.")]
    #[diagnostic(help("names are defined with `let` before they are used"))]
    NameNotFound {
        name: String,
        #[label("Used here")]
        at: Location,
    },
    #[error("{reason}")]
    RunawayRecursion {
        reason: RunawayRecursion,
        #[label("While folding this")]
        at: Location,
    },
}

impl ParserError {
    pub fn location(&self) -> Location {
        match self {
            ParserError::UnexpectedToken { at, .. }
            | ParserError::NameNotFound { at, .. }
            | ParserError::RunawayRecursion { at, .. } => *at,
        }
    }

    /// Recoverable errors are recorded and parsing carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ParserError::NameNotFound { .. })
    }

    pub(crate) fn expected(expected: &str, token: &Token) -> Self {
        ParserError::UnexpectedToken {
            expected: expected.to_string(),
            found: token.token_type.describe(),
            at: token.location,
        }
    }

    pub(crate) fn runaway(reason: RunawayRecursion, token: &Token) -> Self {
        ParserError::RunawayRecursion {
            reason,
            at: token.location,
        }
    }
}

/// How an editor should colour a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Cls {
    Keyword,
    Number,
    String,
    Variable,
    Val,
    Function,
    Param,
    Def,
    Punc,
    Operator,
    Comment,
    Error,
}

#[derive(Debug, Clone)]
pub struct ParserOpts {
    pub lexicon: Rc<Lexicon>,
    pub recursion_limit: usize,
    pub version: String,
}

impl Default for ParserOpts {
    fn default() -> Self {
        Self {
            lexicon: Rc::new(Lexicon::standard()),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            version: SNAPSHOT_VERSION.to_string(),
        }
    }
}

impl ParserOpts {
    pub fn with_lexicon(self, lexicon: Lexicon) -> Self {
        Self {
            lexicon: Rc::new(lexicon),
            ..self
        }
    }
    pub fn with_recursion_limit(self, recursion_limit: usize) -> Self {
        Self {
            recursion_limit,
            ..self
        }
    }
}

pub struct Parser {
    opts: ParserOpts,
    store: NodeStore,
    env: Environment,
    frames: Vec<Frame>,
    nodes: Vec<NodeId>,
    errors: Vec<ParserError>,
    root: Option<NodeId>,
    halted: bool,
}

impl Parser {
    pub fn new(opts: ParserOpts) -> Self {
        let env = Environment::new(&opts.lexicon, opts.recursion_limit);
        Self {
            opts,
            store: NodeStore::new(),
            env,
            frames: vec![Frame::Program(ProgramStage::Start)],
            nodes: Vec::new(),
            errors: Vec::new(),
            root: None,
            halted: false,
        }
    }

    pub fn opts(&self) -> &ParserOpts {
        &self.opts
    }

    /// Consumes one token and reports how it was classified.
    pub fn feed(&mut self, token: Token) -> Cls {
        if token.token_type == TokenType::LineComment {
            return Cls::Comment;
        }
        if self.halted {
            return Cls::Error;
        }
        while let Some(frame) = self.frames.pop() {
            match self.step(frame, &token) {
                Ok(Flow::Consumed(cls)) => return cls,
                Ok(Flow::Pass) => continue,
                Err(error) => {
                    debug!(%error, "parse halted");
                    self.errors.push(error);
                    self.halted = true;
                    return Cls::Error;
                }
            }
        }
        self.halted = true;
        Cls::Error
    }

    pub fn is_done(&self) -> bool {
        self.halted || self.root.is_some()
    }

    pub fn errors(&self) -> &[ParserError] {
        &self.errors
    }

    pub fn finish(self) -> (NodeStore, Option<NodeId>, Vec<ParserError>) {
        (self.store, self.root, self.errors)
    }

    fn folder(&mut self) -> Folder<'_> {
        Folder::new(&mut self.store, &mut self.env)
    }

    /// Folds `nid` on a worker thread with room for the recursion limit.
    fn fold(&mut self, nid: NodeId) -> Result<NodeId, RunawayRecursion> {
        let limit = self.opts.recursion_limit;
        let (store, env) = (&mut self.store, &mut self.env);
        match stack::with_room_for(limit, move || Folder::new(store, env).fold(nid)) {
            Ok(folded) => folded,
            Err(error) => {
                warn!(%error, "folding on the calling thread");
                self.folder().fold(nid)
            }
        }
    }

    fn pop(&mut self) -> NodeId {
        self.nodes.pop().unwrap_or(NodeId::NONE)
    }

    fn split(&mut self, base: usize) -> Vec<NodeId> {
        let base = base.min(self.nodes.len());
        self.nodes.split_off(base)
    }

    fn joined(&self, children: &[NodeId]) -> Option<Coord> {
        children
            .iter()
            .filter_map(|child| self.store.coord(*child))
            .reduce(|left, right| left.join(&right))
    }

    fn push_leaf(&mut self, tag: Tag, text: impl Into<String>, at: &Location) -> NodeId {
        let nid = self
            .store
            .intern_at(tag, vec![Elt::Text(text.into())], Some(at.coord));
        self.nodes.push(nid);
        nid
    }

    fn push_node(&mut self, tag: Tag, elts: Vec<Elt>, coord: Option<Coord>) -> NodeId {
        let nid = self.store.intern_at(tag, elts, coord);
        self.nodes.push(nid);
        nid
    }

    fn push_branch(&mut self, tag: Tag, children: Vec<NodeId>, coord: Option<Coord>) -> NodeId {
        let coord = coord.or_else(|| self.joined(&children));
        self.push_node(tag, children.into_iter().map(Elt::Node).collect(), coord)
    }
}

/// Everything a parse leaves behind.
#[derive(Debug)]
pub struct ParseOutput {
    pub store: NodeStore,
    pub root: Option<NodeId>,
    pub scanner_errors: Vec<ScannerError>,
    pub parser_errors: Vec<ParserError>,
    pub version: String,
}

impl ParseOutput {
    pub fn has_errors(&self) -> bool {
        !self.scanner_errors.is_empty() || !self.parser_errors.is_empty()
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.root.map(|root| Snapshot {
            version: self.version.clone(),
            ..self.store.snapshot(root)
        })
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        let lexical = self
            .scanner_errors
            .iter()
            .map(|error| {
                Diagnostic::at(error.to_string(), error.location(), DiagnosticKind::Lexical)
            });
        let syntax = self
            .parser_errors
            .iter()
            .map(|error| {
                Diagnostic::at(error.to_string(), error.location(), DiagnosticKind::Syntax)
            });
        lexical.chain(syntax).collect()
    }
}

/// Parses a complete program.
pub fn parse(source: &str, opts: ParserOpts) -> ParseOutput {
    let mut session = ParseSession::new(opts);
    session.push_str(source);
    session.end_input();
    while let Step::Token(_) = session.step() {}
    session.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::BinOp;
    use pretty_assertions::assert_eq;

    fn show(source: &str) -> String {
        let output = parse(source, ParserOpts::default());
        assert!(
            !output.has_errors(),
            "unexpected errors: {:?} {:?}",
            output.scanner_errors,
            output.parser_errors
        );
        let root = output.root.expect("a program");
        output.store.tree(root).expect("root node").to_string()
    }

    fn errors(source: &str) -> Vec<String> {
        parse(source, ParserOpts::default())
            .parser_errors
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn literals_and_sequences() {
        assert_eq!(
            show("1 'a' true null"),
            r#"(PROG (EXPRS (NUM "1") (STR "a") (BOOL true) (NULL)))"#
        );
    }

    #[test]
    fn binary_operators_respect_precedence() {
        assert_eq!(
            show("<x: x + 2 * 3 == 7 or false>"),
            concat!(
                r#"(PROG (EXPRS (LAMBDA (LIST (IDENT "x")) "#,
                r#"(EXPRS (OR (EQ (ADD (IDENT "x") (NUM "6")) (NUM "7")) (BOOL false))))))"#
            )
        );
    }

    #[test]
    fn constant_expressions_fold() {
        assert_eq!(show("1 + 2 * 3"), r#"(PROG (EXPRS (NUM "7")))"#);
        assert_eq!(show("2 ^ 3 ^ 2"), r#"(PROG (EXPRS (NUM "64")))"#);
        assert_eq!(show("-5 + 1"), r#"(PROG (EXPRS (NUM "-4")))"#);
        assert_eq!(show("2 <= 1"), r#"(PROG (EXPRS (BOOL false)))"#);
        assert_eq!(show("eq 3 3"), r#"(PROG (EXPRS (BOOL true)))"#);
    }

    #[test]
    fn powers_without_a_real_result_are_left_for_run_time() {
        assert_eq!(
            show("-8 ^ 0.5"),
            r#"(PROG (EXPRS (POW (NUM "-8") (NUM "0.5"))))"#
        );
    }

    #[test]
    fn recursion_through_if_stops_at_its_base_case() {
        assert_eq!(
            show("let down n = if n == 0 then 'done' else down (sub n 1) end.. down 3"),
            r#"(PROG (EXPRS (STR "done")))"#
        );
        assert_eq!(
            show("let fact n = if eq n 0 then 1 else mul n (fact (sub n 1)) end.. fact 3"),
            r#"(PROG (EXPRS (NUM "6")))"#
        );
    }

    #[test]
    fn partially_applied_functions_take_later_arguments() {
        assert_eq!(
            show("let add x y = x + y.. (add 10) 20"),
            r#"(PROG (EXPRS (NUM "30")))"#
        );
    }

    #[test]
    fn custom_lexicons_can_bind_subtraction() {
        let lexicon = Lexicon::standard().with_operator("minus", BinOp::Sub);
        let output = parse("5 minus 2", ParserOpts::default().with_lexicon(lexicon));
        assert!(!output.has_errors());
        let root = output.root.unwrap();
        assert_eq!(
            output.store.tree(root).unwrap().to_string(),
            r#"(PROG (EXPRS (NUM "3")))"#
        );
    }

    #[test]
    fn concatenation_wraps_a_list() {
        assert_eq!(
            show("'a' ++ 'b'"),
            r#"(PROG (EXPRS (CONCAT (LIST (STR "a") (STR "b")))))"#
        );
    }

    #[test]
    fn let_values_are_substituted() {
        assert_eq!(show("let x = 10.. x + 1"), r#"(PROG (EXPRS (NUM "11")))"#);
    }

    #[test]
    fn let_functions_expand_with_their_arguments() {
        assert_eq!(
            show("let plus a b = add a b.. plus 10 20"),
            r#"(PROG (EXPRS (NUM "30")))"#
        );
        assert_eq!(
            show("let plus a b = add a b.. plus 10"),
            r#"(PROG (EXPRS (LAMBDA (LIST (IDENT "b")) (EXPRS (ADD (NUM "10") (IDENT "b"))))))"#
        );
    }

    #[test]
    fn lambdas_apply_at_the_head_of_a_sequence() {
        assert_eq!(show("<x y: x * y> 6 7"), r#"(PROG (EXPRS (NUM "42")))"#);
        assert_eq!(
            show("map <x: x + 1> [1 2]"),
            concat!(
                r#"(PROG (EXPRS (MAP (LAMBDA (LIST (IDENT "x")) "#,
                r#"(EXPRS (ADD (IDENT "x") (NUM "1")))) (LIST (NUM "1") (NUM "2")))))"#
            )
        );
    }

    #[test]
    fn records_lists_and_parens() {
        assert_eq!(
            show("{a: 1, 'b c': [2, 3]}"),
            concat!(
                r#"(PROG (EXPRS (RECORD (BINDING (STR "a") (NUM "1")) "#,
                r#"(BINDING (STR "b c") (LIST (NUM "2") (NUM "3"))))))"#
            )
        );
        assert_eq!(show("(4)"), r#"(PROG (EXPRS (NUM "4")))"#);
    }

    #[test]
    fn case_with_a_literal_scrutinee_is_decided() {
        assert_eq!(
            show("case 2 of 1: 'one'.. of 2: 'two'.. of _: 'other'.. end"),
            r#"(PROG (EXPRS (STR "two")))"#
        );
    }

    #[test]
    fn case_keeps_clauses_for_unknown_scrutinees() {
        assert_eq!(
            show("<n: case n of 0: 'zero' of _: 'many' end>"),
            concat!(
                r#"(PROG (EXPRS (LAMBDA (LIST (IDENT "n")) (EXPRS (CASE (EXPRS (IDENT "n")) "#,
                r#"(OF (NUM "0") (EXPRS (STR "zero"))) (OF (_) (EXPRS (STR "many"))))))))"#
            )
        );
    }

    #[test]
    fn if_without_else_is_null_when_false() {
        assert_eq!(show("if false then 1 end"), r#"(PROG (EXPRS (NULL)))"#);
        assert_eq!(show("if true then 1 else 2 end"), r#"(PROG (EXPRS (NUM "1")))"#);
    }

    #[test]
    fn interpolation_builds_a_concatenation() {
        assert_eq!(
            show("let n = 3.. 'n=${n}!'"),
            r#"(PROG (EXPRS (CONCAT (LIST (STR "n=") (EXPRS (NUM "3")) (STR "!")))))"#
        );
    }

    #[test]
    fn unknown_names_are_recoverable() {
        let output = parse("foo 1", ParserOpts::default());
        assert_eq!(
            output
                .parser_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["Name 'foo' not found.".to_string()]
        );
        assert!(output.root.is_some());
    }

    #[test]
    fn syntax_errors_halt_the_parse() {
        assert_eq!(
            errors("let = 1"),
            vec!["Expecting a name, found a '='.".to_string()]
        );
        assert_eq!(
            errors("(1"),
            vec!["Expecting a ')', found the end of the program.".to_string()]
        );
        assert_eq!(
            errors("1 )"),
            vec!["Expecting the end of the program, found a ')'.".to_string()]
        );
    }

    #[test]
    fn runaway_expansion_is_fatal() {
        let opts = ParserOpts::default().with_recursion_limit(32);
        let output = parse("let loop x = loop x.. loop 1", opts);
        assert!(matches!(
            output.parser_errors.as_slice(),
            [ParserError::RunawayRecursion { .. }]
        ));
        assert_eq!(output.root, None);
    }

    #[test]
    fn runaway_expansion_at_the_default_limit() {
        let output = parse(
            "let f x = if x then f x else f x end.. f true",
            ParserOpts::default(),
        );
        assert_eq!(
            output
                .parser_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
            vec!["Runaway recursion: more than 380 nested scopes while entering 'f'".to_string()]
        );
        assert_eq!(output.root, None);
    }

    #[test]
    fn structurally_equal_subtrees_share_an_id() {
        let output = parse("['a' ++ 'b', 'a' ++ 'b']", ParserOpts::default());
        let root = output.root.unwrap();
        let exprs = output.store.node(root).unwrap().child(0);
        let list = output.store.node(exprs).unwrap().child(0);
        let list = output.store.node(list).unwrap();
        assert_eq!(list.tag, Tag::List);
        assert_eq!(list.child(0), list.child(1));
    }

    #[test]
    fn node_coordinates_follow_tokens() {
        let output = parse("\n  'hi'", ParserOpts::default());
        let root = output.root.unwrap();
        let exprs = output.store.node(root).unwrap().child(0);
        let string = output.store.node(exprs).unwrap().child(0);
        let coord = output.store.coord(string).unwrap();
        assert_eq!((coord.from.line, coord.from.column), (1, 2));
        assert_eq!((coord.to.line, coord.to.column), (1, 6));
    }
}
