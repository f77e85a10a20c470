//! Compile-time partial evaluation.
//!
//! Sequences are read left to right in prefix form: a function word consumes as many
//! following terms as it has parameters. With every argument present the body is
//! re-folded with the parameters substituted (full application). With some missing, the
//! unbound parameters wrap the result in a fresh lambda (partial application). `apply`
//! leaves an APPLY node for the evaluator (late application).

use crate::{
    ast::{Elt, Node, NodeId, Tag},
    environment::{Environment, RunawayRecursion, Word, WordKind},
    node_store::NodeStore,
    number,
};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// First term of a sequence: a lambda value here applies to the terms after it.
    Head,
    /// An argument being collected for a function to its left.
    Arg,
}

type Folded = Result<(NodeId, usize), RunawayRecursion>;

pub struct Folder<'a> {
    store: &'a mut NodeStore,
    env: &'a mut Environment,
}

impl<'a> Folder<'a> {
    pub fn new(store: &'a mut NodeStore, env: &'a mut Environment) -> Self {
        Self { store, env }
    }

    /// Folds one term on its own; a function name with nothing to consume is partially applied.
    pub fn fold(&mut self, nid: NodeId) -> Result<NodeId, RunawayRecursion> {
        if nid.is_none() {
            return Ok(nid);
        }
        self.fold_term(&[nid], 0, Mode::Head).map(|(folded, _)| folded)
    }

    /// Collapses a one-element EXPRS to its element.
    pub fn unwrap_exprs(&self, nid: NodeId) -> NodeId {
        match self.store.node(nid) {
            Some(node) if node.tag == Tag::Exprs && node.elts.len() == 1 => node.child(0),
            _ => nid,
        }
    }

    fn fold_seq(&mut self, elts: &[NodeId]) -> Result<Vec<NodeId>, RunawayRecursion> {
        let mut folded = Vec::with_capacity(elts.len());
        let mut pos = 0;
        while pos < elts.len() {
            let (term, next) = self.fold_term(elts, pos, Mode::Head)?;
            folded.push(term);
            pos = next;
        }
        Ok(folded)
    }

    fn fold_term(&mut self, elts: &[NodeId], pos: usize, mode: Mode) -> Folded {
        let nid = elts[pos];
        let node = match self.store.node(nid) {
            Some(node) => node.clone(),
            None => return Ok((nid, pos + 1)),
        };
        match node.tag {
            Tag::Ident => self.fold_ident(nid, &node, elts, pos, mode),
            Tag::Lambda => {
                let lambda = self.fold_lambda(nid, &node)?;
                self.apply_following(lambda, elts, pos + 1, mode)
            }
            Tag::Paren => self.fold_paren(nid, &node, elts, pos, mode),
            _ => Ok((self.fold_node(nid, &node)?, pos + 1)),
        }
    }

    fn take_args(
        &mut self,
        elts: &[NodeId],
        mut pos: usize,
        max: usize,
    ) -> Result<(Vec<NodeId>, usize), RunawayRecursion> {
        let mut args = Vec::with_capacity(max);
        while args.len() < max && pos < elts.len() {
            let (arg, next) = self.fold_term(elts, pos, Mode::Arg)?;
            args.push(arg);
            pos = next;
        }
        Ok((args, pos))
    }

    fn fold_ident(
        &mut self,
        nid: NodeId,
        node: &Node,
        elts: &[NodeId],
        pos: usize,
        mode: Mode,
    ) -> Folded {
        let name = node.text().unwrap_or_default().to_string();
        let kind = self.env.find(&name).map(|(word, _)| word.kind.clone());
        match kind {
            Some(WordKind::Value { nid: bound }) if bound.is_some() => {
                if self.store.tag(bound) == Some(Tag::Lambda) {
                    self.apply_following(bound, elts, pos + 1, mode)
                } else {
                    Ok((bound, pos + 1))
                }
            }
            Some(WordKind::Function {
                params,
                body,
                scope,
            }) => {
                let (args, next) = self.take_args(elts, pos + 1, params.len())?;
                Ok((self.expand(&name, &params, body, scope, args)?, next))
            }
            Some(WordKind::Builtin { tag, arity }) => {
                let (args, next) = self.take_args(elts, pos + 1, arity)?;
                Ok((self.build(nid, tag, arity, args), next))
            }
            _ => Ok((nid, pos + 1)),
        }
    }

    /// Lambda values only reach for arguments at the head of a sequence.
    fn apply_following(
        &mut self,
        lambda: NodeId,
        elts: &[NodeId],
        pos: usize,
        mode: Mode,
    ) -> Folded {
        if mode == Mode::Arg {
            return Ok((lambda, pos));
        }
        let arity = self.params(lambda).len();
        let (args, next) = self.take_args(elts, pos, arity)?;
        if args.is_empty() {
            return Ok((lambda, next));
        }
        Ok((self.apply_lambda(lambda, args)?, next))
    }

    fn params(&self, lambda: NodeId) -> Vec<String> {
        let list = self
            .store
            .node(lambda)
            .map(|node| node.child(0))
            .unwrap_or(NodeId::NONE);
        self.store
            .node(list)
            .map(|list| {
                list.children()
                    .filter_map(|param| self.store.node(param).and_then(Node::text))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn expand(
        &mut self,
        name: &str,
        params: &[String],
        body: NodeId,
        scope: usize,
        args: Vec<NodeId>,
    ) -> Result<NodeId, RunawayRecursion> {
        trace!(name, args = args.len(), depth = self.env.depth(), "expanding function");
        self.env.enter(name, Some(scope))?;
        for (offset, param) in params.iter().enumerate() {
            let arg = args.get(offset).copied().unwrap_or(NodeId::NONE);
            self.env.add_word(Word::value(param, arg, offset));
        }
        let folded = self.fold(body);
        self.env.exit();
        let result = self.unwrap_exprs(folded?);
        Ok(self.residual(&params[args.len().min(params.len())..], result))
    }

    fn apply_lambda(
        &mut self,
        lambda: NodeId,
        args: Vec<NodeId>,
    ) -> Result<NodeId, RunawayRecursion> {
        let params = self.params(lambda);
        let body = self
            .store
            .node(lambda)
            .map(|node| node.child(1))
            .unwrap_or(NodeId::NONE);
        trace!(%lambda, args = args.len(), "applying lambda");
        self.env.enter("lambda", None)?;
        for (offset, param) in params.iter().enumerate() {
            let arg = args.get(offset).copied().unwrap_or(NodeId::NONE);
            self.env.add_word(Word::value(param, arg, offset));
        }
        let folded = self.fold(body);
        self.env.exit();
        let result = self.unwrap_exprs(folded?);
        Ok(self.residual(&params[args.len().min(params.len())..], result))
    }

    /// Wraps `body` in a lambda over the parameters that did not receive arguments.
    fn residual(&mut self, unbound: &[String], body: NodeId) -> NodeId {
        if unbound.is_empty() {
            return body;
        }
        let params: Vec<NodeId> = unbound
            .iter()
            .map(|param| self.store.leaf(Tag::Ident, param.as_str()))
            .collect();
        let list = self.store.branch(Tag::List, params);
        let body = match self.store.tag(body) {
            Some(Tag::Exprs) => body,
            _ => self.store.branch(Tag::Exprs, [body]),
        };
        self.store.branch(Tag::Lambda, [list, body])
    }

    /// Builds a builtin's node; missing arguments become generated parameters.
    fn build(&mut self, origin: NodeId, tag: Tag, arity: usize, mut args: Vec<NodeId>) -> NodeId {
        let unbound: Vec<String> = (args.len()..arity).map(|index| format!("${}", index)).collect();
        for param in &unbound {
            let ident = self.store.leaf(Tag::Ident, param.as_str());
            args.push(ident);
        }
        let node = self.simplify(origin, tag, args);
        self.residual(&unbound, node)
    }

    /// Folds a lambda's body as a value, shielding its parameters from outer bindings.
    fn fold_lambda(&mut self, nid: NodeId, node: &Node) -> Result<NodeId, RunawayRecursion> {
        let params = self.params(nid);
        self.env.enter("lambda", None)?;
        for (offset, param) in params.iter().enumerate() {
            self.env.add_word(Word::value(param, NodeId::NONE, offset));
        }
        let body = self.fold(node.child(1));
        self.env.exit();
        Ok(self.rebuild(nid, Tag::Lambda, vec![node.child(0), body?]))
    }

    fn fold_paren(
        &mut self,
        nid: NodeId,
        node: &Node,
        elts: &[NodeId],
        pos: usize,
        mode: Mode,
    ) -> Folded {
        let inner = node.child(0);
        let terms: Vec<NodeId> = match self.store.node(inner) {
            Some(inner) if inner.tag == Tag::Exprs => inner.children().collect(),
            Some(_) => vec![inner],
            None => Vec::new(),
        };
        let folded = self.fold_seq(&terms)?;
        if let [only] = folded[..] {
            match self.store.tag(only) {
                Some(Tag::Lambda) => return self.apply_following(only, elts, pos + 1, mode),
                Some(Tag::Ident | Tag::Exprs | Tag::Paren) | None => {}
                Some(_) => return Ok((only, pos + 1)),
            }
        }
        let exprs = self.rebuild(inner, Tag::Exprs, folded);
        Ok((self.rebuild(nid, Tag::Paren, vec![exprs]), pos + 1))
    }

    fn fold_node(&mut self, nid: NodeId, node: &Node) -> Result<NodeId, RunawayRecursion> {
        match node.tag {
            Tag::Num | Tag::Str | Tag::Bool | Tag::Null | Tag::Wildcard => Ok(nid),
            Tag::Ident | Tag::Lambda | Tag::Paren => self.fold(nid),
            Tag::Exprs | Tag::List => {
                let children: Vec<NodeId> = node.children().collect();
                let folded = self.fold_seq(&children)?;
                Ok(self.rebuild(nid, node.tag, folded))
            }
            Tag::Binding => {
                let value = self.fold(node.child(1))?;
                let value = self.unwrap_exprs(value);
                Ok(self.rebuild(nid, Tag::Binding, vec![node.child(0), value]))
            }
            Tag::If => self.fold_if(nid, node),
            Tag::Case => self.fold_case(nid, node),
            _ => {
                let children = node
                    .children()
                    .map(|child| self.fold(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.simplify(nid, node.tag, children))
            }
        }
    }

    fn fold_if(&mut self, nid: NodeId, node: &Node) -> Result<NodeId, RunawayRecursion> {
        let condition = self.fold(node.child(0))?;
        if let Some(truth) = self.literal_truth(self.unwrap_exprs(condition)) {
            let branch = if truth { node.child(1) } else { node.child(2) };
            if branch.is_none() {
                return Ok(self.store.intern(Tag::Null, Vec::new()));
            }
            let folded = self.fold(branch)?;
            return Ok(self.unwrap_exprs(folded));
        }
        let then = self.fold(node.child(1))?;
        let otherwise = self.fold(node.child(2))?;
        Ok(self.rebuild(nid, Tag::If, vec![condition, then, otherwise]))
    }

    fn fold_case(&mut self, nid: NodeId, node: &Node) -> Result<NodeId, RunawayRecursion> {
        let scrutinee = self.fold(node.child(0))?;
        let value = self.unwrap_exprs(scrutinee);
        let mut clauses = Vec::new();
        for of in node.children().skip(1) {
            let (pattern, body) = match self.store.node(of) {
                Some(clause) => (clause.child(0), clause.child(1)),
                None => continue,
            };
            let pattern = self.fold(pattern)?;
            clauses.push((of, self.unwrap_exprs(pattern), body));
        }

        if self.store.tag(value).map_or(false, Tag::is_literal) {
            for (_, pattern, body) in &clauses {
                match self.decide(value, *pattern) {
                    Some(true) => {
                        let folded = self.fold(*body)?;
                        return Ok(self.unwrap_exprs(folded));
                    }
                    Some(false) => continue,
                    None => break,
                }
            }
        }

        let mut elts = vec![scrutinee];
        for (of, pattern, body) in clauses {
            let body = self.fold(body)?;
            elts.push(self.rebuild(of, Tag::Of, vec![pattern, body]));
        }
        Ok(self.rebuild(nid, Tag::Case, elts))
    }

    /// Whether a literal scrutinee matches a folded pattern, when that is knowable now.
    fn decide(&self, value: NodeId, pattern: NodeId) -> Option<bool> {
        if value == pattern {
            return Some(true);
        }
        let pattern_node = self.store.node(pattern)?;
        let value_node = self.store.node(value)?;
        match pattern_node.tag {
            Tag::Wildcard => Some(true),
            Tag::Num if value_node.tag == Tag::Num => {
                let left = pattern_node.text().and_then(number::parse);
                let right = value_node.text().and_then(number::parse);
                Some(left.is_some() && left == right)
            }
            tag if tag.is_literal() => Some(false),
            Tag::List | Tag::Record => Some(false),
            _ => None,
        }
    }

    fn literal_truth(&self, nid: NodeId) -> Option<bool> {
        let node = self.store.node(nid)?;
        match node.tag {
            Tag::Bool => node.flag(),
            Tag::Null => Some(false),
            Tag::Num => node.text().and_then(number::parse).map(|n| !n.is_zero()),
            Tag::Str => node.text().map(|text| !text.is_empty()),
            _ => None,
        }
    }

    fn literal_number(&self, nid: NodeId) -> Option<rust_decimal::Decimal> {
        let node = self.store.node(nid)?;
        if node.tag != Tag::Num {
            return None;
        }
        node.text().and_then(number::parse)
    }

    /// Constant-folds arithmetic and comparisons on literal numbers; anything else is
    /// rebuilt as is.
    fn simplify(&mut self, origin: NodeId, tag: Tag, children: Vec<NodeId>) -> NodeId {
        match (tag, children.as_slice()) {
            (Tag::Add | Tag::Sub | Tag::Mul | Tag::Div | Tag::Mod | Tag::Pow, [left, right]) => {
                if let (Some(left), Some(right)) =
                    (self.literal_number(*left), self.literal_number(*right))
                {
                    if let Ok(result) = number::apply(tag, left, right) {
                        return self.store.leaf(Tag::Num, number::format(result));
                    }
                }
            }
            (Tag::Eq | Tag::Ne | Tag::Lt | Tag::Gt | Tag::Le | Tag::Ge, [left, right]) => {
                if let (Some(left), Some(right)) =
                    (self.literal_number(*left), self.literal_number(*right))
                {
                    if let Some(result) = number::compare(tag, left, right) {
                        return self.store.intern(Tag::Bool, vec![Elt::Bool(result)]);
                    }
                }
            }
            (Tag::Neg, [operand]) => {
                if let Some(operand) = self.literal_number(*operand) {
                    return self.store.leaf(Tag::Num, number::format(-operand));
                }
            }
            _ => {}
        }
        self.rebuild(origin, tag, children)
    }

    fn rebuild(&mut self, origin: NodeId, tag: Tag, children: Vec<NodeId>) -> NodeId {
        let coord = self.store.coord(origin);
        self.store
            .intern_at(tag, children.into_iter().map(Elt::Node).collect(), coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{environment::DEFAULT_RECURSION_LIMIT, lexicon::Lexicon};
    use pretty_assertions::assert_eq;

    struct Fixture {
        store: NodeStore,
        env: Environment,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: NodeStore::new(),
                env: Environment::new(&Lexicon::standard(), DEFAULT_RECURSION_LIMIT),
            }
        }
        fn num(&mut self, text: &str) -> NodeId {
            self.store.leaf(Tag::Num, text)
        }
        fn ident(&mut self, name: &str) -> NodeId {
            self.store.leaf(Tag::Ident, name)
        }
        fn fold_seq(&mut self, elts: Vec<NodeId>) -> NodeId {
            let exprs = self.store.branch(Tag::Exprs, elts);
            let folded = Folder::new(&mut self.store, &mut self.env).fold(exprs).unwrap();
            Folder::new(&mut self.store, &mut self.env).unwrap_exprs(folded)
        }
        fn show(&self, nid: NodeId) -> String {
            self.store.tree(nid).unwrap().to_string()
        }
    }

    #[test]
    fn literal_arithmetic_folds() {
        let mut f = Fixture::new();
        let a = f.num("0.1");
        let b = f.num("0.2");
        let add = f.store.branch(Tag::Add, [a, b]);
        let folded = f.fold_seq(vec![add]);
        assert_eq!(f.show(folded), r#"(NUM "0.3")"#);
    }

    #[test]
    fn division_by_zero_is_left_for_run_time() {
        let mut f = Fixture::new();
        let a = f.num("1");
        let b = f.num("0");
        let div = f.store.branch(Tag::Div, [a, b]);
        let folded = f.fold_seq(vec![div]);
        assert_eq!(f.show(folded), r#"(DIV (NUM "1") (NUM "0"))"#);
    }

    #[test]
    fn literal_comparisons_fold() {
        let mut f = Fixture::new();
        let a = f.num("2");
        let b = f.num("2.0");
        let eq = f.store.branch(Tag::Eq, [a, b]);
        let folded = f.fold_seq(vec![eq]);
        assert_eq!(f.show(folded), "(BOOL true)");

        let lt = f.ident("lt");
        let three = f.num("3");
        let one = f.num("1");
        let folded = f.fold_seq(vec![lt, three, one]);
        assert_eq!(f.show(folded), "(BOOL false)");
    }

    #[test]
    fn powers_without_a_real_result_stay_unfolded() {
        let mut f = Fixture::new();
        let base = f.num("-8");
        let exponent = f.num("0.5");
        let pow = f.store.branch(Tag::Pow, [base, exponent]);
        let folded = f.fold_seq(vec![pow]);
        assert_eq!(f.show(folded), r#"(POW (NUM "-8") (NUM "0.5"))"#);
    }

    #[test]
    fn builtins_consume_following_terms() {
        let mut f = Fixture::new();
        let add = f.ident("add");
        let one = f.num("1");
        let mul = f.ident("mul");
        let two = f.num("2");
        let three = f.num("3");
        let folded = f.fold_seq(vec![add, one, mul, two, three]);
        assert_eq!(f.show(folded), r#"(NUM "7")"#);
    }

    #[test]
    fn unbound_operands_stay_symbolic() {
        let mut f = Fixture::new();
        f.env.add_word(Word::value("x", NodeId::NONE, 0));
        let x = f.ident("x");
        let one = f.num("1");
        let add = f.store.branch(Tag::Add, [x, one]);
        let folded = f.fold_seq(vec![add]);
        assert_eq!(f.show(folded), r#"(ADD (IDENT "x") (NUM "1"))"#);
    }

    #[test]
    fn partial_builtin_application_leaves_a_lambda() {
        let mut f = Fixture::new();
        let sub = f.ident("sub");
        let ten = f.num("10");
        let folded = f.fold_seq(vec![sub, ten]);
        assert_eq!(
            f.show(folded),
            r#"(LAMBDA (LIST (IDENT "$1")) (EXPRS (SUB (NUM "10") (IDENT "$1"))))"#
        );
    }

    #[test]
    fn let_functions_substitute_their_arguments() {
        let mut f = Fixture::new();
        let x = f.ident("x");
        let y = f.ident("y");
        let add = f.store.branch(Tag::Add, [x, y]);
        let body = f.store.branch(Tag::Exprs, [add]);
        f.env.add_word(Word {
            name: "plus".into(),
            kind: WordKind::Function {
                params: vec!["x".into(), "y".into()],
                body,
                scope: 0,
            },
            offset: 0,
        });

        let plus = f.ident("plus");
        let ten = f.num("10");
        let twenty = f.num("20");
        let full = f.fold_seq(vec![plus, ten, twenty]);
        assert_eq!(f.show(full), r#"(NUM "30")"#);

        let partial = f.fold_seq(vec![plus, ten]);
        assert_eq!(
            f.show(partial),
            r#"(LAMBDA (LIST (IDENT "y")) (EXPRS (ADD (NUM "10") (IDENT "y"))))"#
        );
    }

    #[test]
    fn apply_is_left_for_run_time() {
        let mut f = Fixture::new();
        f.env.add_word(Word::value("g", NodeId::NONE, 0));
        let apply = f.ident("apply");
        let g = f.ident("g");
        let one = f.num("1");
        let args = f.store.branch(Tag::List, [one]);
        let folded = f.fold_seq(vec![apply, g, args]);
        assert_eq!(
            f.show(folded),
            r#"(APPLY (IDENT "g") (LIST (NUM "1")))"#
        );
    }

    #[test]
    fn literal_conditions_pick_a_branch() {
        let mut f = Fixture::new();
        let condition = f.store.intern(Tag::Bool, vec![Elt::Bool(false)]);
        let yes = f.num("1");
        let no = f.num("2");
        let then = f.store.branch(Tag::Exprs, [yes]);
        let otherwise = f.store.branch(Tag::Exprs, [no]);
        let branch = f.store.branch(Tag::If, [condition, then, otherwise]);
        let folded = f.fold_seq(vec![branch]);
        assert_eq!(f.show(folded), r#"(NUM "2")"#);
    }

    #[test]
    fn recursion_ends_when_the_condition_folds() {
        let mut f = Fixture::new();
        // countdown n = if n == 0 then 0 else countdown (sub n 1)
        let n = f.ident("n");
        let zero = f.num("0");
        let condition = f.store.branch(Tag::Eq, [n, zero]);
        let then = f.store.branch(Tag::Exprs, [zero]);
        let sub = f.ident("sub");
        let one = f.num("1");
        let decrement = f.store.branch(Tag::Exprs, [sub, n, one]);
        let paren = f.store.branch(Tag::Paren, [decrement]);
        let countdown = f.ident("countdown");
        let otherwise = f.store.branch(Tag::Exprs, [countdown, paren]);
        let branch = f.store.branch(Tag::If, [condition, then, otherwise]);
        let body = f.store.branch(Tag::Exprs, [branch]);
        f.env.add_word(Word {
            name: "countdown".into(),
            kind: WordKind::Function {
                params: vec!["n".into()],
                body,
                scope: 0,
            },
            offset: 0,
        });

        let start = f.num("5");
        let folded = f.fold_seq(vec![countdown, start]);
        assert_eq!(f.show(folded), r#"(NUM "0")"#);
        assert_eq!(f.env.depth(), 1);
    }

    #[test]
    fn unbounded_expansion_trips_the_guard() {
        let mut f = Fixture::new();
        f.env = Environment::new(&Lexicon::standard(), 16);
        let forever = f.ident("forever");
        let x = f.ident("x");
        let body = f.store.branch(Tag::Exprs, [forever, x]);
        f.env.add_word(Word {
            name: "forever".into(),
            kind: WordKind::Function {
                params: vec!["x".into()],
                body,
                scope: 0,
            },
            offset: 0,
        });
        let one = f.num("1");
        let exprs = f.store.branch(Tag::Exprs, [forever, one]);
        let result = Folder::new(&mut f.store, &mut f.env).fold(exprs);
        assert_eq!(
            result,
            Err(RunawayRecursion {
                limit: 16,
                name: "forever".into()
            })
        );
        assert_eq!(f.env.depth(), 1);
    }
}
