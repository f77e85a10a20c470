use super::{
    pattern::{value_tree, PatternTable},
    visitor::{prepend, Resume, Scheduler, Visitor},
    Options, Program, Scope,
};
use crate::{
    ast::{Node, NodeId, Tag, Tree, TreeElt},
    config::{CaseFallthrough, CompilerConfig},
    diagnostic::{Diagnostic, DiagnosticKind},
    number,
    value::{Closure, Value},
};
use itertools::Itertools;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use std::rc::Rc;
use tracing::{debug, trace};

/// The value an operator produces when it cannot do its job, and why.
struct Fallback {
    message: Option<String>,
    value: Value,
}

impl Fallback {
    fn report(message: impl Into<String>, value: Value) -> Self {
        Self {
            message: Some(message.into()),
            value,
        }
    }

    /// Falls back without a diagnostic, for inputs that are already known to be bad.
    fn silent(value: Value) -> Self {
        Self {
            message: None,
            value,
        }
    }
}

type Computed = Result<Value, Fallback>;

/// Most items a single RANGE may produce.
const RANGE_LIMIT: usize = 1_000_000;

fn expected(tag: Tag, what: &str, found: &Value) -> String {
    format!("{} expects {}, found {}.", tag, what, found.type_of().fmt_a())
}

/// A whole, non-negative number usable as a position.
fn index(value: &Value) -> Option<usize> {
    value
        .to_decimal()
        .filter(|n| n.fract().is_zero())
        .and_then(|n| n.to_usize())
}

/// Evaluates a program to a [`Value`].
pub struct Transformer {
    program: Rc<Program>,
    scheduler: Scheduler<Transformer>,
    patterns: PatternTable,
    data: Value,
    limit: usize,
    fallthrough: CaseFallthrough,
}

impl Transformer {
    pub fn new(program: Rc<Program>, config: &CompilerConfig, data: Value) -> Self {
        Self {
            program,
            scheduler: Scheduler::default(),
            patterns: PatternTable::new(),
            data,
            limit: config.recursion_limit,
            fallthrough: config.case_fallthrough,
        }
    }

    fn settle(
        &self,
        nid: NodeId,
        mut diagnostics: Vec<Diagnostic>,
        computed: Computed,
    ) -> (Vec<Diagnostic>, Value) {
        match computed {
            Ok(value) => (diagnostics, value),
            Err(Fallback { message, value }) => {
                if let Some(message) = message {
                    let kind = DiagnosticKind::Evaluation;
                    diagnostics.push(self.program.diagnostic(nid, message, kind));
                }
                (diagnostics, value)
            }
        }
    }

    /// Evaluates every child of `node`, then computes the result from their values.
    fn with_operands<F>(
        &mut self,
        nid: NodeId,
        node: &Node,
        options: Options,
        resume: Resume<Self>,
        compute: F,
    ) where
        F: FnOnce(&mut Self, Vec<Value>, &Options) -> Computed + 'static,
    {
        let children: Vec<NodeId> = node.children().collect();
        let context = options.clone();
        self.visit_all(
            children,
            options,
            Box::new(
                move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, values: Vec<Value>| {
                    let computed = compute(this, values, &context);
                    let (diagnostics, value) = this.settle(nid, diagnostics, computed);
                    this.resume(context.sync, resume, diagnostics, value);
                },
            ),
        );
    }

    fn literal(&mut self, nid: NodeId, node: &Node, options: &Options, resume: Resume<Self>) {
        let computed = match node.tag {
            Tag::Num => {
                let text = node.text().unwrap_or_default();
                number::parse(text).map(Value::Number).ok_or_else(|| {
                    Fallback::report(format!("'{}' is not a number.", text), Value::NaN)
                })
            }
            Tag::Str => Ok(node.text().unwrap_or_default().into()),
            Tag::Bool => Ok(Value::Bool(node.flag().unwrap_or(false))),
            _ => Ok(Value::Null),
        };
        let (diagnostics, value) = self.settle(nid, Vec::new(), computed);
        self.resume(options.sync, resume, diagnostics, value);
    }

    fn ident(&mut self, node: &Node, options: &Options, resume: Resume<Self>) {
        let name = node.text().unwrap_or_default();
        let value = options
            .env
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::from(name));
        self.resume(options.sync, resume, Vec::new(), value);
    }

    /// The terms of a sequence node, or the node itself when it is not one.
    fn terms(&self, nid: NodeId) -> Vec<NodeId> {
        match self.program.store.node(nid) {
            Some(node) if node.tag == Tag::Exprs => node.children().collect(),
            _ => vec![nid],
        }
    }

    fn prog(&mut self, node: &Node, options: Options, resume: Resume<Self>) {
        let terms = self.terms(node.child(0));
        let sync = options.sync;
        self.visit_all(
            terms,
            options,
            Box::new(
                move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, values: Vec<Value>| {
                    let value = values.into_iter().last().unwrap_or(Value::Null);
                    this.resume(sync, resume, diagnostics, value);
                },
            ),
        );
    }

    fn lambda(&mut self, nid: NodeId, node: &Node, options: &Options, resume: Resume<Self>) {
        let params = self
            .program
            .store
            .node(node.child(0))
            .map(|list| {
                list.children()
                    .filter_map(|param| self.program.store.node(param).and_then(Node::text))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let closure = Closure {
            lambda: nid,
            params,
            body: node.child(1),
            scope: options.env.clone(),
            applied: Vec::new(),
        };
        self.resume(options.sync, resume, Vec::new(), closure.into());
    }

    /// Applies a closure. Too few arguments give a partially applied closure; arguments
    /// beyond its parameters go to the function it returns, if it returns one.
    fn call(
        &mut self,
        site: NodeId,
        closure: Rc<Closure>,
        args: Vec<Value>,
        options: &Options,
        resume: Resume<Self>,
    ) {
        let sync = options.sync;
        let mut applied = closure.applied.clone();
        applied.extend(args);
        if applied.len() < closure.params.len() {
            let partial = Closure {
                applied,
                ..closure.as_ref().clone()
            };
            return self.resume(sync, resume, Vec::new(), partial.into());
        }
        let extra = applied.split_off(closure.params.len());
        let words = closure.params.iter().cloned().zip(applied.iter().cloned());
        let scope = match Scope::call(&closure.scope, &options.env, "lambda", words, self.limit) {
            Ok(scope) => scope,
            Err(error) => return self.abort(error.located(self.program.store.coord(site))),
        };
        trace!(lambda = %closure.lambda, args = applied.len(), depth = scope.depth(), "call");
        let inner = Options {
            env: scope,
            args: Some(Rc::new(applied)),
            sync,
        };
        let outer = options.clone();
        self.visit(
            closure.body,
            inner,
            Box::new(
                move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, value: Value| {
                    match value {
                        Value::Function(next) if !extra.is_empty() => {
                            this.call(site, next, extra, &outer, prepend(diagnostics, resume))
                        }
                        value => this.resume(outer.sync, resume, diagnostics, value),
                    }
                },
            ),
        );
    }

    /// Applies a closure on the spot, whatever the scheduling mode.
    fn call_sync(
        &mut self,
        site: NodeId,
        closure: &Rc<Closure>,
        args: Vec<Value>,
        options: &Options,
    ) -> (Vec<Diagnostic>, Value) {
        let closure = closure.clone();
        let options = options.synchronous();
        self.capture(move |this: &mut Transformer, resume: Resume<Transformer>| {
            this.call(site, closure, args, &options, resume)
        })
        .unwrap_or_else(|| (Vec::new(), Value::Null))
    }

    fn apply(&mut self, nid: NodeId, node: &Node, options: Options, resume: Resume<Self>) {
        let context = options.clone();
        self.visit_all(
            vec![node.child(0), node.child(1)],
            options,
            Box::new(
                move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, values: Vec<Value>| {
                    let mut values = values.into_iter();
                    let function = values.next().unwrap_or(Value::Null);
                    let args = match values.next() {
                        Some(Value::List(items)) => items.to_vec(),
                        Some(Value::Null) | None => Vec::new(),
                        Some(other) => vec![other],
                    };
                    match function {
                        Value::Function(closure) => {
                            this.call(nid, closure, args, &context, prepend(diagnostics, resume))
                        }
                        other => {
                            let message = expected(Tag::Apply, "a function", &other);
                            let computed = Err(Fallback::report(message, Value::Null));
                            let (diagnostics, value) = this.settle(nid, diagnostics, computed);
                            this.resume(context.sync, resume, diagnostics, value);
                        }
                    }
                },
            ),
        );
    }

    /// MAP, FILTER and REDUCE: one synchronous application per element.
    fn iterate(&mut self, nid: NodeId, node: &Node, options: Options, resume: Resume<Self>) {
        let tag = node.tag;
        let children: Vec<NodeId> = node.children().collect();
        let context = options.clone();
        self.visit_all(
            children,
            options,
            Box::new(
                move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, values: Vec<Value>| {
                    let mut diagnostics = diagnostics;
                    let computed = this.each(nid, tag, values, &context, &mut diagnostics);
                    let (diagnostics, value) = this.settle(nid, diagnostics, computed);
                    this.resume(context.sync, resume, diagnostics, value);
                },
            ),
        );
    }

    fn each(
        &mut self,
        site: NodeId,
        tag: Tag,
        values: Vec<Value>,
        options: &Options,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Computed {
        let mut values = values.into_iter();
        let function = values.next().unwrap_or(Value::Null);
        let initial = if tag == Tag::Reduce { values.next() } else { None };
        let items = values.next().unwrap_or(Value::Null);
        let fallback = initial.clone().unwrap_or_else(Value::empty_list);
        let closure = match function {
            Value::Function(closure) => closure,
            other => return Err(Fallback::report(expected(tag, "a function", &other), fallback)),
        };
        let items = match items {
            Value::List(items) => items,
            other => return Err(Fallback::report(expected(tag, "a list", &other), fallback)),
        };
        match tag {
            Tag::Map => {
                let mut mapped = Vec::with_capacity(items.len());
                for item in items.iter() {
                    let (more, value) = self.call_sync(site, &closure, vec![item.clone()], options);
                    diagnostics.extend(more);
                    mapped.push(value);
                }
                Ok(mapped.into())
            }
            Tag::Filter => {
                let mut kept = Vec::new();
                for item in items.iter() {
                    let (more, keep) = self.call_sync(site, &closure, vec![item.clone()], options);
                    diagnostics.extend(more);
                    if keep.is_truthy() {
                        kept.push(item.clone());
                    }
                }
                Ok(kept.into())
            }
            _ => {
                let mut accumulator = initial.unwrap_or(Value::Null);
                for item in items.iter() {
                    let args = vec![accumulator, item.clone()];
                    let (more, next) = self.call_sync(site, &closure, args, options);
                    diagnostics.extend(more);
                    accumulator = next;
                }
                Ok(accumulator)
            }
        }
    }

    fn case(&mut self, nid: NodeId, node: &Node, options: Options, resume: Resume<Self>) {
        let clauses: Vec<NodeId> = node.children().skip(1).collect();
        let context = options.clone();
        self.visit(
            node.child(0),
            options,
            Box::new(move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, value: Value| {
                match this.select(&clauses, &value, &context.env) {
                    Some(body) => this.visit(body, context, prepend(diagnostics, resume)),
                    None => {
                        debug!(value = ?value, "no case matched");
                        let computed = match this.fallthrough {
                            CaseFallthrough::Empty => Err(Fallback::silent(Value::empty_record())),
                            CaseFallthrough::Report => Err(Fallback::report(
                                format!("No case matched the value {:?}.", value),
                                Value::empty_record(),
                            )),
                        };
                        let (diagnostics, value) = this.settle(nid, diagnostics, computed);
                        this.resume(context.sync, resume, diagnostics, value);
                    }
                }
            }),
        );
    }

    /// The body of the first OF clause whose pattern matches `value`.
    fn select(&mut self, clauses: &[NodeId], value: &Value, env: &Scope) -> Option<NodeId> {
        let target = self.patterns.intern_value(value);
        for &of in clauses {
            let (pattern, body) = match self.program.store.node(of) {
                Some(clause) => (clause.child(0), clause.child(1)),
                None => continue,
            };
            let tree = self
                .program
                .store
                .tree(pattern)
                .map(|tree| normalize_pattern(tree, env))
                .unwrap_or_else(|| Tree::new(Tag::Null, Vec::new()));
            let pattern = self.patterns.intern(&tree);
            if self.patterns.matches(pattern, target) {
                trace!(%of, "case matched");
                return Some(body);
            }
        }
        None
    }

    fn branch(&mut self, node: &Node, options: Options, resume: Resume<Self>) {
        let (then, otherwise) = (node.child(1), node.child(2));
        let context = options.clone();
        self.visit(
            node.child(0),
            options,
            Box::new(move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, condition: Value| {
                let taken = if condition.is_truthy() { then } else { otherwise };
                this.visit(taken, context, prepend(diagnostics, resume));
            }),
        );
    }

    /// AND and OR evaluate their right operand only when the left one leaves the answer open.
    fn logic(&mut self, node: &Node, options: Options, resume: Resume<Self>) {
        let tag = node.tag;
        let right = node.child(1);
        let context = options.clone();
        self.visit(
            node.child(0),
            options,
            Box::new(move |this: &mut Transformer, diagnostics: Vec<Diagnostic>, left: Value| {
                let truthy = left.is_truthy();
                if truthy == (tag == Tag::Or) {
                    return this.resume(context.sync, resume, diagnostics, Value::Bool(truthy));
                }
                let sync = context.sync;
                this.visit(
                    right,
                    context,
                    Box::new(move |this: &mut Transformer, more: Vec<Diagnostic>, right: Value| {
                        let mut diagnostics = diagnostics;
                        diagnostics.extend(more);
                        this.resume(sync, resume, diagnostics, Value::Bool(right.is_truthy()));
                    }),
                );
            }),
        );
    }

    fn overlay(&self, defaults: Value) -> Value {
        match (defaults, &self.data) {
            (defaults, Value::Null) => defaults,
            (Value::Record(fields), Value::Record(overrides)) => {
                let mut merged = fields.to_vec();
                for (key, value) in overrides.iter() {
                    set_field(&mut merged, key, value.clone());
                }
                Value::record(merged)
            }
            (_, data) => data.clone(),
        }
    }
}

fn set_field(fields: &mut Vec<(String, Value)>, key: &str, value: Value) {
    match fields.iter_mut().find(|(name, _)| name == key) {
        Some(field) => field.1 = value,
        None => fields.push((key.to_string(), value)),
    }
}

/// Brings a pattern into the form values are interned in: numbers in canonical text,
/// single-term groups unwrapped, and names replaced by what they are bound to.
fn normalize_pattern(tree: Tree, env: &Scope) -> Tree {
    match tree.tag {
        Tag::Num => match tree.text().and_then(number::parse) {
            Some(n) => Tree::leaf(Tag::Num, number::format(n)),
            None => tree,
        },
        Tag::Paren | Tag::Exprs if tree.elts.len() == 1 => match tree.elts.into_iter().next() {
            Some(TreeElt::Tree(inner)) => normalize_pattern(inner, env),
            _ => Tree::new(Tag::Null, Vec::new()),
        },
        Tag::Ident => {
            let name = tree.text().unwrap_or_default();
            match env.get(name) {
                Some(value) => value_tree(value),
                None => Tree::leaf(Tag::Str, name),
            }
        }
        tag => Tree::new(
            tag,
            tree.elts
                .into_iter()
                .map(|elt| match elt {
                    TreeElt::Tree(child) => TreeElt::Tree(normalize_pattern(child, env)),
                    other => other,
                })
                .collect(),
        ),
    }
}

fn arithmetic(tag: Tag, values: &[Value]) -> Computed {
    if values.iter().any(|value| matches!(value, Value::NaN)) {
        return Err(Fallback::silent(Value::NaN));
    }
    let operands = values
        .iter()
        .map(|value| value.to_decimal().ok_or(value))
        .collect::<Result<Vec<Decimal>, &Value>>()
        .map_err(|found| Fallback::report(expected(tag, "numbers", found), Value::NaN))?;
    let result = match (tag, operands.as_slice()) {
        (Tag::Neg, [operand]) => Ok(-*operand),
        (_, [left, right]) => number::apply(tag, *left, *right),
        _ => {
            let message = format!("{} got {} operands.", tag, operands.len());
            return Err(Fallback::report(message, Value::NaN));
        }
    };
    result
        .map(Value::Number)
        .map_err(|error| Fallback::report(format!("{} failed: {}.", tag, error), Value::NaN))
}

fn compare(tag: Tag, values: &[Value]) -> Computed {
    if values.iter().any(|value| matches!(value, Value::NaN)) {
        return Err(Fallback::silent(Value::Bool(false)));
    }
    let operands = values
        .iter()
        .map(|value| value.to_decimal().ok_or(value))
        .collect::<Result<Vec<Decimal>, &Value>>()
        .map_err(|found| Fallback::report(expected(tag, "numbers", found), Value::Bool(false)))?;
    let (left, right) = match operands.as_slice() {
        [left, right] => (*left, *right),
        _ => {
            let message = format!("{} got {} operands.", tag, operands.len());
            return Err(Fallback::report(message, Value::Bool(false)));
        }
    };
    number::compare(tag, left, right).map(Value::Bool).ok_or_else(|| {
        Fallback::report(format!("{} is not a comparison.", tag), Value::Bool(false))
    })
}

/// Strict equality: values of the same primitive type with the same content.
fn equivalent(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        _ => false,
    }
}

fn range(values: &[Value]) -> Computed {
    let bounds = values
        .iter()
        .map(|value| value.to_decimal().ok_or(value))
        .collect::<Result<Vec<Decimal>, &Value>>()
        .map_err(|found| {
            Fallback::report(expected(Tag::Range, "numbers", found), Value::empty_list())
        })?;
    let (start, end, step) = match bounds.as_slice() {
        [start, end, step] => (*start, *end, *step),
        _ => {
            let message = "RANGE needs a start, an end and a step.";
            return Err(Fallback::report(message, Value::empty_list()));
        }
    };
    if step.is_zero() {
        return Err(Fallback::report("RANGE step cannot be zero.", Value::empty_list()));
    }
    let count = end
        .checked_sub(start)
        .and_then(|span| span.checked_div(step))
        .map(|count| count.ceil());
    match count {
        Some(count) if count <= Decimal::from(RANGE_LIMIT) => {}
        _ => {
            return Err(Fallback::report(
                format!("RANGE would produce more than {} items.", RANGE_LIMIT),
                Value::empty_list(),
            ))
        }
    }
    let mut items = Vec::new();
    let mut current = start;
    while (step.is_sign_positive() && current < end) || (step.is_sign_negative() && current > end) {
        items.push(Value::Number(current));
        current = current
            .checked_add(step)
            .ok_or_else(|| Fallback::report("RANGE overflowed.", Value::empty_list()))?;
    }
    Ok(items.into())
}

fn head(found: &Value) -> Computed {
    match found.as_list() {
        Some([first, ..]) => Ok(first.clone()),
        Some([]) => Err(Fallback::report("HD of an empty list.", Value::Null)),
        None => Err(Fallback::report(expected(Tag::Hd, "a list", found), Value::Null)),
    }
}

fn tail(found: &Value) -> Computed {
    match found.as_list() {
        Some([_, rest @ ..]) => Ok(rest.to_vec().into()),
        Some([]) => Err(Fallback::report("TL of an empty list.", Value::empty_list())),
        None => Err(Fallback::report(expected(Tag::Tl, "a list", found), Value::empty_list())),
    }
}

fn nth(position: &Value, list: &Value) -> Computed {
    let items = list
        .as_list()
        .ok_or_else(|| Fallback::report(expected(Tag::Nth, "a list", list), Value::Null))?;
    let at = index(position)
        .ok_or_else(|| Fallback::report(expected(Tag::Nth, "a position", position), Value::Null))?;
    items
        .get(at)
        .cloned()
        .ok_or_else(|| {
            Fallback::report(format!("NTH position {} is out of range.", at), Value::Null)
        })
}

fn length(found: &Value) -> Computed {
    let len = match found {
        Value::List(items) => items.len(),
        Value::String(text) => text.chars().count(),
        Value::Record(fields) => fields.len(),
        other => {
            return Err(Fallback::report(
                expected(Tag::Len, "a list, a string or a record", other),
                Value::Number(Decimal::ZERO),
            ))
        }
    };
    Ok(Value::Number(Decimal::from(len)))
}

fn lookup(tag: Tag, key: &Value, container: &Value) -> Computed {
    match container {
        Value::Record(_) => Ok(container.get(&key.text()).cloned().unwrap_or(Value::Null)),
        Value::List(items) if tag == Tag::Val => Ok(index(key)
            .and_then(|at| items.get(at))
            .cloned()
            .unwrap_or(Value::Null)),
        other => Err(Fallback::report(expected(tag, "a record", other), Value::Null)),
    }
}

fn key_at(position: &Value, record: &Value) -> Computed {
    let fields = record
        .as_record()
        .ok_or_else(|| Fallback::report(expected(Tag::Key, "a record", record), Value::Null))?;
    Ok(index(position)
        .and_then(|at| fields.get(at))
        .map_or(Value::Null, |(name, _)| name.as_str().into()))
}

fn set(key: &Value, value: Value, record: &Value) -> Computed {
    let fields = record
        .as_record()
        .ok_or_else(|| {
            Fallback::report(expected(Tag::Set, "a record", record), Value::empty_record())
        })?;
    let mut fields = fields.to_vec();
    set_field(&mut fields, &key.text(), value);
    Ok(Value::record(fields))
}

fn concat(found: &Value) -> Value {
    match found {
        Value::List(items) => items.iter().map(Value::text).join("").into(),
        other => other.text().into(),
    }
}

fn parse_json(found: &Value) -> Computed {
    let text = found
        .as_str()
        .ok_or_else(|| Fallback::report(expected(Tag::Json, "a string", found), Value::Null))?;
    serde_json::from_str::<serde_json::Value>(text)
        .map(|json| Value::from_json(&json))
        .map_err(|error| {
            Fallback::report(format!("JSON could not read its text: {}.", error), Value::Null)
        })
}

fn argument(position: &Value, options: &Options) -> Computed {
    let args = options
        .args
        .as_ref()
        .ok_or_else(|| Fallback::report("ARG used outside of a function.", Value::Null))?;
    let at = index(position)
        .ok_or_else(|| Fallback::report(expected(Tag::Arg, "a position", position), Value::Null))?;
    args.get(at)
        .cloned()
        .ok_or_else(|| {
            Fallback::report(format!("ARG position {} is out of range.", at), Value::Null)
        })
}

impl Visitor for Transformer {
    type Output = Value;

    fn program(&self) -> &Program {
        &self.program
    }

    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }

    fn absent(&self) -> Value {
        Value::Null
    }

    fn visit_node(&mut self, nid: NodeId, node: Node, options: Options, resume: Resume<Self>) {
        match node.tag {
            Tag::Num | Tag::Str | Tag::Bool | Tag::Null | Tag::Wildcard => {
                self.literal(nid, &node, &options, resume)
            }
            Tag::Ident => self.ident(&node, &options, resume),
            Tag::Prog => self.prog(&node, options, resume),
            Tag::Exprs => self.with_operands(nid, &node, options, resume, |_, mut values, _| {
                Ok(match values.len() {
                    0 => Value::Null,
                    1 => values.remove(0),
                    _ => values.into(),
                })
            }),
            Tag::Paren | Tag::Of => {
                let inner = if node.tag == Tag::Of { node.child(1) } else { node.child(0) };
                self.visit(inner, options, resume)
            }
            Tag::List => {
                self.with_operands(nid, &node, options, resume, |_, values, _| Ok(values.into()))
            }
            Tag::Record | Tag::Binding => {
                let tag = node.tag;
                self.with_operands(nid, &node, options, resume, move |_, values, _| {
                    let mut fields = Vec::new();
                    if tag == Tag::Binding {
                        let mut values = values.into_iter();
                        let key = values.next().unwrap_or(Value::Null).text();
                        fields.push((key, values.next().unwrap_or(Value::Null)));
                    } else {
                        for binding in values {
                            for (key, value) in binding.as_record().unwrap_or_default() {
                                set_field(&mut fields, key, value.clone());
                            }
                        }
                    }
                    Ok(Value::record(fields))
                })
            }
            Tag::Lambda => self.lambda(nid, &node, &options, resume),
            Tag::Apply => self.apply(nid, &node, options, resume),
            Tag::Map | Tag::Filter | Tag::Reduce => self.iterate(nid, &node, options, resume),
            Tag::Case => self.case(nid, &node, options, resume),
            Tag::If => self.branch(&node, options, resume),
            Tag::And | Tag::Or => self.logic(&node, options, resume),
            Tag::Not => self.with_operands(nid, &node, options, resume, |_, values, _| {
                Ok(Value::Bool(!values.iter().any(Value::is_truthy)))
            }),
            Tag::Equiv => self.with_operands(nid, &node, options, resume, |_, values, _| {
                match &values[..] {
                    [left, right] => Ok(Value::Bool(equivalent(left, right))),
                    _ => Err(Fallback::report("EQUIV needs two operands.", Value::Bool(false))),
                }
            }),
            Tag::Eq | Tag::Ne | Tag::Lt | Tag::Gt | Tag::Le | Tag::Ge => {
                let tag = node.tag;
                self.with_operands(nid, &node, options, resume, move |_, values, _| {
                    compare(tag, &values)
                })
            }
            Tag::Add
            | Tag::Sub
            | Tag::Mul
            | Tag::Div
            | Tag::Mod
            | Tag::Pow
            | Tag::Min
            | Tag::Max
            | Tag::Neg => {
                let tag = node.tag;
                self.with_operands(nid, &node, options, resume, move |_, values, _| {
                    arithmetic(tag, &values)
                })
            }
            Tag::Concat => self.with_operands(nid, &node, options, resume, |_, values, _| {
                Ok(concat(values.first().unwrap_or(&Value::Null)))
            }),
            Tag::Range => {
                self.with_operands(nid, &node, options, resume, |_, values, _| range(&values))
            }
            Tag::Hd => self.with_operands(nid, &node, options, resume, |_, values, _| {
                head(values.first().unwrap_or(&Value::Null))
            }),
            Tag::Tl => self.with_operands(nid, &node, options, resume, |_, values, _| {
                tail(values.first().unwrap_or(&Value::Null))
            }),
            Tag::Len => self.with_operands(nid, &node, options, resume, |_, values, _| {
                length(values.first().unwrap_or(&Value::Null))
            }),
            Tag::Nth => self.with_operands(nid, &node, options, resume, |_, values, _| {
                match &values[..] {
                    [position, list] => nth(position, list),
                    _ => Err(Fallback::report("NTH needs a position and a list.", Value::Null)),
                }
            }),
            Tag::Get | Tag::Val => {
                let tag = node.tag;
                self.with_operands(nid, &node, options, resume, move |_, values, _| {
                    match &values[..] {
                        [key, container] => lookup(tag, key, container),
                        _ => {
                            let message = format!("{} needs a key and a record.", tag);
                            Err(Fallback::report(message, Value::Null))
                        }
                    }
                })
            }
            Tag::Key => self.with_operands(nid, &node, options, resume, |_, values, _| {
                match &values[..] {
                    [position, record] => key_at(position, record),
                    _ => Err(Fallback::report("KEY needs a position and a record.", Value::Null)),
                }
            }),
            Tag::Set => self.with_operands(nid, &node, options, resume, |_, values, _| {
                match &values[..] {
                    [key, value, record] => set(key, value.clone(), record),
                    _ => {
                        let message = "SET needs a key, a value and a record.";
                        Err(Fallback::report(message, Value::empty_record()))
                    }
                }
            }),
            Tag::Data => self.with_operands(nid, &node, options, resume, |this, mut values, _| {
                let defaults = values.pop().unwrap_or(Value::Null);
                Ok(this.overlay(defaults))
            }),
            Tag::Arg => self.with_operands(nid, &node, options, resume, |_, values, options| {
                argument(values.first().unwrap_or(&Value::Null), options)
            }),
            Tag::Json => self.with_operands(nid, &node, options, resume, |_, values, _| {
                parse_json(values.first().unwrap_or(&Value::Null))
            }),
            Tag::Print => self.with_operands(nid, &node, options, resume, |_, mut values, _| {
                let printed = values.pop().unwrap_or(Value::Null);
                Ok(Value::record(vec![("print".to_string(), printed)]))
            }),
        }
    }
}
