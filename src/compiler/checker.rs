use super::{
    visitor::{Resume, Scheduler, Visitor},
    Options, Program,
};
use crate::{
    ast::{Node, NodeId, Tag},
    diagnostic::{Diagnostic, DiagnosticKind},
    number,
};
use std::rc::Rc;

/// What can be known about a node's value without running the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Unknown,
    Boolean,
    Null,
    Number { zero: bool },
    String { empty: bool },
    List,
    Record,
    Function,
}

impl Shape {
    fn is_boolean_like(self) -> bool {
        matches!(
            self,
            Shape::Unknown
                | Shape::Boolean
                | Shape::Null
                | Shape::Number { zero: true }
                | Shape::String { empty: true }
        )
    }

    fn is_primitive_or_unknown(self) -> bool {
        !matches!(self, Shape::List | Shape::Record | Shape::Function)
    }

    fn is_callable(self) -> bool {
        matches!(self, Shape::Unknown | Shape::Function)
    }

    fn fmt_a(self) -> &'static str {
        match self {
            Shape::Unknown => "an unknown value",
            Shape::Boolean => "a boolean",
            Shape::Null => "null",
            Shape::Number { .. } => "a number",
            Shape::String { .. } => "a string",
            Shape::List => "a list",
            Shape::Record => "a record",
            Shape::Function => "a function",
        }
    }
}

/// Walks the program for operands that can never be right, without evaluating it.
pub struct Checker {
    program: Rc<Program>,
    scheduler: Scheduler<Checker>,
}

impl Checker {
    pub fn new(program: Rc<Program>) -> Self {
        Self {
            program,
            scheduler: Scheduler::default(),
        }
    }

    fn shape(&self, node: &Node, children: &[Shape]) -> Shape {
        match node.tag {
            Tag::Num => Shape::Number {
                zero: node.text().and_then(number::parse).map_or(false, |n| n.is_zero()),
            },
            Tag::Str => Shape::String {
                empty: node.text().map_or(true, str::is_empty),
            },
            Tag::Bool => Shape::Boolean,
            Tag::Null => Shape::Null,
            Tag::List | Tag::Range | Tag::Map | Tag::Filter | Tag::Tl => Shape::List,
            Tag::Record | Tag::Binding | Tag::Set | Tag::Print => Shape::Record,
            Tag::Lambda => Shape::Function,
            Tag::Add | Tag::Sub | Tag::Mul | Tag::Div | Tag::Mod | Tag::Pow | Tag::Min
            | Tag::Max | Tag::Neg | Tag::Len => Shape::Number { zero: false },
            Tag::Eq | Tag::Ne | Tag::Lt | Tag::Gt | Tag::Le | Tag::Ge | Tag::And | Tag::Or
            | Tag::Not | Tag::Equiv => Shape::Boolean,
            Tag::Concat => Shape::String { empty: false },
            Tag::Paren => children.first().copied().unwrap_or(Shape::Null),
            Tag::Exprs => match children {
                [] => Shape::Null,
                [only] => *only,
                _ => Shape::List,
            },
            _ => Shape::Unknown,
        }
    }

    fn problems(&self, nid: NodeId, tag: Tag, children: &[Shape]) -> Vec<Diagnostic> {
        let mut problems = Vec::new();
        let mut report = |message: String| {
            problems.push(self.program.diagnostic(nid, message, DiagnosticKind::Check));
        };
        match tag {
            Tag::And | Tag::Or | Tag::Not => {
                for shape in children.iter().filter(|shape| !shape.is_boolean_like()) {
                    report(format!(
                        "{} expects boolean operands, found {}.",
                        tag,
                        shape.fmt_a()
                    ));
                }
            }
            Tag::Equiv => {
                for shape in children.iter().filter(|shape| !shape.is_primitive_or_unknown()) {
                    report(format!(
                        "{} compares primitive values, found {}.",
                        tag,
                        shape.fmt_a()
                    ));
                }
            }
            Tag::Map | Tag::Filter | Tag::Reduce | Tag::Apply => {
                if let Some(shape) = children.first().filter(|shape| !shape.is_callable()) {
                    report(format!("{} expects a function, found {}.", tag, shape.fmt_a()));
                }
            }
            _ => {}
        }
        problems
    }
}

impl Visitor for Checker {
    type Output = Shape;

    fn program(&self) -> &Program {
        &self.program
    }

    fn scheduler(&mut self) -> &mut Scheduler<Self> {
        &mut self.scheduler
    }

    fn absent(&self) -> Shape {
        Shape::Null
    }

    fn visit_node(&mut self, nid: NodeId, node: Node, options: Options, resume: Resume<Self>) {
        let children: Vec<NodeId> = node.children().collect();
        let sync = options.sync;
        self.visit_all(
            children,
            options,
            Box::new(
                move |this: &mut Checker, mut diagnostics: Vec<Diagnostic>, shapes: Vec<Shape>| {
                    diagnostics.extend(this.problems(nid, node.tag, &shapes));
                    let shape = this.shape(&node, &shapes);
                    this.resume(sync, resume, diagnostics, shape);
                },
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Scheduling,
        parser::{parse, ParserOpts},
    };
    use pretty_assertions::assert_eq;

    fn check(source: &str) -> Vec<String> {
        let output = parse(source, ParserOpts::default());
        let snapshot = output.snapshot().unwrap();
        let program = Rc::new(Program::from_snapshot(&snapshot).unwrap());
        let mut checker = Checker::new(program.clone());
        let (diagnostics, _) = checker
            .run(program.root, Options::new(Scheduling::Async))
            .unwrap();
        diagnostics.into_iter().map(|d| d.message).collect()
    }

    #[test]
    fn logic_accepts_falsy_literals_and_unknowns() {
        assert_eq!(check("<x: x and null or 0 or ''>"), Vec::<String>::new());
        assert_eq!(check("<x: not x>"), Vec::<String>::new());
    }

    #[test]
    fn logic_rejects_collections() {
        assert_eq!(
            check("<x: x or [1]>"),
            vec!["OR expects boolean operands, found a list."]
        );
        assert_eq!(
            check("<x: not { a: x }>"),
            vec!["NOT expects boolean operands, found a record."]
        );
    }

    #[test]
    fn equivalence_needs_primitives() {
        assert_eq!(
            check("<x: equiv x [x]>"),
            vec!["EQUIV compares primitive values, found a list."]
        );
    }

    #[test]
    fn higher_order_builtins_need_functions() {
        assert_eq!(
            check("map 'f' [1]"),
            vec!["MAP expects a function, found a string."]
        );
        assert_eq!(check("map <x: x> [1]"), Vec::<String>::new());
    }
}
