use crate::ast::Tag;
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    Let,
    If,
    Then,
    Else,
    Case,
    Of,
    End,
    True,
    False,
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Le,
    Ge,
    Add,
    /// Unbound in the standard lexicon, where `-` is negation and subtraction is
    /// the `sub` builtin. Custom lexicons may give it a lexeme.
    Sub,
    Concat,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinOp {
    /// Binding strength; higher binds tighter. All levels associate to the left.
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 1,
            BinOp::And => 2,
            BinOp::Eq | BinOp::Ne => 3,
            BinOp::Le | BinOp::Ge => 4,
            BinOp::Add | BinOp::Sub | BinOp::Concat => 5,
            BinOp::Mul | BinOp::Div | BinOp::Mod => 6,
            BinOp::Pow => 7,
        }
    }

    pub fn tag(self) -> Tag {
        match self {
            BinOp::Or => Tag::Or,
            BinOp::And => Tag::And,
            BinOp::Eq => Tag::Eq,
            BinOp::Ne => Tag::Ne,
            BinOp::Le => Tag::Le,
            BinOp::Ge => Tag::Ge,
            BinOp::Add => Tag::Add,
            BinOp::Sub => Tag::Sub,
            BinOp::Concat => Tag::Concat,
            BinOp::Mul => Tag::Mul,
            BinOp::Div => Tag::Div,
            BinOp::Mod => Tag::Mod,
            BinOp::Pow => Tag::Pow,
        }
    }
}

/// A function provided by the host: the node it builds and how many terms it consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub tag: Tag,
    pub arity: usize,
}

/// Keyword, operator and builtin tables shared by the scanner, parser and folder.
#[derive(Debug, Clone)]
pub struct Lexicon {
    keywords: HashMap<String, Keyword>,
    operators: HashMap<String, BinOp>,
    builtins: BTreeMap<String, Builtin>,
}

const STANDARD_OPERATORS: &[(&str, BinOp)] = &[
    ("or", BinOp::Or),
    ("and", BinOp::And),
    ("==", BinOp::Eq),
    ("!=", BinOp::Ne),
    ("<=", BinOp::Le),
    (">=", BinOp::Ge),
    ("+", BinOp::Add),
    ("++", BinOp::Concat),
    ("*", BinOp::Mul),
    ("/", BinOp::Div),
    ("%", BinOp::Mod),
    ("^", BinOp::Pow),
];

const STANDARD_BUILTINS: &[(&str, Tag, usize)] = &[
    ("add", Tag::Add, 2),
    ("sub", Tag::Sub, 2),
    ("mul", Tag::Mul, 2),
    ("div", Tag::Div, 2),
    ("mod", Tag::Mod, 2),
    ("pow", Tag::Pow, 2),
    ("neg", Tag::Neg, 1),
    ("min", Tag::Min, 2),
    ("max", Tag::Max, 2),
    ("range", Tag::Range, 3),
    ("eq", Tag::Eq, 2),
    ("ne", Tag::Ne, 2),
    ("lt", Tag::Lt, 2),
    ("gt", Tag::Gt, 2),
    ("le", Tag::Le, 2),
    ("ge", Tag::Ge, 2),
    ("equiv", Tag::Equiv, 2),
    ("not", Tag::Not, 1),
    ("concat", Tag::Concat, 1),
    ("map", Tag::Map, 2),
    ("filter", Tag::Filter, 2),
    ("reduce", Tag::Reduce, 3),
    ("apply", Tag::Apply, 2),
    ("hd", Tag::Hd, 1),
    ("tl", Tag::Tl, 1),
    ("nth", Tag::Nth, 2),
    ("len", Tag::Len, 1),
    ("get", Tag::Get, 2),
    ("set", Tag::Set, 3),
    ("val", Tag::Val, 2),
    ("key", Tag::Key, 2),
    ("data", Tag::Data, 1),
    ("arg", Tag::Arg, 1),
    ("json", Tag::Json, 1),
    ("print", Tag::Print, 1),
];

impl Lexicon {
    /// Keywords only: no operators and no builtins.
    pub fn bare() -> Self {
        Self {
            keywords: Keyword::iter()
                .map(|keyword| (keyword.to_string(), keyword))
                .collect(),
            operators: HashMap::new(),
            builtins: BTreeMap::new(),
        }
    }

    pub fn standard() -> Self {
        let lexicon = STANDARD_OPERATORS
            .iter()
            .fold(Self::bare(), |lexicon, (lexeme, op)| {
                lexicon.with_operator(lexeme, *op)
            });
        STANDARD_BUILTINS
            .iter()
            .fold(lexicon, |lexicon, (name, tag, arity)| {
                lexicon.with_builtin(name, *tag, *arity)
            })
    }

    pub fn with_operator(mut self, lexeme: &str, op: BinOp) -> Self {
        self.operators.insert(lexeme.to_string(), op);
        self
    }

    pub fn with_builtin(mut self, name: &str, tag: Tag, arity: usize) -> Self {
        self.builtins
            .insert(name.to_string(), Builtin { tag, arity });
        self
    }

    pub fn keyword(&self, word: &str) -> Option<Keyword> {
        self.keywords.get(word).copied()
    }

    pub fn operator(&self, lexeme: &str) -> Option<BinOp> {
        self.operators.get(lexeme).copied()
    }

    pub fn builtin(&self, name: &str) -> Option<Builtin> {
        self.builtins.get(name).copied()
    }

    pub fn builtins(&self) -> impl Iterator<Item = (&str, Builtin)> {
        self.builtins
            .iter()
            .map(|(name, builtin)| (name.as_str(), *builtin))
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::standard()
    }
}
