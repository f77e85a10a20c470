use crate::{ast::NodeId, lexicon::Lexicon};
use miette::Diagnostic;
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_RECURSION_LIMIT: usize = 380;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
#[error("Runaway recursion: more than {limit} nested scopes while entering '{name}'")]
#[diagnostic(help("a definition keeps expanding itself without reaching a literal case"))]
pub struct RunawayRecursion {
    pub limit: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WordKind {
    /// A value binding. [`NodeId::NONE`] marks a parameter with no argument yet.
    Value { nid: NodeId },
    /// A `let` whose body is still being parsed.
    Pending,
    /// A `let` with parameters, folded in the scope it was defined in.
    Function {
        params: Vec<String>,
        body: NodeId,
        scope: usize,
    },
    Builtin {
        tag: crate::ast::Tag,
        arity: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub name: String,
    pub kind: WordKind,
    pub offset: usize,
}

impl Word {
    pub fn value(name: &str, nid: NodeId, offset: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: WordKind::Value { nid },
            offset,
        }
    }
    pub fn pending(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: WordKind::Pending,
            offset: 0,
        }
    }
}

#[derive(Debug)]
struct Scope {
    name: String,
    words: HashMap<String, Word>,
    parent: Option<usize>,
}

/// Stack of lexical scopes used while parsing and folding.
///
/// Scopes normally chain to the one below them. Expanding a function chains its
/// parameter scope to the scope the function was defined in instead, so free names in
/// the body resolve where the body was written.
#[derive(Debug)]
pub struct Environment {
    scopes: Vec<Scope>,
    limit: usize,
}

impl Environment {
    pub fn new(lexicon: &Lexicon, limit: usize) -> Self {
        let words = lexicon
            .builtins()
            .map(|(name, builtin)| {
                (
                    name.to_string(),
                    Word {
                        name: name.to_string(),
                        kind: WordKind::Builtin {
                            tag: builtin.tag,
                            arity: builtin.arity,
                        },
                        offset: 0,
                    },
                )
            })
            .collect();
        Self {
            scopes: vec![Scope {
                name: "global".to_string(),
                words,
                parent: None,
            }],
            limit,
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn top(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Pushes a scope chained to `parent`, or to the current top when `None`.
    pub fn enter(&mut self, name: &str, parent: Option<usize>) -> Result<usize, RunawayRecursion> {
        if self.scopes.len() >= self.limit {
            return Err(RunawayRecursion {
                limit: self.limit,
                name: name.to_string(),
            });
        }
        let parent = parent.unwrap_or_else(|| self.top());
        self.scopes.push(Scope {
            name: name.to_string(),
            words: HashMap::new(),
            parent: Some(parent),
        });
        Ok(self.top())
    }

    pub fn exit(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn scope_name(&self, scope: usize) -> Option<&str> {
        self.scopes.get(scope).map(|scope| scope.name.as_str())
    }

    pub fn add_word(&mut self, word: Word) {
        let top = self.top();
        self.scopes[top].words.insert(word.name.clone(), word);
    }

    /// Replaces the binding of `name` in `scope`.
    pub fn define(&mut self, scope: usize, name: &str, kind: WordKind) {
        if let Some(scope) = self.scopes.get_mut(scope) {
            if let Some(word) = scope.words.get_mut(name) {
                word.kind = kind;
            }
        }
    }

    /// Finds `name` innermost-first, returning the word and the scope holding it.
    pub fn find(&self, name: &str) -> Option<(&Word, usize)> {
        let mut current = Some(self.top());
        while let Some(index) = current {
            let scope = &self.scopes[index];
            if let Some(word) = scope.words.get(name) {
                return Some((word, index));
            }
            current = scope.parent;
        }
        None
    }
}
