use super::{Cls, Parser, ParserError};
use crate::{
    ast::{Elt, NodeId, Tag},
    environment::{Word, WordKind},
    lexicon::BinOp,
    scanner::{Token, TokenType},
    source::{Coord, Location},
};
use tracing::{debug, trace};

/// What a frame did with the token it was offered.
pub(super) enum Flow {
    Consumed(Cls),
    /// Not consumed; offer it to the next frame down.
    Pass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ProgramStage {
    Start,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ExprsStage {
    Start,
    AfterExpr,
    AfterDot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LetStage {
    Name,
    Params,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum IfStage {
    Then,
    Else,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum OfStage {
    Colon,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RecordStage {
    Key,
    Colon,
    Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LambdaStage {
    Params,
    Body,
}

/// A suspended grammar rule. `base` fields mark where the rule's children start on the
/// builder stack.
#[derive(Debug)]
pub(super) enum Frame {
    Program(ProgramStage),
    Exprs {
        base: usize,
        stage: ExprsStage,
    },
    Expr,
    Let {
        stage: LetStage,
        name: String,
        params: Vec<String>,
    },
    Cond,
    Case {
        base: usize,
        from: Location,
    },
    Of(OfStage),
    If {
        stage: IfStage,
        base: usize,
        from: Location,
    },
    Binary {
        ops: Vec<BinOp>,
        operand: bool,
    },
    Prefix {
        pattern: bool,
    },
    Negate {
        from: Location,
    },
    Primary {
        pattern: bool,
    },
    Interpolation {
        base: usize,
        from: Location,
    },
    Record {
        stage: RecordStage,
        base: usize,
        from: Location,
    },
    List {
        base: usize,
        pattern: bool,
        from: Location,
    },
    Paren {
        from: Location,
    },
    Lambda {
        stage: LambdaStage,
        params: Vec<String>,
        from: Location,
    },
}

fn ends_sequence(token_type: &TokenType) -> bool {
    matches!(
        token_type,
        TokenType::Eof
            | TokenType::CloseParen
            | TokenType::CloseBracket
            | TokenType::CloseBrace
            | TokenType::CloseAngle
            | TokenType::Comma
            | TokenType::Of
            | TokenType::End
            | TokenType::Then
            | TokenType::Else
            | TokenType::StringMiddle(_)
            | TokenType::StringSuffix(_)
    )
}

fn span(from: &Location, to: &Location) -> Option<Coord> {
    Some(Coord::new(from.coord.from, to.coord.to))
}

impl Parser {
    pub(super) fn step(&mut self, frame: Frame, token: &Token) -> Result<Flow, ParserError> {
        trace!(?frame, token = ?token.token_type, "step");
        match frame {
            Frame::Program(stage) => self.program(stage, token),
            Frame::Exprs { base, stage } => Ok(self.exprs(base, stage, token)),
            Frame::Expr => Ok(self.expr(token)),
            Frame::Let {
                stage,
                name,
                params,
            } => self.let_def(stage, name, params, token),
            Frame::Cond => Ok(self.cond(token)),
            Frame::Case { base, from } => self.case(base, from, token),
            Frame::Of(stage) => self.of(stage, token),
            Frame::If { stage, base, from } => self.if_then(stage, base, from, token),
            Frame::Binary { ops, operand } => Ok(self.binary(ops, operand, token)),
            Frame::Prefix { pattern } => Ok(self.prefix(pattern, token)),
            Frame::Negate { from } => Ok(self.negate(from)),
            Frame::Primary { pattern } => self.primary(pattern, token),
            Frame::Interpolation { base, from } => self.interpolation(base, from, token),
            Frame::Record { stage, base, from } => self.record(stage, base, from, token),
            Frame::List {
                base,
                pattern,
                from,
            } => Ok(self.list(base, pattern, from, token)),
            Frame::Paren { from } => self.paren(from, token),
            Frame::Lambda {
                stage,
                params,
                from,
            } => self.lambda(stage, params, from, token),
        }
    }

    fn push_exprs(&mut self) {
        self.frames.push(Frame::Exprs {
            base: self.nodes.len(),
            stage: ExprsStage::Start,
        });
    }

    fn program(&mut self, stage: ProgramStage, token: &Token) -> Result<Flow, ParserError> {
        match stage {
            ProgramStage::Start => {
                self.frames.push(Frame::Program(ProgramStage::Body));
                self.push_exprs();
                Ok(Flow::Pass)
            }
            ProgramStage::Body if token.token_type == TokenType::Eof => {
                let exprs = self.pop();
                let folded = self
                    .fold(exprs)
                    .map_err(|reason| ParserError::runaway(reason, token))?;
                let coord = self.store.coord(exprs);
                let root = self
                    .store
                    .intern_at(Tag::Prog, vec![Elt::Node(folded)], coord);
                debug!(%root, nodes = self.store.len(), "program parsed");
                self.root = Some(root);
                Ok(Flow::Consumed(Cls::Punc))
            }
            ProgramStage::Body => Err(ParserError::expected("the end of the program", token)),
        }
    }

    /// A run of expressions. One dot separates; a second dot, or a closing token, ends it.
    fn exprs(&mut self, base: usize, stage: ExprsStage, token: &Token) -> Flow {
        match (&token.token_type, stage) {
            (TokenType::Dot, ExprsStage::AfterExpr) => {
                self.frames.push(Frame::Exprs {
                    base,
                    stage: ExprsStage::AfterDot,
                });
                Flow::Consumed(Cls::Punc)
            }
            (TokenType::Dot, _) => {
                self.finish_exprs(base);
                Flow::Consumed(Cls::Punc)
            }
            (token_type, _) if ends_sequence(token_type) => {
                self.finish_exprs(base);
                Flow::Pass
            }
            _ => {
                self.frames.push(Frame::Exprs {
                    base,
                    stage: ExprsStage::AfterExpr,
                });
                self.frames.push(Frame::Expr);
                Flow::Pass
            }
        }
    }

    fn finish_exprs(&mut self, base: usize) {
        let elts = self.split(base);
        self.push_branch(Tag::Exprs, elts, None);
    }

    fn expr(&mut self, token: &Token) -> Flow {
        if token.token_type == TokenType::Let {
            self.frames.push(Frame::Let {
                stage: LetStage::Name,
                name: String::new(),
                params: Vec::new(),
            });
            return Flow::Consumed(Cls::Keyword);
        }
        self.frames.push(Frame::Cond);
        Flow::Pass
    }

    /// `let NAME PARAMS = body..` binds a word in the enclosing scope and leaves no node.
    fn let_def(
        &mut self,
        stage: LetStage,
        name: String,
        mut params: Vec<String>,
        token: &Token,
    ) -> Result<Flow, ParserError> {
        match (stage, &token.token_type) {
            (LetStage::Name, TokenType::Identifier(word)) => {
                self.env.add_word(Word::pending(word));
                self.env
                    .enter(word, None)
                    .map_err(|reason| ParserError::runaway(reason, token))?;
                self.frames.push(Frame::Let {
                    stage: LetStage::Params,
                    name: word.clone(),
                    params,
                });
                Ok(Flow::Consumed(Cls::Def))
            }
            (LetStage::Name, _) => Err(ParserError::expected("a name", token)),
            (LetStage::Params, TokenType::Identifier(param)) => {
                self.env
                    .add_word(Word::value(param, NodeId::NONE, params.len()));
                params.push(param.clone());
                self.frames.push(Frame::Let {
                    stage: LetStage::Params,
                    name,
                    params,
                });
                Ok(Flow::Consumed(Cls::Param))
            }
            (LetStage::Params, TokenType::Equal) => {
                self.frames.push(Frame::Let {
                    stage: LetStage::Body,
                    name,
                    params,
                });
                self.push_exprs();
                Ok(Flow::Consumed(Cls::Punc))
            }
            (LetStage::Params, _) => Err(ParserError::expected("a parameter or '='", token)),
            (LetStage::Body, _) => {
                let body = self.pop();
                let folded = self.fold(body);
                self.env.exit();
                let folded = folded.map_err(|reason| ParserError::runaway(reason, token))?;
                let top = self.env.top();
                let kind = if params.is_empty() {
                    WordKind::Value {
                        nid: self.folder().unwrap_exprs(folded),
                    }
                } else {
                    WordKind::Function {
                        params,
                        body: folded,
                        scope: top,
                    }
                };
                trace!(%name, "defined");
                self.env.define(top, &name, kind);
                Ok(Flow::Pass)
            }
        }
    }

    fn cond(&mut self, token: &Token) -> Flow {
        match token.token_type {
            TokenType::Case => {
                self.frames.push(Frame::Case {
                    base: self.nodes.len(),
                    from: token.location,
                });
                self.push_exprs();
                Flow::Consumed(Cls::Keyword)
            }
            TokenType::If => {
                self.frames.push(Frame::If {
                    stage: IfStage::Then,
                    base: self.nodes.len(),
                    from: token.location,
                });
                self.push_exprs();
                Flow::Consumed(Cls::Keyword)
            }
            _ => {
                self.frames.push(Frame::Binary {
                    ops: Vec::new(),
                    operand: true,
                });
                Flow::Pass
            }
        }
    }

    fn case(&mut self, base: usize, from: Location, token: &Token) -> Result<Flow, ParserError> {
        match token.token_type {
            TokenType::Of => {
                self.frames.push(Frame::Case { base, from });
                self.frames.push(Frame::Of(OfStage::Colon));
                self.frames.push(Frame::Prefix { pattern: true });
                Ok(Flow::Consumed(Cls::Keyword))
            }
            TokenType::End => {
                let elts = self.split(base);
                self.push_branch(Tag::Case, elts, span(&from, &token.location));
                Ok(Flow::Consumed(Cls::Keyword))
            }
            _ => Err(ParserError::expected("the 'of' or 'end' keyword", token)),
        }
    }

    fn of(&mut self, stage: OfStage, token: &Token) -> Result<Flow, ParserError> {
        match stage {
            OfStage::Colon if token.token_type == TokenType::Colon => {
                self.frames.push(Frame::Of(OfStage::Body));
                self.push_exprs();
                Ok(Flow::Consumed(Cls::Punc))
            }
            OfStage::Colon => Err(ParserError::expected("a ':'", token)),
            OfStage::Body => {
                let body = self.pop();
                let pattern = self.pop();
                self.push_branch(Tag::Of, vec![pattern, body], None);
                Ok(Flow::Pass)
            }
        }
    }

    fn if_then(
        &mut self,
        stage: IfStage,
        base: usize,
        from: Location,
        token: &Token,
    ) -> Result<Flow, ParserError> {
        match (stage, &token.token_type) {
            (IfStage::Then, TokenType::Then) => {
                self.frames.push(Frame::If {
                    stage: IfStage::Else,
                    base,
                    from,
                });
                self.push_exprs();
                Ok(Flow::Consumed(Cls::Keyword))
            }
            (IfStage::Then, _) => Err(ParserError::expected("the 'then' keyword", token)),
            (IfStage::Else, TokenType::Else) => {
                self.frames.push(Frame::If {
                    stage: IfStage::End,
                    base,
                    from,
                });
                self.push_exprs();
                Ok(Flow::Consumed(Cls::Keyword))
            }
            (IfStage::Else | IfStage::End, TokenType::End) => {
                let mut elts = self.split(base);
                elts.resize(3, NodeId::NONE);
                self.push_branch(Tag::If, elts, span(&from, &token.location));
                Ok(Flow::Consumed(Cls::Keyword))
            }
            (IfStage::Else, _) => Err(ParserError::expected("the 'else' or 'end' keyword", token)),
            (IfStage::End, _) => Err(ParserError::expected("the 'end' keyword", token)),
        }
    }

    /// Operator precedence climbing with an explicit operator stack. Equal precedence
    /// reduces first, so every level associates to the left.
    fn binary(&mut self, mut ops: Vec<BinOp>, operand: bool, token: &Token) -> Flow {
        if operand {
            self.frames.push(Frame::Binary {
                ops,
                operand: false,
            });
            self.frames.push(Frame::Prefix { pattern: false });
            return Flow::Pass;
        }
        match token.token_type {
            TokenType::Operator(op) => {
                while ops
                    .last()
                    .map_or(false, |top| top.precedence() >= op.precedence())
                {
                    if let Some(top) = ops.pop() {
                        self.reduce(top);
                    }
                }
                ops.push(op);
                self.frames.push(Frame::Binary { ops, operand: true });
                Flow::Consumed(Cls::Operator)
            }
            _ => {
                while let Some(op) = ops.pop() {
                    self.reduce(op);
                }
                Flow::Pass
            }
        }
    }

    fn reduce(&mut self, op: BinOp) {
        let right = self.pop();
        let left = self.pop();
        let coord = self.joined(&[left, right]);
        if op == BinOp::Concat {
            let list = self.store.intern_at(
                Tag::List,
                vec![Elt::Node(left), Elt::Node(right)],
                coord,
            );
            self.push_node(Tag::Concat, vec![Elt::Node(list)], coord);
        } else {
            self.push_branch(op.tag(), vec![left, right], coord);
        }
    }

    fn prefix(&mut self, pattern: bool, token: &Token) -> Flow {
        if token.token_type == TokenType::Minus {
            self.frames.push(Frame::Negate {
                from: token.location,
            });
            self.frames.push(Frame::Prefix { pattern });
            return Flow::Consumed(Cls::Number);
        }
        self.frames.push(Frame::Primary { pattern });
        Flow::Pass
    }

    fn negate(&mut self, from: Location) -> Flow {
        let operand = self.pop();
        let coord = match self.store.coord(operand) {
            Some(coord) => from.coord.join(&coord),
            None => from.coord,
        };
        self.push_branch(Tag::Neg, vec![operand], Some(coord));
        Flow::Pass
    }

    fn primary(&mut self, pattern: bool, token: &Token) -> Result<Flow, ParserError> {
        let at = &token.location;
        let cls = match &token.token_type {
            TokenType::Number(lexeme) => {
                self.push_leaf(Tag::Num, lexeme.as_str(), at);
                Cls::Number
            }
            TokenType::String(text) => {
                self.push_leaf(Tag::Str, text.as_str(), at);
                Cls::String
            }
            TokenType::StringPrefix(text) => {
                let base = self.nodes.len();
                self.push_leaf(Tag::Str, text.as_str(), at);
                self.frames.push(Frame::Interpolation { base, from: *at });
                self.push_exprs();
                Cls::String
            }
            TokenType::True | TokenType::False => {
                let flag = token.token_type == TokenType::True;
                self.push_node(Tag::Bool, vec![Elt::Bool(flag)], Some(at.coord));
                Cls::Keyword
            }
            TokenType::Null => {
                self.push_node(Tag::Null, Vec::new(), Some(at.coord));
                Cls::Keyword
            }
            TokenType::OpenBrace => {
                self.frames.push(Frame::Record {
                    stage: RecordStage::Key,
                    base: self.nodes.len(),
                    from: *at,
                });
                Cls::Punc
            }
            TokenType::OpenBracket => {
                self.frames.push(Frame::List {
                    base: self.nodes.len(),
                    pattern,
                    from: *at,
                });
                Cls::Punc
            }
            TokenType::OpenParen => {
                self.frames.push(Frame::Paren { from: *at });
                self.push_exprs();
                Cls::Punc
            }
            TokenType::OpenAngle => {
                self.env
                    .enter("lambda", None)
                    .map_err(|reason| ParserError::runaway(reason, token))?;
                self.frames.push(Frame::Lambda {
                    stage: LambdaStage::Params,
                    params: Vec::new(),
                    from: *at,
                });
                Cls::Punc
            }
            TokenType::Identifier(name) => self.name(name, pattern, at),
            _ => return Err(ParserError::expected("an expression", token)),
        };
        Ok(Flow::Consumed(cls))
    }

    /// Resolves a name against the environment. Bound values are substituted in place.
    fn name(&mut self, name: &str, pattern: bool, at: &Location) -> Cls {
        if pattern && name == "_" {
            self.push_node(Tag::Wildcard, Vec::new(), Some(at.coord));
            return Cls::Variable;
        }
        let kind = self.env.find(name).map(|(word, _)| word.kind.clone());
        match kind {
            Some(WordKind::Value { nid }) if nid.is_some() => {
                self.nodes.push(nid);
                Cls::Val
            }
            Some(WordKind::Value { .. }) => {
                self.push_leaf(Tag::Ident, name, at);
                Cls::Param
            }
            Some(_) => {
                self.push_leaf(Tag::Ident, name, at);
                Cls::Function
            }
            None => {
                self.errors.push(ParserError::NameNotFound {
                    name: name.to_string(),
                    at: *at,
                });
                self.push_leaf(Tag::Ident, name, at);
                Cls::Error
            }
        }
    }

    fn interpolation(
        &mut self,
        base: usize,
        from: Location,
        token: &Token,
    ) -> Result<Flow, ParserError> {
        match &token.token_type {
            TokenType::StringMiddle(text) => {
                self.push_leaf(Tag::Str, text.as_str(), &token.location);
                self.frames.push(Frame::Interpolation { base, from });
                self.push_exprs();
                Ok(Flow::Consumed(Cls::String))
            }
            TokenType::StringSuffix(text) => {
                self.push_leaf(Tag::Str, text.as_str(), &token.location);
                let parts = self.split(base);
                let coord = span(&from, &token.location);
                let list = self
                    .store
                    .intern_at(Tag::List, parts.into_iter().map(Elt::Node).collect(), coord);
                self.push_node(Tag::Concat, vec![Elt::Node(list)], coord);
                Ok(Flow::Consumed(Cls::String))
            }
            _ => Err(ParserError::expected("the rest of the string", token)),
        }
    }

    fn record(
        &mut self,
        stage: RecordStage,
        base: usize,
        from: Location,
        token: &Token,
    ) -> Result<Flow, ParserError> {
        match (stage, &token.token_type) {
            (RecordStage::Key, TokenType::CloseBrace) => {
                let elts = self.split(base);
                self.push_branch(Tag::Record, elts, span(&from, &token.location));
                Ok(Flow::Consumed(Cls::Punc))
            }
            (RecordStage::Key, TokenType::Identifier(key) | TokenType::String(key)) => {
                self.push_leaf(Tag::Str, key.as_str(), &token.location);
                self.frames.push(Frame::Record {
                    stage: RecordStage::Colon,
                    base,
                    from,
                });
                Ok(Flow::Consumed(match token.token_type {
                    TokenType::String(_) => Cls::String,
                    _ => Cls::Variable,
                }))
            }
            (RecordStage::Key, _) => Err(ParserError::expected("a key or '}'", token)),
            (RecordStage::Colon, TokenType::Colon) => {
                self.frames.push(Frame::Record {
                    stage: RecordStage::Value,
                    base,
                    from,
                });
                self.push_exprs();
                Ok(Flow::Consumed(Cls::Punc))
            }
            (RecordStage::Colon, _) => Err(ParserError::expected("a ':'", token)),
            (RecordStage::Value, token_type) => {
                let value = self.pop();
                let key = self.pop();
                self.push_branch(Tag::Binding, vec![key, value], None);
                self.frames.push(Frame::Record {
                    stage: RecordStage::Key,
                    base,
                    from,
                });
                if *token_type == TokenType::Comma {
                    Ok(Flow::Consumed(Cls::Punc))
                } else {
                    Ok(Flow::Pass)
                }
            }
        }
    }

    fn list(&mut self, base: usize, pattern: bool, from: Location, token: &Token) -> Flow {
        match token.token_type {
            TokenType::CloseBracket => {
                let elts = self.split(base);
                self.push_branch(Tag::List, elts, span(&from, &token.location));
                Flow::Consumed(Cls::Punc)
            }
            TokenType::Comma => {
                self.frames.push(Frame::List {
                    base,
                    pattern,
                    from,
                });
                Flow::Consumed(Cls::Punc)
            }
            _ => {
                self.frames.push(Frame::List {
                    base,
                    pattern,
                    from,
                });
                self.frames.push(if pattern {
                    Frame::Prefix { pattern }
                } else {
                    Frame::Expr
                });
                Flow::Pass
            }
        }
    }

    fn paren(&mut self, from: Location, token: &Token) -> Result<Flow, ParserError> {
        if token.token_type != TokenType::CloseParen {
            return Err(ParserError::expected("a ')'", token));
        }
        let inner = self.pop();
        self.push_branch(Tag::Paren, vec![inner], span(&from, &token.location));
        Ok(Flow::Consumed(Cls::Punc))
    }

    /// `<params: body>`. The body is folded while the parameters are in scope, unbound.
    fn lambda(
        &mut self,
        stage: LambdaStage,
        mut params: Vec<String>,
        from: Location,
        token: &Token,
    ) -> Result<Flow, ParserError> {
        match (stage, &token.token_type) {
            (LambdaStage::Params, TokenType::Identifier(param)) => {
                self.env
                    .add_word(Word::value(param, NodeId::NONE, params.len()));
                params.push(param.clone());
                self.frames.push(Frame::Lambda {
                    stage: LambdaStage::Params,
                    params,
                    from,
                });
                Ok(Flow::Consumed(Cls::Param))
            }
            (LambdaStage::Params, TokenType::Colon) => {
                self.frames.push(Frame::Lambda {
                    stage: LambdaStage::Body,
                    params,
                    from,
                });
                self.push_exprs();
                Ok(Flow::Consumed(Cls::Punc))
            }
            (LambdaStage::Params, _) => Err(ParserError::expected("a parameter or ':'", token)),
            (LambdaStage::Body, TokenType::CloseAngle) => {
                let body = self.pop();
                let folded = self.fold(body);
                self.env.exit();
                let body = folded.map_err(|reason| ParserError::runaway(reason, token))?;
                let names: Vec<Elt> = params
                    .iter()
                    .map(|param| Elt::Node(self.store.leaf(Tag::Ident, param.as_str())))
                    .collect();
                let list = self.store.intern(Tag::List, names);
                self.push_node(
                    Tag::Lambda,
                    vec![Elt::Node(list), Elt::Node(body)],
                    span(&from, &token.location),
                );
                Ok(Flow::Consumed(Cls::Punc))
            }
            (LambdaStage::Body, _) => Err(ParserError::expected("a '>'", token)),
        }
    }
}
