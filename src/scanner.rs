use crate::{
    lexicon::{BinOp, Keyword, Lexicon},
    source::{Coord, Location, Position, SourceSpan},
};
use derive_new::new;
use miette::Diagnostic;
use std::{collections::VecDeque, rc::Rc};
use strum::EnumDiscriminants;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug, Clone, PartialEq)]
pub enum ScannerError {
    #[error("Unexpected character: {character:?}")]
    UnexpectedCharacter {
        character: char,
        #[label("Character found here")]
        at: Location,
    },
    #[error("Unterminated string")]
    UnterminatedString {
        #[label("String starts here")]
        at: Location,
    },
    #[error("Unknown escape character {character:?}")]
    UnknownEscape {
        character: char,
        #[label("Character found here")]
        at: Location,
    },
}

impl ScannerError {
    pub fn location(&self) -> Location {
        match self {
            ScannerError::UnexpectedCharacter { at, .. }
            | ScannerError::UnterminatedString { at }
            | ScannerError::UnknownEscape { at, .. } => *at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, new)]
pub struct Token {
    pub location: Location,
    pub token_type: TokenType,
}

#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(TokenTypeName))]
pub enum TokenType {
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,
    OpenAngle,
    CloseAngle,
    Comma,
    Dot,
    Colon,
    Equal,
    Minus,
    Operator(BinOp),
    Identifier(String),
    Number(String),
    String(String),
    StringPrefix(String),
    StringMiddle(String),
    StringSuffix(String),
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
    LineComment,
    Eof,
}

impl TokenType {
    fn from_keyword(keyword: Keyword) -> Self {
        match keyword {
            Keyword::Let => TokenType::Let,
            Keyword::If => TokenType::If,
            Keyword::Then => TokenType::Then,
            Keyword::Else => TokenType::Else,
            Keyword::Case => TokenType::Case,
            Keyword::Of => TokenType::Of,
            Keyword::End => TokenType::End,
            Keyword::True => TokenType::True,
            Keyword::False => TokenType::False,
            Keyword::Null => TokenType::Null,
        }
    }

    pub fn name(&self) -> TokenTypeName {
        self.into()
    }

    /// How the token reads in an error message, e.g. "a ':'" or "the end of the program".
    pub fn describe(&self) -> String {
        match self {
            TokenType::OpenParen => "a '('".into(),
            TokenType::CloseParen => "a ')'".into(),
            TokenType::OpenBracket => "a '['".into(),
            TokenType::CloseBracket => "a ']'".into(),
            TokenType::OpenBrace => "a '{'".into(),
            TokenType::CloseBrace => "a '}'".into(),
            TokenType::OpenAngle => "a '<'".into(),
            TokenType::CloseAngle => "a '>'".into(),
            TokenType::Comma => "a ','".into(),
            TokenType::Dot => "a '.'".into(),
            TokenType::Colon => "a ':'".into(),
            TokenType::Equal => "a '='".into(),
            TokenType::Minus => "a '-'".into(),
            TokenType::Operator(op) => format!("the {} operator", op),
            TokenType::Identifier(name) => format!("the name '{}'", name),
            TokenType::Number(lexeme) => format!("the number {}", lexeme),
            TokenType::String(_)
            | TokenType::StringPrefix(_)
            | TokenType::StringMiddle(_)
            | TokenType::StringSuffix(_) => "a string".into(),
            TokenType::Let => "the 'let' keyword".into(),
            TokenType::If => "the 'if' keyword".into(),
            TokenType::Then => "the 'then' keyword".into(),
            TokenType::Else => "the 'else' keyword".into(),
            TokenType::Case => "the 'case' keyword".into(),
            TokenType::Of => "the 'of' keyword".into(),
            TokenType::End => "the 'end' keyword".into(),
            TokenType::True => "the 'true' keyword".into(),
            TokenType::False => "the 'false' keyword".into(),
            TokenType::Null => "the 'null' keyword".into(),
            TokenType::LineComment => "a comment".into(),
            TokenType::Eof => "the end of the program".into(),
        }
    }
}

fn is_identifier_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_identifier_continue(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '_' | '-' | '@' | '#' | '~')
}

/// An open `${` segment: the quote that resumes after it, and how many record braces
/// are open inside.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Interpolation {
    quote: char,
    depth: usize,
}

struct Checkpoint {
    offset: usize,
    position: Position,
    interpolations: Vec<Interpolation>,
    pending_errors: usize,
}

/// Turns program text into tokens.
///
/// Text can arrive in pieces through [`Scanner::push_str`]. Until [`Scanner::close`] is
/// called the scanner refuses to commit a token that runs into the end of the buffered
/// text and yields `None` instead, so a token is never split across two pushes.
pub struct Scanner {
    lexicon: Rc<Lexicon>,
    source: String,
    closed: bool,
    at_end: bool,
    offset: usize,
    position: Position,
    token_start: (usize, Position),
    interpolations: Vec<Interpolation>,
    pending_errors: VecDeque<ScannerError>,
}

impl Scanner {
    pub fn new(lexicon: Rc<Lexicon>) -> Self {
        Self {
            lexicon,
            source: String::new(),
            closed: false,
            at_end: false,
            offset: 0,
            position: Position::default(),
            token_start: (0, Position::default()),
            interpolations: Vec::new(),
            pending_errors: VecDeque::new(),
        }
    }

    pub fn from_source(source: &str, lexicon: Rc<Lexicon>) -> Self {
        let mut scanner = Self::new(lexicon);
        scanner.push_str(source);
        scanner.close();
        scanner
    }

    pub fn push_str(&mut self, text: &str) {
        self.source.push_str(text);
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source[self.offset..].chars().next()?;
        self.offset += ch.len_utf8();
        if ch == '\n' {
            self.position.line += 1;
            self.position.column = 0;
        } else {
            self.position.column += 1;
        }
        Some(ch)
    }

    fn advance_while<F: Fn(char) -> bool>(&mut self, check: F) {
        loop {
            match self.peek(1) {
                Some(ch) if check(ch) => {
                    self.advance();
                }
                _ => return,
            }
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        assert!(offset > 0);
        self.source[self.offset..].chars().nth(offset - 1)
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            offset: self.offset,
            position: self.position,
            interpolations: self.interpolations.clone(),
            pending_errors: self.pending_errors.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.offset = checkpoint.offset;
        self.position = checkpoint.position;
        self.interpolations = checkpoint.interpolations;
        self.pending_errors.truncate(checkpoint.pending_errors);
    }

    fn begin_token(&mut self) {
        self.token_start = (self.offset, self.position);
    }

    fn current_location(&self) -> Location {
        let (start, from) = self.token_start;
        Location::new(
            SourceSpan::range(start.into(), self.offset.into()),
            Coord::new(from, self.position),
        )
    }

    fn yield_token(&self, token_type: TokenType) -> Token {
        Token::new(self.current_location(), token_type)
    }

    fn lexeme(&self) -> &str {
        &self.source[self.token_start.0..self.offset]
    }

    fn scan(&mut self, ch: char) -> Result<Token, ScannerError> {
        Ok(match ch {
            '(' => self.yield_token(TokenType::OpenParen),
            ')' => self.yield_token(TokenType::CloseParen),
            '[' => self.yield_token(TokenType::OpenBracket),
            ']' => self.yield_token(TokenType::CloseBracket),
            '{' => {
                if let Some(open) = self.interpolations.last_mut() {
                    open.depth += 1;
                }
                self.yield_token(TokenType::OpenBrace)
            }
            '}' => match self.interpolations.last_mut() {
                Some(open) if open.depth == 0 => {
                    let quote = open.quote;
                    self.interpolations.pop();
                    return self.string(quote, true, true);
                }
                Some(open) => {
                    open.depth -= 1;
                    self.yield_token(TokenType::CloseBrace)
                }
                None => self.yield_token(TokenType::CloseBrace),
            },
            ',' => self.yield_token(TokenType::Comma),
            ':' => self.yield_token(TokenType::Colon),
            '-' => self.yield_token(TokenType::Minus),
            '.' => match self.peek(1) {
                Some(next) if next.is_ascii_digit() => self.number(),
                _ => self.yield_token(TokenType::Dot),
            },
            '|' => {
                self.advance_while(|ch| ch != '\n');
                self.yield_token(TokenType::LineComment)
            }
            '"' | '\'' => return self.string(ch, true, false),
            '`' => return self.string(ch, false, false),
            ch if ch.is_ascii_digit() => self.number(),
            ch if is_identifier_start(ch) => self.identifier(),
            ch => return self.symbol(ch),
        })
    }

    fn number(&mut self) -> Token {
        self.advance_while(|ch| ch.is_ascii_digit());
        if self.peek(1) == Some('.') && self.peek(2).map_or(false, |ch| ch.is_ascii_digit()) {
            self.advance();
            self.advance_while(|ch| ch.is_ascii_digit());
        }
        let lexeme = self.lexeme();
        let lexeme = if lexeme.starts_with('.') {
            format!("0{}", lexeme)
        } else {
            lexeme.to_string()
        };
        self.yield_token(TokenType::Number(lexeme))
    }

    fn identifier(&mut self) -> Token {
        self.advance_while(is_identifier_continue);
        let lexeme = self.lexeme();
        let token_type = if let Some(keyword) = self.lexicon.keyword(lexeme) {
            TokenType::from_keyword(keyword)
        } else if let Some(op) = self.lexicon.operator(lexeme) {
            TokenType::Operator(op)
        } else {
            TokenType::Identifier(lexeme.to_string())
        };
        self.yield_token(token_type)
    }

    fn symbol(&mut self, ch: char) -> Result<Token, ScannerError> {
        if let Some(next) = self.peek(1) {
            if let Some(op) = self.lexicon.operator(&format!("{}{}", ch, next)) {
                self.advance();
                return Ok(self.yield_token(TokenType::Operator(op)));
            }
        }
        if let Some(op) = self.lexicon.operator(&ch.to_string()) {
            return Ok(self.yield_token(TokenType::Operator(op)));
        }
        match ch {
            '=' => Ok(self.yield_token(TokenType::Equal)),
            '<' => Ok(self.yield_token(TokenType::OpenAngle)),
            '>' => Ok(self.yield_token(TokenType::CloseAngle)),
            character => Err(ScannerError::UnexpectedCharacter {
                character,
                at: self.current_location(),
            }),
        }
    }

    /// Scans string text up to the closing `quote` or the next `${`.
    ///
    /// `resumed` is set when scanning restarts after the `}` of an interpolated segment.
    fn string(
        &mut self,
        quote: char,
        interpolates: bool,
        resumed: bool,
    ) -> Result<Token, ScannerError> {
        let mut text = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(ScannerError::UnterminatedString {
                        at: self.current_location(),
                    })
                }
                Some(ch) if ch == quote => {
                    return Ok(self.yield_token(if resumed {
                        TokenType::StringSuffix(text)
                    } else {
                        TokenType::String(text)
                    }));
                }
                Some('$') if interpolates && self.peek(1) == Some('{') => {
                    self.advance();
                    self.interpolations.push(Interpolation { quote, depth: 0 });
                    return Ok(self.yield_token(if resumed {
                        TokenType::StringMiddle(text)
                    } else {
                        TokenType::StringPrefix(text)
                    }));
                }
                Some('\\') if interpolates => {
                    let escape_start = (self.offset, self.position);
                    match self.advance() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('r') => text.push('\r'),
                        Some(ch @ ('\\' | '"' | '\'' | '$')) => text.push(ch),
                        Some(character) => {
                            self.pending_errors.push_back(ScannerError::UnknownEscape {
                                character,
                                at: Location::new(
                                    SourceSpan::range(escape_start.0.into(), self.offset.into()),
                                    Coord::new(escape_start.1, self.position),
                                ),
                            });
                            text.push(character);
                        }
                        None => {
                            return Err(ScannerError::UnterminatedString {
                                at: self.current_location(),
                            })
                        }
                    }
                }
                Some(ch) => text.push(ch),
            }
        }
    }
}

impl Iterator for Scanner {
    type Item = Result<Token, ScannerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.pending_errors.pop_front() {
            return Some(Err(error));
        }

        if self.at_end {
            return None;
        }

        self.advance_while(|ch| ch.is_whitespace());

        let checkpoint = self.checkpoint();
        self.begin_token();
        let result = match self.advance() {
            None if self.closed => {
                self.at_end = true;
                Ok(self.yield_token(TokenType::Eof))
            }
            None => return None,
            Some(ch) => self.scan(ch),
        };
        if !self.closed && self.offset >= self.source.len() {
            self.restore(checkpoint);
            return None;
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scan(source: &str) -> Vec<Result<TokenType, ScannerError>> {
        Scanner::from_source(source, Rc::new(Lexicon::standard()))
            .map(|result| result.map(|token| token.token_type))
            .collect()
    }

    fn types(source: &str) -> Vec<TokenType> {
        scan(source)
            .into_iter()
            .map(|result| result.expect("no scanner errors"))
            .collect()
    }

    #[test]
    fn punctuation_and_operators() {
        use TokenType::*;
        assert_eq!(
            types("( ) [ ] { } < > , . : = - + ++ == != <= >= ^ % / *"),
            vec![
                OpenParen,
                CloseParen,
                OpenBracket,
                CloseBracket,
                OpenBrace,
                CloseBrace,
                OpenAngle,
                CloseAngle,
                Comma,
                Dot,
                Colon,
                Equal,
                Minus,
                Operator(BinOp::Add),
                Operator(BinOp::Concat),
                Operator(BinOp::Eq),
                Operator(BinOp::Ne),
                Operator(BinOp::Le),
                Operator(BinOp::Ge),
                Operator(BinOp::Pow),
                Operator(BinOp::Mod),
                Operator(BinOp::Div),
                Operator(BinOp::Mul),
                Eof,
            ]
        );
    }

    #[test]
    fn words_are_keywords_operators_or_identifiers() {
        use TokenType::*;
        assert_eq!(
            types("let case of end true null and or kebab-name x_1"),
            vec![
                Let,
                Case,
                Of,
                End,
                True,
                Null,
                Operator(BinOp::And),
                Operator(BinOp::Or),
                Identifier("kebab-name".into()),
                Identifier("x_1".into()),
                Eof,
            ]
        );
    }

    #[test]
    fn numbers_allow_a_leading_dot() {
        use TokenType::*;
        assert_eq!(
            types("12 1.5 .5 3.."),
            vec![
                Number("12".into()),
                Number("1.5".into()),
                Number("0.5".into()),
                Number("3".into()),
                Dot,
                Dot,
                Eof,
            ]
        );
    }

    #[test]
    fn interpolated_strings_split_into_segments() {
        use TokenType::*;
        assert_eq!(
            types(r#""a ${x} b ${ {k: 1} } c" `raw ${x}`"#),
            vec![
                StringPrefix("a ".into()),
                Identifier("x".into()),
                StringMiddle(" b ".into()),
                OpenBrace,
                Identifier("k".into()),
                Colon,
                Number("1".into()),
                CloseBrace,
                StringSuffix(" c".into()),
                String("raw ${x}".into()),
                Eof,
            ]
        );
    }

    #[test]
    fn comments_run_to_end_of_line() {
        use TokenType::*;
        assert_eq!(
            types("1 | one\n2"),
            vec![Number("1".into()), LineComment, Number("2".into()), Eof]
        );
    }

    #[test]
    fn unterminated_string_then_eof() {
        let tokens = scan("'abc");
        assert!(matches!(
            tokens[0],
            Err(ScannerError::UnterminatedString { .. })
        ));
        assert_eq!(tokens[1], Ok(TokenType::Eof));
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn unexpected_characters_are_reported() {
        let tokens = scan("1 ? 2");
        assert!(matches!(
            tokens[1],
            Err(ScannerError::UnexpectedCharacter { character: '?', .. })
        ));
        assert_eq!(tokens[2], Ok(TokenType::Number("2".into())));
    }

    #[test]
    fn unknown_escapes_are_reported_after_the_string() {
        let tokens = scan(r#""a\qb""#);
        assert_eq!(tokens[0], Ok(TokenType::String("aqb".into())));
        assert!(matches!(
            tokens[1],
            Err(ScannerError::UnknownEscape { character: 'q', .. })
        ));
    }

    #[test]
    fn tokens_carry_line_and_column() {
        let tokens: Vec<Token> = Scanner::from_source("1\n  foo", Rc::new(Lexicon::standard()))
            .filter_map(Result::ok)
            .collect();
        assert_eq!(tokens[1].location.coord.from, Position::new(1, 2));
        assert_eq!(tokens[1].location.coord.to, Position::new(1, 5));
        assert_eq!(tokens[1].location.span.start().byte_offset(), 4);
    }

    #[test]
    fn open_streams_hold_back_partial_tokens() {
        let mut scanner = Scanner::new(Rc::new(Lexicon::standard()));
        scanner.push_str("12");
        assert!(scanner.next().is_none());
        scanner.push_str("3 ");
        assert_eq!(
            scanner.next().and_then(Result::ok).map(|t| t.token_type),
            Some(TokenType::Number("123".into()))
        );
        assert!(scanner.next().is_none());
        scanner.close();
        assert_eq!(
            scanner.next().and_then(Result::ok).map(|t| t.token_type),
            Some(TokenType::Eof)
        );
        assert!(scanner.next().is_none());
    }
}
