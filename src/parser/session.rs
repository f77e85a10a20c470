use super::{Cls, ParseOutput, Parser, ParserOpts};
use crate::scanner::{Scanner, ScannerError};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One token was read and classified.
    Token(Cls),
    /// The buffered text is exhausted but the input is still open.
    NeedInput,
    Done,
}

/// Couples a [`Scanner`] to a [`Parser`] so text can be fed in as it arrives.
///
/// Each [`ParseSession::step`] moves exactly one token from the scanner into the
/// parser, which is what an editor needs to colour text while the user types.
pub struct ParseSession {
    scanner: Scanner,
    parser: Parser,
    scanner_errors: Vec<ScannerError>,
}

impl ParseSession {
    pub fn new(opts: ParserOpts) -> Self {
        Self {
            scanner: Scanner::new(opts.lexicon.clone()),
            parser: Parser::new(opts),
            scanner_errors: Vec::new(),
        }
    }

    pub fn push_str(&mut self, text: &str) {
        self.scanner.push_str(text);
    }

    /// Declares that no more text will arrive.
    pub fn end_input(&mut self) {
        self.scanner.close();
    }

    pub fn step(&mut self) -> Step {
        if self.parser.is_done() {
            return Step::Done;
        }
        match self.scanner.next() {
            Some(Ok(token)) => Step::Token(self.parser.feed(token)),
            Some(Err(error)) => {
                debug!(%error, "lexical error");
                self.scanner_errors.push(error);
                Step::Token(Cls::Error)
            }
            None if self.scanner.is_closed() => Step::Done,
            None => Step::NeedInput,
        }
    }

    pub fn finish(self) -> ParseOutput {
        let version = self.parser.opts().version.clone();
        let (store, root, parser_errors) = self.parser.finish();
        ParseOutput {
            store,
            root,
            scanner_errors: self.scanner_errors,
            parser_errors,
            version,
        }
    }
}
