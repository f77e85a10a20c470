use serde::{Deserialize, Serialize};
use std::{fmt, ops::Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceOffset(usize);

impl SourceOffset {
    pub fn byte_offset(&self) -> usize {
        self.0
    }
}

impl From<usize> for SourceOffset {
    fn from(offset: usize) -> Self {
        Self(offset)
    }
}

impl From<&SourceOffset> for miette::SourceOffset {
    fn from(offset: &SourceOffset) -> Self {
        offset.0.into()
    }
}
impl From<SourceOffset> for miette::SourceOffset {
    fn from(offset: SourceOffset) -> Self {
        Self::from(&offset)
    }
}

/// Byte range into the scanned text, used for `miette` labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpan {
    offset: SourceOffset,
    length: SourceOffset,
}

impl SourceSpan {
    pub fn new(offset: SourceOffset, length: SourceOffset) -> Self {
        Self { offset, length }
    }
    pub fn len(&self) -> usize {
        self.length.0
    }
    pub fn is_empty(&self) -> bool {
        self.length.0 == 0
    }
    pub fn range(start: SourceOffset, end: SourceOffset) -> Self {
        Self {
            offset: start,
            length: end.0.saturating_sub(start.0).into(),
        }
    }
    pub fn start(&self) -> SourceOffset {
        self.offset
    }
    pub fn end(&self) -> SourceOffset {
        (self.offset.0 + self.length.0).into()
    }
    pub fn join(&self, other: &SourceSpan) -> SourceSpan {
        let start = self.offset.0.min(other.offset.0);
        let end = self.end().0.max(other.end().0);
        SourceSpan::range(start.into(), end.into())
    }
}

impl From<&SourceSpan> for miette::SourceSpan {
    fn from(span: &SourceSpan) -> Self {
        Self::new((&span.offset).into(), (&span.length).into())
    }
}
impl From<SourceSpan> for miette::SourceSpan {
    fn from(span: SourceSpan) -> Self {
        Self::from(&span)
    }
}

impl From<Range<usize>> for SourceSpan {
    fn from(range: Range<usize>) -> Self {
        Self::range(range.start.into(), range.end.into())
    }
}

impl From<usize> for SourceSpan {
    fn from(offset: usize) -> Self {
        Self::new(offset.into(), 1.into())
    }
}

/// Zero-based line and column, as an editor reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Coord {
    pub from: Position,
    pub to: Position,
}

impl Coord {
    pub fn new(from: Position, to: Position) -> Self {
        Self { from, to }
    }
    pub fn join(&self, other: &Coord) -> Coord {
        Coord {
            from: self.from.min(other.from),
            to: self.to.max(other.to),
        }
    }
}

/// A byte span paired with the line/column coordinates it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub span: SourceSpan,
    pub coord: Coord,
}

impl Location {
    pub fn new(span: SourceSpan, coord: Coord) -> Self {
        Self { span, coord }
    }
    pub fn join(&self, other: &Location) -> Location {
        Location {
            span: self.span.join(&other.span),
            coord: self.coord.join(&other.coord),
        }
    }
}

impl From<&Location> for miette::SourceSpan {
    fn from(location: &Location) -> Self {
        Self::from(&location.span)
    }
}
impl From<Location> for miette::SourceSpan {
    fn from(location: Location) -> Self {
        Self::from(&location)
    }
}
