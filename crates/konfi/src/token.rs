//! Tokens and source positions.
//!
//! A [`Pos`] is a byte offset into the global concatenation of all loaded
//! files. Each file added to a [`FileSet`] owns a contiguous half-open range
//! `[base, base + size)`; translating a `Pos` back to a (file, line, column)
//! triple is two binary searches. This representation is very similar to the
//! one used by the Go compiler's `go/token` package.

use std::fmt;

/// A byte offset into the files of a [`FileSet`]. Opaque outside this module
/// family; only a `FileSet` can translate it back to a human-readable
/// location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pos(pub usize);

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Literals
    Nil,              // nil
    BoolLiteral,      // true false
    IntLiteral,       // 0 1 2
    DoubleLiteral,    // 0. 1.2 3e-4
    StrLiteral,       // "foo" 'bar'
    FormatStrLiteral, // "/path/to/${heaven}"
    // Operators
    Plus,        // +
    Minus,       // -
    Times,       // *
    Div,         // /
    Modulo,      // %
    Equal,       // ==
    NotEqual,    // !=
    LessThan,    // <
    LessEq,      // <=
    GreaterThan, // >
    GreaterEq,   // >=
    LogicalAnd,  // &&
    LogicalOr,   // ||
    BitwiseAnd,  // &
    BitwiseOr,   // |
    BitwiseXor,  // ^
    ShiftLeft,   // <<
    ShiftRight,  // >>
    Dot,         // .
    Not,         // !
    Complement,  // ~
    Merge,       // @
    // Separators
    Comma,       // ,
    LeftParen,   // (
    RightParen,  // )
    LeftBrace,   // {
    RightBrace,  // }
    LeftSquare,  // [
    RightSquare, // ]
    Colon,       // :
    OfType,      // ::
    // Identifiers
    Ident,
    // Keywords
    Func,
    Let,
    Template,
    If,
    Then,
    Else,
    Pub,
    Unit,
    // End of input is not an error, but a regular token.
    EndOfInput,
}

/// One part of a format string: either a literal substring or the token
/// sequence of an interpolated `${...}` expression. Both carry the span they
/// occupy in the enclosing string literal.
#[derive(Debug, Clone)]
pub enum FormatPart {
    Literal {
        val: String,
        pos: Pos,
        end: Pos,
    },
    Interpolation {
        tokens: Vec<Token>,
        pos: Pos,
        end: Pos,
    },
}

#[derive(Debug, Clone)]
pub struct FormatStr {
    pub parts: Vec<FormatPart>,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub typ: TokenType,
    pub pos: Pos,
    pub end: Pos,
    pub val: String,
    /// Only set for [`TokenType::FormatStrLiteral`].
    pub fmt: Option<FormatStr>,
}

/// A file registered with a [`FileSet`]: a name, the base offset of its
/// positions, its size in bytes, and the offsets of its line starts.
#[derive(Debug, Clone)]
pub struct File {
    name: String,
    base: usize,
    size: usize,
    lines: Vec<usize>,
}

impl File {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// A resolved source location, counted from 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub name: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.column)
    }
}

/// An append-only set of files sharing one position space. Offsets of a file
/// are stable once it has been added.
#[derive(Debug, Default)]
pub struct FileSet {
    base: usize,
    files: Vec<File>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `content` under `name` and returns the base offset assigned
    /// to the new file. Line starts are computed here in a single pass, so
    /// scanners never need to report newlines back.
    pub fn add_file(&mut self, name: &str, content: &str) -> usize {
        let mut lines = vec![0];
        for (i, b) in content.bytes().enumerate() {
            if b == b'\n' {
                lines.push(i + 1);
            }
        }
        let base = self.base;
        self.files.push(File {
            name: name.to_string(),
            base,
            size: content.len(),
            lines,
        });
        self.base += content.len();
        base
    }

    /// Translates `pos` to a (file, line, column) triple. Returns `None` when
    /// `pos` lies outside every registered file. A position exactly at a
    /// file's end (one past the last byte) still resolves, so end-of-input
    /// diagnostics have a printable location.
    pub fn position_of(&self, pos: Pos) -> Option<Position> {
        let idx = self.files.partition_point(|f| f.base <= pos.0).checked_sub(1)?;
        let file = &self.files[idx];
        let offset = pos.0 - file.base;
        if offset > file.size {
            return None;
        }
        let line = file.lines.partition_point(|&l| l <= offset);
        let column = offset - file.lines[line - 1] + 1;
        Some(Position {
            name: file.name.clone(),
            line,
            column,
        })
    }

    pub fn file_name(&self, base: usize) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.base == base)
            .map(|f| f.name.as_str())
    }
}
