//! The lexical scanner.
//!
//! Consumes UTF-8 input one rune at a time and produces [`Token`]s. Besides
//! the usual identifier/number/operator fare it handles line comments,
//! single- and multi-line strings, and interpolated strings: inside a
//! single-delimited string, `${ ... }` switches to a depth-tracking
//! sub-scan, and the interpolated region is re-scanned as a fresh token
//! sequence by a child scanner whose positions are anchored at the region's
//! byte offset in the enclosing file.

use std::sync::LazyLock;

use regex::Regex;

use crate::errors::ScanError;
use crate::token::{FormatPart, FormatStr, Pos, Token, TokenType};

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+[eE][+-]?\d+|\d*\.\d+(?:[eE][+-]?\d+)?|\d+\.\d*(?:[eE][+-]?\d+)?|(\d+))")
        .expect("number regex must compile")
});

fn keyword(ident: &str) -> Option<TokenType> {
    match ident {
        "func" => Some(TokenType::Func),
        "let" => Some(TokenType::Let),
        "template" => Some(TokenType::Template),
        "if" => Some(TokenType::If),
        "then" => Some(TokenType::Then),
        "else" => Some(TokenType::Else),
        "pub" => Some(TokenType::Pub),
        "unit" => Some(TokenType::Unit),
        "true" | "false" => Some(TokenType::BoolLiteral),
        "nil" => Some(TokenType::Nil),
        _ => None,
    }
}

/// Scanning state over one input string. `base` is the offset of the input's
/// first byte in the surrounding [`crate::token::FileSet`], so every token
/// position is global; child scanners for interpolated regions are created
/// with the region's offset as their base.
pub struct Scanner<'a> {
    input: &'a str,
    base: usize,
    mark: usize,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::with_base(input, 0)
    }

    pub fn with_base(input: &'a str, base: usize) -> Self {
        Self {
            input,
            base,
            mark: 0,
            pos: 0,
        }
    }

    /// True once the input has been consumed entirely.
    pub fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn set_mark(&mut self) {
        self.mark = self.pos;
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input[self.pos..].chars().next()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            return true;
        }
        false
    }

    fn val(&self) -> &str {
        &self.input[self.mark..self.pos]
    }

    fn global(&self, offset: usize) -> Pos {
        Pos(self.base + offset)
    }

    fn token(&self, typ: TokenType) -> Token {
        self.token_val(typ, self.val().to_string())
    }

    fn token_val(&self, typ: TokenType, val: String) -> Token {
        Token {
            typ,
            pos: self.global(self.mark),
            end: self.global(self.pos),
            val,
            fmt: None,
        }
    }

    fn error(&self, offset: usize, msg: impl Into<String>) -> ScanError {
        ScanError::new(self.global(offset), msg)
    }

    /// Scans the next token and advances the scanner state. At the end of the
    /// input it returns an [`TokenType::EndOfInput`] token rather than an
    /// error.
    pub fn next_token(&mut self) -> Result<Token, ScanError> {
        // Iterate until a token is found, skipping comments and whitespace.
        while !self.at_end() {
            self.set_mark();
            let r = match self.advance() {
                Some(r) => r,
                None => break,
            };
            if r == '_' || r.is_alphabetic() {
                return Ok(self.ident());
            }
            match r {
                '(' => return Ok(self.token(TokenType::LeftParen)),
                ')' => return Ok(self.token(TokenType::RightParen)),
                '{' => return Ok(self.token(TokenType::LeftBrace)),
                '}' => return Ok(self.token(TokenType::RightBrace)),
                '[' => return Ok(self.token(TokenType::LeftSquare)),
                ']' => return Ok(self.token(TokenType::RightSquare)),
                ',' => return Ok(self.token(TokenType::Comma)),
                '+' => return Ok(self.token(TokenType::Plus)),
                '-' => return Ok(self.token(TokenType::Minus)),
                '*' => return Ok(self.token(TokenType::Times)),
                '%' => return Ok(self.token(TokenType::Modulo)),
                '^' => return Ok(self.token(TokenType::BitwiseXor)),
                '~' => return Ok(self.token(TokenType::Complement)),
                '@' => return Ok(self.token(TokenType::Merge)),
                '/' => {
                    if self.match_char('/') {
                        self.eat_line();
                        continue;
                    }
                    return Ok(self.token(TokenType::Div));
                }
                '.' => {
                    if matches!(self.peek(), Some('0'..='9')) {
                        return self.number();
                    }
                    return Ok(self.token(TokenType::Dot));
                }
                '0'..='9' => return self.number(),
                ':' => {
                    if self.match_char(':') {
                        return Ok(self.token(TokenType::OfType));
                    }
                    return Ok(self.token(TokenType::Colon));
                }
                '<' => {
                    if self.match_char('=') {
                        return Ok(self.token(TokenType::LessEq));
                    }
                    if self.match_char('<') {
                        return Ok(self.token(TokenType::ShiftLeft));
                    }
                    return Ok(self.token(TokenType::LessThan));
                }
                '>' => {
                    if self.match_char('=') {
                        return Ok(self.token(TokenType::GreaterEq));
                    }
                    if self.match_char('>') {
                        return Ok(self.token(TokenType::ShiftRight));
                    }
                    return Ok(self.token(TokenType::GreaterThan));
                }
                '=' => {
                    if self.match_char('=') {
                        return Ok(self.token(TokenType::Equal));
                    }
                    return Err(self.error(self.mark, "invalid lexeme '='; did you mean '=='?"));
                }
                '!' => {
                    if self.match_char('=') {
                        return Ok(self.token(TokenType::NotEqual));
                    }
                    return Ok(self.token(TokenType::Not));
                }
                '&' => {
                    if self.match_char('&') {
                        return Ok(self.token(TokenType::LogicalAnd));
                    }
                    return Ok(self.token(TokenType::BitwiseAnd));
                }
                '|' => {
                    if self.match_char('|') {
                        return Ok(self.token(TokenType::LogicalOr));
                    }
                    return Ok(self.token(TokenType::BitwiseOr));
                }
                '"' | '\'' => return self.string_lit(r),
                ' ' | '\t' | '\n' | '\r' => continue,
                _ => return Err(self.error(self.mark, format!("invalid lexeme '{r}'"))),
            }
        }
        self.set_mark();
        Ok(self.token(TokenType::EndOfInput))
    }

    /// Scans all remaining tokens. On success the last token is always
    /// [`TokenType::EndOfInput`]; the scan stops at the first error.
    pub fn scan_all(&mut self) -> Result<Vec<Token>, ScanError> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = t.typ == TokenType::EndOfInput;
            tokens.push(t);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn eat_line(&mut self) {
        while let Some(c) = self.advance() {
            if c == '\n' {
                return;
            }
        }
    }

    fn ident(&mut self) -> Token {
        while let Some(c) = self.peek() {
            if c.is_alphabetic() || c == '_' || c.is_numeric() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        let typ = keyword(self.val()).unwrap_or(TokenType::Ident);
        self.token(typ)
    }

    /// Scans integer and double literals, starting at the marked position.
    fn number(&mut self) -> Result<Token, ScanError> {
        let caps = NUMBER_RE
            .captures(&self.input[self.mark..])
            .ok_or_else(|| self.error(self.mark, "invalid number literal"))?;
        let m = caps.get(0).ok_or_else(|| self.error(self.mark, "invalid number literal"))?;
        self.pos = self.mark + m.end();
        // Group 1 is the all-digits alternative; everything else is a double.
        let typ = if caps.get(1).is_some() {
            TokenType::IntLiteral
        } else {
            TokenType::DoubleLiteral
        };
        Ok(self.token(typ))
    }

    fn string_lit(&mut self, delim: char) -> Result<Token, ScanError> {
        let mut ndelim = 1; // The 1st delimiter was already consumed.
        while !self.at_end() && self.match_char(delim) {
            ndelim += 1;
        }
        match ndelim {
            1 => self.string_oneline(delim),
            2 => Ok(self.token_val(TokenType::StrLiteral, String::new())),
            3 => self.string_multiline(delim),
            _ => Err(self.error(self.mark, "invalid string literal")),
        }
    }

    fn string_oneline(&mut self, delim: char) -> Result<Token, ScanError> {
        let mut parts: Vec<FormatPart> = Vec::new();
        let mut buf = String::new();
        let mut part_start = self.pos;
        while !self.at_end() {
            let before = self.pos;
            let r = match self.advance() {
                Some(r) => r,
                None => break,
            };
            if r == delim {
                if !parts.is_empty() {
                    if !buf.is_empty() {
                        parts.push(FormatPart::Literal {
                            val: std::mem::take(&mut buf),
                            pos: self.global(part_start),
                            end: self.global(before),
                        });
                    }
                    return Ok(Token {
                        typ: TokenType::FormatStrLiteral,
                        pos: self.global(self.mark),
                        end: self.global(self.pos),
                        val: String::new(),
                        fmt: Some(FormatStr { parts }),
                    });
                }
                return Ok(self.token_val(TokenType::StrLiteral, buf));
            } else if r == '\n' || r == '\r' {
                return Err(self.error(before, "unexpected newline in string literal"));
            } else if r == '$' && self.match_char('{') {
                if !buf.is_empty() {
                    parts.push(FormatPart::Literal {
                        val: std::mem::take(&mut buf),
                        pos: self.global(part_start),
                        end: self.global(before),
                    });
                }
                let expr_start = self.pos;
                self.skip_format_string_expr(delim)?;
                let expr_end = self.pos; // One past the closing '}'.
                if expr_start + 1 == expr_end {
                    // Ignore an empty interpolation ${}.
                    part_start = self.pos;
                    continue;
                }
                // Re-scan the region with a child scanner anchored at its
                // global byte offset, so embedded tokens have real positions.
                let mut child = Scanner::with_base(
                    &self.input[expr_start..expr_end - 1],
                    self.base + expr_start,
                );
                let tokens = child.scan_all()?;
                parts.push(FormatPart::Interpolation {
                    tokens,
                    pos: self.global(expr_start),
                    end: self.global(expr_end),
                });
                part_start = self.pos;
            } else if r == '\\' {
                match self.advance() {
                    Some('n') => buf.push('\n'),
                    Some('r') => buf.push('\r'),
                    Some('t') => buf.push('\t'),
                    Some(c @ ('"' | '\'' | '\\' | '$')) => buf.push(c),
                    Some(c) => {
                        return Err(self.error(before, format!("invalid escape character '{c}'")))
                    }
                    None => break,
                }
            } else {
                buf.push(r);
            }
        }
        Err(self.error(self.pos, "end of input while scanning string literal"))
    }

    /// Advances past the `}` closing a `${...}` interpolation. On entry the
    /// scanner points at the first character of the interpolated expression.
    /// `{`/`}` nesting is tracked, and the *other* string delimiter opens an
    /// inert nested string in which braces do not count.
    fn skip_format_string_expr(&mut self, delim: char) -> Result<(), ScanError> {
        let mut depth = 0;
        let mut in_string = false;
        while !self.at_end() {
            let before = self.pos;
            let r = match self.advance() {
                Some(r) => r,
                None => break,
            };
            if r == delim {
                return Err(self.error(
                    before,
                    "error in format string: end of string in interpolated expression",
                ));
            }
            match r {
                '\n' | '\r' => {
                    return Err(self.error(
                        before,
                        "error in format string: newline in interpolated expression",
                    ))
                }
                '\\' => {
                    return Err(self.error(
                        before,
                        "error in format string: interpolated expression cannot contain a backslash",
                    ))
                }
                '\'' | '"' => in_string = !in_string,
                // Braces inside the nested inert string do not count.
                '}' if !in_string => {
                    if depth == 0 {
                        return Ok(());
                    }
                    depth -= 1;
                }
                '{' if !in_string => depth += 1,
                _ => {}
            }
        }
        Err(self.error(self.pos, "error in format string: end of input"))
    }

    /// Scans the body of a `"""`/`'''` string: verbatim content up to the
    /// next delimiter triple. Newlines are allowed; escapes and interpolation
    /// are not processed.
    fn string_multiline(&mut self, delim: char) -> Result<Token, ScanError> {
        let triple: String = std::iter::repeat(delim).take(3).collect();
        match self.input[self.pos..].find(&triple) {
            Some(i) => {
                let content = self.input[self.pos..self.pos + i].to_string();
                self.pos += i + triple.len();
                Ok(self.token_val(TokenType::StrLiteral, content))
            }
            None => Err(self.error(self.pos, "end of input while scanning string literal")),
        }
    }
}
