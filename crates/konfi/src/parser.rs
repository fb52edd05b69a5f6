//! The recursive-descent parser.
//!
//! Operates on a pre-scanned token vector with one-token lookahead and stops
//! at the first error. Precedence, low to high: conditional, `||`, `&&`,
//! comparisons, additive (`+ - | ^ @`), multiplicative (`* / % << >> &`),
//! unary, `:: type`, postfix (field access, calls).

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{
    BinaryExpr, BoolLit, CallExpr, CondExpr, DoubleLit, Expr, FieldAcc, FuncExpr, IntLit, LetVar,
    ListExpr, Module, ModuleDecl, NilLit, Param, RecExpr, RecField, StrLit, TypeAnnotation,
    TypedExpr, UnaryExpr, UnitDecl, VarExpr,
};
use crate::errors::{Error, ParseError};
use crate::scanner::Scanner;
use crate::token::{FormatPart, Pos, Token, TokenType};

/// Scans and parses `input` as a single expression; the entire input must be
/// consumed.
pub fn parse_expression(input: &str) -> Result<Expr, Error> {
    let tokens = Scanner::new(input).scan_all()?;
    let mut p = Parser::new(tokens);
    let expr = p.expression()?;
    p.expect_end()?;
    Ok(expr)
}

/// Scans and parses `input` as a module named `name`. `base` is the file's
/// offset in the [`crate::token::FileSet`], so all positions are global.
pub fn parse_module(input: &str, name: &str, base: usize) -> Result<Module, Error> {
    let tokens = Scanner::with_base(input, base).scan_all()?;
    let module = Parser::new(tokens).module(name)?;
    Ok(module)
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let mut tokens = tokens;
        if tokens.is_empty() {
            tokens.push(Token {
                typ: TokenType::EndOfInput,
                pos: Pos(0),
                end: Pos(0),
                val: String::new(),
                fmt: None,
            });
        }
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, typ: TokenType) -> bool {
        self.peek().typ == typ
    }

    fn match_type(&mut self, typ: TokenType) -> Option<Token> {
        if self.check(typ) {
            return Some(self.advance());
        }
        None
    }

    fn match_any(&mut self, types: &[TokenType]) -> Option<Token> {
        if types.contains(&self.peek().typ) {
            return Some(self.advance());
        }
        None
    }

    fn expect(&mut self, typ: TokenType, what: &str) -> Result<Token, ParseError> {
        if self.check(typ) {
            return Ok(self.advance());
        }
        Err(self.unexpected(what))
    }

    fn unexpected(&self, what: &str) -> ParseError {
        let tok = self.peek();
        let got = if tok.typ == TokenType::EndOfInput {
            "end of input".to_string()
        } else {
            format!("'{}'", tok.val)
        };
        ParseError::new(tok.pos, format!("expected {what}, got {got}"))
    }

    pub fn at_end(&self) -> bool {
        self.check(TokenType::EndOfInput)
    }

    fn expect_end(&mut self) -> Result<(), ParseError> {
        if self.at_end() {
            return Ok(());
        }
        Err(self.unexpected("end of input"))
    }

    pub fn expression(&mut self) -> Result<Expr, ParseError> {
        self.conditional()
    }

    fn conditional(&mut self) -> Result<Expr, ParseError> {
        let Some(if_tok) = self.match_type(TokenType::If) else {
            return self.logical_or();
        };
        let cond = self.expression()?;
        self.expect(TokenType::Then, "'then'")?;
        let then = self.expression()?;
        self.expect(TokenType::Else, "'else'")?;
        let els = self.expression()?;
        Ok(Expr::Cond(CondExpr {
            cond: Box::new(cond),
            then: Box::new(then),
            els: Box::new(els),
            pos: if_tok.pos,
        }))
    }

    fn binary_level(
        &mut self,
        ops: &[TokenType],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut x = next(self)?;
        while let Some(op) = self.match_any(ops) {
            let y = next(self)?;
            x = Expr::Binary(BinaryExpr {
                left: Box::new(x),
                op: op.typ,
                op_pos: op.pos,
                right: Box::new(y),
            });
        }
        Ok(x)
    }

    fn logical_or(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[TokenType::LogicalOr], Self::logical_and)
    }

    fn logical_and(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[TokenType::LogicalAnd], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                TokenType::NotEqual,
                TokenType::Equal,
                TokenType::LessThan,
                TokenType::LessEq,
                TokenType::GreaterThan,
                TokenType::GreaterEq,
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                TokenType::Plus,
                TokenType::Minus,
                TokenType::BitwiseOr,
                TokenType::BitwiseXor,
                TokenType::Merge,
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                TokenType::Times,
                TokenType::Div,
                TokenType::Modulo,
                TokenType::ShiftLeft,
                TokenType::ShiftRight,
                TokenType::BitwiseAnd,
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(op) =
            self.match_any(&[TokenType::Minus, TokenType::Not, TokenType::Complement])
        {
            let expr = self.unary()?;
            return Ok(Expr::Unary(UnaryExpr {
                op: op.typ,
                op_pos: op.pos,
                expr: Box::new(expr),
            }));
        }
        self.annotated_primary()
    }

    /// A primary expression with at most one trailing `:: type` annotation;
    /// annotations do not chain.
    fn annotated_primary(&mut self) -> Result<Expr, ParseError> {
        let expr = self.primary()?;
        if self.match_type(TokenType::OfType).is_some() {
            let typ = self.type_annotation()?;
            return Ok(Expr::Typed(TypedExpr {
                expr: Box::new(expr),
                typ,
            }));
        }
        Ok(expr)
    }

    fn type_annotation(&mut self) -> Result<TypeAnnotation, ParseError> {
        let tok = self.expect(TokenType::Ident, "type name")?;
        Ok(TypeAnnotation {
            name: tok.val,
            pos: tok.pos,
            end: tok.end,
        })
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.operand()?;
        loop {
            if let Some(dot) = self.match_type(TokenType::Dot) {
                let name = self.expect(TokenType::Ident, "field name")?;
                expr = Expr::FieldAcc(FieldAcc {
                    expr: Box::new(expr),
                    name: name.val,
                    dot_pos: dot.pos,
                    end: name.end,
                });
            } else if self.match_type(TokenType::LeftParen).is_some() {
                let (args, rparen) = self.expr_list(TokenType::RightParen)?;
                expr = Expr::Call(CallExpr {
                    func: Box::new(expr),
                    args,
                    end: rparen.end,
                });
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to (and including) `term`.
    fn expr_list(&mut self, term: TokenType) -> Result<(Vec<Expr>, Token), ParseError> {
        let mut exprs = Vec::new();
        if let Some(t) = self.match_type(term) {
            return Ok((exprs, t));
        }
        loop {
            exprs.push(self.expression()?);
            if self.match_type(TokenType::Comma).is_some() {
                continue;
            }
            let t = self.expect(term, "',' or closing delimiter")?;
            return Ok((exprs, t));
        }
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        if self.check(TokenType::EndOfInput) {
            return Err(self.unexpected("an expression"));
        }
        let tok = self.advance();
        match tok.typ {
            TokenType::LeftParen => {
                let expr = self.expression()?;
                self.expect(TokenType::RightParen, "')'")?;
                Ok(expr)
            }
            TokenType::IntLiteral => match tok.val.parse::<i64>() {
                Ok(val) => Ok(Expr::Int(IntLit {
                    val,
                    pos: tok.pos,
                    end: tok.end,
                })),
                Err(_) => Err(ParseError::new(
                    tok.pos,
                    format!("invalid int literal '{}'", tok.val),
                )),
            },
            TokenType::DoubleLiteral => match tok.val.parse::<f64>() {
                Ok(val) => Ok(Expr::Double(DoubleLit {
                    val,
                    pos: tok.pos,
                    end: tok.end,
                })),
                Err(_) => Err(ParseError::new(
                    tok.pos,
                    format!("invalid double literal '{}'", tok.val),
                )),
            },
            TokenType::StrLiteral => Ok(Expr::Str(StrLit {
                val: tok.val,
                pos: tok.pos,
                end: tok.end,
            })),
            TokenType::FormatStrLiteral => self.desugar_format(tok),
            TokenType::BoolLiteral => Ok(Expr::Bool(BoolLit {
                val: tok.val == "true",
                pos: tok.pos,
                end: tok.end,
            })),
            TokenType::Nil => Ok(Expr::Nil(NilLit {
                pos: tok.pos,
                end: tok.end,
            })),
            TokenType::Ident => Ok(Expr::Var(VarExpr {
                name: tok.val,
                pos: tok.pos,
                end: tok.end,
            })),
            TokenType::LeftBrace => Ok(Expr::Rec(self.record_body(tok.pos)?)),
            TokenType::LeftSquare => {
                let (elements, rsquare) = self.expr_list(TokenType::RightSquare)?;
                Ok(Expr::List(ListExpr {
                    elements,
                    pos: tok.pos,
                    end: rsquare.end,
                }))
            }
            TokenType::Func => Ok(Expr::Func(Rc::new(self.func_tail(tok.pos)?))),
            TokenType::Template => Ok(Expr::Func(Rc::new(self.template_tail(tok.pos)?))),
            _ => Err(ParseError::new(
                tok.pos,
                format!("unexpected token '{}'", tok.val),
            )),
        }
    }

    /// `( params ) { expression }` after the `func` keyword.
    fn func_tail(&mut self, pos: Pos) -> Result<FuncExpr, ParseError> {
        self.expect(TokenType::LeftParen, "'('")?;
        let params = self.param_list()?;
        self.expect(TokenType::LeftBrace, "'{'")?;
        let body = self.expression()?;
        let rbrace = self.expect(TokenType::RightBrace, "'}'")?;
        Ok(FuncExpr {
            params,
            body,
            pos,
            end: rbrace.end,
        })
    }

    /// `( params ) record` after the `template` keyword (and optional name):
    /// sugar for a function returning a record.
    fn template_tail(&mut self, pos: Pos) -> Result<FuncExpr, ParseError> {
        self.expect(TokenType::LeftParen, "'('")?;
        let params = self.param_list()?;
        let lbrace = self.expect(TokenType::LeftBrace, "'{'")?;
        let rec = self.record_body(lbrace.pos)?;
        let end = rec.end;
        Ok(FuncExpr {
            params,
            body: Expr::Rec(rec),
            pos,
            end,
        })
    }

    /// Comma-separated parameters with optional `:: type` annotations,
    /// terminated by `)`.
    fn param_list(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        if self.match_type(TokenType::RightParen).is_some() {
            return Ok(params);
        }
        loop {
            let name = self.expect(TokenType::Ident, "parameter name")?;
            let typ = if self.match_type(TokenType::OfType).is_some() {
                Some(self.type_annotation()?)
            } else {
                None
            };
            params.push(Param {
                name: name.val,
                typ,
                pos: name.pos,
            });
            if self.match_type(TokenType::Comma).is_some() {
                continue;
            }
            self.expect(TokenType::RightParen, "',' or ')'")?;
            return Ok(params);
        }
    }

    /// The body of a record literal; the opening `{` at `pos` has been
    /// consumed. Comma separators between entries are optional.
    fn record_body(&mut self, pos: Pos) -> Result<RecExpr, ParseError> {
        let mut let_vars = Vec::new();
        let mut fields = Vec::new();
        let mut names: HashSet<String> = HashSet::new();
        loop {
            if let Some(rbrace) = self.match_type(TokenType::RightBrace) {
                return Ok(RecExpr {
                    let_vars,
                    fields,
                    pos,
                    end: rbrace.end,
                });
            }
            if self.match_type(TokenType::Let).is_some() {
                let lv = self.let_var()?;
                if !names.insert(lv.name.clone()) {
                    return Err(ParseError::new(
                        lv.pos,
                        format!("duplicate name '{}' in record", lv.name),
                    ));
                }
                let_vars.push(lv);
            } else {
                let name = self.expect(TokenType::Ident, "field name or 'let'")?;
                let typ = if self.match_type(TokenType::OfType).is_some() {
                    Some(self.type_annotation()?)
                } else {
                    None
                };
                self.expect(TokenType::Colon, "':'")?;
                let expr = self.expression()?;
                if !names.insert(name.val.clone()) {
                    return Err(ParseError::new(
                        name.pos,
                        format!("duplicate name '{}' in record", name.val),
                    ));
                }
                fields.push(RecField {
                    name: name.val,
                    typ,
                    expr: Rc::new(expr),
                    pos: name.pos,
                });
            }
            self.match_type(TokenType::Comma);
        }
    }

    /// A `let` binding after the `let` keyword: `let x: e`,
    /// `let f(params): e` (function sugar), or `let template t(params) rec`.
    fn let_var(&mut self) -> Result<LetVar, ParseError> {
        if let Some(tmpl) = self.match_type(TokenType::Template) {
            let name = self.expect(TokenType::Ident, "template name")?;
            let f = self.template_tail(tmpl.pos)?;
            return Ok(LetVar {
                name: name.val,
                expr: Rc::new(Expr::Func(Rc::new(f))),
                pos: name.pos,
            });
        }
        let name = self.expect(TokenType::Ident, "name")?;
        if self.check(TokenType::LeftParen) {
            self.advance();
            let params = self.param_list()?;
            self.expect(TokenType::Colon, "':'")?;
            let body = self.expression()?;
            let end = body.end();
            let f = FuncExpr {
                params,
                body,
                pos: name.pos,
                end,
            };
            return Ok(LetVar {
                name: name.val,
                expr: Rc::new(Expr::Func(Rc::new(f))),
                pos: name.pos,
            });
        }
        self.expect(TokenType::Colon, "':'")?;
        let expr = self.expression()?;
        Ok(LetVar {
            name: name.val,
            expr: Rc::new(expr),
            pos: name.pos,
        })
    }

    /// The module grammar: `pub` and `let` declarations (in any order),
    /// then an optional body expression, then end of input.
    pub fn module(&mut self, name: &str) -> Result<Module, ParseError> {
        let mut pub_decls = Vec::new();
        let mut let_vars = Vec::new();
        let mut unit_decls = Vec::new();
        let mut names: HashSet<String> = HashSet::new();
        loop {
            if self.match_type(TokenType::Pub).is_some() {
                if self.match_type(TokenType::Unit).is_some() {
                    let decl = self.unit_decl()?;
                    if !names.insert(decl.name.clone()) {
                        return Err(ParseError::new(
                            decl.pos,
                            format!("duplicate name '{}' in module", decl.name),
                        ));
                    }
                    unit_decls.push(decl);
                } else {
                    let decl = self.module_decl()?;
                    if !names.insert(decl.name.clone()) {
                        return Err(ParseError::new(
                            decl.pos,
                            format!("duplicate name '{}' in module", decl.name),
                        ));
                    }
                    pub_decls.push(decl);
                }
            } else if self.match_type(TokenType::Let).is_some() {
                let lv = self.let_var()?;
                if !names.insert(lv.name.clone()) {
                    return Err(ParseError::new(
                        lv.pos,
                        format!("duplicate name '{}' in module", lv.name),
                    ));
                }
                let_vars.push(ModuleDecl {
                    name: lv.name,
                    expr: lv.expr,
                    pos: lv.pos,
                });
            } else {
                break;
            }
        }
        let body = if self.at_end() {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_end()?;
        Ok(Module {
            name: name.to_string(),
            pub_decls,
            let_vars,
            unit_decls,
            body,
        })
    }

    /// `let ...` or `template ...` after the `pub` keyword.
    fn module_decl(&mut self) -> Result<ModuleDecl, ParseError> {
        if let Some(tmpl) = self.match_type(TokenType::Template) {
            let name = self.expect(TokenType::Ident, "template name")?;
            let f = self.template_tail(tmpl.pos)?;
            return Ok(ModuleDecl {
                name: name.val,
                expr: Rc::new(Expr::Func(Rc::new(f))),
                pos: name.pos,
            });
        }
        self.expect(TokenType::Let, "'let' or 'template'")?;
        let lv = self.let_var()?;
        Ok(ModuleDecl {
            name: lv.name,
            expr: lv.expr,
            pos: lv.pos,
        })
    }

    /// `IDENT record` after `pub unit`; the record must contain exactly one
    /// field `multiples` holding a record of unit-name → multiplier entries.
    fn unit_decl(&mut self) -> Result<UnitDecl, ParseError> {
        let name = self.expect(TokenType::Ident, "unit type name")?;
        let lbrace = self.expect(TokenType::LeftBrace, "'{'")?;
        let rec = self.record_body(lbrace.pos)?;
        if !rec.let_vars.is_empty() || rec.fields.len() != 1 || rec.fields[0].name != "multiples" {
            return Err(ParseError::new(
                rec.pos,
                "unit declaration must contain exactly one field 'multiples'".to_string(),
            ));
        }
        let multiples = match rec.fields[0].expr.as_ref() {
            Expr::Rec(m) => m.clone(),
            other => {
                return Err(ParseError::new(
                    other.pos(),
                    "'multiples' must be a record of unit-name to multiplier entries".to_string(),
                ))
            }
        };
        Ok(UnitDecl {
            name: name.val,
            multiples,
            pos: name.pos,
        })
    }

    /// Desugars a format string into the left-associative addition of its
    /// parts: literal parts become string literals, interpolations become
    /// calls to the builtin `str`.
    fn desugar_format(&mut self, tok: Token) -> Result<Expr, ParseError> {
        let Some(fmt) = tok.fmt else {
            return Err(ParseError::new(tok.pos, "malformed format string token"));
        };
        let mut acc: Option<Expr> = None;
        for part in fmt.parts {
            let piece = match part {
                FormatPart::Literal { val, pos, end } => Expr::Str(StrLit { val, pos, end }),
                FormatPart::Interpolation { tokens, pos, end } => {
                    let mut p = Parser::new(tokens);
                    let inner = p.expression()?;
                    p.expect_end()?;
                    Expr::Call(CallExpr {
                        func: Box::new(Expr::Var(VarExpr {
                            name: "str".to_string(),
                            pos,
                            end: pos,
                        })),
                        args: vec![inner],
                        end,
                    })
                }
            };
            acc = Some(match acc {
                None => piece,
                Some(x) => {
                    let op_pos = piece.pos();
                    Expr::Binary(BinaryExpr {
                        left: Box::new(x),
                        op: TokenType::Plus,
                        op_pos,
                        right: Box::new(piece),
                    })
                }
            });
        }
        Ok(acc.unwrap_or(Expr::Str(StrLit {
            val: String::new(),
            pos: tok.pos,
            end: tok.end,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        parse_expression(input).unwrap_or_else(|e| panic!("parse of {input:?} failed: {e}"))
    }

    fn parse_err(input: &str) -> Error {
        match parse_expression(input) {
            Ok(e) => panic!("expected parse error for {input:?}, got {e:?}"),
            Err(e) => e,
        }
    }

    fn module_of(input: &str) -> Module {
        parse_module(input, "test.konfi", 0)
            .unwrap_or_else(|e| panic!("parse of module {input:?} failed: {e}"))
    }

    #[test]
    fn parses_precedence() {
        // 3 * 10 + 1 parses as (3 * 10) + 1.
        match parse("3 * 10 + 1") {
            Expr::Binary(b) => {
                assert_eq!(b.op, TokenType::Plus);
                match *b.left {
                    Expr::Binary(inner) => assert_eq!(inner.op, TokenType::Times),
                    other => panic!("expected nested product, got {other:?}"),
                }
            }
            other => panic!("expected binary expr, got {other:?}"),
        }
        // 1 < 2 && 3 < 4 parses as (1 < 2) && (3 < 4).
        match parse("1 < 2 && 3 < 4") {
            Expr::Binary(b) => assert_eq!(b.op, TokenType::LogicalAnd),
            other => panic!("expected binary expr, got {other:?}"),
        }
        // a @ b + c parses as a @ (b + c)? No: same rank, left-assoc: (a @ b) + c.
        match parse("a @ b + c") {
            Expr::Binary(b) => {
                assert_eq!(b.op, TokenType::Plus);
                match *b.left {
                    Expr::Binary(inner) => assert_eq!(inner.op, TokenType::Merge),
                    other => panic!("expected nested merge, got {other:?}"),
                }
            }
            other => panic!("expected binary expr, got {other:?}"),
        }
    }

    #[test]
    fn left_associativity() {
        match parse("5 - 4 - 1") {
            Expr::Binary(b) => match *b.left {
                Expr::Binary(inner) => {
                    assert_eq!(inner.op, TokenType::Minus);
                    match *inner.right {
                        Expr::Int(i) => assert_eq!(i.val, 4),
                        other => panic!("expected int, got {other:?}"),
                    }
                }
                other => panic!("expected nested difference, got {other:?}"),
            },
            other => panic!("expected binary expr, got {other:?}"),
        }
    }

    #[test]
    fn parses_literals() {
        match parse("17") {
            Expr::Int(i) => assert_eq!(i.val, 17),
            other => panic!("expected int, got {other:?}"),
        }
        match parse("2.5e1") {
            Expr::Double(d) => assert_eq!(d.val, 25.0),
            other => panic!("expected double, got {other:?}"),
        }
        match parse("'hi'") {
            Expr::Str(s) => assert_eq!(s.val, "hi"),
            other => panic!("expected string, got {other:?}"),
        }
        assert!(matches!(parse("nil"), Expr::Nil(_)));
        match parse("false") {
            Expr::Bool(b) => assert!(!b.val),
            other => panic!("expected bool, got {other:?}"),
        }
    }

    #[test]
    fn int_literal_overflow_is_a_parse_error() {
        let err = parse_err("99999999999999999999");
        assert!(err.to_string().contains("invalid int literal"), "got: {err}");
    }

    #[test]
    fn parses_conditional_and_unary() {
        match parse("if a then 1 else -2") {
            Expr::Cond(c) => {
                assert!(matches!(*c.cond, Expr::Var(_)));
                assert!(matches!(*c.els, Expr::Unary(_)));
            }
            other => panic!("expected conditional, got {other:?}"),
        }
        assert!(matches!(parse("!x"), Expr::Unary(_)));
        assert!(matches!(parse("~7"), Expr::Unary(_)));
    }

    #[test]
    fn parses_postfix_chains() {
        match parse("a.b.c") {
            Expr::FieldAcc(f) => {
                assert_eq!(f.name, "c");
                assert!(matches!(*f.expr, Expr::FieldAcc(_)));
            }
            other => panic!("expected field access, got {other:?}"),
        }
        match parse("f(1)(2, 3)") {
            Expr::Call(c) => {
                assert_eq!(c.args.len(), 2);
                assert!(matches!(*c.func, Expr::Call(_)));
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parses_type_annotations() {
        match parse("7::minutes") {
            Expr::Typed(t) => {
                assert_eq!(t.typ.name, "minutes");
                assert!(matches!(*t.expr, Expr::Int(_)));
            }
            other => panic!("expected typed expr, got {other:?}"),
        }
        // Annotations bind tighter than unary minus.
        match parse("-7::minutes") {
            Expr::Unary(u) => assert!(matches!(*u.expr, Expr::Typed(_))),
            other => panic!("expected unary expr, got {other:?}"),
        }
        // Annotations do not chain.
        assert!(parse_expression("1::int::string").is_err());
    }

    #[test]
    fn parses_records() {
        match parse("{x: 1, y: 'a' z: [1, 2]}") {
            Expr::Rec(r) => {
                assert_eq!(r.fields.len(), 3);
                assert_eq!(r.fields[0].name, "x");
                assert_eq!(r.fields[2].name, "z");
            }
            other => panic!("expected record, got {other:?}"),
        }
        match parse("{let a: 1 let f(x): x + a b: f(2)}") {
            Expr::Rec(r) => {
                assert_eq!(r.let_vars.len(), 2);
                assert_eq!(r.fields.len(), 1);
                assert!(matches!(*r.let_vars[1].expr, Expr::Func(_)));
            }
            other => panic!("expected record, got {other:?}"),
        }
        match parse("{timeout::seconds: t}") {
            Expr::Rec(r) => {
                let anno = r.fields[0].typ.as_ref().expect("annotation");
                assert_eq!(anno.name, "seconds");
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_record_names_are_rejected() {
        let err = parse_err("{x: 1 x: 2}");
        assert!(err.to_string().contains("duplicate name"), "got: {err}");
        let err = parse_err("{let x: 1 x: 2}");
        assert!(err.to_string().contains("duplicate name"), "got: {err}");
    }

    #[test]
    fn parses_functions_and_templates() {
        match parse("func (n, k) { n + k }") {
            Expr::Func(f) => {
                assert_eq!(f.params.len(), 2);
                assert_eq!(f.params[0].name, "n");
            }
            other => panic!("expected function, got {other:?}"),
        }
        match parse("template (host) { url: host }") {
            Expr::Func(f) => {
                assert_eq!(f.params.len(), 1);
                assert!(matches!(f.body, Expr::Rec(_)));
            }
            other => panic!("expected function, got {other:?}"),
        }
        match parse("{let template srv(port) { p: port } s: srv(80)}") {
            Expr::Rec(r) => assert_eq!(r.let_vars[0].name, "srv"),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn desugars_format_strings() {
        // "a.b=${x}" becomes "a.b=" + str(x).
        match parse(r#""a.b=${x}""#) {
            Expr::Binary(b) => {
                assert_eq!(b.op, TokenType::Plus);
                assert!(matches!(*b.left, Expr::Str(_)));
                match *b.right {
                    Expr::Call(c) => match *c.func {
                        Expr::Var(v) => assert_eq!(v.name, "str"),
                        other => panic!("expected str builtin, got {other:?}"),
                    },
                    other => panic!("expected call, got {other:?}"),
                }
            }
            other => panic!("expected binary expr, got {other:?}"),
        }
        // A lone interpolation is just str(x).
        assert!(matches!(parse(r#""${x}""#), Expr::Call(_)));
        // An interpolation-only empty string stays a literal.
        match parse(r#""a${}b""#) {
            Expr::Binary(_) => {}
            other => panic!("expected binary expr, got {other:?}"),
        }
    }

    #[test]
    fn parses_module_declarations() {
        let m = module_of(
            "pub let f(x): x + 1\n\
             pub template t(p) { port: p }\n\
             let secret: 42\n\
             {x: f(secret)}",
        );
        assert_eq!(m.pub_decls.len(), 2);
        assert_eq!(m.pub_decls[0].name, "f");
        assert_eq!(m.pub_decls[1].name, "t");
        assert_eq!(m.let_vars.len(), 1);
        assert!(m.body.is_some());
        assert!(m.unit_decls.is_empty());
    }

    #[test]
    fn parses_unit_declarations() {
        let m = module_of(
            "pub unit mem {\n\
               multiples: { bytes: 1, kib: 1024, mib: 1048576 }\n\
             }\n\
             {cache::mib: 512::mib}",
        );
        assert_eq!(m.unit_decls.len(), 1);
        assert_eq!(m.unit_decls[0].name, "mem");
        assert_eq!(m.unit_decls[0].multiples.fields.len(), 3);
    }

    #[test]
    fn module_without_body() {
        let m = module_of("pub let x: 1");
        assert!(m.body.is_none());
    }

    #[test]
    fn module_duplicate_names_are_rejected() {
        let err = parse_module("pub let x: 1\nlet x: 2", "m", 0).unwrap_err();
        assert!(err.to_string().contains("duplicate name"), "got: {err}");
    }

    #[test]
    fn malformed_unit_declaration_is_rejected() {
        let err = parse_module("pub unit mem { bytes: 1 }", "m", 0).unwrap_err();
        assert!(err.to_string().contains("multiples"), "got: {err}");
        let err = parse_module("pub unit mem { multiples: 3 }", "m", 0).unwrap_err();
        assert!(err.to_string().contains("must be a record"), "got: {err}");
    }

    #[test]
    fn reports_first_error_with_position() {
        // Trailing garbage after a full expression.
        let err = parse_module("{\n\tm: 'a' 3\n}", "m", 0).unwrap_err();
        match err {
            Error::Parse(p) => assert_eq!(p.pos, Pos(10)),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_trailing_input() {
        assert!(parse_expression("1 2").is_err());
        assert!(parse_expression("(1").is_err());
    }
}
