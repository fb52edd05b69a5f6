//! Runtime values and the operator tables.
//!
//! Values are created during evaluation and shared by reference afterwards;
//! records, lists and callables are never mutated once constructed. Equality
//! follows value identity: scalars compare by value, aggregates and
//! callables by pointer, so two distinct record values never compare equal.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::FuncExpr;
use crate::errors::Error;
use crate::eval::Ctx;
use crate::token::TokenType;
use crate::types::Typ;

/// The type of a builtin function implementation.
pub type NativeFn = fn(&[Val], &Ctx) -> Result<Val, Error>;

/// A builtin function. A negative arity accepts any number of arguments.
pub struct NativeFuncVal {
    pub name: &'static str,
    pub arity: i32,
    pub func: NativeFn,
}

/// A function literal together with the environment captured at its
/// declaration site.
pub struct ClosureVal {
    pub func: Rc<FuncExpr>,
    pub ctx: Ctx,
}

/// A number carrying a unit: magnitude `v` expressed in the multiple `f` of
/// the unit type's base unit. `2::millis` is `v == 2.0, f == 1e6` for the
/// built-in `duration` type whose base unit is nanoseconds.
#[derive(Debug, Clone)]
pub struct UnitVal {
    pub v: f64,
    pub f: f64,
    pub typ: Rc<Typ>,
}

impl UnitVal {
    pub fn type_id(&self) -> &str {
        &self.typ.id
    }

    /// The same quantity expressed in multiple `f`.
    pub fn with_mult(&self, f: f64) -> UnitVal {
        if self.f == f {
            return self.clone();
        }
        UnitVal {
            v: self.v * (self.f / f),
            f,
            typ: Rc::clone(&self.typ),
        }
    }
}

/// A value that passed a user-defined type's `convert`.
#[derive(Debug)]
pub struct TypedVal {
    pub value: Val,
    pub typ: Rc<Typ>,
}

/// The annotation attached to a record field, e.g. the `minutes` in
/// `{timeout::minutes: t}`. `mult` is non-zero only when the annotation
/// names a specific multiple of a unit type.
#[derive(Debug, Clone)]
pub struct FieldAnnotation {
    pub typ: Rc<Typ>,
    pub mult: f64,
}

/// A record: an unordered map from field name to value, plus the optional
/// per-field annotations. Frozen into an `Rc` once evaluated.
#[derive(Debug, Default)]
pub struct RecVal {
    pub fields: HashMap<String, Val>,
    pub annotations: HashMap<String, FieldAnnotation>,
}

impl RecVal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_field(&mut self, name: &str, val: Val, anno: Option<FieldAnnotation>) {
        self.fields.insert(name.to_string(), val);
        if let Some(anno) = anno {
            self.annotations.insert(name.to_string(), anno);
        }
    }

    pub fn annotation(&self, name: &str) -> Option<&FieldAnnotation> {
        self.annotations.get(name)
    }
}

#[derive(Clone)]
pub enum Val {
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Rec(Rc<RecVal>),
    List(Rc<Vec<Val>>),
    Native(Rc<NativeFuncVal>),
    Closure(Rc<ClosureVal>),
    Unit(UnitVal),
    Typed(Rc<TypedVal>),
}

impl std::fmt::Debug for Val {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Val::Nil => write!(f, "Nil"),
            Val::Bool(b) => write!(f, "Bool({b})"),
            Val::Int(i) => write!(f, "Int({i})"),
            Val::Double(d) => write!(f, "Double({d})"),
            Val::Str(s) => write!(f, "Str({s:?})"),
            Val::Rec(r) => write!(f, "Rec({:?})", r.fields),
            Val::List(l) => write!(f, "List({l:?})"),
            Val::Native(n) => write!(f, "Native({})", n.name),
            Val::Closure(_) => write!(f, "Closure"),
            Val::Unit(u) => write!(f, "Unit({}*{}::{})", u.v, u.f, u.typ.id),
            Val::Typed(t) => write!(f, "Typed({}, {:?})", t.typ.id, t.value),
        }
    }
}

impl PartialEq for Val {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Val::Nil, Val::Nil) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Double(a), Val::Double(b)) => a == b,
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Unit(a), Val::Unit(b)) => {
                a.v == b.v && a.f == b.f && Rc::ptr_eq(&a.typ, &b.typ)
            }
            (Val::Typed(a), Val::Typed(b)) => {
                Rc::ptr_eq(a, b) || (Rc::ptr_eq(&a.typ, &b.typ) && a.value == b.value)
            }
            (Val::Rec(a), Val::Rec(b)) => Rc::ptr_eq(a, b),
            (Val::List(a), Val::List(b)) => Rc::ptr_eq(a, b),
            (Val::Native(a), Val::Native(b)) => Rc::ptr_eq(a, b),
            (Val::Closure(a), Val::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Val {
    pub fn is_true(&self) -> bool {
        match self {
            Val::Nil => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Double(d) => *d != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::Rec(r) => !r.fields.is_empty(),
            Val::List(l) => !l.is_empty(),
            Val::Native(_) | Val::Closure(_) => true,
            Val::Unit(u) => u.v != 0.0,
            // User-defined types cannot overwrite truthiness.
            Val::Typed(t) => t.value.is_true(),
        }
    }

    /// The type identifier used by `typeof` and in error messages.
    pub fn type_id(&self) -> String {
        match self {
            Val::Nil => "nil".to_string(),
            Val::Bool(_) => "bool".to_string(),
            Val::Int(_) => "int".to_string(),
            Val::Double(_) => "double".to_string(),
            Val::Str(_) => "string".to_string(),
            Val::Rec(_) => "rec".to_string(),
            Val::List(_) => "list".to_string(),
            Val::Native(_) => "builtin".to_string(),
            Val::Closure(_) => "func".to_string(),
            Val::Unit(u) => u.typ.id.clone(),
            Val::Typed(t) => t.typ.id.clone(),
        }
    }

    /// The string projection used by `str` and format strings.
    pub fn render(&self) -> String {
        match self {
            Val::Nil => "nil".to_string(),
            Val::Bool(b) => b.to_string(),
            Val::Int(i) => i.to_string(),
            Val::Double(d) => d.to_string(),
            Val::Str(s) => s.clone(),
            Val::Rec(_) => "<rec>".to_string(),
            Val::List(_) => "<list>".to_string(),
            Val::Native(n) => format!("<builtin {}>", n.name),
            Val::Closure(c) => format!("<func @{}:{}>", c.func.pos, c.func.end),
            Val::Unit(u) => match u.typ.unit_name(u.f) {
                Some(name) => format!("{}::{}", u.v, name),
                // A unit value whose multiple has no name is an interpreter
                // bug; render it against the type id rather than panicking.
                None => format!("{}::{}", u.v, u.typ.id),
            },
            Val::Typed(t) => format!("{}({})", t.typ.id, t.value.render()),
        }
    }
}

// Binary operations. These return bare messages; the evaluator attaches the
// operator position.

fn plus(x: &Val, y: &Val) -> Result<Val, String> {
    match (x, y) {
        (Val::Int(u), Val::Int(v)) => Ok(Val::Int(u.wrapping_add(*v))),
        (Val::Double(u), Val::Double(v)) => Ok(Val::Double(u + v)),
        (Val::Str(u), Val::Str(v)) => Ok(Val::Str(format!("{u}{v}"))),
        (Val::Unit(u), Val::Unit(v)) => unit_add(u, v, 1.0, "+"),
        _ => Err(format!(
            "incompatible types for +: {} and {}",
            x.type_id(),
            y.type_id()
        )),
    }
}

fn minus(x: &Val, y: &Val) -> Result<Val, String> {
    match (x, y) {
        (Val::Int(u), Val::Int(v)) => Ok(Val::Int(u.wrapping_sub(*v))),
        (Val::Double(u), Val::Double(v)) => Ok(Val::Double(u - v)),
        (Val::Unit(u), Val::Unit(v)) => unit_add(u, v, -1.0, "-"),
        _ => Err(format!(
            "incompatible types for -: {} and {}",
            x.type_id(),
            y.type_id()
        )),
    }
}

/// Adds `sign * v` to `u` after rescaling both to the smaller multiple.
fn unit_add(u: &UnitVal, v: &UnitVal, sign: f64, op: &str) -> Result<Val, String> {
    if !Rc::ptr_eq(&u.typ, &v.typ) {
        return Err(format!(
            "incompatible unit types for {op}: {} and {}",
            u.type_id(),
            v.type_id()
        ));
    }
    let r = if u.f == v.f {
        UnitVal {
            v: u.v + sign * v.v,
            f: u.f,
            typ: Rc::clone(&u.typ),
        }
    } else if u.f < v.f {
        // 1 mm(1e-3) + 1 cm(1e-2) ==> 11 mm(1e-3)
        UnitVal {
            v: u.v + sign * v.v * (v.f / u.f),
            f: u.f,
            typ: Rc::clone(&u.typ),
        }
    } else {
        UnitVal {
            v: u.v * (u.f / v.f) + sign * v.v,
            f: v.f,
            typ: Rc::clone(&v.typ),
        }
    };
    Ok(Val::Unit(r))
}

fn times(x: &Val, y: &Val) -> Result<Val, String> {
    match (x, y) {
        (Val::Int(u), Val::Int(v)) => Ok(Val::Int(u.wrapping_mul(*v))),
        (Val::Double(u), Val::Double(v)) => Ok(Val::Double(u * v)),
        (Val::Int(u), Val::Unit(v)) => Ok(Val::Unit(UnitVal {
            v: *u as f64 * v.v,
            f: v.f,
            typ: Rc::clone(&v.typ),
        })),
        (Val::Double(u), Val::Unit(v)) => Ok(Val::Unit(UnitVal {
            v: u * v.v,
            f: v.f,
            typ: Rc::clone(&v.typ),
        })),
        (Val::Unit(u), Val::Int(v)) => Ok(Val::Unit(UnitVal {
            v: u.v * *v as f64,
            f: u.f,
            typ: Rc::clone(&u.typ),
        })),
        (Val::Unit(u), Val::Double(v)) => Ok(Val::Unit(UnitVal {
            v: u.v * v,
            f: u.f,
            typ: Rc::clone(&u.typ),
        })),
        _ => Err(format!(
            "incompatible types for *: {} and {}",
            x.type_id(),
            y.type_id()
        )),
    }
}

fn div(x: &Val, y: &Val) -> Result<Val, String> {
    match (x, y) {
        (Val::Int(u), Val::Int(v)) => {
            if *v == 0 {
                return Err("integer division by zero".to_string());
            }
            Ok(Val::Int(u.wrapping_div(*v)))
        }
        (Val::Double(u), Val::Double(v)) => Ok(Val::Double(u / v)),
        (Val::Unit(u), Val::Int(v)) => Ok(Val::Unit(UnitVal {
            v: u.v / *v as f64,
            f: u.f,
            typ: Rc::clone(&u.typ),
        })),
        (Val::Unit(u), Val::Double(v)) => Ok(Val::Unit(UnitVal {
            v: u.v / v,
            f: u.f,
            typ: Rc::clone(&u.typ),
        })),
        _ => Err(format!(
            "incompatible types for /: {} and {}",
            x.type_id(),
            y.type_id()
        )),
    }
}

fn modulo(x: &Val, y: &Val) -> Result<Val, String> {
    match (x, y) {
        (Val::Int(u), Val::Int(v)) => {
            if *v == 0 {
                return Err("integer division by zero".to_string());
            }
            Ok(Val::Int(u.wrapping_rem(*v)))
        }
        _ => Err(format!(
            "incompatible types for %: {} and {}",
            x.type_id(),
            y.type_id()
        )),
    }
}

fn int_op(x: &Val, y: &Val, op: &str, f: impl Fn(i64, i64) -> Result<i64, String>) -> Result<Val, String> {
    match (x, y) {
        (Val::Int(u), Val::Int(v)) => f(*u, *v).map(Val::Int),
        _ => Err(format!(
            "incompatible types for {op}: {} and {}",
            x.type_id(),
            y.type_id()
        )),
    }
}

fn shift_left(u: i64, v: i64) -> Result<i64, String> {
    if v < 0 {
        return Err(format!("negative shift count: {v}"));
    }
    if v >= 64 {
        return Ok(0);
    }
    Ok(((u as u64) << v) as i64)
}

fn shift_right(u: i64, v: i64) -> Result<i64, String> {
    if v < 0 {
        return Err(format!("negative shift count: {v}"));
    }
    if v >= 64 {
        return Ok(if u < 0 { -1 } else { 0 });
    }
    Ok(u >> v)
}

fn compare(x: &Val, y: &Val, op: &str) -> Result<std::cmp::Ordering, String> {
    let ord = match (x, y) {
        (Val::Int(u), Val::Int(v)) => u.cmp(v),
        (Val::Double(u), Val::Double(v)) => u
            .partial_cmp(v)
            .ok_or_else(|| format!("incomparable double values for {op}"))?,
        (Val::Unit(u), Val::Unit(v)) if Rc::ptr_eq(&u.typ, &v.typ) => unit_compare(u, v)
            .ok_or_else(|| format!("incomparable unit values for {op}"))?,
        _ => {
            return Err(format!(
                "incompatible types for {op}: {} and {}",
                x.type_id(),
                y.type_id()
            ))
        }
    };
    Ok(ord)
}

/// Compares two unit values of the same type, rescaling both to the finer
/// (smaller) multiple first.
fn unit_compare(u: &UnitVal, v: &UnitVal) -> Option<std::cmp::Ordering> {
    let (mut x, mut y) = (u.v, v.v);
    if u.f < v.f {
        y = v.v * (v.f / u.f);
    } else if u.f > v.f {
        x = u.v * (u.f / v.f);
    }
    x.partial_cmp(&y)
}

pub fn binary_op(x: &Val, y: &Val, op: TokenType) -> Result<Val, String> {
    use std::cmp::Ordering;
    match op {
        TokenType::Plus => plus(x, y),
        TokenType::Minus => minus(x, y),
        TokenType::Times => times(x, y),
        TokenType::Div => div(x, y),
        TokenType::Modulo => modulo(x, y),
        TokenType::BitwiseAnd => int_op(x, y, "&", |u, v| Ok(u & v)),
        TokenType::BitwiseOr => int_op(x, y, "|", |u, v| Ok(u | v)),
        TokenType::BitwiseXor => int_op(x, y, "^", |u, v| Ok(u ^ v)),
        TokenType::ShiftLeft => int_op(x, y, "<<", shift_left),
        TokenType::ShiftRight => int_op(x, y, ">>", shift_right),
        TokenType::LogicalAnd => Ok(Val::Bool(x.is_true() && y.is_true())),
        TokenType::LogicalOr => Ok(Val::Bool(x.is_true() || y.is_true())),
        TokenType::Equal => Ok(Val::Bool(x == y)),
        TokenType::NotEqual => Ok(Val::Bool(x != y)),
        TokenType::LessThan => compare(x, y, "<").map(|o| Val::Bool(o == Ordering::Less)),
        TokenType::LessEq => compare(x, y, "<=").map(|o| Val::Bool(o != Ordering::Greater)),
        TokenType::GreaterThan => compare(x, y, ">").map(|o| Val::Bool(o == Ordering::Greater)),
        TokenType::GreaterEq => compare(x, y, ">=").map(|o| Val::Bool(o != Ordering::Less)),
        _ => Err(format!("invalid binary operator '{op:?}'")),
    }
}

pub fn unary_op(x: &Val, op: TokenType) -> Result<Val, String> {
    match op {
        TokenType::Minus => match x {
            Val::Int(u) => Ok(Val::Int(u.wrapping_neg())),
            Val::Double(u) => Ok(Val::Double(-u)),
            Val::Unit(u) => Ok(Val::Unit(UnitVal {
                v: -u.v,
                f: u.f,
                typ: Rc::clone(&u.typ),
            })),
            _ => Err(format!("incompatible type for unary -: {}", x.type_id())),
        },
        TokenType::Not => Ok(Val::Bool(!x.is_true())),
        TokenType::Complement => match x {
            Val::Int(u) => Ok(Val::Int(!u)),
            _ => Err(format!("incompatible type for unary ~: {}", x.type_id())),
        },
        _ => Err(format!("invalid unary operator '{op:?}'")),
    }
}
