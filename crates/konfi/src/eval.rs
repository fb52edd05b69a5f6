//! The lazy, cycle-detecting tree-walking evaluator.
//!
//! Evaluation contexts are a chain of frames. Each frame maps names to lazy
//! cells holding either an unevaluated expression or a fully-evaluated
//! value, plus the set of names currently being forced; forcing a name that
//! is already active is a dependency cycle. A cell transitions at most once
//! from expression to value.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::rc::Rc;

use crate::ast::{Expr, Module, RecExpr};
use crate::builtins;
use crate::errors::{Error, EvalError};
use crate::modules::{OsSources, Sources};
use crate::token::{FileSet, TokenType};
use crate::types::{self, convert_type, type_check, Typ};
use crate::values::{binary_op, unary_op, FieldAnnotation, RecVal, Val};

#[derive(Clone)]
pub(crate) enum LazyVal {
    Expr(Rc<Expr>),
    Val(Val),
}

/// One frame of the local environment chain.
struct Frame {
    env: RefCell<HashMap<String, LazyVal>>,
    active: RefCell<HashSet<String>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    fn new(parent: Option<Rc<Frame>>) -> Rc<Frame> {
        Rc::new(Frame {
            env: RefCell::new(HashMap::new()),
            active: RefCell::new(HashSet::new()),
            parent,
        })
    }
}

/// State shared by every context of one evaluation: the file set, the type
/// registry, the module cache and the load stack.
pub struct GlobalState {
    fileset: RefCell<FileSet>,
    types: RefCell<HashMap<String, Rc<Typ>>>,
    modules: RefCell<HashMap<String, Rc<LoadedModule>>>,
    file_stack: RefCell<Vec<PathBuf>>,
    sources: Rc<dyn Sources>,
}

/// An evaluation context: the local frame chain plus the shared global
/// state. Cloning is cheap and shares both.
#[derive(Clone)]
pub struct Ctx {
    vars: Rc<Frame>,
    global: Rc<GlobalState>,
}

impl Ctx {
    /// A context with no bindings and no registered types.
    pub fn empty() -> Ctx {
        Ctx::empty_with_sources(Rc::new(OsSources))
    }

    pub fn empty_with_sources(sources: Rc<dyn Sources>) -> Ctx {
        Ctx {
            vars: Frame::new(None),
            global: Rc::new(GlobalState {
                fileset: RefCell::new(FileSet::new()),
                types: RefCell::new(HashMap::new()),
                modules: RefCell::new(HashMap::new()),
                file_stack: RefCell::new(Vec::new()),
                sources,
            }),
        }
    }

    /// The top-level context: all builtin functions and types registered.
    pub fn global() -> Ctx {
        Ctx::global_with_sources(Rc::new(OsSources))
    }

    pub fn global_with_sources(sources: Rc<dyn Sources>) -> Ctx {
        let ctx = Ctx::empty_with_sources(sources);
        for b in builtins::builtin_functions() {
            ctx.store(b.name, Val::Native(b));
        }
        for t in types::builtin_types() {
            ctx.define_type(t);
        }
        ctx
    }

    /// A child context sharing the global state; new bindings go into the
    /// fresh frame.
    pub fn child(&self) -> Ctx {
        Ctx {
            vars: Frame::new(Some(Rc::clone(&self.vars))),
            global: Rc::clone(&self.global),
        }
    }

    /// The root context of this chain: only the builtins frame survives.
    /// Modules are evaluated here so they cannot see caller locals.
    pub fn drop_locals(&self) -> Ctx {
        let mut frame = Rc::clone(&self.vars);
        while let Some(parent) = frame.parent.clone() {
            frame = parent;
        }
        Ctx {
            vars: frame,
            global: Rc::clone(&self.global),
        }
    }

    /// Finds `name` in the frame chain, returning its cell and a context
    /// rooted at the defining frame.
    fn lookup(&self, name: &str) -> Option<(LazyVal, Ctx)> {
        let mut frame = Rc::clone(&self.vars);
        loop {
            if let Some(lv) = frame.env.borrow().get(name) {
                let lv = lv.clone();
                return Some((
                    lv,
                    Ctx {
                        vars: Rc::clone(&frame),
                        global: Rc::clone(&self.global),
                    },
                ));
            }
            let parent = frame.parent.clone()?;
            frame = parent;
        }
    }

    fn is_active(&self, name: &str) -> bool {
        self.vars.active.borrow().contains(name)
    }

    fn set_active(&self, name: &str) {
        self.vars.active.borrow_mut().insert(name.to_string());
    }

    fn clear_active(&self, name: &str) {
        self.vars.active.borrow_mut().remove(name);
    }

    /// The value of `name` if this frame (ignoring parents) has already
    /// evaluated it.
    fn fully_evaluated(&self, name: &str) -> Option<Val> {
        match self.vars.env.borrow().get(name) {
            Some(LazyVal::Val(v)) => Some(v.clone()),
            _ => None,
        }
    }

    /// Stores a fully-evaluated value for `name`, removing it from the
    /// active set.
    pub fn store(&self, name: &str, val: Val) {
        self.vars
            .env
            .borrow_mut()
            .insert(name.to_string(), LazyVal::Val(val));
        self.clear_active(name);
    }

    fn store_expr(&self, name: &str, expr: Rc<Expr>) {
        self.vars
            .env
            .borrow_mut()
            .insert(name.to_string(), LazyVal::Expr(expr));
    }

    pub fn lookup_type(&self, id: &str) -> Option<Rc<Typ>> {
        self.global.types.borrow().get(id).cloned()
    }

    /// Registers `typ` under its id and under each of its unit names.
    pub fn define_type(&self, typ: Rc<Typ>) {
        let mut types = self.global.types.borrow_mut();
        for name in typ.unit_mults.keys() {
            types.insert(name.clone(), Rc::clone(&typ));
        }
        types.insert(typ.id.clone(), typ);
    }

    pub fn lookup_module(&self, name: &str) -> Option<Rc<LoadedModule>> {
        self.global.modules.borrow().get(name).cloned()
    }

    pub fn store_module(&self, name: &str, module: Rc<LoadedModule>) {
        self.global
            .modules
            .borrow_mut()
            .insert(name.to_string(), module);
    }

    /// Registers a file's content with the file set and returns the base
    /// offset for its positions.
    pub fn add_file(&self, name: &str, content: &str) -> usize {
        self.global.fileset.borrow_mut().add_file(name, content)
    }

    /// True when `path` is on the load stack, i.e. currently being loaded.
    pub fn is_active_file(&self, path: &PathBuf) -> bool {
        self.global.file_stack.borrow().contains(path)
    }

    pub fn push_file(&self, path: PathBuf) {
        self.global.file_stack.borrow_mut().push(path);
    }

    pub fn pop_file(&self) {
        self.global.file_stack.borrow_mut().pop();
    }

    /// The directory of the file currently being evaluated, or `.` outside
    /// of any load.
    pub fn cwd(&self) -> PathBuf {
        let stack = self.global.file_stack.borrow();
        match stack.last().and_then(|p| p.parent()) {
            Some(dir) if dir.as_os_str().is_empty() => PathBuf::from("."),
            Some(dir) => dir.to_path_buf(),
            None => PathBuf::from("."),
        }
    }

    pub fn sources(&self) -> Rc<dyn Sources> {
        Rc::clone(&self.global.sources)
    }

    /// Renders the full cause chain of `err` with `file:line:col` prefixes
    /// resolved against this context's file set.
    pub fn format_error(&self, err: &Error) -> String {
        crate::errors::format_error(err, &self.global.fileset.borrow())
    }
}

/// A successfully evaluated module: its public declarations and its
/// (possibly nil) body value.
#[derive(Debug)]
pub struct LoadedModule {
    pub name: String,
    pub pub_vars: HashMap<String, Val>,
    pub body: Val,
}

impl LoadedModule {
    /// Projects the module to a record: the public declarations plus a
    /// `body` field. A public declaration named `body` wins, making the
    /// module body unreachable.
    pub fn as_rec(&self) -> Val {
        let mut r = RecVal::new();
        for (name, val) in &self.pub_vars {
            r.set_field(name, val.clone(), None);
        }
        if !r.fields.contains_key("body") {
            r.set_field("body", self.body.clone(), None);
        }
        Val::Rec(Rc::new(r))
    }
}

/// Evaluates `expr` in `ctx`.
pub fn eval(expr: &Expr, ctx: &Ctx) -> Result<Val, Error> {
    match expr {
        Expr::Int(e) => Ok(Val::Int(e.val)),
        Expr::Double(e) => Ok(Val::Double(e.val)),
        Expr::Bool(e) => Ok(Val::Bool(e.val)),
        Expr::Str(e) => Ok(Val::Str(e.val.clone())),
        Expr::Nil(_) => Ok(Val::Nil),
        Expr::Unary(e) => {
            let x = eval(&e.expr, ctx)?;
            unary_op(&x, e.op).map_err(|msg| EvalError::new(e.op_pos, msg).into())
        }
        Expr::Binary(e) => {
            let x = eval(&e.left, ctx)?;
            let y = eval(&e.right, ctx)?;
            let r = if e.op == TokenType::Merge {
                merge_values(&x, &y)
            } else {
                binary_op(&x, &y, e.op)
            };
            r.map_err(|msg| EvalError::new(e.op_pos, msg).into())
        }
        Expr::Var(e) => {
            let Some((lv, vctx)) = ctx.lookup(&e.name) else {
                return Err(EvalError::new(e.pos, format!("unbound variable {}", e.name)).into());
            };
            match lv {
                LazyVal::Val(v) => Ok(v),
                LazyVal::Expr(expr) => {
                    if vctx.is_active(&e.name) {
                        return Err(EvalError::new(
                            e.pos,
                            "cyclic variable dependencies detected",
                        )
                        .into());
                    }
                    vctx.set_active(&e.name);
                    match eval(&expr, &vctx) {
                        Ok(v) => {
                            vctx.store(&e.name, v.clone());
                            Ok(v)
                        }
                        Err(err) => {
                            vctx.clear_active(&e.name);
                            Err(err)
                        }
                    }
                }
            }
        }
        Expr::Rec(e) => eval_rec(e, ctx),
        Expr::List(e) => {
            let mut elements = Vec::with_capacity(e.elements.len());
            for elem in &e.elements {
                elements.push(eval(elem, ctx)?);
            }
            Ok(Val::List(Rc::new(elements)))
        }
        Expr::FieldAcc(e) => {
            let v = eval(&e.expr, ctx)?;
            match &v {
                Val::Rec(r) => match r.fields.get(&e.name) {
                    Some(v) => Ok(v.clone()),
                    None => Err(EvalError::new(
                        e.dot_pos,
                        format!("record has no field '{}'", e.name),
                    )
                    .into()),
                },
                Val::Typed(t) => {
                    if let Val::Rec(r) = &t.value {
                        if let Some(v) = r.fields.get(&e.name) {
                            return Ok(v.clone());
                        }
                    }
                    Err(EvalError::new(
                        e.end,
                        format!("{} has no field '{}'", t.typ.id, e.name),
                    )
                    .into())
                }
                _ => Err(EvalError::new(
                    e.end,
                    format!("cannot access .{} on type {}", e.name, v.type_id()),
                )
                .into()),
            }
        }
        Expr::Call(e) => {
            let callee = eval(&e.func, ctx)?;
            if !matches!(callee, Val::Closure(_) | Val::Native(_)) {
                return Err(EvalError::new(
                    e.func.pos(),
                    format!("type {} is not callable", callee.type_id()),
                )
                .into());
            }
            // cond is a special form in call position: only the chosen
            // branch is evaluated.
            if let Val::Native(n) = &callee {
                if n.name == "cond" && e.args.len() == 3 {
                    let b = eval(&e.args[0], ctx)?;
                    let chosen = if b.is_true() { &e.args[1] } else { &e.args[2] };
                    return eval(chosen, ctx);
                }
            }
            let mut args = Vec::with_capacity(e.args.len());
            for arg in &e.args {
                args.push(eval(arg, ctx)?);
            }
            call_value(&callee, args, ctx)
                .map_err(|err| EvalError::with_cause(e.func.pos(), "call failed", err).into())
        }
        Expr::Func(f) => Ok(Val::Closure(Rc::new(crate::values::ClosureVal {
            func: Rc::clone(f),
            ctx: ctx.clone(),
        }))),
        Expr::Cond(e) => {
            let cond = eval(&e.cond, ctx)?;
            // Only the chosen branch is evaluated.
            if cond.is_true() {
                eval(&e.then, ctx)
            } else {
                eval(&e.els, ctx)
            }
        }
        Expr::Typed(e) => {
            let val = eval(&e.expr, ctx)?;
            convert_type(&val, &e.typ.name, ctx, expr.pos())
        }
    }
}

/// Calls a closure or native function with already-evaluated arguments.
pub fn call_value(f: &Val, args: Vec<Val>, ctx: &Ctx) -> Result<Val, Error> {
    match f {
        Val::Closure(c) => {
            let arity = c.func.params.len();
            if args.len() != arity {
                return Err(Error::msg(format!(
                    "wrong number of arguments for {}: got {} want {}",
                    f.render(),
                    args.len(),
                    arity
                )));
            }
            let fctx = c.ctx.child();
            for (param, arg) in c.func.params.iter().zip(args) {
                fctx.store(&param.name, arg);
            }
            eval(&c.func.body, &fctx)
        }
        Val::Native(n) => {
            // Negative arity accepts any number of arguments.
            if n.arity >= 0 && args.len() != n.arity as usize {
                return Err(Error::msg(format!(
                    "wrong number of arguments for {}: got {} want {}",
                    n.name,
                    args.len(),
                    n.arity
                )));
            }
            (n.func)(&args, ctx)
        }
        _ => Err(Error::msg(format!("type {} is not callable", f.type_id()))),
    }
}

/// Evaluates a record expression: seed every let binding and field as a lazy
/// cell in a fresh frame, force the lets, then the fields in declaration
/// order (a field may already be evaluated through a cross-reference), and
/// apply annotations on install.
pub(crate) fn eval_rec(e: &RecExpr, ctx: &Ctx) -> Result<Val, Error> {
    let rctx = ctx.child();
    for lv in &e.let_vars {
        rctx.store_expr(&lv.name, Rc::clone(&lv.expr));
    }
    for f in &e.fields {
        rctx.store_expr(&f.name, Rc::clone(&f.expr));
    }
    for lv in &e.let_vars {
        if rctx.fully_evaluated(&lv.name).is_some() {
            continue;
        }
        rctx.set_active(&lv.name);
        match eval(&lv.expr, &rctx) {
            Ok(v) => rctx.store(&lv.name, v),
            Err(err) => {
                rctx.clear_active(&lv.name);
                return Err(err);
            }
        }
    }
    let mut rec = RecVal::new();
    for f in &e.fields {
        let anno = match &f.typ {
            Some(ta) => {
                let Some(typ) = rctx.lookup_type(&ta.name) else {
                    return Err(EvalError::new(
                        ta.pos,
                        format!("unknown type {} for field {}", ta.name, f.name),
                    )
                    .into());
                };
                // The annotation may name the unit type itself, which allows
                // any multiple; only a unit name pins one.
                let mult = if typ.is_unit() {
                    typ.unit_factor(&ta.name).unwrap_or(0.0)
                } else {
                    0.0
                };
                Some(FieldAnnotation { typ, mult })
            }
            None => None,
        };
        let mut val = match rctx.fully_evaluated(&f.name) {
            // Evaluation of another expression already forced this field.
            Some(v) => v,
            None => {
                rctx.set_active(&f.name);
                match eval(&f.expr, &rctx) {
                    Ok(v) => {
                        rctx.store(&f.name, v.clone());
                        v
                    }
                    Err(err) => {
                        rctx.clear_active(&f.name);
                        return Err(err);
                    }
                }
            }
        };
        if let Some(anno) = &anno {
            if let Err(msg) = type_check(&val, &anno.typ) {
                let pos = f.typ.as_ref().map(|t| t.pos).unwrap_or(f.pos);
                return Err(EvalError::new(
                    pos,
                    format!("type error for field {}: {msg}", f.name),
                )
                .into());
            }
            if let Val::Unit(u) = &val {
                if anno.mult > 0.0 {
                    val = Val::Unit(u.with_mult(anno.mult));
                }
            }
        }
        rec.set_field(&f.name, val, anno);
    }
    Ok(Val::Rec(Rc::new(rec)))
}

/// Evaluates module `m` in a child of `ctx`. Unit declarations are evaluated
/// eagerly first and register their types globally, making them available to
/// the rest of the module; then private lets, then public declarations, then
/// the optional body.
pub fn eval_module(m: &Module, ctx: &Ctx) -> Result<Rc<LoadedModule>, Error> {
    let mctx = ctx.child();
    for d in &m.let_vars {
        mctx.store_expr(&d.name, Rc::clone(&d.expr));
    }
    for d in &m.pub_decls {
        mctx.store_expr(&d.name, Rc::clone(&d.expr));
    }
    for d in &m.unit_decls {
        let val = eval_rec(&d.multiples, &mctx)?;
        let Val::Rec(rv) = &val else {
            return Err(Error::msg("unit multiples must evaluate to a record"));
        };
        let mut mults = BTreeMap::new();
        for f in &d.multiples.fields {
            match rv.fields.get(&f.name) {
                // Multipliers may be ints or doubles, for convenience.
                Some(Val::Int(i)) => {
                    mults.insert(f.name.clone(), *i as f64);
                }
                Some(Val::Double(x)) => {
                    mults.insert(f.name.clone(), *x);
                }
                Some(other) => {
                    return Err(EvalError::new(
                        f.expr.pos(),
                        format!(
                            "invalid type for multiplier {}: {}",
                            f.name,
                            other.type_id()
                        ),
                    )
                    .into())
                }
                None => {
                    return Err(Error::msg(format!("missing multiplier field {}", f.name)))
                }
            }
        }
        ctx.define_type(Typ::new_unit(&d.name, mults));
    }
    for d in &m.let_vars {
        if mctx.fully_evaluated(&d.name).is_some() {
            continue;
        }
        mctx.set_active(&d.name);
        match eval(&d.expr, &mctx) {
            Ok(v) => mctx.store(&d.name, v),
            Err(err) => {
                mctx.clear_active(&d.name);
                return Err(err);
            }
        }
    }
    let mut pub_vars = HashMap::new();
    for d in &m.pub_decls {
        if let Some(v) = mctx.fully_evaluated(&d.name) {
            pub_vars.insert(d.name.clone(), v);
            continue;
        }
        mctx.set_active(&d.name);
        match eval(&d.expr, &mctx) {
            Ok(v) => {
                mctx.store(&d.name, v.clone());
                pub_vars.insert(d.name.clone(), v);
            }
            Err(err) => {
                mctx.clear_active(&d.name);
                return Err(err);
            }
        }
    }
    let body = match &m.body {
        Some(b) => eval(b, &mctx)?,
        None => Val::Nil,
    };
    Ok(Rc::new(LoadedModule {
        name: m.name.clone(),
        pub_vars,
        body,
    }))
}

/// The merge operator `a @ b`: right-biased recursive record combination.
fn merge_values(x: &Val, y: &Val) -> Result<Val, String> {
    let Val::Rec(u) = x else {
        return Err(format!("cannot merge lhs of type {}", x.type_id()));
    };
    let Val::Rec(v) = y else {
        return Err(format!("cannot merge rhs of type {}", y.type_id()));
    };
    let mut r = RecVal::new();
    merge_rec(u, v, &mut r)?;
    Ok(Val::Rec(Rc::new(r)))
}

fn merge_rec(x: &RecVal, y: &RecVal, r: &mut RecVal) -> Result<(), String> {
    // Fields only in x keep x's values and annotations.
    for (f, vx) in &x.fields {
        if !y.fields.contains_key(f) {
            r.set_field(f, vx.clone(), x.annotation(f).cloned());
        }
    }
    for (f, vy) in &y.fields {
        let Some(vx) = x.fields.get(f) else {
            // Unique field of y.
            r.set_field(f, vy.clone(), y.annotation(f).cloned());
            continue;
        };
        // Common field. If only x has an annotation, y's value must pass its
        // type check (and gets rescaled for pinned unit multiples); an
        // annotation on y overrides.
        let ax = x.annotation(f);
        let ay = y.annotation(f);
        let mut vy = vy.clone();
        if let (Some(ax), None) = (ax, ay) {
            type_check(&vy, &ax.typ)
                .map_err(|msg| format!("type error merging record field '{f}': {msg}"))?;
            if ax.typ.is_unit() && ax.mult > 0.0 {
                if let Val::Unit(u) = &vy {
                    vy = Val::Unit(u.with_mult(ax.mult));
                }
            }
        }
        let target = ay.or(ax).cloned();
        if matches!(vx, Val::Typed(_)) || matches!(vy, Val::Typed(_)) {
            return Err("merging typed values is not supported".to_string());
        }
        if let (Val::Rec(rx), Val::Rec(ry)) = (vx, &vy) {
            let mut cr = RecVal::new();
            merge_rec(rx, ry, &mut cr)?;
            r.set_field(f, Val::Rec(Rc::new(cr)), target);
            continue;
        }
        r.set_field(f, vy, target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;

    fn eval_str(input: &str) -> Val {
        let expr = parse_expression(input)
            .unwrap_or_else(|e| panic!("parse of {input:?} failed: {e}"));
        eval(&expr, &Ctx::global()).unwrap_or_else(|e| panic!("eval of {input:?} failed: {e}"))
    }

    fn eval_err(input: &str) -> Error {
        let expr = parse_expression(input)
            .unwrap_or_else(|e| panic!("parse of {input:?} failed: {e}"));
        match eval(&expr, &Ctx::global()) {
            Ok(v) => panic!("expected eval error for {input:?}, got {v:?}"),
            Err(e) => e,
        }
    }

    fn field(v: &Val, name: &str) -> Val {
        match v {
            Val::Rec(r) => r.fields.get(name).cloned().unwrap_or_else(|| {
                panic!("record has no field {name}: {:?}", r.fields)
            }),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_expressions() {
        assert_eq!(eval_str("1"), Val::Int(1));
        assert_eq!(eval_str("3 * 10 + 1"), Val::Int(31));
        assert_eq!(eval_str("3 + 10 * 2"), Val::Int(23));
        assert_eq!(eval_str("3 * (10 + 1)"), Val::Int(33));
        assert_eq!(eval_str("10. / -2."), Val::Double(-5.0));
        assert_eq!(eval_str("5 - 4 - 1"), Val::Int(0));
        assert_eq!(eval_str("(100 * 2 + 100) / -300"), Val::Int(-1));
        assert_eq!(eval_str("7 % 3"), Val::Int(1));
        assert_eq!(eval_str("1 << 10"), Val::Int(1024));
    }

    #[test]
    fn comparison_expressions() {
        assert_eq!(eval_str("1 == 2"), Val::Bool(false));
        assert_eq!(eval_str("nil == nil"), Val::Bool(true));
        assert_eq!(eval_str("'foo' == 'foo'"), Val::Bool(true));
        assert_eq!(eval_str("'foo' != 'bar'"), Val::Bool(true));
        assert_eq!(eval_str("-0. == 0."), Val::Bool(true));
        assert_eq!(eval_str("1 < 2"), Val::Bool(true));
        assert_eq!(eval_str("true && false"), Val::Bool(false));
        assert_eq!(eval_str("!(1 == 2)"), Val::Bool(true));
    }

    #[test]
    fn records_are_never_equal() {
        assert_eq!(eval_str("{} == {}"), Val::Bool(false));
        assert_eq!(eval_str("{let r: {a: 1} eq: r == r}.eq"), Val::Bool(true));
    }

    #[test]
    fn record_fields_and_lets() {
        let v = eval_str("{x: 3 * 10 + 1}");
        assert_eq!(field(&v, "x"), Val::Int(31));
        let v = eval_str("{let a: 2 x: a + 1 y: x * x}");
        assert_eq!(field(&v, "y"), Val::Int(9));
    }

    #[test]
    fn field_order_does_not_matter_for_cross_references() {
        let v = eval_str("{y: x + 1 x: 1}");
        assert_eq!(field(&v, "y"), Val::Int(2));
        let v = eval_str("{x: 1 y: x + 1}");
        assert_eq!(field(&v, "y"), Val::Int(2));
    }

    #[test]
    fn lexical_scoping_of_closures() {
        let v = eval_str("{let adder: func (n) { func (k) { n + k } } add3: adder(3) y: add3(4)}");
        assert_eq!(field(&v, "y"), Val::Int(7));
    }

    #[test]
    fn recursion() {
        let v = eval_str("{let fac(n): if n == 0 then 1 else n * fac(n - 1) y: fac(10)}");
        assert_eq!(field(&v, "y"), Val::Int(3628800));
        let v = eval_str("{let fac(n): if n == 0 then 1 else n * fac(n - 1) y: fac(0)}");
        assert_eq!(field(&v, "y"), Val::Int(1));
    }

    #[test]
    fn conditional_evaluates_only_chosen_branch() {
        // The unchosen branch diverges if evaluated.
        let v = eval_str("{let boom(n): boom(n) x: if true then 1 else boom(0)}");
        assert_eq!(field(&v, "x"), Val::Int(1));
        assert_eq!(eval_str("if false then 1 else 2"), Val::Int(2));
    }

    #[test]
    fn cycle_detection() {
        let err = eval_err("{x: y y: x}");
        assert!(err.to_string().contains("cyclic"), "got: {err}");
        let err = eval_err("{x: x}");
        assert!(err.to_string().contains("cyclic"), "got: {err}");
        let err = eval_err("{let a: b let b: c let c: a x: a}");
        assert!(err.to_string().contains("cyclic"), "got: {err}");
    }

    #[test]
    fn unbound_variable() {
        let err = eval_err("{x: nope}");
        assert!(err.to_string().contains("unbound variable"), "got: {err}");
    }

    #[test]
    fn field_access_errors() {
        let err = eval_err("{a: 1}.b");
        assert!(err.to_string().contains("no field"), "got: {err}");
        let err = eval_err("(42).b");
        assert!(err.to_string().contains("cannot access"), "got: {err}");
    }

    #[test]
    fn call_errors() {
        let err = eval_err("(42)(1)");
        assert!(err.to_string().contains("not callable"), "got: {err}");
        let err = eval_err("{let f(x): x y: f(1, 2)}");
        assert!(
            err.to_string().contains("wrong number of arguments"),
            "got: {err}"
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let err = eval_err("1 / 0");
        assert!(err.to_string().contains("division by zero"), "got: {err}");
    }

    #[test]
    fn format_strings_evaluate() {
        assert_eq!(
            eval_str(r#""/path/to/${'glory'}""#),
            Val::Str("/path/to/glory".to_string())
        );
        assert_eq!(eval_str(r#""1 ${2} 3""#), Val::Str("1 2 3".to_string()));
        assert_eq!(eval_str(r#""1 ${ 2 } 3""#), Val::Str("1 2 3".to_string()));
        assert_eq!(
            eval_str(r#"{let a: { b: 1 } r: "a.b=${a.b}"}.r"#),
            Val::Str("a.b=1".to_string())
        );
        assert_eq!(
            eval_str(r#"{let f(x): x + 1 r: "x=${f(1)}"}.r"#),
            Val::Str("x=2".to_string())
        );
        assert_eq!(eval_str(r#""${'a' + 'b'}""#), Val::Str("ab".to_string()));
        assert_eq!(eval_str(r#""$foo ${'bar'}""#), Val::Str("$foo bar".to_string()));
        assert_eq!(eval_str(r#""${ {a: {b: 3} }.a.b }""#), Val::Str("3".to_string()));
    }

    #[test]
    fn merge_disjoint_and_override() {
        let v = eval_str("{a: 1} @ {b: 2}");
        assert_eq!(field(&v, "a"), Val::Int(1));
        assert_eq!(field(&v, "b"), Val::Int(2));
        let v = eval_str("{k: 1} @ {k: 2}");
        assert_eq!(field(&v, "k"), Val::Int(2));
        let v = eval_str("{a: 1} @ {}");
        assert_eq!(field(&v, "a"), Val::Int(1));
    }

    #[test]
    fn merge_recurses_into_records() {
        let v = eval_str("{y: {z: 1, w: 2}} @ {y: {z: 0}}");
        let y = field(&v, "y");
        assert_eq!(field(&y, "z"), Val::Int(0));
        assert_eq!(field(&y, "w"), Val::Int(2));
    }

    #[test]
    fn merge_requires_records() {
        let err = eval_err("1 @ {}");
        assert!(err.to_string().contains("cannot merge"), "got: {err}");
        let err = eval_err("{} @ [1]");
        assert!(err.to_string().contains("cannot merge"), "got: {err}");
    }

    #[test]
    fn merge_checks_left_annotations() {
        let err = eval_err("{x::int: 1} @ {x: 'oops'}");
        assert!(err.to_string().contains("incompatible types"), "got: {err}");
        let v = eval_str("{x::int: 1} @ {x: 2}");
        assert_eq!(field(&v, "x"), Val::Int(2));
    }

    #[test]
    fn merge_rescales_unit_fields_to_left_annotation() {
        let v = eval_str("{d::seconds: 1::seconds} @ {d: 2::minutes}");
        match field(&v, "d") {
            Val::Unit(u) => {
                assert_eq!(u.v, 120.0);
                assert_eq!(u.f, 1e9);
            }
            other => panic!("expected unit value, got {other:?}"),
        }
    }

    #[test]
    fn unit_arithmetic_and_conversion() {
        match eval_str("7::minutes + 3::seconds") {
            Val::Unit(u) => {
                assert_eq!(u.v, 423.0);
                assert_eq!(u.f, 1e9);
            }
            other => panic!("expected unit value, got {other:?}"),
        }
        assert_eq!(eval_str("(7::minutes + 3::seconds)::int"), Val::Int(423));
        assert_eq!(eval_str("(2::hours)::double"), Val::Double(2.0));
        assert_eq!(eval_str("1::minutes < 90::seconds"), Val::Bool(true));
        assert_eq!(eval_str("str(7::minutes)"), Val::Str("7::minutes".to_string()));
    }

    #[test]
    fn unit_annotation_rescales_field() {
        let v = eval_str("{d::millis: 1::seconds}");
        match field(&v, "d") {
            Val::Unit(u) => {
                assert_eq!(u.v, 1000.0);
                assert_eq!(u.f, 1e6);
            }
            other => panic!("expected unit value, got {other:?}"),
        }
    }

    #[test]
    fn annotation_type_mismatch_is_an_error() {
        let err = eval_err("{x::int: 'str'}");
        assert!(err.to_string().contains("incompatible types"), "got: {err}");
        let err = eval_err("{x::nosuch: 1}");
        assert!(err.to_string().contains("unknown type"), "got: {err}");
    }

    #[test]
    fn conversions() {
        assert_eq!(eval_str("'123'::int"), Val::Int(123));
        assert_eq!(eval_str("'2.5'::double"), Val::Double(2.5));
        assert_eq!(eval_str("42::string"), Val::Str("42".to_string()));
        assert_eq!(eval_str("1.9::int"), Val::Int(1));
        assert_eq!(eval_str("0::bool"), Val::Bool(false));
        assert_eq!(eval_str("'x'::bool"), Val::Bool(true));
        let err = eval_err("'12x'::int");
        assert!(err.to_string().contains("cannot convert"), "got: {err}");
        let err = eval_err("1::nosuchtype");
        assert!(err.to_string().contains("unknown type"), "got: {err}");
    }

    #[test]
    fn time_conversion_produces_typed_record() {
        let v = eval_str("'2024-03-05T06:07:08+02:00'::time");
        match &v {
            Val::Typed(t) => {
                assert!(Rc::ptr_eq(&t.typ, &types::time_type()));
                match &t.value {
                    Val::Rec(r) => assert_eq!(r.fields.get("year"), Some(&Val::Int(2024))),
                    other => panic!("expected record, got {other:?}"),
                }
            }
            other => panic!("expected typed value, got {other:?}"),
        }
        // Field access reaches through the typed value.
        assert_eq!(
            eval_str("('2024-03-05T06:07:08+02:00'::time).month"),
            Val::Int(3)
        );
    }

    #[test]
    fn eval_error_positions_resolve() {
        let ctx = Ctx::global();
        let input = "{x: 1}.y";
        let base = ctx.add_file("test.konfi", input);
        assert_eq!(base, 0);
        let expr = parse_expression(input).expect("parse");
        let err = eval(&expr, &ctx).expect_err("must fail");
        let rendered = ctx.format_error(&err);
        assert_eq!(rendered, "test.konfi:1:7: record has no field 'y'");
    }
}
