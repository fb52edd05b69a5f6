//! Builtin functions. Whatever is registered here becomes available in
//! Konfi programs.

use std::rc::Rc;

use regex::Regex;

use crate::errors::{Error, UserError};
use crate::eval::{call_value, Ctx};
use crate::modules;
use crate::types;
use crate::values::{NativeFuncVal, RecVal, Val};

/// The builtin function table. Keep sorted alphabetically.
pub(crate) fn builtin_functions() -> Vec<Rc<NativeFuncVal>> {
    let table: &[(&'static str, i32, crate::values::NativeFn)] = &[
        ("cond", 3, builtin_cond),
        ("contains", 2, builtin_contains),
        ("error", 1, builtin_error),
        ("flatmap", 2, builtin_flatmap),
        ("fold", -1, builtin_fold),
        ("format", -1, builtin_format),
        ("isnil", 1, builtin_isnil),
        ("len", 1, builtin_len),
        ("load", 1, builtin_load),
        ("lptime", 1, builtin_lptime),
        ("mkrec", -1, builtin_mkrec),
        ("pcall", -1, builtin_pcall),
        ("regexp_extract", -1, builtin_regexp_extract),
        ("str", 1, builtin_str),
        ("substr", 3, builtin_substr),
        ("typeof", 1, builtin_typeof),
    ];
    table
        .iter()
        .map(|&(name, arity, func)| Rc::new(NativeFuncVal { name, arity, func }))
        .collect()
}

// cond(b any, x any, y any) any
//
// Calls through the evaluator get the unchosen branch elided (see the call
// handling in eval); this eager fallback serves higher-order uses.
fn builtin_cond(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    if args[0].is_true() {
        Ok(args[1].clone())
    } else {
        Ok(args[2].clone())
    }
}

// contains(s string, substr string) bool
fn builtin_contains(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    match (&args[0], &args[1]) {
        (Val::Str(s), Val::Str(sub)) => Ok(Val::Bool(s.contains(sub.as_str()))),
        (Val::Str(_), other) => Err(Error::msg(format!(
            "contains: invalid type for second argument: {}",
            other.type_id()
        ))),
        _ => Err(Error::msg(format!(
            "contains: invalid argument types: ({}, {})",
            args[0].type_id(),
            args[1].type_id()
        ))),
    }
}

// error(v any) raises a user error carrying v; only pcall intercepts it.
fn builtin_error(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    Err(Error::User(UserError {
        value: args[0].clone(),
    }))
}

// flatmap(f func('a)[]'b, xs []'a) []'b
fn builtin_flatmap(args: &[Val], ctx: &Ctx) -> Result<Val, Error> {
    if !matches!(args[0], Val::Closure(_) | Val::Native(_)) {
        return Err(Error::msg(format!(
            "flatmap: 1st argument must be a callable, got {}",
            args[0].type_id()
        )));
    }
    let Val::List(xs) = &args[1] else {
        return Err(Error::msg(format!(
            "flatmap: 2nd argument must be a list, got {}",
            args[1].type_id()
        )));
    };
    let mut result = Vec::new();
    for x in xs.iter() {
        let fx = call_value(&args[0], vec![x.clone()], ctx)
            .map_err(|e| crate::errors::chain_error(e, "flatmap: call failed"))?;
        match fx {
            // f returned a list, as it should: splice its elements.
            Val::List(ys) => result.extend(ys.iter().cloned()),
            // Otherwise append the single value.
            other => result.push(other),
        }
    }
    Ok(Val::List(Rc::new(result)))
}

// fold(f func('a, 'b)'a, accu 'a, xs []'b) 'a
// fold(f func('b, 'b)'b, xs []'b) 'b
fn builtin_fold(args: &[Val], ctx: &Ctx) -> Result<Val, Error> {
    if args.len() != 2 && args.len() != 3 {
        return Err(Error::msg(format!(
            "fold: invalid number of arguments: {}",
            args.len()
        )));
    }
    if !matches!(args[0], Val::Closure(_) | Val::Native(_)) {
        return Err(Error::msg(format!(
            "fold: 1st argument must be a callable, got {}",
            args[0].type_id()
        )));
    }
    let Val::List(xs) = &args[args.len() - 1] else {
        return Err(Error::msg(format!(
            "fold: last argument must be a list, got {}",
            args[args.len() - 1].type_id()
        )));
    };
    let mut elements = xs.iter();
    let mut accu = if args.len() == 3 {
        args[1].clone()
    } else {
        // The two-argument fold of an empty list is nil.
        match elements.next() {
            Some(first) => first.clone(),
            None => return Ok(Val::Nil),
        }
    };
    for x in elements {
        accu = call_value(&args[0], vec![accu, x.clone()], ctx)
            .map_err(|e| crate::errors::chain_error(e, "fold: call failed"))?;
    }
    Ok(accu)
}

// format(fmt string, args ...any) string
//
// Verbs: %s and %v (string projection), %d (int), %f (double), %%.
fn builtin_format(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    if args.is_empty() {
        return Ok(Val::Str(String::new()));
    }
    let Val::Str(fmt) = &args[0] else {
        return Err(Error::msg(format!(
            "format: first argument must be a format string, got {}",
            args[0].type_id()
        )));
    };
    let mut out = String::new();
    let mut argi = 1;
    let mut next_arg = |verb: char| -> Result<Val, Error> {
        let Some(arg) = args.get(argi) else {
            return Err(Error::msg(format!("format: missing argument for %{verb}")));
        };
        argi += 1;
        Ok(arg.clone())
    };
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(v @ ('s' | 'v')) => out.push_str(&next_arg(v)?.render()),
            Some('d') => match next_arg('d')? {
                Val::Int(i) => out.push_str(&i.to_string()),
                other => {
                    return Err(Error::msg(format!(
                        "format: %d expects an int, got {}",
                        other.type_id()
                    )))
                }
            },
            Some('f') => match next_arg('f')? {
                Val::Double(d) => out.push_str(&format!("{d:.6}")),
                other => {
                    return Err(Error::msg(format!(
                        "format: %f expects a double, got {}",
                        other.type_id()
                    )))
                }
            },
            Some(v) => return Err(Error::msg(format!("format: unsupported verb %{v}"))),
            None => return Err(Error::msg("format: trailing %")),
        }
    }
    if argi != args.len() {
        return Err(Error::msg(format!(
            "format: {} arguments given but {} consumed",
            args.len() - 1,
            argi - 1
        )));
    }
    Ok(Val::Str(out))
}

// isnil(x any) bool
fn builtin_isnil(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    Ok(Val::Bool(matches!(args[0], Val::Nil)))
}

// len(x any) int. String lengths are byte counts.
fn builtin_len(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    match &args[0] {
        Val::Str(s) => Ok(Val::Int(s.len() as i64)),
        Val::Rec(r) => Ok(Val::Int(r.fields.len() as i64)),
        Val::List(l) => Ok(Val::Int(l.len() as i64)),
        other => Err(Error::msg(format!("len: invalid type: {}", other.type_id()))),
    }
}

// load(name string) rec. Loads a module and projects it to a record.
fn builtin_load(args: &[Val], ctx: &Ctx) -> Result<Val, Error> {
    let Val::Str(name) = &args[0] else {
        return Err(Error::msg(format!(
            "load: expected string argument, got {}",
            args[0].type_id()
        )));
    };
    // Modules never see the caller's locals.
    let module = modules::load_module(name, &ctx.drop_locals())?;
    Ok(module.as_rec())
}

// lptime(s string) rec: lenient time parsing into a broken-down record.
fn builtin_lptime(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    let Val::Str(s) = &args[0] else {
        return Err(Error::msg(format!(
            "lptime: expected string argument, got {}",
            args[0].type_id()
        )));
    };
    let rec = types::lenient_parse_time(s).map_err(Error::msg)?;
    Ok(Val::Rec(Rc::new(rec)))
}

// mkrec(f string, fv any [, f string, fv any]*) rec
// mkrec(xs list) rec
//
// The record constructor for field names only known at runtime.
fn builtin_mkrec(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    if args.len() == 1 {
        let Val::List(xs) = &args[0] else {
            return Err(Error::msg(format!(
                "mkrec: 1-argument version expects a list argument, got {}",
                args[0].type_id()
            )));
        };
        return rec_from_pairs(xs);
    }
    rec_from_pairs(args)
}

fn rec_from_pairs(xs: &[Val]) -> Result<Val, Error> {
    if xs.len() % 2 != 0 {
        return Err(Error::msg(
            "mkrec: expected an even number of elements [field name, field value]*",
        ));
    }
    let mut r = RecVal::new();
    for pair in xs.chunks(2) {
        let Val::Str(name) = &pair[0] else {
            return Err(Error::msg(format!(
                "mkrec: expected a string field name, got {}",
                pair[0].type_id()
            )));
        };
        r.set_field(name, pair[1].clone(), None);
    }
    Ok(Val::Rec(Rc::new(r)))
}

fn pcall_result(value: Val, err: bool) -> Val {
    let mut r = RecVal::new();
    r.set_field("value", value, None);
    r.set_field("err", Val::Bool(err), None);
    Val::Rec(Rc::new(r))
}

// pcall(f func, [arg any]*) rec
//
// From Lua: calls f with the given args. Returns {value, err: false} on
// success and {value: <raised value>, err: true} when f raised a user error
// via error(). All other errors pass through unchanged.
fn builtin_pcall(args: &[Val], ctx: &Ctx) -> Result<Val, Error> {
    let Some(f) = args.first() else {
        return Err(Error::msg("pcall: expect at least one (function) argument"));
    };
    if !matches!(f, Val::Closure(_) | Val::Native(_)) {
        return Err(Error::msg(format!(
            "pcall: 1st argument must be a callable, got {}",
            f.type_id()
        )));
    }
    match call_value(f, args[1..].to_vec(), ctx) {
        Ok(v) => Ok(pcall_result(v, false)),
        // Eval wraps call errors, so search the whole chain for a user error.
        Err(e) => match e.user_error() {
            Some(u) => Ok(pcall_result(u.value.clone(), true)),
            None => Err(e),
        },
    }
}

// regexp_extract(s string, re string [, group_index int]) string
fn builtin_regexp_extract(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    if args.len() != 2 && args.len() != 3 {
        return Err(Error::msg(format!(
            "regexp_extract: invalid number of arguments: {}",
            args.len()
        )));
    }
    let Val::Str(s) = &args[0] else {
        return Err(Error::msg(format!(
            "regexp_extract: 1st argument must be a string, got {}",
            args[0].type_id()
        )));
    };
    let Val::Str(re_str) = &args[1] else {
        return Err(Error::msg(format!(
            "regexp_extract: 2nd argument must be a string, got {}",
            args[1].type_id()
        )));
    };
    let group_index = match args.get(2) {
        None => 0,
        Some(Val::Int(i)) if *i >= 0 => *i as usize,
        Some(Val::Int(i)) => {
            return Err(Error::msg(format!(
                "regexp_extract: group_index must be >= 0, got {i}"
            )))
        }
        Some(other) => {
            return Err(Error::msg(format!(
                "regexp_extract: 3rd argument must be an int, got {}",
                other.type_id()
            )))
        }
    };
    let re = Regex::new(re_str).map_err(|e| Error::msg(format!("regexp_extract: {e}")))?;
    if group_index == 0 {
        let m = re.find(s).map(|m| m.as_str()).unwrap_or("");
        return Ok(Val::Str(m.to_string()));
    }
    let extracted = re
        .captures(s)
        .and_then(|caps| caps.get(group_index))
        .map(|m| m.as_str())
        .unwrap_or("");
    Ok(Val::Str(extracted.to_string()))
}

// str(x any) string
fn builtin_str(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    Ok(Val::Str(args[0].render()))
}

// substr(s string, start int, end int) string
//
// Indices are byte offsets; splitting inside a multi-byte character is an
// error.
fn builtin_substr(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    let Val::Str(s) = &args[0] else {
        return Err(Error::msg(format!(
            "substr: invalid type: {}",
            args[0].type_id()
        )));
    };
    let Val::Int(start) = args[1] else {
        return Err(Error::msg(format!(
            "substr: 2nd argument must be an int, got {}",
            args[1].type_id()
        )));
    };
    let Val::Int(end) = args[2] else {
        return Err(Error::msg(format!(
            "substr: 3rd argument must be an int, got {}",
            args[2].type_id()
        )));
    };
    if start < 0 || start > end || end as usize > s.len() {
        return Err(Error::msg(format!(
            "substr: invalid start({start})/end({end}) arguments for string of length {}",
            s.len()
        )));
    }
    let (start, end) = (start as usize, end as usize);
    if !s.is_char_boundary(start) || !s.is_char_boundary(end) {
        return Err(Error::msg(format!(
            "substr: byte range {start}..{end} splits a multi-byte character"
        )));
    }
    Ok(Val::Str(s[start..end].to_string()))
}

// typeof(x any) string
fn builtin_typeof(args: &[Val], _ctx: &Ctx) -> Result<Val, Error> {
    Ok(Val::Str(args[0].type_id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::eval;
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

    #[test]
    fn len_counts_bytes_fields_elements() {
        assert_eq!(eval_str("len('übe')"), Val::Int(4));
        assert_eq!(eval_str("len('')"), Val::Int(0));
        assert_eq!(eval_str("len({a: 1, b: 2})"), Val::Int(2));
        assert_eq!(eval_str("len({})"), Val::Int(0));
        assert_eq!(eval_str("len([1, 2, 3])"), Val::Int(3));
        assert!(eval_err("len(1)").to_string().contains("invalid type"));
    }

    #[test]
    fn substr_uses_byte_indices() {
        assert_eq!(eval_str("substr('konfi', 0, 3)"), Val::Str("kon".to_string()));
        assert_eq!(eval_str("substr('konfi', 3, 5)"), Val::Str("fi".to_string()));
        assert_eq!(eval_str("substr('übe', 0, 2)"), Val::Str("ü".to_string()));
        assert!(eval_err("substr('übe', 0, 1)")
            .to_string()
            .contains("multi-byte"));
        assert!(eval_err("substr('abc', 2, 1)").to_string().contains("invalid start"));
        assert!(eval_err("substr('abc', 0, 4)").to_string().contains("invalid start"));
    }

    #[test]
    fn contains_and_isnil() {
        assert_eq!(eval_str("contains('konfi', 'onf')"), Val::Bool(true));
        assert_eq!(eval_str("contains('konfi', 'x')"), Val::Bool(false));
        assert_eq!(eval_str("isnil(nil)"), Val::Bool(true));
        assert_eq!(eval_str("isnil(0)"), Val::Bool(false));
    }

    #[test]
    fn str_and_typeof() {
        assert_eq!(eval_str("str(31)"), Val::Str("31".to_string()));
        assert_eq!(eval_str("str(2.5)"), Val::Str("2.5".to_string()));
        assert_eq!(eval_str("str(nil)"), Val::Str("nil".to_string()));
        assert_eq!(eval_str("str({})"), Val::Str("<rec>".to_string()));
        assert_eq!(eval_str("str([1])"), Val::Str("<list>".to_string()));
        assert_eq!(eval_str("typeof(1)"), Val::Str("int".to_string()));
        assert_eq!(eval_str("typeof('')"), Val::Str("string".to_string()));
        assert_eq!(eval_str("typeof(1::seconds)"), Val::Str("duration".to_string()));
        assert_eq!(eval_str("typeof(len)"), Val::Str("builtin".to_string()));
        assert_eq!(eval_str("str(len)"), Val::Str("<builtin len>".to_string()));
    }

    #[test]
    fn cond_chooses_lazily_in_call_position() {
        assert_eq!(eval_str("cond(1 < 2, 'a', 'b')"), Val::Str("a".to_string()));
        // The unchosen branch is not evaluated.
        assert_eq!(eval_str("cond(true, 1, 1 / 0)"), Val::Int(1));
    }

    #[test]
    fn fold_and_flatmap() {
        assert_eq!(
            eval_str("fold(func (a, b) { a + b }, 0, [1, 2, 3])"),
            Val::Int(6)
        );
        assert_eq!(
            eval_str("fold(func (a, b) { a + b }, [1, 2, 3])"),
            Val::Int(6)
        );
        assert_eq!(eval_str("fold(func (a, b) { a + b }, [])"), Val::Nil);
        assert_eq!(
            eval_str("len(flatmap(func (x) { [x, x] }, [1, 2]))"),
            Val::Int(4)
        );
        assert_eq!(
            eval_str("len(flatmap(func (x) { x + 1 }, [1, 2]))"),
            Val::Int(2)
        );
    }

    #[test]
    fn format_verbs() {
        assert_eq!(
            eval_str("format('%s=%d', 'port', 80)"),
            Val::Str("port=80".to_string())
        );
        assert_eq!(
            eval_str("format('%f', 0.5)"),
            Val::Str("0.500000".to_string())
        );
        assert_eq!(eval_str("format('100%%')"), Val::Str("100%".to_string()));
        assert!(eval_err("format('%d', 'x')").to_string().contains("%d"));
        assert!(eval_err("format('%d')").to_string().contains("missing argument"));
        assert!(eval_err("format('%q', 1)").to_string().contains("unsupported verb"));
    }

    #[test]
    fn mkrec_constructs_records() {
        assert_eq!(eval_str("mkrec('a', 1, 'b', 2).b"), Val::Int(2));
        assert_eq!(eval_str("mkrec(['a', 1]).a"), Val::Int(1));
        assert!(eval_err("mkrec('a')").to_string().contains("even number"));
        assert!(eval_err("mkrec(1, 2)").to_string().contains("string"));
    }

    #[test]
    fn error_and_pcall() {
        let err = eval_err("error('boom')");
        assert!(err.to_string().contains("boom"), "got: {err}");
        assert_eq!(eval_str("pcall(func (x) { x + 1 }, 41).value"), Val::Int(42));
        assert_eq!(eval_str("pcall(func (x) { x + 1 }, 41).err"), Val::Bool(false));
        assert_eq!(
            eval_str("pcall(func (x) { error('nope') }, 1).err"),
            Val::Bool(true)
        );
        assert_eq!(
            eval_str("pcall(func (x) { error('nope') }, 1).value"),
            Val::Str("nope".to_string())
        );
        // Non-user errors pass through pcall.
        let err = eval_err("pcall(func (x) { x / 0 }, 1)");
        assert!(err.to_string().contains("division by zero"), "got: {err}");
    }

    #[test]
    fn regexp_extract_matches() {
        assert_eq!(
            eval_str("regexp_extract('port=80', '[0-9]+')"),
            Val::Str("80".to_string())
        );
        assert_eq!(
            eval_str("regexp_extract('port=80', '([a-z]+)=([0-9]+)', 1)"),
            Val::Str("port".to_string())
        );
        assert_eq!(
            eval_str("regexp_extract('abc', '[0-9]+')"),
            Val::Str("".to_string())
        );
        assert!(eval_err("regexp_extract('a', '(')").to_string().contains("regexp_extract"));
    }

    #[test]
    fn lptime_returns_plain_record() {
        assert_eq!(eval_str("lptime('2024-03-05').year"), Val::Int(2024));
        assert_eq!(eval_str("lptime('2024-03-05').hour"), Val::Int(0));
        assert_eq!(eval_str("typeof(lptime('2024-03-05'))"), Val::Str("rec".to_string()));
        assert!(eval_err("lptime('nope')").to_string().contains("could not parse"));
    }

    #[test]
    fn arity_checks() {
        assert!(eval_err("len()").to_string().contains("wrong number of arguments"));
        assert!(eval_err("str(1, 2)").to_string().contains("wrong number of arguments"));
    }
}
