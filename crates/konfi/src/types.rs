//! The unit-aware type system.
//!
//! A [`Typ`] is a small capability record: an identifier, an optional
//! `convert` callable (driving `x :: t` conversions), an optional `encode`
//! callable (used by the serializers), and a unit-name → multiplier map that
//! is non-empty exactly for unit types. Type equality is identity: built-in
//! types are created once per thread, and every `pub unit` declaration
//! registers a fresh type.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Timelike};

use crate::errors::{Error, EvalError};
use crate::eval::Ctx;
use crate::token::Pos;
use crate::values::{RecVal, TypedVal, UnitVal, Val};

/// Conversion callable: `(target-name-as-written, value) -> value`. For unit
/// types the target name selects the multiplier.
pub type ConvertFn = Rc<dyn Fn(&str, &Val) -> Result<Val, String>>;

/// Encoding callable: maps a typed value's inner value to what serializers
/// should emit.
pub type EncodeFn = Rc<dyn Fn(&Val) -> Result<Val, String>>;

pub struct Typ {
    pub id: String,
    pub convert: Option<ConvertFn>,
    pub encode: Option<EncodeFn>,
    /// Unit-name → multiplier relative to the base unit. Non-empty exactly
    /// when this is a unit type.
    pub unit_mults: BTreeMap<String, f64>,
}

impl fmt::Debug for Typ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Typ")
            .field("id", &self.id)
            .field("convert", &self.convert.is_some())
            .field("encode", &self.encode.is_some())
            .field("unit_mults", &self.unit_mults)
            .finish()
    }
}

impl Typ {
    fn scalar(id: &str) -> Rc<Typ> {
        Rc::new(Typ {
            id: id.to_string(),
            convert: None,
            encode: None,
            unit_mults: BTreeMap::new(),
        })
    }

    pub fn is_unit(&self) -> bool {
        !self.unit_mults.is_empty()
    }

    pub fn unit_factor(&self, unit: &str) -> Option<f64> {
        self.unit_mults.get(unit).copied()
    }

    /// Inverse lookup of [`Typ::unit_factor`]. The `BTreeMap` makes the
    /// choice deterministic when two names share a factor.
    pub fn unit_name(&self, factor: f64) -> Option<&str> {
        self.unit_mults
            .iter()
            .find(|(_, &f)| f == factor)
            .map(|(name, _)| name.as_str())
    }

    /// Creates a unit type with the given multiplier map. The type's
    /// `convert` accepts ints, doubles, and unit values of the same type,
    /// keyed by the unit name written at the use site.
    pub fn new_unit(id: &str, unit_mults: BTreeMap<String, f64>) -> Rc<Typ> {
        Rc::new_cyclic(|weak: &Weak<Typ>| {
            let w = weak.clone();
            Typ {
                id: id.to_string(),
                convert: Some(Rc::new(move |unit, val| {
                    let Some(typ) = w.upgrade() else {
                        return Err("unit type was dropped".to_string());
                    };
                    unit_convert(&typ, unit, val)
                })),
                encode: None,
                unit_mults,
            }
        })
    }
}

fn unit_convert(typ: &Rc<Typ>, unit: &str, val: &Val) -> Result<Val, String> {
    let Some(f) = typ.unit_factor(unit) else {
        return Err(format!("{}.convert: invalid unit '{unit}'", typ.id));
    };
    match val {
        Val::Int(v) => Ok(Val::Unit(UnitVal {
            v: *v as f64,
            f,
            typ: Rc::clone(typ),
        })),
        Val::Double(v) => Ok(Val::Unit(UnitVal {
            v: *v,
            f,
            typ: Rc::clone(typ),
        })),
        Val::Unit(u) if Rc::ptr_eq(&u.typ, typ) => Ok(Val::Unit(u.with_mult(f))),
        _ => Err(format!(
            "{}.convert: cannot convert from type {}",
            typ.id,
            val.type_id()
        )),
    }
}

struct Builtins {
    bool_: Rc<Typ>,
    int: Rc<Typ>,
    double: Rc<Typ>,
    string: Rc<Typ>,
    nil: Rc<Typ>,
    rec: Rc<Typ>,
    list: Rc<Typ>,
    builtin: Rc<Typ>,
    func: Rc<Typ>,
    duration: Rc<Typ>,
    time: Rc<Typ>,
}

impl Builtins {
    fn new() -> Self {
        let duration = Typ::new_unit(
            "duration",
            BTreeMap::from([
                ("nanos".to_string(), 1.0),
                ("micros".to_string(), 1e3),
                ("millis".to_string(), 1e6),
                ("seconds".to_string(), 1e9),
                ("minutes".to_string(), 6e10),
                ("hours".to_string(), 3.6e12),
                ("days".to_string(), 8.64e13),
            ]),
        );
        let time = Rc::new_cyclic(|weak: &Weak<Typ>| {
            let w = weak.clone();
            Typ {
                id: "time".to_string(),
                convert: Some(Rc::new(move |_target, val| {
                    let Some(typ) = w.upgrade() else {
                        return Err("time type was dropped".to_string());
                    };
                    match val {
                        Val::Str(s) => {
                            let rec = lenient_parse_time(s)?;
                            Ok(Val::Typed(Rc::new(TypedVal {
                                value: Val::Rec(Rc::new(rec)),
                                typ,
                            })))
                        }
                        Val::Typed(t) if Rc::ptr_eq(&t.typ, &typ) => Ok(val.clone()),
                        _ => Err(format!(
                            "time.convert: cannot convert from type {}",
                            val.type_id()
                        )),
                    }
                })),
                encode: Some(Rc::new(time_encode)),
                unit_mults: BTreeMap::new(),
            }
        });
        Self {
            bool_: Typ::scalar("bool"),
            int: Typ::scalar("int"),
            double: Typ::scalar("double"),
            string: Typ::scalar("string"),
            nil: Typ::scalar("nil"),
            rec: Typ::scalar("rec"),
            list: Typ::scalar("list"),
            builtin: Typ::scalar("builtin"),
            func: Typ::scalar("func"),
            duration,
            time,
        }
    }
}

thread_local! {
    static BUILTINS: Builtins = Builtins::new();
}

pub fn bool_type() -> Rc<Typ> {
    BUILTINS.with(|b| Rc::clone(&b.bool_))
}

pub fn int_type() -> Rc<Typ> {
    BUILTINS.with(|b| Rc::clone(&b.int))
}

pub fn double_type() -> Rc<Typ> {
    BUILTINS.with(|b| Rc::clone(&b.double))
}

pub fn string_type() -> Rc<Typ> {
    BUILTINS.with(|b| Rc::clone(&b.string))
}

pub fn duration_type() -> Rc<Typ> {
    BUILTINS.with(|b| Rc::clone(&b.duration))
}

pub fn time_type() -> Rc<Typ> {
    BUILTINS.with(|b| Rc::clone(&b.time))
}

/// All types pre-registered in a fresh global context.
pub fn builtin_types() -> Vec<Rc<Typ>> {
    BUILTINS.with(|b| {
        vec![
            Rc::clone(&b.bool_),
            Rc::clone(&b.int),
            Rc::clone(&b.double),
            Rc::clone(&b.string),
            Rc::clone(&b.nil),
            Rc::clone(&b.rec),
            Rc::clone(&b.list),
            Rc::clone(&b.builtin),
            Rc::clone(&b.func),
            Rc::clone(&b.duration),
            Rc::clone(&b.time),
        ]
    })
}

/// Applies `val :: type_name` at `pos`. Types with a custom `convert`
/// convert themselves; otherwise the built-in conversion rules apply.
pub fn convert_type(val: &Val, type_name: &str, ctx: &Ctx, pos: Pos) -> Result<Val, Error> {
    let Some(typ) = ctx.lookup_type(type_name) else {
        return Err(EvalError::new(pos, format!("unknown type: {type_name}")).into());
    };
    if let Some(convert) = &typ.convert {
        return convert(type_name, val).map_err(|msg| EvalError::new(pos, msg).into());
    }
    // Everything can be converted to a bool.
    if Rc::ptr_eq(&typ, &bool_type()) {
        return Ok(Val::Bool(val.is_true()));
    }
    let int = int_type();
    let double = double_type();
    let string = string_type();
    match val {
        Val::Bool(b) => {
            if Rc::ptr_eq(&typ, &int) {
                return Ok(Val::Int(i64::from(*b)));
            }
            if Rc::ptr_eq(&typ, &double) {
                return Ok(Val::Double(if *b { 1.0 } else { 0.0 }));
            }
            if Rc::ptr_eq(&typ, &string) {
                return Ok(Val::Str(val.render()));
            }
        }
        Val::Int(i) => {
            if Rc::ptr_eq(&typ, &int) {
                return Ok(val.clone());
            }
            if Rc::ptr_eq(&typ, &double) {
                return Ok(Val::Double(*i as f64));
            }
            if Rc::ptr_eq(&typ, &string) {
                return Ok(Val::Str(val.render()));
            }
        }
        Val::Double(d) => {
            if Rc::ptr_eq(&typ, &int) {
                return Ok(Val::Int(*d as i64));
            }
            if Rc::ptr_eq(&typ, &double) {
                return Ok(val.clone());
            }
            if Rc::ptr_eq(&typ, &string) {
                return Ok(Val::Str(val.render()));
            }
        }
        Val::Str(s) => {
            if Rc::ptr_eq(&typ, &int) {
                return s.parse::<i64>().map(Val::Int).map_err(|_| {
                    EvalError::new(pos, format!("cannot convert string '{s}' to int")).into()
                });
            }
            if Rc::ptr_eq(&typ, &double) {
                return s.parse::<f64>().map(Val::Double).map_err(|_| {
                    EvalError::new(pos, format!("cannot convert string '{s}' to double")).into()
                });
            }
            if Rc::ptr_eq(&typ, &string) {
                return Ok(val.clone());
            }
        }
        Val::Unit(u) => {
            // A unit value converts to int/double as its magnitude in the
            // currently-held multiple.
            if Rc::ptr_eq(&typ, &int) {
                return Ok(Val::Int(u.v as i64));
            }
            if Rc::ptr_eq(&typ, &double) {
                return Ok(Val::Double(u.v));
            }
        }
        _ => {}
    }
    Err(EvalError::new(
        pos,
        format!("cannot convert value of type {} to {}", val.type_id(), typ.id),
    )
    .into())
}

/// Checks that `val`'s type identity matches `t` (used for record field
/// annotations and merge).
pub fn type_check(val: &Val, t: &Rc<Typ>) -> Result<(), String> {
    let ok = match val {
        Val::Int(_) => Rc::ptr_eq(t, &int_type()),
        Val::Double(_) => Rc::ptr_eq(t, &double_type()),
        Val::Str(_) => Rc::ptr_eq(t, &string_type()),
        Val::Unit(u) => Rc::ptr_eq(&u.typ, t),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("incompatible types: {} :: {}", val.type_id(), t.id))
    }
}

/// Parses a handful of common date/time layouts, most specific first, and
/// returns the broken-down record the `time` type and `lptime` share.
pub fn lenient_parse_time(s: &str) -> Result<RecVal, String> {
    if let Ok(dt) = chrono::DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(time_rec(&dt));
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive_time_rec(&ndt));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Ok(time_rec(&dt));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let Some(midnight) = NaiveTime::from_hms_opt(0, 0, 0) else {
            return Err("invalid time of day".to_string());
        };
        return Ok(naive_time_rec(&NaiveDateTime::new(d, midnight)));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_str(s, "%a, %d %b %Y %H:%M:%S %z") {
        return Ok(time_rec(&dt));
    }
    Err(format!("could not parse time '{s}'"))
}

fn time_rec(dt: &chrono::DateTime<FixedOffset>) -> RecVal {
    let mut r = RecVal::new();
    r.set_field("year", Val::Int(i64::from(dt.year())), None);
    r.set_field("month", Val::Int(i64::from(dt.month())), None);
    r.set_field("day", Val::Int(i64::from(dt.day())), None);
    r.set_field("hour", Val::Int(i64::from(dt.hour())), None);
    r.set_field("minute", Val::Int(i64::from(dt.minute())), None);
    r.set_field("second", Val::Int(i64::from(dt.second())), None);
    r.set_field("nanosecond", Val::Int(i64::from(dt.nanosecond())), None);
    r.set_field(
        "offset",
        Val::Int(i64::from(dt.offset().local_minus_utc())),
        None,
    );
    r
}

fn naive_time_rec(ndt: &NaiveDateTime) -> RecVal {
    let mut r = RecVal::new();
    r.set_field("year", Val::Int(i64::from(ndt.year())), None);
    r.set_field("month", Val::Int(i64::from(ndt.month())), None);
    r.set_field("day", Val::Int(i64::from(ndt.day())), None);
    r.set_field("hour", Val::Int(i64::from(ndt.hour())), None);
    r.set_field("minute", Val::Int(i64::from(ndt.minute())), None);
    r.set_field("second", Val::Int(i64::from(ndt.second())), None);
    r.set_field("nanosecond", Val::Int(i64::from(ndt.nanosecond())), None);
    r.set_field("offset", Val::Int(0), None);
    r
}

/// Re-assembles a broken-down time record into an ISO-8601 string with
/// timezone offset. This is the `time` type's `encode`.
fn time_encode(val: &Val) -> Result<Val, String> {
    let Val::Rec(rec) = val else {
        return Err(format!("time.encode: expected a record, got {}", val.type_id()));
    };
    let get = |name: &str| -> Result<i64, String> {
        match rec.fields.get(name) {
            Some(Val::Int(i)) => Ok(*i),
            Some(v) => Err(format!("time.encode: field {name} has invalid type {}", v.type_id())),
            None => Err(format!("time.encode: missing field {name}")),
        }
    };
    let offset = FixedOffset::east_opt(get("offset")? as i32)
        .ok_or_else(|| "time.encode: offset out of range".to_string())?;
    let date = NaiveDate::from_ymd_opt(get("year")? as i32, get("month")? as u32, get("day")? as u32)
        .ok_or_else(|| "time.encode: invalid date".to_string())?;
    let tod = NaiveTime::from_hms_nano_opt(
        get("hour")? as u32,
        get("minute")? as u32,
        get("second")? as u32,
        get("nanosecond")? as u32,
    )
    .ok_or_else(|| "time.encode: invalid time of day".to_string())?;
    let dt = match offset.from_local_datetime(&NaiveDateTime::new(date, tod)) {
        chrono::LocalResult::Single(dt) => dt,
        _ => return Err("time.encode: ambiguous local time".to_string()),
    };
    Ok(Val::Str(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_units() {
        let d = duration_type();
        assert!(d.is_unit());
        assert_eq!(d.unit_factor("seconds"), Some(1e9));
        assert_eq!(d.unit_factor("days"), Some(8.64e13));
        assert_eq!(d.unit_factor("weeks"), None);
        assert_eq!(d.unit_name(6e10), Some("minutes"));
        assert_eq!(d.unit_name(7.0), None);
    }

    #[test]
    fn builtin_type_identity() {
        assert!(Rc::ptr_eq(&int_type(), &int_type()));
        assert!(!Rc::ptr_eq(&int_type(), &double_type()));
    }

    #[test]
    fn unit_convert_accepts_numbers_and_same_type_units() {
        let d = duration_type();
        let v = unit_convert(&d, "seconds", &Val::Int(3)).unwrap();
        match v {
            Val::Unit(u) => {
                assert_eq!(u.v, 3.0);
                assert_eq!(u.f, 1e9);
            }
            other => panic!("expected unit value, got {other:?}"),
        }
        let minute = Val::Unit(UnitVal {
            v: 1.0,
            f: 6e10,
            typ: Rc::clone(&d),
        });
        let v = unit_convert(&d, "seconds", &minute).unwrap();
        match v {
            Val::Unit(u) => {
                assert_eq!(u.v, 60.0);
                assert_eq!(u.f, 1e9);
            }
            other => panic!("expected unit value, got {other:?}"),
        }
        assert!(unit_convert(&d, "duration", &Val::Int(1)).is_err());
        assert!(unit_convert(&d, "seconds", &Val::Str("x".to_string())).is_err());
    }

    #[test]
    fn type_check_matches_identity() {
        assert!(type_check(&Val::Int(1), &int_type()).is_ok());
        assert!(type_check(&Val::Double(1.0), &double_type()).is_ok());
        assert!(type_check(&Val::Str("s".to_string()), &string_type()).is_ok());
        let err = type_check(&Val::Int(1), &double_type()).unwrap_err();
        assert!(err.contains("incompatible types"), "got: {err}");
        assert!(type_check(&Val::Bool(true), &bool_type()).is_err());
    }

    #[test]
    fn lenient_parse_time_layouts() {
        let r = lenient_parse_time("2024-03-05 06:07:08 +0100").unwrap();
        assert_eq!(r.fields.get("hour"), Some(&Val::Int(6)));
        assert_eq!(r.fields.get("offset"), Some(&Val::Int(3600)));

        let r = lenient_parse_time("2024-03-05 06:07:08").unwrap();
        assert_eq!(r.fields.get("offset"), Some(&Val::Int(0)));

        let r = lenient_parse_time("2024-03-05T06:07:08+02:00").unwrap();
        assert_eq!(r.fields.get("offset"), Some(&Val::Int(7200)));

        let r = lenient_parse_time("2024-03-05").unwrap();
        assert_eq!(r.fields.get("year"), Some(&Val::Int(2024)));
        assert_eq!(r.fields.get("hour"), Some(&Val::Int(0)));

        let r = lenient_parse_time("Tue, 05 Mar 2024 06:07:08 +0000").unwrap();
        assert_eq!(r.fields.get("day"), Some(&Val::Int(5)));

        assert!(lenient_parse_time("not a time").is_err());
    }

    #[test]
    fn time_encode_roundtrip() {
        let r = lenient_parse_time("2024-03-05T06:07:08+02:00").unwrap();
        let v = time_encode(&Val::Rec(Rc::new(r))).unwrap();
        assert_eq!(v, Val::Str("2024-03-05T06:07:08+02:00".to_string()));

        let r = lenient_parse_time("2024-03-05 06:07:08").unwrap();
        let v = time_encode(&Val::Rec(Rc::new(r))).unwrap();
        assert_eq!(v, Val::Str("2024-03-05T06:07:08Z".to_string()));
    }
}
