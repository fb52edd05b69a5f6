//! JSON and YAML emission.
//!
//! One manual [`Serialize`] impl feeds both serializers: records become
//! maps (in sorted key order, so compact output is deterministic), lists
//! become sequences, nil becomes null, unit values emit their magnitude in
//! the currently-held multiple, and typed values emit through their type's
//! `encode` when present. Callables are not representable and error out.
//! HTML-sensitive characters (`<`, `>`, `&`) are not escaped; this output
//! is configuration, not HTML.

use serde::ser::{Error as _, Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::errors::Error;
use crate::values::Val;

impl Serialize for Val {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Val::Nil => serializer.serialize_unit(),
            Val::Bool(b) => serializer.serialize_bool(*b),
            Val::Int(i) => serializer.serialize_i64(*i),
            Val::Double(d) => serialize_double(serializer, *d),
            Val::Str(s) => serializer.serialize_str(s),
            Val::Rec(r) => {
                let mut keys: Vec<&String> = r.fields.keys().collect();
                keys.sort();
                let mut map = serializer.serialize_map(Some(keys.len()))?;
                for key in keys {
                    map.serialize_entry(key, &r.fields[key])?;
                }
                map.end()
            }
            Val::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.len()))?;
                for v in l.iter() {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            // Unit values are user-visible numbers, not structured records.
            Val::Unit(u) => serialize_double(serializer, u.v),
            Val::Typed(t) => match &t.typ.encode {
                Some(encode) => {
                    let encoded = encode(&t.value).map_err(S::Error::custom)?;
                    encoded.serialize(serializer)
                }
                None => t.value.serialize(serializer),
            },
            Val::Native(n) => Err(S::Error::custom(format!(
                "cannot encode builtin function {}",
                n.name
            ))),
            Val::Closure(_) => Err(S::Error::custom("cannot encode function values")),
        }
    }
}

/// Doubles with an integral value emit without a fraction (423, not 423.0),
/// matching the canonical rendering of numbers.
fn serialize_double<S: Serializer>(serializer: S, d: f64) -> Result<S::Ok, S::Error> {
    if d.is_finite() && d.fract() == 0.0 && d.abs() <= i64::MAX as f64 {
        return serializer.serialize_i64(d as i64);
    }
    serializer.serialize_f64(d)
}

/// Encodes `v` as compact JSON (no whitespace).
pub fn encode_as_json(v: &Val) -> Result<String, Error> {
    serde_json::to_string(v).map_err(|e| Error::msg(format!("json encoding failed: {e}")))
}

/// Encodes `v` as pretty-printed JSON with two-space indentation.
pub fn encode_as_json_indent(v: &Val) -> Result<String, Error> {
    serde_json::to_string_pretty(v).map_err(|e| Error::msg(format!("json encoding failed: {e}")))
}

/// Encodes `v` as YAML.
pub fn encode_as_yaml(v: &Val) -> Result<String, Error> {
    serde_yaml::to_string(v).map_err(|e| Error::msg(format!("yaml encoding failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{eval, Ctx};
    use crate::parser::parse_expression;

    fn encode(input: &str) -> String {
        let expr = parse_expression(input)
            .unwrap_or_else(|e| panic!("parse of {input:?} failed: {e}"));
        let v = eval(&expr, &Ctx::global())
            .unwrap_or_else(|e| panic!("eval of {input:?} failed: {e}"));
        encode_as_json(&v).unwrap_or_else(|e| panic!("encoding of {input:?} failed: {e}"))
    }

    fn encode_yaml(input: &str) -> String {
        let expr = parse_expression(input)
            .unwrap_or_else(|e| panic!("parse of {input:?} failed: {e}"));
        let v = eval(&expr, &Ctx::global())
            .unwrap_or_else(|e| panic!("eval of {input:?} failed: {e}"));
        encode_as_yaml(&v).unwrap_or_else(|e| panic!("encoding of {input:?} failed: {e}"))
    }

    #[test]
    fn encodes_scalars_and_containers() {
        assert_eq!(encode("1 + 3"), "4");
        assert_eq!(encode("{x: 1}"), r#"{"x":1}"#);
        assert_eq!(
            encode("{x: 1 y: 'a' z: false w: 1e6}"),
            r#"{"w":1000000,"x":1,"y":"a","z":false}"#
        );
        assert_eq!(encode("{x: {y: {z: 0}}}"), r#"{"x":{"y":{"z":0}}}"#);
        assert_eq!(encode("{x: nil}"), r#"{"x":null}"#);
        assert_eq!(encode("{x: [1, 2]}"), r#"{"x":[1,2]}"#);
        assert_eq!(encode("2.5"), "2.5");
        assert_eq!(encode("{let f(x): x + '.exe' y: f('konfi')}"), r#"{"y":"konfi.exe"}"#);
    }

    #[test]
    fn html_sensitive_characters_are_not_escaped() {
        assert_eq!(encode("{x: '<>'}"), r#"{"x":"<>"}"#);
        assert_eq!(encode("['<&>']"), r#"["<&>"]"#);
    }

    #[test]
    fn unit_values_emit_their_magnitude() {
        assert_eq!(encode("{x: 7::minutes y: 7::hours}"), r#"{"x":7,"y":7}"#);
        assert_eq!(encode("{d: 7::minutes + 3::seconds}"), r#"{"d":423}"#);
        assert_eq!(encode("{d: 1.5::seconds}"), r#"{"d":1.5}"#);
    }

    #[test]
    fn end_to_end_scenarios() {
        assert_eq!(encode("{x: 3 * 10 + 1}"), r#"{"x":31}"#);
        assert_eq!(
            encode("{let adder: func (n) { func (k) { n + k } } add3: adder(3) y: add3(4)}"),
            r#"{"y":7}"#
        );
        assert_eq!(
            encode("{let fac(n): if n == 0 then 1 else n * fac(n-1) y: fac(10)}"),
            r#"{"y":3628800}"#
        );
        assert_eq!(
            encode("({y: {z: 1, w: 2}} @ {y: {z: 0}})"),
            r#"{"y":{"w":2,"z":0}}"#
        );
        assert_eq!(
            encode(r#"{s: "a.b=${ {a:{b:1}}.a.b }"}"#),
            r#"{"s":"a.b=1"}"#
        );
    }

    #[test]
    fn typed_values_encode_through_their_type() {
        assert_eq!(
            encode("{t: '2024-03-05T06:07:08+02:00'::time}"),
            r#"{"t":"2024-03-05T06:07:08+02:00"}"#
        );
    }

    #[test]
    fn callables_are_rejected() {
        let expr = parse_expression("{f: func (x) { x }}").expect("parse");
        let v = eval(&expr, &Ctx::global()).expect("eval");
        assert!(encode_as_json(&v).is_err());
        assert!(encode_as_yaml(&v).is_err());
        let expr = parse_expression("{f: len}").expect("parse");
        let v = eval(&expr, &Ctx::global()).expect("eval");
        assert!(encode_as_json(&v).is_err());
    }

    #[test]
    fn pretty_printing_differs_only_in_whitespace() {
        let expr = parse_expression("{x: [1], y: 2}").expect("parse");
        let v = eval(&expr, &Ctx::global()).expect("eval");
        let pretty = encode_as_json_indent(&v).expect("encode");
        assert_eq!(pretty, "{\n  \"x\": [\n    1\n  ],\n  \"y\": 2\n}");
        let compact: String = pretty.chars().filter(|c| !c.is_whitespace()).collect();
        assert_eq!(compact, encode_as_json(&v).expect("encode"));
    }

    #[test]
    fn yaml_output() {
        assert_eq!(encode_yaml("{x: 1}"), "x: 1\n");
        assert_eq!(encode_yaml("[1, 2]"), "- 1\n- 2\n");
        assert_eq!(encode_yaml("{d: 7::minutes + 3::seconds}"), "d: 423\n");
        assert_eq!(encode_yaml("nil"), "null\n");
    }
}
