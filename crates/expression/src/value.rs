//! Helpers for working with `serde_json::Value` as an expression value.

use serde_json::{Number, Value};

/// Type name of a value for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Build a JSON number from an `f64`, keeping integral values as integers
/// so `1 + 1` yields `2` rather than `2.0`.
pub fn number(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Numeric view of a value, if it has one.
///
/// Numeric strings convert; `null` counts as `0`.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Truthiness: `null`, `false`, `0`, `NaN` and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form used when a value is spliced into text.
///
/// Strings are inserted raw, `null` becomes the empty string, integral
/// floats lose their trailing `.0`, containers become compact JSON.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.is_finite() => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Walk `segments` down from `root`. Object keys match by name, array
/// elements by decimal index.
pub fn walk<'a, S: AsRef<str>>(root: &'a Value, segments: &[S]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| {
        let segment = segment.as_ref();
        match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integral_floats_become_integers() {
        assert_eq!(number(2.0), json!(2));
        assert_eq!(number(-3.0), json!(-3));
        assert_eq!(number(0.5), json!(0.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }

    #[test]
    fn text_form_of_values() {
        assert_eq!(to_text(&json!("t1")), "t1");
        assert_eq!(to_text(&json!(1)), "1");
        assert_eq!(to_text(&json!(2.0)), "2");
        assert_eq!(to_text(&json!(1.25)), "1.25");
        assert_eq!(to_text(&Value::Null), "");
        assert_eq!(to_text(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn walk_objects_and_arrays() {
        let root = json!({"data": {"tags": ["x", "y"], "read": 1}});
        assert_eq!(walk(&root, &["data", "read"]), Some(&json!(1)));
        assert_eq!(walk(&root, &["data", "tags", "1"]), Some(&json!("y")));
        assert_eq!(walk(&root, &["data", "missing"]), None);
        assert_eq!(walk(&root, &["data", "read", "deeper"]), None);
        assert_eq!(walk::<&str>(&root, &[]), Some(&root));
    }

    #[test]
    fn numeric_view() {
        assert_eq!(to_number(&json!(" 4 ")), Some(4.0));
        assert_eq!(to_number(&Value::Null), Some(0.0));
        assert_eq!(to_number(&json!("abc")), None);
        assert_eq!(to_number(&json!([1])), None);
    }
}
