// src/runtime/stringify.rs
//! Human-readable rendering of values

use std::rc::Rc;

use crate::runtime::object::ObjectData;
use crate::runtime::value::{Payload, Value};

/// Significant digits used for non-integral numbers
const SIGNIFICANT_DIGITS: usize = 8;

/// Relative error a rendered number must stay within
const ROUND_TRIP_TOLERANCE: f64 = 1e-8;

/// Nesting beyond this renders as `...`
const MAX_DEPTH: usize = 64;

/// Render a value. With `quote`, strings (and object keys) are double-quoted.
///
/// A list or object met again while it is still being rendered prints as
/// `[...]` or `{...}`.
pub fn stringify(value: &Value, quote: bool) -> String {
    let mut out = String::new();
    let mut open = Vec::new();
    write_value(&mut out, value, quote, &mut open);
    out
}

/// `open` holds the containers currently being rendered, outermost first
fn write_value(out: &mut String, value: &Value, quote: bool, open: &mut Vec<*const ()>) {
    if open.len() > MAX_DEPTH {
        out.push_str("...");
        return;
    }

    match value.payload() {
        Payload::Number(n) => out.push_str(&format_number(*n)),
        Payload::String(s) => {
            if quote {
                write_quoted(out, s);
            } else {
                out.push_str(s);
            }
        }
        Payload::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Payload::None => out.push_str("None"),
        Payload::List(items) => {
            let ptr = Rc::as_ptr(items).cast::<()>();
            if open.contains(&ptr) {
                out.push_str("[...]");
                return;
            }
            open.push(ptr);
            out.push('[');
            for (i, item) in items.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, quote, open);
            }
            out.push(']');
            open.pop();
        }
        Payload::Object(object) => {
            let ptr = Rc::as_ptr(object).cast::<()>();
            if open.contains(&ptr) {
                out.push_str("{...}");
                return;
            }
            open.push(ptr);
            write_object(out, &object.borrow(), quote, open);
            open.pop();
        }
        Payload::Type(ty) => {
            out.push_str("<type ");
            out.push_str(&ty.name);
            out.push('>');
        }
        Payload::Function(function) => {
            out.push_str("<function ");
            out.push_str(&function.borrow().name);
            out.push('>');
        }
        Payload::Native(native) => {
            out.push_str("<native ");
            out.push_str(&native.name);
            out.push('>');
        }
        Payload::Pointer(handle) => {
            out.push_str("<pointer ");
            out.push_str(handle.owner());
            out.push('>');
        }
    }
}

fn write_object(out: &mut String, object: &ObjectData, quote: bool, open: &mut Vec<*const ()>) {
    if let Some(name) = object.type_name().filter(|n| !n.is_empty()) {
        out.push_str(name);
        out.push(' ');
    }
    if object.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{ ");
    for (i, (key, field)) in object.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        if quote {
            write_quoted(out, key);
        } else {
            out.push_str(key);
        }
        out.push_str(": ");
        write_value(out, field, quote, open);
    }
    out.push_str(" }");
}

fn write_quoted(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Render a number in its shortest readable form
///
/// Integral values print without a fractional part. Other values print with up
/// to eight significant digits, falling back to the shortest exact form when
/// eight digits would drift past the round-trip tolerance.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 {
        if n == 0.0 {
            return "0".to_string();
        }
        return format!("{n:.0}");
    }

    let short = significant(n, SIGNIFICANT_DIGITS);
    match short.parse::<f64>() {
        Ok(parsed) if ((parsed - n) / n).abs() <= ROUND_TRIP_TOLERANCE => short,
        _ => n.to_string(),
    }
}

/// `%g`-style formatting with `digits` significant digits
fn significant(n: f64, digits: usize) -> String {
    let scientific = format!("{:.*e}", digits - 1, n);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return n.to_string();
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let precision = i32::try_from(digits).unwrap_or(i32::MAX);

    if exponent < -4 || exponent >= precision {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = usize::try_from(precision - 1 - exponent).unwrap_or(0);
        trim_fraction(&format!("{n:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::object::{ObjectData, TypeDef};
    use std::rc::Rc;

    #[test]
    fn test_integral_numbers() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn test_fractional_numbers() {
        assert_eq!(format_number(3.5), "3.5");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(2.5e-3), "0.0025");
        assert_eq!(format_number(0.00001234), "1.234e-05");
        assert_eq!(format_number(123456789.5), "1.2345679e+08");
    }

    #[test]
    fn test_fractional_falls_back_when_too_lossy() {
        let n = 1.000_000_05;
        let rendered = format_number(n);
        let parsed: f64 = rendered.parse().unwrap();
        assert!(((parsed - n) / n).abs() <= ROUND_TRIP_TOLERANCE);
    }

    #[test]
    fn test_special_numbers() {
        assert_eq!(format_number(f64::NAN), "nan");
        assert_eq!(format_number(f64::INFINITY), "inf");
        assert_eq!(format_number(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_strings_and_quote_mode() {
        let s = Value::string("say \"hi\"\n");
        assert_eq!(stringify(&s, false), "say \"hi\"\n");
        assert_eq!(stringify(&s, true), "\"say \\\"hi\\\"\\n\"");
    }

    #[test]
    fn test_lists_recurse_with_quote_mode() {
        let list = Value::list(vec![
            Value::number(1.0),
            Value::string("a"),
            Value::list(vec![Value::boolean(true), Value::none()]),
        ]);
        assert_eq!(stringify(&list, false), "[1, a, [true, None]]");
        assert_eq!(stringify(&list, true), "[1, \"a\", [true, None]]");
        assert_eq!(stringify(&Value::list(vec![]), true), "[]");
    }

    #[test]
    fn test_object_follows_key_order() {
        let mut object = ObjectData::new();
        object.set("x", Value::number(1.0));
        object.set("y", Value::string("a"));
        let value = Value::object(object);

        assert_eq!(stringify(&value, true), r#"{ "x": 1, "y": "a" }"#);
        assert_eq!(stringify(&value, false), "{ x: 1, y: a }");
    }

    #[test]
    fn test_typed_object_prefix() {
        let ty = Rc::new(TypeDef::new("Point").field("x", Value::none(), Some(Value::number(2.0))));
        let value = Value::object(ObjectData::instantiate(&ty));
        assert_eq!(stringify(&value, false), "Point { x: 2 }");
        assert_eq!(stringify(&Value::object(ObjectData::new()), false), "{}");
    }

    #[test]
    fn test_opaque_placeholders() {
        assert_eq!(stringify(&Value::type_value(TypeDef::new("Point")), false), "<type Point>");
        assert_eq!(stringify(&Value::new(crate::Tag::Pointer), false), "<pointer null>");
        assert_eq!(stringify(&Value::new(crate::Tag::Native), false), "<native none>");
    }

    #[test]
    fn test_self_referencing_list_terminates() {
        let list = Value::list(vec![]);
        list.as_list().borrow_mut().push(list.clone());
        assert_eq!(stringify(&list, false), "[[...]]");
    }

    #[test]
    fn test_repeated_self_references_render_once_each() {
        let list = Value::list(vec![]);
        for _ in 0..3 {
            list.as_list().borrow_mut().push(list.clone());
        }
        assert_eq!(stringify(&list, false), "[[...], [...], [...]]");
    }

    #[test]
    fn test_shared_but_acyclic_values_render_in_full() {
        let inner = Value::list(vec![Value::number(1.0)]);
        let outer = Value::list(vec![inner.clone(), inner]);
        assert_eq!(stringify(&outer, false), "[[1], [1]]");
    }

    #[test]
    fn test_object_cycle_through_field() {
        let object = Value::object(ObjectData::new());
        object.as_object().borrow_mut().set("me", object.clone());
        assert_eq!(stringify(&object, false), "{ me: {...} }");
    }
}
