//! ICU-style message format rendering.
//!
//! Only simple `{name}` arguments are substituted. Complex arguments such as
//! `{count, plural, ...}` and unknown names are left verbatim.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde_json::Value;

/// Render `format` by substituting `{name}` placeholders from `attributes`.
pub fn format_message(format: &str, attributes: &BTreeMap<String, Value>) -> String {
    let mut out = String::with_capacity(format.len());
    let mut rest = format;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let arg = &after[..end];
        match attributes.get(arg.trim()) {
            Some(value) if is_simple_argument(arg) => render_value(&mut out, value),
            _ => {
                out.push('{');
                out.push_str(arg);
                out.push('}');
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn is_simple_argument(arg: &str) -> bool {
    !arg.is_empty()
        && arg
            .trim()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn render_value(out: &mut String, value: &Value) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Null => out.push_str("<nil>"),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitutes_string_and_number_arguments() {
        let a = attrs(&[("field", json!("cups_uri")), ("max", json!(255))]);
        assert_eq!(
            format_message("field `{field}` exceeds {max} bytes", &a),
            "field `cups_uri` exceeds 255 bytes"
        );
    }

    #[test]
    fn leaves_unknown_arguments_verbatim() {
        let a = attrs(&[]);
        assert_eq!(format_message("gateway `{id}`", &a), "gateway `{id}`");
    }

    #[test]
    fn leaves_plural_arguments_verbatim() {
        let a = attrs(&[("count", json!(2))]);
        assert_eq!(
            format_message("{count, plural, one {# key} other {# keys}}", &a),
            "{count, plural, one {# key} other {# keys}}"
        );
    }

    #[test]
    fn unterminated_brace_is_kept() {
        let a = attrs(&[("x", json!(1))]);
        assert_eq!(format_message("open {x", &a), "open {x");
    }
}
