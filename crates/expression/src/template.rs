//! `{{ path }}` placeholder scanning and substitution.
//!
//! Two substitution modes:
//! - [`Mode::Coerce`]: every resolved value is spliced in as text; the
//!   result is always a string.
//! - [`Mode::Preserve`]: when the whole (trimmed) template is exactly one
//!   placeholder, the resolved value is returned as-is, keeping its type.
//!   Mixed text falls back to coerce.
//!
//! Absent paths substitute as the empty string (coerce) or `null`
//! (preserve). A `{{` with no closing `}}` is plain text.

use std::ops::Range;

use serde_json::Value;
use tracing::trace;

use crate::error::TemplateError;
use crate::namespace::Scope;
use crate::value::to_text;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Substitution policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Coerce,
    Preserve,
}

/// One placeholder found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<'a> {
    /// Byte range of the whole token, delimiters included.
    pub range: Range<usize>,
    /// The trimmed dotted path between the delimiters.
    pub path: &'a str,
}

/// Find every placeholder, left to right.
pub fn scan(template: &str) -> Result<Vec<Placeholder<'_>>, TemplateError> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(rel_open) = template[cursor..].find(OPEN) {
        let mut open = cursor + rel_open;
        let Some(rel_close) = template[open + OPEN.len()..].find(CLOSE) else {
            break;
        };
        let close = open + OPEN.len() + rel_close;

        // `{{ a {{b}}`: the innermost opener wins.
        if let Some(inner) = template[open + OPEN.len()..close].rfind(OPEN) {
            open += OPEN.len() + inner;
        }

        let path = template[open + OPEN.len()..close].trim();
        if path.is_empty() {
            return Err(TemplateError::EmptyPath(open));
        }

        found.push(Placeholder {
            range: open..close + CLOSE.len(),
            path,
        });
        cursor = close + CLOSE.len();
    }

    Ok(found)
}

/// The path of the placeholder if the trimmed template is exactly one
/// placeholder and nothing else.
pub fn single_placeholder(template: &str) -> Option<&str> {
    let trimmed = template.trim();
    let placeholders = scan(trimmed).ok()?;
    match placeholders.as_slice() {
        [only] if only.range == (0..trimmed.len()) => Some(only.path),
        _ => None,
    }
}

/// Resolve every placeholder in `template` against `scope`.
pub fn resolve(template: &str, scope: &dyn Scope, mode: Mode) -> Result<Value, TemplateError> {
    resolve_outside(template, scope, mode, &[])
}

/// Like [`resolve`], but a placeholder starting inside any of `literals`
/// is not looked up: it becomes its bare path padded with one space on
/// each side, so `'{{x.y}}'` inside a string literal reads `' x.y '`.
pub fn resolve_outside(
    template: &str,
    scope: &dyn Scope,
    mode: Mode,
    literals: &[Range<usize>],
) -> Result<Value, TemplateError> {
    let placeholders = scan(template)?;

    if placeholders.is_empty() {
        return Ok(Value::String(template.to_owned()));
    }

    let quoted = |p: &Placeholder<'_>| literals.iter().any(|lit| lit.contains(&p.range.start));

    if mode == Mode::Preserve {
        if let [only] = placeholders.as_slice() {
            if !quoted(only) && template.trim() == &template[only.range.clone()] {
                let value = scope.lookup_path(only.path).unwrap_or(Value::Null);
                trace!(path = only.path, "preserved placeholder");
                return Ok(value);
            }
        }
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for placeholder in &placeholders {
        out.push_str(&template[last..placeholder.range.start]);
        if quoted(placeholder) {
            out.push(' ');
            out.push_str(placeholder.path);
            out.push(' ');
        } else if let Some(value) = scope.lookup_path(placeholder.path) {
            out.push_str(&to_text(&value));
        } else {
            trace!(path = placeholder.path, "placeholder resolved to absent");
        }
        last = placeholder.range.end;
    }
    out.push_str(&template[last..]);

    Ok(Value::String(out))
}

/// Resolve every string nested inside `value` in `mode`, leaving the
/// structure and non-string leaves intact.
pub fn resolve_deep(value: &Value, scope: &dyn Scope, mode: Mode) -> Result<Value, TemplateError> {
    Ok(match value {
        Value::String(s) => resolve(s, scope, mode)?,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_deep(item, scope, mode))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_deep(v, scope, mode)?)))
                .collect::<Result<_, TemplateError>>()?,
        ),
        other => other.clone(),
    })
}
