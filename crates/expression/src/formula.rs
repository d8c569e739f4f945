//! `formula.js`: the spreadsheet-function engine.
//!
//! Excel-style expressions: `CONCATENATE('a', t1)`, `IF(A > 1, "x", "y")`,
//! `"a" & "b"`. A leading `=` is allowed. Function names are
//! case-insensitive.
//!
//! Bare words are literal text, so a value substituted as text by the
//! template resolver (`CONCATENATE('a', t1)`) is read as the string
//! `"t1"`. A bare word is only looked up in the scope when the scope has a
//! matching root key.

use std::ops::Range;

use serde_json::{Map, Value};

use crate::engine::ExpressionEngine;
use crate::error::EvalError;
use crate::lexer::{quoted_spans, tokenize, Cursor, Tok};
use crate::value::{is_truthy, number, to_number, type_name, walk};

const MAX_DEPTH: usize = 128;
/// Longest text a cell can hold.
const MAX_TEXT_LEN: usize = 32_767;

/// The spreadsheet evaluator registered as `"formula.js"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaEngine;

impl FormulaEngine {
    pub const ID: &'static str = "formula.js";
}

impl ExpressionEngine for FormulaEngine {
    fn evaluate(&self, expression: &str, scope: &Map<String, Value>) -> Result<Value, EvalError> {
        let src = expression.trim_start();
        let src = src.strip_prefix('=').unwrap_or(src);
        let mut parser = Parser {
            src,
            cursor: Cursor::new(tokenize(src)?, src.len()),
            scope,
            depth: 0,
        };
        let value = parser.compare()?;
        if !parser.cursor.is_done() {
            return Err(parser.cursor.unexpected("end of formula"));
        }
        Ok(value)
    }

    fn literal_spans(&self, expression: &str) -> Vec<Range<usize>> {
        quoted_spans(expression)
    }
}

/// Formulas are evaluated while parsing; there is no short-circuiting
/// beyond what the functions themselves do with already-computed values.
struct Parser<'a> {
    src: &'a str,
    cursor: Cursor,
    scope: &'a Map<String, Value>,
    depth: usize,
}

impl Parser<'_> {
    fn descend(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::Range(format!("#VALUE! formula nested deeper than {MAX_DEPTH}")));
        }
        Ok(())
    }

    fn compare(&mut self) -> Result<Value, EvalError> {
        self.descend()?;
        let mut left = self.concat()?;
        loop {
            let op = ["<=", ">=", "<>", "=", "<", ">"]
                .into_iter()
                .find(|op| self.cursor.eat_op(op));
            let Some(op) = op else {
                self.depth -= 1;
                return Ok(left);
            };
            let right = self.concat()?;
            left = Value::Bool(compare(op, &left, &right)?);
        }
    }

    fn concat(&mut self) -> Result<Value, EvalError> {
        let mut left = self.additive()?;
        while self.cursor.eat_op("&") {
            let right = self.additive()?;
            left = Value::String(format!("{}{}", text(&left), text(&right)));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Value, EvalError> {
        let mut left = self.multiplicative()?;
        loop {
            let sign = if self.cursor.eat_op("+") {
                1.0
            } else if self.cursor.eat_op("-") {
                -1.0
            } else {
                return Ok(left);
            };
            let right = self.multiplicative()?;
            left = number(num("+", &left)? + sign * num("+", &right)?);
        }
    }

    fn multiplicative(&mut self) -> Result<Value, EvalError> {
        let mut left = self.unary()?;
        loop {
            let right;
            if self.cursor.eat_op("*") {
                right = self.unary()?;
                left = number(num("*", &left)? * num("*", &right)?);
            } else if self.cursor.eat_op("/") {
                right = self.unary()?;
                let divisor = num("/", &right)?;
                if divisor == 0.0 {
                    return Err(EvalError::Range("#DIV/0! division by zero".into()));
                }
                left = number(num("/", &left)? / divisor);
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self) -> Result<Value, EvalError> {
        let negate = if self.cursor.eat_op("-") {
            true
        } else if self.cursor.eat_op("+") {
            false
        } else {
            return self.power();
        };
        self.descend()?;
        let v = self.unary()?;
        self.depth -= 1;
        if negate {
            Ok(number(-num("-", &v)?))
        } else {
            Ok(v)
        }
    }

    fn power(&mut self) -> Result<Value, EvalError> {
        let mut base = self.primary()?;
        while self.cursor.eat_op("^") {
            let exponent = self.primary()?;
            let n = num("^", &base)?.powf(num("^", &exponent)?);
            if !n.is_finite() {
                return Err(EvalError::Range("#NUM! result is not a finite number".into()));
            }
            base = number(n);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Value, EvalError> {
        let Some(token) = self.cursor.next() else {
            return Err(self.cursor.unexpected("a value"));
        };
        match token.tok {
            Tok::Number(n) => Ok(number(n)),
            Tok::Str(s) => Ok(Value::String(s)),
            Tok::LParen => {
                let inner = self.compare()?;
                self.cursor.expect(&Tok::RParen, "parenthesis )")?;
                Ok(inner)
            }
            Tok::Ident(name) => {
                if self.cursor.eat(&Tok::LParen) {
                    let args = self.arguments()?;
                    return call(&name, args);
                }
                match name.to_ascii_uppercase().as_str() {
                    "TRUE" => return Ok(Value::Bool(true)),
                    "FALSE" => return Ok(Value::Bool(false)),
                    _ => {}
                }
                if let Some(value) = self.lookup(&name) {
                    return Ok(value);
                }
                Ok(Value::String(self.bare_text(token.span)))
            }
            Tok::Op(_) | Tok::RParen | Tok::Comma => Err(EvalError::Syntax(format!(
                "Value expected (char {})",
                token.span.start + 1
            ))),
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        let mut segments = name.split('.');
        let root = self.scope.get(segments.next()?)?;
        let rest: Vec<&str> = segments.collect();
        walk(root, &rest).cloned()
    }

    /// A run of words and numbers is one piece of literal text, taken
    /// verbatim from the source.
    fn bare_text(&mut self, first: Range<usize>) -> String {
        let mut end = first.end;
        while matches!(self.cursor.peek(), Some(Tok::Ident(_) | Tok::Number(_))) {
            if let Some(token) = self.cursor.next() {
                end = token.span.end;
            }
        }
        self.src[first.start..end].to_owned()
    }

    fn arguments(&mut self) -> Result<Vec<Value>, EvalError> {
        let mut args = Vec::new();
        if self.cursor.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.compare()?);
            if self.cursor.eat(&Tok::Comma) {
                continue;
            }
            self.cursor.expect(&Tok::RParen, "parenthesis )")?;
            return Ok(args);
        }
    }
}

// ---------------------------------------------------------------------------
// Value conversions
// ---------------------------------------------------------------------------

fn text(v: &Value) -> String {
    match v {
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        other => crate::value::to_text(other),
    }
}

fn num(function: &str, v: &Value) -> Result<f64, EvalError> {
    to_number(v).ok_or_else(|| {
        EvalError::Type(format!(
            "#VALUE! {function} expects a number, got {} {}",
            type_name(v),
            text(v)
        ))
    })
}

fn compare(op: &str, left: &Value, right: &Value) -> Result<bool, EvalError> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        _ => {
            let a = num(op, left)?;
            let b = num(op, right)?;
            a.partial_cmp(&b)
                .ok_or_else(|| EvalError::Type("#VALUE! cannot compare NaN".into()))?
        }
    };
    Ok(match op {
        "=" => ordering.is_eq(),
        "<>" => ordering.is_ne(),
        "<" => ordering.is_lt(),
        "<=" => ordering.is_le(),
        ">" => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(EvalError::Type(format!(
            "#N/A {name} takes {expected} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn flatten(args: Vec<Value>) -> Vec<Value> {
    args.into_iter()
        .flat_map(|a| match a {
            Value::Array(items) => items,
            other => vec![other],
        })
        .collect()
}

fn count_arg(name: &str, v: Option<&Value>, default: usize) -> Result<usize, EvalError> {
    match v {
        None => Ok(default),
        Some(v) => {
            let n = num(name, v)?;
            if n < 0.0 {
                return Err(EvalError::Range(format!("#VALUE! {name} count must not be negative")));
            }
            Ok(n as usize)
        }
    }
}

fn call(name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
    let upper = name.to_ascii_uppercase();
    let name = upper.as_str();

    Ok(match name {
        "CONCATENATE" | "CONCAT" => {
            Value::String(flatten(args).iter().map(text).collect::<String>())
        }
        "UPPER" | "LOWER" | "TRIM" | "LEN" => {
            arity(name, &args, 1, 1)?;
            let s = text(&args[0]);
            match name {
                "UPPER" => Value::String(s.to_uppercase()),
                "LOWER" => Value::String(s.to_lowercase()),
                "TRIM" => Value::String(s.split_whitespace().collect::<Vec<_>>().join(" ")),
                _ => number(s.chars().count() as f64),
            }
        }
        "LEFT" | "RIGHT" => {
            arity(name, &args, 1, 2)?;
            let s: Vec<char> = text(&args[0]).chars().collect();
            let n = count_arg(name, args.get(1), 1)?.min(s.len());
            let picked = if name == "LEFT" { &s[..n] } else { &s[s.len() - n..] };
            Value::String(picked.iter().collect())
        }
        "MID" => {
            arity(name, &args, 3, 3)?;
            let s: Vec<char> = text(&args[0]).chars().collect();
            let start = count_arg(name, args.get(1), 1)?;
            if start == 0 {
                return Err(EvalError::Range("#VALUE! MID start must be at least 1".into()));
            }
            let n = count_arg(name, args.get(2), 0)?;
            Value::String(s.iter().skip(start - 1).take(n).collect())
        }
        "SUBSTITUTE" => {
            arity(name, &args, 3, 3)?;
            let old = text(&args[1]);
            if old.is_empty() {
                return Ok(Value::String(text(&args[0])));
            }
            Value::String(text(&args[0]).replace(&old, &text(&args[2])))
        }
        "REPT" => {
            arity(name, &args, 2, 2)?;
            let s = text(&args[0]);
            let times = count_arg(name, args.get(1), 0)?;
            match s.len().checked_mul(times) {
                Some(len) if len <= MAX_TEXT_LEN => Value::String(s.repeat(times)),
                _ => {
                    return Err(EvalError::Range(format!(
                        "#VALUE! REPT result longer than {MAX_TEXT_LEN} characters"
                    )))
                }
            }
        }
        "EXACT" => {
            arity(name, &args, 2, 2)?;
            Value::Bool(text(&args[0]) == text(&args[1]))
        }
        "SUM" | "AVERAGE" | "MIN" | "MAX" => {
            let values = flatten(args)
                .iter()
                .map(|v| num(name, v))
                .collect::<Result<Vec<_>, _>>()?;
            if values.is_empty() {
                if name == "AVERAGE" {
                    return Err(EvalError::Range("#DIV/0! AVERAGE of no values".into()));
                }
                return Ok(number(0.0));
            }
            let n = match name {
                "SUM" => values.iter().sum(),
                "AVERAGE" => values.iter().sum::<f64>() / values.len() as f64,
                "MIN" => values.iter().copied().fold(f64::INFINITY, f64::min),
                _ => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            number(n)
        }
        "ABS" | "INT" | "SQRT" => {
            arity(name, &args, 1, 1)?;
            let x = num(name, &args[0])?;
            match name {
                "ABS" => number(x.abs()),
                "INT" => number(x.floor()),
                _ if x < 0.0 => return Err(EvalError::Range("#NUM! SQRT of a negative number".into())),
                _ => number(x.sqrt()),
            }
        }
        "ROUND" => {
            arity(name, &args, 1, 2)?;
            let x = num(name, &args[0])?;
            let digits = match args.get(1) {
                Some(d) => num(name, d)?.trunc() as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            number((x * factor).round() / factor)
        }
        "MOD" => {
            arity(name, &args, 2, 2)?;
            let (a, b) = (num(name, &args[0])?, num(name, &args[1])?);
            if b == 0.0 {
                return Err(EvalError::Range("#DIV/0! MOD by zero".into()));
            }
            number(a - b * (a / b).floor())
        }
        "POWER" => {
            arity(name, &args, 2, 2)?;
            let n = num(name, &args[0])?.powf(num(name, &args[1])?);
            if !n.is_finite() {
                return Err(EvalError::Range("#NUM! result is not a finite number".into()));
            }
            number(n)
        }
        "IF" => {
            arity(name, &args, 2, 3)?;
            let mut args = args.into_iter();
            let cond = args.next().unwrap_or(Value::Null);
            let then = args.next().unwrap_or(Value::Null);
            let otherwise = args.next().unwrap_or(Value::Bool(false));
            if is_truthy(&cond) { then } else { otherwise }
        }
        "AND" => {
            arity(name, &args, 1, usize::MAX)?;
            Value::Bool(flatten(args).iter().all(is_truthy))
        }
        "OR" => {
            arity(name, &args, 1, usize::MAX)?;
            Value::Bool(flatten(args).iter().any(is_truthy))
        }
        "NOT" => {
            arity(name, &args, 1, 1)?;
            Value::Bool(!is_truthy(&args[0]))
        }
        _ => return Err(EvalError::Reference(format!("#NAME? unknown function {name}"))),
    })
}
