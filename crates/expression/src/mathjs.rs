//! `math.js`: the algebraic engine.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr     := or ( "?" expr ":" expr )?
//! or       := and ( ("or" | "||") and )*
//! and      := eq ( ("and" | "&&") eq )*
//! eq       := rel ( ("==" | "!=") rel )*
//! rel      := add ( ("<" | "<=" | ">" | ">=") add )*
//! add      := mul ( ("+" | "-") mul )*
//! mul      := unary ( ("*" | "/" | "%" | "mod") unary )*
//! unary    := ("-" | "+" | "!" | "not") unary | pow
//! pow      := primary ( "^" unary )?
//! primary  := number | string | "true" | "false" | "null"
//!           | ident "(" args ")" | ident | "(" expr ")"
//! ```
//!
//! Identifiers are dotted paths looked up in the scope; `pi` and `e` are
//! built-in constants.

use std::ops::Range;

use serde_json::{Map, Value};

use crate::engine::ExpressionEngine;
use crate::error::EvalError;
use crate::lexer::{quoted_spans, tokenize, Cursor, Tok};
use crate::value::{is_truthy, number, to_number, type_name, walk};

const MAX_DEPTH: usize = 128;
/// Upper bound on operator nodes in one expression. Operator chains parse
/// iteratively but build (and drop) a tree as deep as the chain is long.
const MAX_NODES: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Symbol(String),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
}

/// The algebraic evaluator registered as `"math.js"`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MathEngine;

impl MathEngine {
    pub const ID: &'static str = "math.js";
}

impl ExpressionEngine for MathEngine {
    fn evaluate(&self, expression: &str, scope: &Map<String, Value>) -> Result<Value, EvalError> {
        let ast = parse(expression)?;
        eval(&ast, scope, 0)
    }

    fn literal_spans(&self, expression: &str) -> Vec<Range<usize>> {
        quoted_spans(expression)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn parse(src: &str) -> Result<Expr, EvalError> {
    let mut cursor = Cursor::new(tokenize(src)?, src.len());
    let mut parser = Parser { cursor: &mut cursor, depth: 0, nodes: 0 };
    let expr = parser.expr()?;
    if !parser.cursor.is_done() {
        return Err(parser.cursor.unexpected("end of expression"));
    }
    Ok(expr)
}

struct Parser<'a> {
    cursor: &'a mut Cursor,
    depth: usize,
    nodes: usize,
}

impl Parser<'_> {
    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.cursor.peek(), Some(Tok::Ident(w)) if w == word)
    }

    fn eat_keyword_or_op(&mut self, word: &str, op: &str) -> bool {
        if self.is_keyword(word) {
            self.cursor.next();
            return true;
        }
        self.cursor.eat_op(op)
    }

    /// Every recursive production goes through here before recursing.
    fn descend(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::Range(format!("Maximum nesting depth ({MAX_DEPTH}) exceeded")));
        }
        Ok(())
    }

    fn binary(&mut self, op: BinOp, left: Expr, right: Expr) -> Result<Expr, EvalError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(EvalError::Range(format!("Expression has more than {MAX_NODES} operators")));
        }
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        self.descend()?;
        let cond = self.or()?;
        let result = if self.cursor.eat_op("?") {
            let then = self.expr()?;
            if !self.cursor.eat_op(":") {
                return Err(self.cursor.unexpected("\":\""));
            }
            let otherwise = self.expr()?;
            Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise))
        } else {
            cond
        };
        self.depth -= 1;
        Ok(result)
    }

    fn or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.and()?;
        while self.eat_keyword_or_op("or", "||") {
            let right = self.and()?;
            left = self.binary(BinOp::Or, left, right)?;
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.equality()?;
        while self.eat_keyword_or_op("and", "&&") {
            let right = self.equality()?;
            left = self.binary(BinOp::And, left, right)?;
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[("==", BinOp::Eq), ("!=", BinOp::Ne)], Self::relational)
    }

    fn relational(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(
            &[("<=", BinOp::Le), (">=", BinOp::Ge), ("<", BinOp::Lt), (">", BinOp::Gt)],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let op = if self.cursor.eat_op("*") {
                BinOp::Mul
            } else if self.cursor.eat_op("/") {
                BinOp::Div
            } else if self.eat_keyword_or_op("mod", "%") {
                BinOp::Mod
            } else {
                break;
            };
            let right = self.unary()?;
            left = self.binary(op, left, right)?;
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, EvalError>,
    ) -> Result<Expr, EvalError> {
        let mut left = next(self)?;
        'outer: loop {
            for (text, op) in ops {
                if self.cursor.eat_op(text) {
                    let right = next(self)?;
                    left = self.binary(*op, left, right)?;
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = if self.cursor.eat_op("-") {
            UnOp::Neg
        } else if self.cursor.eat_op("+") {
            UnOp::Plus
        } else if self.eat_keyword_or_op("not", "!") {
            UnOp::Not
        } else {
            return self.power();
        };
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.primary()?;
        if self.cursor.eat_op("^") {
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return self.binary(BinOp::Pow, base, exponent);
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let Some(token) = self.cursor.next() else {
            return Err(self.cursor.unexpected("a value"));
        };
        match token.tok {
            Tok::Number(n) => Ok(Expr::Literal(number(n))),
            Tok::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Tok::LParen => {
                let inner = self.expr()?;
                self.cursor.expect(&Tok::RParen, "parenthesis )")?;
                Ok(inner)
            }
            Tok::Ident(name) => {
                let literal = match name.as_str() {
                    "true" => Some(Value::Bool(true)),
                    "false" => Some(Value::Bool(false)),
                    "null" => Some(Value::Null),
                    _ => None,
                };
                if let Some(value) = literal {
                    return Ok(Expr::Literal(value));
                }
                if self.cursor.eat(&Tok::LParen) {
                    let args = self.arguments()?;
                    return Ok(Expr::Call(name, args));
                }
                Ok(Expr::Symbol(name))
            }
            Tok::Op(_) | Tok::RParen | Tok::Comma => Err(EvalError::Syntax(format!(
                "Value expected (char {})",
                token.span.start + 1
            ))),
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.cursor.eat(&Tok::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.cursor.eat(&Tok::Comma) {
                continue;
            }
            self.cursor.expect(&Tok::RParen, "parenthesis )")?;
            return Ok(args);
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(expr: &Expr, scope: &Map<String, Value>, depth: usize) -> Result<Value, EvalError> {
    if depth > MAX_DEPTH {
        return Err(EvalError::Range(format!("Maximum nesting depth ({MAX_DEPTH}) exceeded")));
    }
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Symbol(name) => symbol(name, scope),
        Expr::Unary(op, operand) => {
            let v = eval(operand, scope, depth + 1)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!is_truthy(&v))),
                UnOp::Neg => Ok(number(-numeric("unaryMinus", &v)?)),
                UnOp::Plus => Ok(number(numeric("unaryPlus", &v)?)),
            }
        }
        Expr::Binary(BinOp::And, l, r) => {
            let left = eval(l, scope, depth + 1)?;
            if !is_truthy(&left) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(is_truthy(&eval(r, scope, depth + 1)?)))
        }
        Expr::Binary(BinOp::Or, l, r) => {
            let left = eval(l, scope, depth + 1)?;
            if is_truthy(&left) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(is_truthy(&eval(r, scope, depth + 1)?)))
        }
        Expr::Binary(op, l, r) => {
            let left = eval(l, scope, depth + 1)?;
            let right = eval(r, scope, depth + 1)?;
            binary(*op, &left, &right)
        }
        Expr::Cond(cond, then, otherwise) => {
            if is_truthy(&eval(cond, scope, depth + 1)?) {
                eval(then, scope, depth + 1)
            } else {
                eval(otherwise, scope, depth + 1)
            }
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, scope, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values)
        }
    }
}

fn symbol(name: &str, scope: &Map<String, Value>) -> Result<Value, EvalError> {
    let mut segments = name.split('.');
    let head = segments.next().unwrap_or_default();
    let rest: Vec<&str> = segments.collect();

    if let Some(root) = scope.get(head) {
        return walk(root, &rest)
            .cloned()
            .ok_or_else(|| EvalError::Reference(format!("Undefined symbol {name}")));
    }
    match name {
        "pi" => Ok(number(std::f64::consts::PI)),
        "e" => Ok(number(std::f64::consts::E)),
        _ => Err(EvalError::Reference(format!("Undefined symbol {name}"))),
    }
}

fn numeric(function: &str, v: &Value) -> Result<f64, EvalError> {
    to_number(v).ok_or_else(|| {
        EvalError::Type(format!(
            "Unexpected type of argument in function {function} (expected: number, actual: {})",
            type_name(v)
        ))
    })
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let name = match op {
        BinOp::Add => "add",
        BinOp::Sub => "subtract",
        BinOp::Mul => "multiply",
        BinOp::Div => "divide",
        BinOp::Mod => "mod",
        BinOp::Pow => "pow",
        BinOp::Eq => "equal",
        BinOp::Ne => "unequal",
        BinOp::Lt => "smaller",
        BinOp::Le => "smallerEq",
        BinOp::Gt => "larger",
        BinOp::Ge => "largerEq",
        BinOp::And | BinOp::Or => unreachable!("short-circuited in eval"),
    };

    match op {
        BinOp::Eq | BinOp::Ne => {
            let equal = match (to_number(left), to_number(right)) {
                (Some(a), Some(b)) if !left.is_string() || !right.is_string() => a == b,
                _ => left == right,
            };
            Ok(Value::Bool(equal == (op == BinOp::Eq)))
        }
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let a = numeric(name, left)?;
                    let b = numeric(name, right)?;
                    a.partial_cmp(&b).ok_or_else(|| EvalError::Type(format!("Cannot compare NaN in function {name}")))?
                }
            };
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        _ => {
            let a = numeric(name, left)?;
            let b = numeric(name, right)?;
            let n = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div if b == 0.0 => return Err(EvalError::Range("Division by zero".into())),
                BinOp::Div => a / b,
                BinOp::Mod if b == 0.0 => return Err(EvalError::Range("Modulo by zero".into())),
                // floored modulo, sign follows the divisor
                BinOp::Mod => a - b * (a / b).floor(),
                _ => a.powf(b),
            };
            if !n.is_finite() {
                return Err(EvalError::Range(format!("Result of {name} is not a finite number")));
            }
            Ok(number(n))
        }
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min {
        return Err(EvalError::Type(format!(
            "Too few arguments in function {name} (expected: {min}, actual: {})",
            args.len()
        )));
    }
    if args.len() > max {
        return Err(EvalError::Type(format!(
            "Too many arguments in function {name} (expected: {max}, actual: {})",
            args.len()
        )));
    }
    Ok(())
}

fn call(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let nums = |args: &[Value]| {
        args.iter()
            .map(|a| numeric(name, a))
            .collect::<Result<Vec<f64>, _>>()
    };

    let result = match name {
        "abs" | "ceil" | "floor" | "sqrt" | "exp" | "log10" | "sign" | "number" => {
            arity(name, args, 1, 1)?;
            let x = numeric(name, &args[0])?;
            match name {
                "abs" => x.abs(),
                "ceil" => x.ceil(),
                "floor" => x.floor(),
                "sqrt" if x < 0.0 => {
                    return Err(EvalError::Range(format!("Cannot take sqrt of negative number {x}")))
                }
                "sqrt" => x.sqrt(),
                "exp" => x.exp(),
                "log10" => x.log10(),
                "sign" if x == 0.0 => 0.0,
                "sign" => x.signum(),
                _ => x,
            }
        }
        "round" => {
            arity(name, args, 1, 2)?;
            let x = numeric(name, &args[0])?;
            let digits = match args.get(1) {
                Some(d) => numeric(name, d)?,
                None => 0.0,
            };
            if !(0.0..=15.0).contains(&digits) || digits.fract() != 0.0 {
                return Err(EvalError::Range(
                    "Number of decimals in function round must be an integer from 0 to 15".into(),
                ));
            }
            let factor = 10f64.powi(digits as i32);
            (x * factor).round() / factor
        }
        "log" => {
            arity(name, args, 1, 2)?;
            let v = nums(args)?;
            match v.as_slice() {
                [x] => x.ln(),
                [x, base] => x.ln() / base.ln(),
                _ => unreachable!("arity checked"),
            }
        }
        "pow" | "mod" => {
            arity(name, args, 2, 2)?;
            let op = if name == "pow" { BinOp::Pow } else { BinOp::Mod };
            return binary(op, &args[0], &args[1]);
        }
        "min" | "max" | "sum" | "mean" => {
            arity(name, args, 1, usize::MAX)?;
            let flat: Vec<Value> = args
                .iter()
                .flat_map(|a| match a {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                })
                .collect();
            let v = nums(&flat)?;
            if v.is_empty() {
                return Err(EvalError::Type(format!("Cannot calculate {name} of an empty array")));
            }
            match name {
                "min" => v.iter().copied().fold(f64::INFINITY, f64::min),
                "max" => v.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                "sum" => v.iter().sum(),
                _ => v.iter().sum::<f64>() / v.len() as f64,
            }
        }
        "string" => {
            arity(name, args, 1, 1)?;
            return Ok(Value::String(crate::value::to_text(&args[0])));
        }
        _ => return Err(EvalError::Reference(format!("Undefined function {name}"))),
    };

    if !result.is_finite() {
        return Err(EvalError::Range(format!("Result of {name} is not a finite number")));
    }
    Ok(number(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_str(src: &str) -> Result<Value, EvalError> {
        MathEngine.evaluate(src, &Map::new())
    }

    fn eval_with(src: &str, scope: Value) -> Result<Value, EvalError> {
        let Value::Object(map) = scope else { panic!("scope must be an object") };
        MathEngine.evaluate(src, &map)
    }

    #[test]
    fn arithmetic_matches_direct_computation() {
        assert_eq!(eval_str("1 + 1"), Ok(json!(2)));
        assert_eq!(eval_str(" 1 + 1 "), Ok(json!(2)));
        assert_eq!(eval_str("2 * 3 + 4"), Ok(json!(10)));
        assert_eq!(eval_str("2 * (3 + 4)"), Ok(json!(14)));
        assert_eq!(eval_str("7 / 2"), Ok(json!(3.5)));
        assert_eq!(eval_str("-7 % 3"), Ok(json!(2)));
        assert_eq!(eval_str("2 ^ 3 ^ 2"), Ok(json!(512)));
        assert_eq!(eval_str("-2 ^ 2"), Ok(json!(-4)));
        assert_eq!(eval_str("0.1 + 0.2"), Ok(json!(0.1 + 0.2)));
    }

    #[test]
    fn malformed_expressions_are_syntax_errors() {
        for src in ["1 1", "1 +", "(1 + 2", "", "1 + * 2", "f(1,", "'abc"] {
            let err = eval_str(src).unwrap_err();
            assert!(err.to_string().starts_with("SyntaxError: "), "{src}: {err}");
        }
    }

    #[test]
    fn unary_plus_on_empty_operand_position() {
        // an absent placeholder leaves " + 1"
        assert_eq!(eval_str(" + 1"), Ok(json!(1)));
    }

    #[test]
    fn logic_and_comparison() {
        assert_eq!(eval_str("1 < 2 and 3 >= 3"), Ok(json!(true)));
        assert_eq!(eval_str("not (1 == 1) or false"), Ok(json!(false)));
        assert_eq!(eval_str("1 != 2 ? 'yes' : 'no'"), Ok(json!("yes")));
        assert_eq!(eval_str("'a' < 'b'"), Ok(json!(true)));
        assert_eq!(eval_str("'1' == 1"), Ok(json!(true)));
    }

    #[test]
    fn functions() {
        assert_eq!(eval_str("sqrt(16) + abs(-1)"), Ok(json!(5)));
        assert_eq!(eval_str("round(3.14159, 2)"), Ok(json!(3.14)));
        assert_eq!(eval_str("max(1, 5, 3) - min(4, 2)"), Ok(json!(3)));
        assert_eq!(eval_str("pow(2, 10)"), Ok(json!(1024)));
        assert_eq!(eval_str("string(42)"), Ok(json!("42")));
    }

    #[test]
    fn runtime_errors_carry_their_kind() {
        assert!(eval_str("1 / 0").unwrap_err().to_string().starts_with("RangeError: "));
        assert!(eval_str("sqrt(-1)").unwrap_err().to_string().starts_with("RangeError: "));
        assert!(eval_str("nope(1)").unwrap_err().to_string().starts_with("ReferenceError: "));
        assert!(eval_str("x + 1").unwrap_err().to_string().starts_with("ReferenceError: "));
        assert!(eval_str("'a' * 2").unwrap_err().to_string().starts_with("TypeError: "));
        assert!(eval_str("abs()").unwrap_err().to_string().starts_with("TypeError: "));
    }

    #[test]
    fn symbols_resolve_from_scope() {
        let scope = json!({"read": 2, "post": {"data": {"read": 3}}, "when": "2024-01-01T00:00:00Z"});
        assert_eq!(eval_with("read * post.data.read", scope.clone()), Ok(json!(6)));
        assert_eq!(eval_with("when", scope.clone()), Ok(json!("2024-01-01T00:00:00Z")));
        assert!(eval_with("post.data.missing", scope).is_err());
    }

    #[test]
    fn deep_nesting_is_a_range_error() {
        let cases = [
            format!("{}1", "-".repeat(200_000)),
            format!("{}true", "not ".repeat(500)),
            format!("{}1{}", "(".repeat(5_000), ")".repeat(5_000)),
            vec!["2"; 5_000].join(" ^ "),
            vec!["1"; 50_000].join(" + "),
        ];
        for src in &cases {
            let err = eval_str(src).unwrap_err().to_string();
            assert!(err.starts_with("RangeError: "), "{err}");
        }
        assert_eq!(eval_str(&format!("{}1", "-".repeat(100))), Ok(json!(1)));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let first = eval_str("(1 + 2) * 3 / 4");
        for _ in 0..5 {
            assert_eq!(eval_str("(1 + 2) * 3 / 4"), first);
        }
    }
}
