//! Tokenizer shared by the built-in engines.

use std::ops::Range;

use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Tok {
    Number(f64),
    Str(String),
    /// Letters, digits, `_`, `$` and `.`, e.g. `sqrt`, `CONCATENATE`, `t1`,
    /// `$context.data.read`.
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub tok: Tok,
    pub span: Range<usize>,
}

const OPERATORS: [&str; 20] = [
    "==", "!=", "<>", "<=", ">=", "&&", "||", "+", "-", "*", "/", "%", "^", "&", "=", "<", ">",
    "!", "?", ":",
];

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '.'
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && src[start + 1..].starts_with(|d: char| d.is_ascii_digit())) {
            let mut end = start;
            let mut seen_exp = false;
            while let Some(&(i, d)) = chars.peek() {
                let exp_sign = seen_exp && (d == '+' || d == '-') && matches!(src[..i].chars().last(), Some('e' | 'E'));
                if d.is_ascii_digit() || d == '.' || exp_sign {
                    end = i + d.len_utf8();
                    chars.next();
                } else if (d == 'e' || d == 'E') && !seen_exp {
                    seen_exp = true;
                    end = i + 1;
                    chars.next();
                } else {
                    break;
                }
            }
            let text = &src[start..end];
            let n = text
                .parse::<f64>()
                .map_err(|_| EvalError::Syntax(format!("Invalid number '{text}' (char {})", start + 1)))?;
            tokens.push(Token { tok: Tok::Number(n), span: start..end });
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = None;
            while let Some((i, d)) = chars.next() {
                if d == c {
                    closed = Some(i);
                    break;
                }
                if d == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    continue;
                }
                text.push(d);
            }
            let end = closed.ok_or_else(|| {
                EvalError::Syntax(format!("End of string {c} missing (char {})", start + 1))
            })?;
            tokens.push(Token { tok: Tok::Str(text), span: start..end + 1 });
            continue;
        }

        if is_ident_start(c) {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if !is_ident_continue(d) {
                    break;
                }
                end = i + d.len_utf8();
                chars.next();
            }
            let name = src[start..end].trim_end_matches('.').to_owned();
            tokens.push(Token { tok: Tok::Ident(name), span: start..end });
            continue;
        }

        let single = match c {
            '(' => Some(Tok::LParen),
            ')' => Some(Tok::RParen),
            ',' => Some(Tok::Comma),
            _ => None,
        };
        if let Some(tok) = single {
            chars.next();
            tokens.push(Token { tok, span: start..start + 1 });
            continue;
        }

        let rest = &src[start..];
        let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) else {
            return Err(EvalError::Syntax(format!("Unexpected character '{c}' (char {})", start + 1)));
        };
        for _ in 0..op.len() {
            chars.next();
        }
        tokens.push(Token { tok: Tok::Op(*op), span: start..start + op.len() });
    }

    Ok(tokens)
}

/// Spans of quoted literals. Tolerates an unterminated quote, which then
/// runs to the end of the input.
pub(crate) fn quoted_spans(src: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, char)> = None;
    let mut escaped = false;

    for (i, c) in src.char_indices() {
        match open {
            Some((start, quote)) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    spans.push(start..i + 1);
                    open = None;
                }
            }
            None if c == '"' || c == '\'' => open = Some((i, c)),
            None => {}
        }
    }
    if let Some((start, _)) = open {
        spans.push(start..src.len());
    }
    spans
}

/// Cursor over a token stream, shared by the parsers.
pub(crate) struct Cursor {
    tokens: Vec<Token>,
    pos: usize,
    len: usize,
}

impl Cursor {
    pub fn new(tokens: Vec<Token>, src_len: usize) -> Self {
        Self { tokens, pos: 0, len: src_len }
    }

    pub fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.tok)
    }

    pub fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the next token if it is the operator `op`.
    pub fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, tok: &Tok, what: &str) -> Result<(), EvalError> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Syntax error pointing at the current token.
    pub fn unexpected(&self, expected: &str) -> EvalError {
        match self.tokens.get(self.pos) {
            Some(token) => EvalError::Syntax(format!(
                "Unexpected {} (char {}), expected {expected}",
                describe(&token.tok),
                token.span.start + 1
            )),
            None => EvalError::Syntax(format!(
                "Unexpected end of expression (char {}), expected {expected}",
                self.len + 1
            )),
        }
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Number(n) => format!("value \"{n}\""),
        Tok::Str(s) => format!("string \"{s}\""),
        Tok::Ident(s) => format!("symbol \"{s}\""),
        Tok::Op(o) => format!("operator {o}"),
        Tok::LParen => "parenthesis (".into(),
        Tok::RParen => "parenthesis )".into(),
        Tok::Comma => "comma".into(),
    }
}
