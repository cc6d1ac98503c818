// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tokenizer and recursive-descent parser for formula expressions.
//!
//! Grammar:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | primary
//! primary := NUMBER | IDENT | '(' expr ')'
//! ```
//!
//! Nothing else is accepted: no calls, no member access, no assignment.

use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Op::Add => '+',
            Op::Sub => '-',
            Op::Mul => '*',
            Op::Div => '/',
        };
        write!(f, "{c}")
    }
}

/// Closed arithmetic AST. Unary minus is `BinOp(Sub, Literal(0), x)`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Var(String),
    BinOp(Op, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Identifiers referenced anywhere in the expression.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                out.insert(name.as_str());
            }
            Expr::BinOp(_, lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Byte offset into the source
    pub position: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(Op),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'+' => tokens.push((start, Token::Op(Op::Add))),
            b'-' => tokens.push((start, Token::Op(Op::Sub))),
            b'*' => tokens.push((start, Token::Op(Op::Mul))),
            b'/' => tokens.push((start, Token::Op(Op::Div))),
            b'(' => tokens.push((start, Token::LParen)),
            b')' => tokens.push((start, Token::RParen)),
            b'0'..=b'9' | b'.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let text = &src[start..i];
                let value = text.parse::<f64>().map_err(|_| ParseError {
                    position: start,
                    message: format!("invalid number '{text}'"),
                })?;
                tokens.push((start, Token::Number(value)));
                continue;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(src[start..i].to_string())));
                continue;
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(ParseError {
                    position: start,
                    message: format!("unexpected character '{ch}'"),
                });
            }
        }
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            position: self.offset(),
            message: message.into(),
        }
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ (Op::Add | Op::Sub))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ (Op::Mul | Op::Div))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::BinOp(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Some(Token::Op(Op::Sub)) => {
                self.pos += 1;
                let operand = self.unary()?;
                Ok(Expr::BinOp(Op::Sub, Box::new(Expr::Literal(0.0)), Box::new(operand)))
            }
            Some(Token::Op(Op::Add)) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        match token {
            Token::Number(v) => {
                self.pos += 1;
                Ok(Expr::Literal(v))
            }
            Token::Ident(name) => {
                self.pos += 1;
                if matches!(self.peek(), Some(Token::LParen)) {
                    return Err(self.error(format!("function calls are not allowed ('{name}')")));
                }
                Ok(Expr::Var(name))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.expr()?;
                if !matches!(self.peek(), Some(Token::RParen)) {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Token::RParen => Err(self.error("unexpected ')'")),
            Token::Op(op) => Err(self.error(format!("unexpected operator '{op}'"))),
        }
    }
}

/// Parse `src` into an [`Expr`].
///
/// Every identifier must appear in `declared`; anything else is rejected so
/// a formula can never depend on a value the caller was not told to supply.
pub fn parse(src: &str, declared: &[String]) -> Result<Expr, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
    };

    let expr = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }

    if let Some(undeclared) = expr
        .variables()
        .into_iter()
        .find(|v| !declared.iter().any(|d| d == v))
    {
        return Err(ParseError {
            position: src.find(undeclared).unwrap_or(0),
            message: format!("identifier '{undeclared}' is not a declared variable"),
        });
    }

    Ok(expr)
}
