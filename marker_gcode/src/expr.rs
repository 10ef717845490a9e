//! Arithmetic for bracketed parameters.
//!
//! Grammar:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := unary (('*' | '/') unary)*
//! unary  := ('+' | '-') unary | atom
//! atom   := number | '(' expr ')'
//! ```
//!
//! Literals without a decimal point are integers and `+ - *` on integers
//! stay integral; `/` and any decimal operand give a decimal result, which
//! always prints with a fractional part (`[4/2]` → `2.0`, `[4+1]` → `5`).
//!
//! Nothing else is accepted; names, calls and operators outside this set are
//! rejected with an [`ExprError`].

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected '{ch}' at offset {pos}")]
    UnexpectedChar { pos: usize, ch: char },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// Result of an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i64),
    Decimal(f64),
}

impl Value {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Decimal(v) => v,
        }
    }

    fn plus(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(b)
                .map_or(Self::Decimal(a as f64 + b as f64), Self::Int),
            (a, b) => Self::Decimal(a.as_f64() + b.as_f64()),
        }
    }

    fn minus(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_sub(b)
                .map_or(Self::Decimal(a as f64 - b as f64), Self::Int),
            (a, b) => Self::Decimal(a.as_f64() - b.as_f64()),
        }
    }

    fn times(self, rhs: Self) -> Self {
        match (self, rhs) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_mul(b)
                .map_or(Self::Decimal(a as f64 * b as f64), Self::Int),
            (a, b) => Self::Decimal(a.as_f64() * b.as_f64()),
        }
    }

    fn divide(self, rhs: Self) -> Result<Self, ExprError> {
        let divisor = rhs.as_f64();
        if divisor == 0.0 {
            return Err(ExprError::DivisionByZero);
        }
        Ok(Self::Decimal(self.as_f64() / divisor))
    }

    fn negate(self) -> Self {
        match self {
            Self::Int(v) => v.checked_neg().map_or(Self::Decimal(-(v as f64)), Self::Int),
            Self::Decimal(v) => Self::Decimal(-v),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            // `{:?}` keeps the fractional part: 2.0 prints as "2.0".
            Self::Decimal(v) => write!(f, "{v:?}"),
        }
    }
}

/// Evaluate `input`.
pub fn evaluate(input: &str) -> Result<Value, ExprError> {
    let mut parser = Parser {
        chars: input.char_indices().peekable(),
        input,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    match parser.chars.next() {
        Some((pos, ch)) => Err(ExprError::UnexpectedChar { pos, ch }),
        None => Ok(value),
    }
}

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    input: &'a str,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().map(|&(_, c)| c)
    }

    fn expr(&mut self) -> Result<Value, ExprError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.chars.next();
            let rhs = self.term()?;
            value = if op == '+' { value.plus(rhs) } else { value.minus(rhs) };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<Value, ExprError> {
        let mut value = self.unary()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.chars.next();
            let rhs = self.unary()?;
            value = if op == '*' { value.times(rhs) } else { value.divide(rhs)? };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<Value, ExprError> {
        match self.peek() {
            Some('-') => {
                self.chars.next();
                Ok(self.unary()?.negate())
            }
            Some('+') => {
                self.chars.next();
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<Value, ExprError> {
        match self.peek() {
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                match self.peek() {
                    Some(')') => {
                        self.chars.next();
                        Ok(value)
                    }
                    Some(_) => {
                        let (pos, ch) = self.chars.next().ok_or(ExprError::UnexpectedEnd)?;
                        Err(ExprError::UnexpectedChar { pos, ch })
                    }
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(_) => {
                let (pos, ch) = self.chars.next().ok_or(ExprError::UnexpectedEnd)?;
                Err(ExprError::UnexpectedChar { pos, ch })
            }
            None => Err(ExprError::UnexpectedEnd),
        }
    }

    fn number(&mut self) -> Result<Value, ExprError> {
        let start = self.chars.peek().map_or(self.input.len(), |&(pos, _)| pos);
        let mut end = start;
        while let Some((pos, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit() || *c == '.') {
            end = pos + c.len_utf8();
        }
        let text = &self.input[start..end];
        let invalid = || ExprError::InvalidNumber(text.to_string());
        if text.contains('.') {
            return text.parse::<f64>().map(Value::Decimal).map_err(|_| invalid());
        }
        match text.parse::<i64>() {
            Ok(v) => Ok(Value::Int(v)),
            // Beyond i64: keep the magnitude.
            Err(_) => text.parse::<f64>().map(Value::Decimal).map_err(|_| invalid()),
        }
    }
}
