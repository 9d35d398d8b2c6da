//! Arithmetic evaluator
//!
//! Accepts numbers, `+ - * /`, parentheses and spaces. Anything else is
//! rejected before parsing, so no expression can reach beyond arithmetic.

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::{BlockingTool, ToolResult};

const ALLOWED: &str = "0123456789+-*/(). ";

/// Deepest parenthesis nesting accepted
pub const MAX_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MathError {
    #[error("invalid characters in expression")]
    InvalidCharacters,
    #[error("empty expression")]
    Empty,
    #[error("unexpected token at position {0}")]
    Unexpected(usize),
    #[error("division by zero")]
    DivisionByZero,
    #[error("expression nested deeper than {0} levels")]
    TooDeep(usize),
}

pub struct SimpleMathTool;

#[derive(Deserialize)]
struct MathArgs {
    expression: String,
}

impl BlockingTool for SimpleMathTool {
    fn name(&self) -> &str {
        "simple_math"
    }
    fn description(&self) -> &str {
        "Evaluate an arithmetic expression using + - * / and parentheses."
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": { "type": "string", "description": "Expression such as 3 + 5" }
            },
            "required": ["expression"]
        })
    }
    fn execute(&self, args: Value) -> ToolResult {
        let args: MathArgs = serde_json::from_value(args)?;
        let value = evaluate(&args.expression)?;
        Ok(Value::String(format_number(value)))
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<f64, MathError> {
    if !expression.chars().all(|c| ALLOWED.contains(c)) {
        return Err(MathError::InvalidCharacters);
    }
    let tokens: Vec<char> = expression.chars().filter(|c| *c != ' ').collect();
    if tokens.is_empty() {
        return Err(MathError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(MathError::Unexpected(parser.pos));
    }
    Ok(value)
}

/// Integral values print without a fractional part
pub fn format_number(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

struct Parser {
    tokens: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, MathError> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.pos += 1;
                    value += self.term()?;
                }
                '-' => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, MathError> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                '/' => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(MathError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, MathError> {
        // Signs are folded in a loop so a long run of them cannot recurse.
        let mut negative = false;
        while let Some(sign @ ('-' | '+')) = self.peek() {
            negative ^= sign == '-';
            self.pos += 1;
        }
        let value = self.primary()?;
        Ok(if negative { -value } else { value })
    }

    fn primary(&mut self) -> Result<f64, MathError> {
        match self.peek() {
            Some('(') => {
                if self.depth >= MAX_DEPTH {
                    return Err(MathError::TooDeep(MAX_DEPTH));
                }
                self.depth += 1;
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(')') {
                    return Err(MathError::Unexpected(self.pos));
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            _ => Err(MathError::Unexpected(self.pos)),
        }
    }

    fn number(&mut self) -> Result<f64, MathError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let literal: String = self.tokens[start..self.pos].iter().collect();
        literal
            .parse::<f64>()
            .map_err(|_| MathError::Unexpected(start))
    }
}
