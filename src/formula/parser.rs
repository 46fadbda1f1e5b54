//! Recursive-descent parser and evaluator for calibration formulas.

use std::fmt;

use thiserror::Error;

/// Longest formula source accepted.
pub const MAX_FORMULA_LEN: usize = 256;

/// Deepest nesting of parentheses / unary operators.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Upper bound on expression nodes, and therefore on evaluation steps.
pub const MAX_EVAL_STEPS: usize = 512;

/// Failure to parse or evaluate a formula.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("formula is empty")]
    Empty,
    #[error("formula exceeds 256 characters")]
    TooLong,
    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("expected {expected} at position {pos}")]
    UnexpectedToken { pos: usize, expected: &'static str },
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("formula nests deeper than 32 levels")]
    TooDeep,
    #[error("formula exceeds the evaluation step budget")]
    BudgetExhausted,
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    VarA,
    VarB,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    A,
    B,
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
}

/// A parsed calibration formula, ready to evaluate many times.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
    nodes: usize,
}

impl Formula {
    /// Parse a formula source string.
    pub fn parse(source: &str) -> Result<Self, EvaluationError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(EvaluationError::Empty);
        }
        if trimmed.len() > MAX_FORMULA_LEN {
            return Err(EvaluationError::TooLong);
        }

        let tokens = tokenize(trimmed)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            nodes: 0,
        };
        let root = parser.expr()?;
        if let Some((pos, _)) = parser.peek() {
            return Err(EvaluationError::UnexpectedToken {
                pos,
                expected: "operator or end of formula",
            });
        }

        Ok(Self {
            source: trimmed.to_string(),
            root,
            nodes: parser.nodes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with the given raw bytes. The result is rounded to 2 decimals.
    pub fn evaluate(&self, a: f64, b: f64) -> Result<f64, EvaluationError> {
        let mut steps = 0usize;
        let value = eval(&self.root, a, b, &mut steps)?;
        if !value.is_finite() {
            return Err(EvaluationError::NonFinite);
        }
        Ok(round2(value))
    }

    /// Number of expression nodes (bounded by `MAX_EVAL_STEPS`).
    pub fn node_count(&self) -> usize {
        self.nodes
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse and evaluate in one go.
///
/// # Examples
/// ```
/// use obdstream_core::formula::evaluate;
/// assert_eq!(evaluate("A - 40", 100.0, 0.0), Ok(60.0));
/// ```
pub fn evaluate(formula: &str, a: f64, b: f64) -> Result<f64, EvaluationError> {
    Formula::parse(formula)?.evaluate(a, b)
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, EvaluationError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let token = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            'A' => Token::VarA,
            'B' => Token::VarB,
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value: f64 = literal
                    .parse()
                    .map_err(|_| EvaluationError::InvalidNumber(literal.clone()))?;
                tokens.push((start, Token::Num(value)));
                continue;
            }
            other => return Err(EvaluationError::UnexpectedChar { ch: other, pos: i }),
        };
        tokens.push((i, token));
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
    nodes: usize,
}

impl Parser {
    fn peek(&self) -> Option<(usize, Token)> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn node(&mut self, expr: Expr) -> Result<Expr, EvaluationError> {
        self.nodes += 1;
        if self.nodes > MAX_EVAL_STEPS {
            return Err(EvaluationError::BudgetExhausted);
        }
        Ok(expr)
    }

    fn enter(&mut self) -> Result<(), EvaluationError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(EvaluationError::TooDeep);
        }
        Ok(())
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, EvaluationError> {
        let mut lhs = self.term()?;
        while let Some((_, tok)) = self.peek() {
            let op = match tok {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = self.node(Expr::Bin(op, Box::new(lhs), Box::new(rhs)))?;
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Expr, EvaluationError> {
        let mut lhs = self.factor()?;
        while let Some((_, tok)) = self.peek() {
            let op = match tok {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = self.node(Expr::Bin(op, Box::new(lhs), Box::new(rhs)))?;
        }
        Ok(lhs)
    }

    // factor := ('-' | '+') factor | primary
    fn factor(&mut self) -> Result<Expr, EvaluationError> {
        match self.peek() {
            Some((_, Token::Minus)) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.factor()?;
                self.depth -= 1;
                self.node(Expr::Neg(Box::new(inner)))
            }
            Some((_, Token::Plus)) => {
                self.pos += 1;
                self.enter()?;
                let inner = self.factor()?;
                self.depth -= 1;
                Ok(inner)
            }
            _ => self.primary(),
        }
    }

    // primary := number | 'A' | 'B' | '(' expr ')'
    fn primary(&mut self) -> Result<Expr, EvaluationError> {
        match self.next() {
            Some((_, Token::Num(v))) => self.node(Expr::Num(v)),
            Some((_, Token::VarA)) => self.node(Expr::A),
            Some((_, Token::VarB)) => self.node(Expr::B),
            Some((_, Token::LParen)) => {
                self.enter()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.next() {
                    Some((_, Token::RParen)) => Ok(inner),
                    Some((pos, _)) => Err(EvaluationError::UnexpectedToken {
                        pos,
                        expected: "')'",
                    }),
                    None => Err(EvaluationError::UnexpectedEnd),
                }
            }
            Some((pos, _)) => Err(EvaluationError::UnexpectedToken {
                pos,
                expected: "number, variable or '('",
            }),
            None => Err(EvaluationError::UnexpectedEnd),
        }
    }
}

fn eval(expr: &Expr, a: f64, b: f64, steps: &mut usize) -> Result<f64, EvaluationError> {
    *steps += 1;
    if *steps > MAX_EVAL_STEPS {
        return Err(EvaluationError::BudgetExhausted);
    }

    match expr {
        Expr::Num(v) => Ok(*v),
        Expr::A => Ok(a),
        Expr::B => Ok(b),
        Expr::Neg(inner) => Ok(-eval(inner, a, b, steps)?),
        Expr::Bin(op, lhs, rhs) => {
            let l = eval(lhs, a, b, steps)?;
            let r = eval(rhs, a, b, steps)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => {
                    if r == 0.0 {
                        Err(EvaluationError::DivisionByZero)
                    } else {
                        Ok(l / r)
                    }
                }
            }
        }
    }
}
