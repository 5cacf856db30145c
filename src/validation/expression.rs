//! Arithmetic equations in one unknown.
//!
//! Backs the `equation` formula: a small lexer and recursive-descent parser
//! for `+ - * / ^`, parentheses, unary minus, implicit multiplication
//! (`2x`, `3(x + 1)`) and at most one `=`. Linear equations are solved
//! exactly; anything else by a sign-change scan with bisection.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Half-width of the interval scanned for non-linear roots.
const SCAN_RANGE: f64 = 1.0e4;

/// Scan step across `[-SCAN_RANGE, SCAN_RANGE]`.
const SCAN_STEP: f64 = 0.1;

const BISECT_ITERATIONS: usize = 100;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at column {col}")]
    UnexpectedChar { ch: char, col: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("expected {expected}, found {found} at column {col}")]
    UnexpectedToken {
        expected: String,
        found: TokenKind,
        col: usize,
    },

    #[error("more than one '=' in equation")]
    MultipleEquals,

    #[error("unbound variable '{0}'")]
    UnboundVariable(String),
}

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Column number (1-based)
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    OpenParen,
    CloseParen,
    Equals,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {n}"),
            Self::Ident(name) => write!(f, "identifier '{name}'"),
            Self::Plus => write!(f, "'+'"),
            Self::Minus => write!(f, "'-'"),
            Self::Star => write!(f, "'*'"),
            Self::Slash => write!(f, "'/'"),
            Self::Caret => write!(f, "'^'"),
            Self::OpenParen => write!(f, "'('"),
            Self::CloseParen => write!(f, "')'"),
            Self::Equals => write!(f, "'='"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

struct Lexer {
    input: Vec<char>,
    pos: usize,
}

impl Lexer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, ExpressionError> {
        let mut tokens = Vec::new();

        loop {
            while self.peek().is_some_and(char::is_whitespace) {
                self.pos += 1;
            }
            let col = self.pos + 1;
            let Some(ch) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    col,
                });
                break;
            };

            let kind = match ch {
                '0'..='9' | '.' => self.read_number()?,
                c if c.is_alphabetic() || c == '_' => self.read_ident(),
                _ => {
                    self.pos += 1;
                    match ch {
                        '+' => TokenKind::Plus,
                        '-' | '−' => TokenKind::Minus,
                        '*' | '×' | '·' => {
                            // `**` is accepted as power
                            if self.peek() == Some('*') {
                                self.pos += 1;
                                TokenKind::Caret
                            } else {
                                TokenKind::Star
                            }
                        }
                        '/' | '÷' => TokenKind::Slash,
                        '^' => TokenKind::Caret,
                        '(' | '[' => TokenKind::OpenParen,
                        ')' | ']' => TokenKind::CloseParen,
                        '=' => TokenKind::Equals,
                        _ => return Err(ExpressionError::UnexpectedChar { ch, col }),
                    }
                }
            };
            tokens.push(Token { kind, col });
        }

        Ok(tokens)
    }

    fn read_number(&mut self) -> Result<TokenKind, ExpressionError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        let text: String = self.input[start..self.pos].iter().collect();
        text.parse()
            .map(TokenKind::Number)
            .map_err(|_| ExpressionError::InvalidNumber(text))
    }

    fn read_ident(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        TokenKind::Ident(self.input[start..self.pos].iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Evaluate with `unknown` bound to `x` and other names from `bindings`.
    ///
    /// Division by zero yields a non-finite value rather than an error.
    pub fn eval(
        &self,
        unknown: &str,
        x: f64,
        bindings: &BTreeMap<String, f64>,
    ) -> Result<f64, ExpressionError> {
        Ok(match self {
            Self::Number(n) => *n,
            Self::Variable(name) if name == unknown => x,
            Self::Variable(name) => *bindings
                .get(name)
                .ok_or_else(|| ExpressionError::UnboundVariable(name.clone()))?,
            Self::Neg(inner) => -inner.eval(unknown, x, bindings)?,
            Self::Binary { op, lhs, rhs } => {
                let l = lhs.eval(unknown, x, bindings)?;
                let r = rhs.eval(unknown, x, bindings)?;
                match op {
                    BinaryOp::Add => l + r,
                    BinaryOp::Sub => l - r,
                    BinaryOp::Mul => l * r,
                    BinaryOp::Div => l / r,
                    BinaryOp::Pow => l.powf(r),
                }
            }
        })
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &TokenKind {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.pos.min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos.min(self.tokens.len() - 1)].clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> ExpressionError {
        let token = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        ExpressionError::UnexpectedToken {
            expected: expected.to_string(),
            found: token.kind.clone(),
            col: token.col,
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            lhs = Expr::binary(op, lhs, self.term()?);
        }
    }

    // term := unary (('*' | '/') unary | unary)*
    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                TokenKind::Star => {
                    self.advance();
                    BinaryOp::Mul
                }
                TokenKind::Slash => {
                    self.advance();
                    BinaryOp::Div
                }
                // implicit multiplication: 2x, 3(x + 1), (a)(b)
                TokenKind::Number(_) | TokenKind::Ident(_) | TokenKind::OpenParen => BinaryOp::Mul,
                _ => return Ok(lhs),
            };
            lhs = Expr::binary(op, lhs, self.unary()?);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Neg(Box::new(self.unary()?)))
            }
            TokenKind::Plus => {
                self.advance();
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power := primary ('^' unary)?, right-associative
    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.primary()?;
        if matches!(self.peek(), TokenKind::Caret) {
            self.advance();
            let exponent = self.unary()?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expr::Variable(name))
            }
            TokenKind::OpenParen => {
                self.advance();
                let inner = self.expr()?;
                if !matches!(self.peek(), TokenKind::CloseParen) {
                    return Err(self.unexpected("')'"));
                }
                self.advance();
                Ok(inner)
            }
            _ => Err(self.unexpected("number, identifier or '('")),
        }
    }
}

/// `lhs = rhs`; an equation without `=` is read as `expr = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub lhs: Expr,
    pub rhs: Expr,
}

impl Equation {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = Lexer::new(source).tokenize()?;
        let mut parser = Parser { tokens, pos: 0 };

        let lhs = parser.expr()?;
        let rhs = match parser.peek() {
            TokenKind::Equals => {
                parser.advance();
                parser.expr()?
            }
            _ => Expr::Number(0.0),
        };
        match parser.peek() {
            TokenKind::Eof => Ok(Self { lhs, rhs }),
            TokenKind::Equals => Err(ExpressionError::MultipleEquals),
            _ => Err(parser.unexpected("end of input")),
        }
    }

    /// `lhs - rhs` at `unknown = x`.
    pub fn residual(
        &self,
        unknown: &str,
        x: f64,
        bindings: &BTreeMap<String, f64>,
    ) -> Result<f64, ExpressionError> {
        Ok(self.lhs.eval(unknown, x, bindings)? - self.rhs.eval(unknown, x, bindings)?)
    }

    /// First real root for `unknown`, or `None` when there is none in range.
    pub fn solve(
        &self,
        unknown: &str,
        bindings: &BTreeMap<String, f64>,
    ) -> Result<Option<f64>, ExpressionError> {
        let f = |x: f64| self.residual(unknown, x, bindings);

        if let Some(root) = linear_root(&f)? {
            return Ok(Some(root));
        }

        let steps = (2.0 * SCAN_RANGE / SCAN_STEP) as usize;
        let mut prev_x = -SCAN_RANGE;
        let mut prev_y = f(prev_x)?;
        for i in 1..=steps {
            if prev_y == 0.0 {
                return Ok(Some(prev_x));
            }
            let x = -SCAN_RANGE + i as f64 * SCAN_STEP;
            let y = f(x)?;
            if prev_y.is_finite() && y.is_finite() && prev_y.signum() != y.signum() {
                if let Some(root) = bisect(&f, prev_x, x, prev_y)? {
                    return Ok(Some(root));
                }
            }
            prev_x = x;
            prev_y = y;
        }
        Ok((prev_y == 0.0).then_some(prev_x))
    }
}

/// Closed-form root when the residual is linear in the unknown.
fn linear_root<F>(f: &F) -> Result<Option<f64>, ExpressionError>
where
    F: Fn(f64) -> Result<f64, ExpressionError>,
{
    let (y0, y1, y2) = (f(0.0)?, f(1.0)?, f(2.0)?);
    if !(y0.is_finite() && y1.is_finite() && y2.is_finite()) {
        return Ok(None);
    }
    let slope = y1 - y0;
    let scale = 1.0 + y0.abs() + y1.abs() + y2.abs();
    if slope.abs() <= 1e-12 * scale || ((y2 - y1) - slope).abs() > 1e-9 * scale {
        return Ok(None);
    }

    let root = -y0 / slope;
    // Confirm away from the sample points; rules out e.g. x^3 - 3x^2 + 2x
    let check = f(root)?;
    let probe = f(root + 3.5)?;
    let linear_probe = slope * 3.5;
    if check.abs() <= 1e-9 * scale && (probe - linear_probe).abs() <= 1e-6 * (1.0 + probe.abs()) {
        Ok(Some(root))
    } else {
        Ok(None)
    }
}

/// Bisect a sign change; `None` when it closes on a pole, not a root.
fn bisect<F>(f: &F, mut lo: f64, mut hi: f64, mut lo_y: f64) -> Result<Option<f64>, ExpressionError>
where
    F: Fn(f64) -> Result<f64, ExpressionError>,
{
    let bound = lo_y.abs().max(f(hi)?.abs()).max(1.0);
    for _ in 0..BISECT_ITERATIONS {
        let mid = 0.5 * (lo + hi);
        let y = f(mid)?;
        if y == 0.0 {
            return Ok(Some(mid));
        }
        if y.signum() == lo_y.signum() {
            lo = mid;
            lo_y = y;
        } else {
            hi = mid;
        }
    }
    let mid = 0.5 * (lo + hi);
    let y = f(mid)?;
    Ok((y.is_finite() && y.abs() <= 1e-6 * bound).then_some(mid))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solve(source: &str) -> Option<f64> {
        Equation::parse(source)
            .unwrap()
            .solve("x", &BTreeMap::new())
            .unwrap()
    }

    #[test]
    fn test_linear() {
        assert!((solve("3*x + 5 = 20").unwrap() - 5.0).abs() < 1e-12);
        assert!((solve("x/4 = 2.5").unwrap() - 10.0).abs() < 1e-12);
        assert!((solve("1/x + 1/15 = 1/6").unwrap() - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_implicit_multiplication() {
        assert!((solve("2x + 3(x - 1) = 12").unwrap() - 3.0).abs() < 1e-12);
        assert!((solve("(x + 1)(2) = 10").unwrap() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_unary_minus_and_power() {
        assert!((solve("-x = -7").unwrap() - 7.0).abs() < 1e-12);
        assert!((solve("x^2 = 16").unwrap() + 4.0).abs() < 1e-9);
        assert!((solve("2^3 * x = 24").unwrap() - 3.0).abs() < 1e-12);
        assert!((solve("x**2 - 9").unwrap() + 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_power_is_right_associative() {
        let eq = Equation::parse("2^3^2").unwrap();
        assert_eq!(eq.residual("x", 0.0, &BTreeMap::new()).unwrap(), 512.0);
    }

    #[test]
    fn test_no_real_root() {
        assert_eq!(solve("x^2 + 1 = 0"), None);
    }

    #[test]
    fn test_pole_is_not_a_root() {
        // 1/(x - 2) changes sign at 2 but never reaches zero
        assert_eq!(solve("1/(x - 2) = 0"), None);
    }

    #[test]
    fn test_bindings_substitute_free_names() {
        let bindings: BTreeMap<String, f64> = [("speed".to_string(), 60.0), ("distance".to_string(), 150.0)]
            .into_iter()
            .collect();
        let eq = Equation::parse("speed * t = distance").unwrap();
        let root = eq.solve("t", &bindings).unwrap().unwrap();
        assert!((root - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_unbound_variable() {
        let eq = Equation::parse("x + y = 3").unwrap();
        assert_eq!(
            eq.solve("x", &BTreeMap::new()),
            Err(ExpressionError::UnboundVariable("y".to_string()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Equation::parse("x = 1 = 2"),
            Err(ExpressionError::MultipleEquals)
        );
        assert!(matches!(
            Equation::parse("3 * (x + 1"),
            Err(ExpressionError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Equation::parse("x $ 2"),
            Err(ExpressionError::UnexpectedChar { ch: '$', col: 3 })
        ));
        assert!(matches!(
            Equation::parse("1..2 = x"),
            Err(ExpressionError::InvalidNumber(_))
        ));
    }
}
