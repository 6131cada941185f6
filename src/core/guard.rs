/// Guard expressions — a closed boolean/comparison grammar over state variables.
///
/// Grammar, loosest binding first:
///
/// ```text
/// or      := and (("or" | "||") and)*
/// and     := not (("and" | "&&") not)*
/// not     := ("not" | "!") not | compare
/// compare := primary (cmp_op primary)*
/// primary := INT | STRING | "true" | "false" | IDENT | "(" or ")"
/// cmp_op  := "==" | "=" | "!=" | "<" | "<=" | ">" | ">="
/// ```
///
/// Keywords and boolean literals are case-insensitive. Chained comparisons
/// (`0 < hp <= 3`) hold when every adjacent pair holds. Operands of
/// `and`/`or`/`not` are read by truthiness: non-zero integers and
/// non-empty strings are true. Anything else (calls, attribute access,
/// indexing, arithmetic, assignment) is rejected while parsing, before any
/// evaluation happens, and so is nesting deeper than [`MAX_NESTING`].

use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::schema::snapshot::StateSnapshot;
use crate::schema::state::{StateSchema, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("unsupported syntax in guard '{expression}': {reason}")]
    UnsupportedSyntax { expression: String, reason: String },
    #[error("unknown variable '{0}' in guard")]
    UnknownVariable(String),
    #[error("guard '{0}' did not evaluate to a boolean")]
    NonBooleanGuard(String),
    #[error("guard '{expression}' compares {left} with {right}")]
    TypeMismatch {
        expression: String,
        left: &'static str,
        right: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// Parsed guard expression tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Not(Box<Expr>),
    /// Every operand is evaluated, left to right.
    And(Vec<Expr>),
    Or(Vec<Expr>),
    /// `first op1 e1 op2 e2 ...`
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
}

impl Expr {
    fn collect_variables<'e>(&'e self, out: &mut Vec<&'e str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Not(inner) => inner.collect_variables(out),
            Expr::And(operands) | Expr::Or(operands) => {
                for e in operands {
                    e.collect_variables(out);
                }
            }
            Expr::Compare { first, rest } => {
                first.collect_variables(out);
                for (_, e) in rest {
                    e.collect_variables(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Bool(bool),
    And,
    Or,
    Not,
    LParen,
    RParen,
    Cmp(CmpOp),
}

/// Deepest allowed chain of `not` and parentheses.
pub const MAX_NESTING: usize = 64;

/// Words that read like expression syntax but have no meaning here.
const RESERVED: &[&str] = &["in", "is", "if", "else", "lambda", "for", "import"];

fn unsupported(expression: &str, reason: impl Into<String>) -> GuardError {
    GuardError::UnsupportedSyntax {
        expression: expression.to_string(),
        reason: reason.into(),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, GuardError> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                let op = match (c, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Le,
                    (_, false) => CmpOp::Gt,
                    (_, true) => CmpOp::Ge,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '"' | '\'' => {
                let quote = c;
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < len {
                    match chars[j] {
                        '\\' if j + 1 < len => {
                            text.push(chars[j + 1]);
                            j += 2;
                        }
                        ch if ch == quote => {
                            closed = true;
                            break;
                        }
                        ch => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                if !closed {
                    return Err(unsupported(input, "unterminated string literal"));
                }
                tokens.push(Token::Str(text));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < len && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let n = literal.parse::<i64>().map_err(|_| {
                    unsupported(input, format!("integer literal {} is out of range", literal))
                })?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    w if w.eq_ignore_ascii_case("and") => Token::And,
                    w if w.eq_ignore_ascii_case("or") => Token::Or,
                    w if w.eq_ignore_ascii_case("not") => Token::Not,
                    w if w.eq_ignore_ascii_case("true") => Token::Bool(true),
                    w if w.eq_ignore_ascii_case("false") => Token::Bool(false),
                    w if RESERVED.contains(&w) => {
                        return Err(unsupported(input, format!("'{}' is not allowed", w)));
                    }
                    _ => Token::Ident(word.clone()),
                };
                tokens.push(token);
            }
            '.' => return Err(unsupported(input, "attribute access is not allowed")),
            '[' | ']' => return Err(unsupported(input, "indexing is not allowed")),
            ':' if next == Some('=') => {
                return Err(unsupported(input, "assignment is not allowed"));
            }
            '+' | '-' | '*' | '/' | '%' | '^' | '&' | '|' | '~' => {
                if next == Some('=') {
                    return Err(unsupported(input, "assignment is not allowed"));
                }
                return Err(unsupported(input, format!("operator '{}' is not allowed", c)));
            }
            other => {
                return Err(unsupported(input, format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

struct Parser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'s> Parser<'s> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn nest(&mut self) -> Result<(), GuardError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(unsupported(self.source, "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, GuardError> {
        let mut operands = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::Or(operands)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, GuardError> {
        let mut operands = vec![self.parse_not()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            operands.push(self.parse_not()?);
        }
        Ok(if operands.len() == 1 {
            operands.remove(0)
        } else {
            Expr::And(operands)
        })
    }

    fn parse_not(&mut self) -> Result<Expr, GuardError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.nest()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, GuardError> {
        let first = self.parse_primary()?;
        let mut rest = Vec::new();
        while let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            rest.push((op, self.parse_primary()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, GuardError> {
        match self.advance() {
            Some(Token::Int(n)) => Ok(Expr::Literal(Value::Int(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::Bool(b)) => Ok(Expr::Literal(Value::Bool(b))),
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    return Err(unsupported(
                        self.source,
                        format!("call to '{}': function calls are not allowed", name),
                    ));
                }
                Ok(Expr::Var(name))
            }
            Some(Token::LParen) => {
                self.nest()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(unsupported(self.source, "missing closing parenthesis")),
                }
            }
            Some(token) => Err(unsupported(
                self.source,
                format!("unexpected token {:?}", token),
            )),
            None => Err(unsupported(self.source, "unexpected end of expression")),
        }
    }
}

/// A parsed, validated guard expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    source: String,
    expr: Expr,
}

impl Guard {
    pub fn parse(input: &str) -> Result<Guard, GuardError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(unsupported(input, "empty expression"));
        }
        let mut parser = Parser {
            source: input,
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(unsupported(
                input,
                format!("unexpected trailing token {:?}", token),
            ));
        }
        Ok(Guard {
            source: input.to_string(),
            expr,
        })
    }

    /// Referenced variable names, in first-appearance order.
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.expr.collect_variables(&mut out);
        out
    }

    /// Static check that every referenced variable is declared.
    pub fn check_variables(&self, schema: &StateSchema) -> Result<(), GuardError> {
        match self.variables().into_iter().find(|v| !schema.contains(v)) {
            Some(missing) => Err(GuardError::UnknownVariable(missing.to_string())),
            None => Ok(()),
        }
    }

    pub fn evaluate(&self, snapshot: &StateSnapshot) -> Result<bool, GuardError> {
        match self.eval(&self.expr, snapshot)? {
            Value::Bool(b) => Ok(b),
            _ => Err(GuardError::NonBooleanGuard(self.source.clone())),
        }
    }

    fn eval(&self, expr: &Expr, snapshot: &StateSnapshot) -> Result<Value, GuardError> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => snapshot
                .get(name)
                .cloned()
                .ok_or_else(|| GuardError::UnknownVariable(name.clone())),
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.eval(inner, snapshot)?))),
            Expr::And(operands) => {
                let mut all = true;
                for e in operands {
                    all &= truthy(&self.eval(e, snapshot)?);
                }
                Ok(Value::Bool(all))
            }
            Expr::Or(operands) => {
                let mut any = false;
                for e in operands {
                    any |= truthy(&self.eval(e, snapshot)?);
                }
                Ok(Value::Bool(any))
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first, snapshot)?;
                let mut all_hold = true;
                for (op, operand) in rest {
                    let right = self.eval(operand, snapshot)?;
                    all_hold &= op.holds(self.compare(&left, &right)?);
                    left = right;
                }
                Ok(Value::Bool(all_hold))
            }
        }
    }

    /// Native ordering per type; booleans and integers compare as 0/1.
    fn compare(&self, left: &Value, right: &Value) -> Result<Ordering, GuardError> {
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Int(b)) => Ok(i64::from(*a).cmp(b)),
            (Value::Int(a), Value::Bool(b)) => Ok(a.cmp(&i64::from(*b))),
            _ => Err(GuardError::TypeMismatch {
                expression: self.source.clone(),
                left: left.type_name(),
                right: right.type_name(),
            }),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Str(s) => !s.is_empty(),
    }
}

impl FromStr for Guard {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Guard::parse(s)
    }
}

impl fmt::Display for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Evaluate an optional guard expression once. An absent or blank guard
/// is always open.
pub fn evaluate(expression: Option<&str>, snapshot: &StateSnapshot) -> Result<bool, GuardError> {
    match expression.filter(|e| !e.trim().is_empty()) {
        Some(expr) => Guard::parse(expr)?.evaluate(snapshot),
        None => Ok(true),
    }
}

/// Guard evaluation with a parse cache keyed by expression text, for
/// callers that evaluate the same guards against many snapshots.
#[derive(Debug, Default)]
pub struct GuardEvaluator {
    cache: FxHashMap<String, Guard>,
}

impl GuardEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(
        &mut self,
        expression: Option<&str>,
        snapshot: &StateSnapshot,
    ) -> Result<bool, GuardError> {
        let expr = match expression.filter(|e| !e.trim().is_empty()) {
            Some(expr) => expr,
            None => return Ok(true),
        };
        if let Some(guard) = self.cache.get(expr) {
            return guard.evaluate(snapshot);
        }
        let guard = Guard::parse(expr)?;
        let result = guard.evaluate(snapshot);
        self.cache.insert(expr.to_string(), guard);
        result
    }

    /// Number of distinct expressions parsed so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
