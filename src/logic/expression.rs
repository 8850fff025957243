//! Condition language used by rule definitions.
//!
//! A condition such as `pressure_delta_24h <= -6 AND sleep_hours < 6` is
//! compiled once into an immutable tree and then evaluated against a flat
//! [`Context`]. Evaluation never fails: a referenced variable that is missing
//! from the context, or a comparison between incompatible values, is a
//! non-match.
//!
//! Supported syntax:
//! - comparisons `<`, `<=`, `>`, `>=`, `==`, `!=`
//! - combinators `AND`, `OR`, `NOT` (also `&&`, `||`, `!`, any letter case)
//! - literals: numbers, `'quoted'`/`"quoted"` strings, `TRUE`, `FALSE`
//! - parentheses and unary minus

use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// A single named value in an evaluation context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Numeric view of the value. Booleans count as 1/0.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(_) => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{:.0}", n),
            Value::Number(n) => write!(f, "{:.1}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Flat name → value map that conditions are evaluated against.
///
/// Ordered so that anything derived from it (trigger maps, stored snapshot
/// contexts) serializes identically across runs.
pub type Context = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("empty condition")]
    Empty,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected '{found}' at offset {offset}, expected {expected}")]
    UnexpectedToken {
        found: String,
        offset: usize,
        expected: &'static str,
    },

    #[error("condition ended early, expected {0}")]
    UnexpectedEnd(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

/// Compiled condition tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Neg(Box<Expr>),
    Compare {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

/// A condition compiled from source, together with every variable it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledExpr {
    source: String,
    root: Expr,
    variables: BTreeSet<String>,
}

impl CompiledExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    pub fn evaluate(&self, ctx: &Context) -> bool {
        evaluate(self, ctx)
    }
}

/// Canonical spelling of a condition: `&&`/`||` become `AND`/`OR`, keywords
/// are upper-cased and whitespace is collapsed.
pub fn normalize(source: &str) -> String {
    static KEYWORDS: OnceLock<Regex> = OnceLock::new();
    let re = KEYWORDS.get_or_init(|| {
        Regex::new(r"(?i)\b(and|or|not|true|false)\b").expect("keyword pattern is valid")
    });

    let replaced = source.replace("&&", " AND ").replace("||", " OR ");
    let upper = re.replace_all(&replaced, |caps: &Captures| caps[1].to_ascii_uppercase());
    upper.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn compile(source: &str) -> Result<CompiledExpr, CompileError> {
    let normalized = normalize(source);
    let tokens = tokenize(&normalized)?;
    if tokens.is_empty() {
        return Err(CompileError::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let root = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(CompileError::UnexpectedToken {
            found: extra.token.describe(),
            offset: extra.offset,
            expected: "end of condition",
        });
    }

    let mut variables = BTreeSet::new();
    collect_variables(&root, &mut variables);

    Ok(CompiledExpr {
        source: normalized,
        root,
        variables,
    })
}

/// Evaluate a compiled condition. Returns `false` instead of failing when a
/// referenced variable is absent or the values cannot be compared.
pub fn evaluate(expr: &CompiledExpr, ctx: &Context) -> bool {
    if let Some(missing) = expr.variables().iter().find(|v| !ctx.contains_key(v.as_str())) {
        debug!(condition = %expr.source, variable = %missing, "Variable missing from context");
        return false;
    }

    match eval(&expr.root, ctx).and_then(truthy) {
        Ok(matched) => matched,
        Err(fault) => {
            debug!(condition = %expr.source, fault = %fault, "Condition evaluation skipped");
            false
        }
    }
}

/// Identifier tokens of a raw condition, keywords excluded, in order of first
/// appearance. Conditions that fail to tokenize yield nothing.
pub fn identifiers(source: &str) -> Vec<String> {
    let Ok(tokens) = tokenize(source) else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    tokens
        .into_iter()
        .filter_map(|t| match t.token {
            Token::Ident(name) => Some(name),
            _ => None,
        })
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

// Lexing

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    And,
    Or,
    Not,
    Minus,
    Cmp(CmpOp),
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("'{}'", s),
            Token::Ident(name) => name.clone(),
            Token::True => "TRUE".into(),
            Token::False => "FALSE".into(),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::Not => "NOT".into(),
            Token::Minus => "-".into(),
            Token::Cmp(op) => op.symbol().into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    offset: usize,
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, CompileError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let (token, width) = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '-' => (Token::Minus, 1),
            '<' if next == Some('=') => (Token::Cmp(CmpOp::Le), 2),
            '<' => (Token::Cmp(CmpOp::Lt), 1),
            '>' if next == Some('=') => (Token::Cmp(CmpOp::Ge), 2),
            '>' => (Token::Cmp(CmpOp::Gt), 1),
            '=' if next == Some('=') => (Token::Cmp(CmpOp::Eq), 2),
            '!' if next == Some('=') => (Token::Cmp(CmpOp::Ne), 2),
            '!' => (Token::Not, 1),
            '&' if next == Some('&') => (Token::And, 2),
            '|' if next == Some('|') => (Token::Or, 2),
            '\'' | '"' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|(_, c)| *c == ch)
                    .ok_or(CompileError::UnterminatedString(offset))?;
                let text: String = chars[i + 1..i + 1 + end].iter().map(|(_, c)| *c).collect();
                (Token::Str(text), end + 2)
            }
            c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let len = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
                    .count();
                let text: String = chars[i..i + len].iter().map(|(_, c)| *c).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| CompileError::InvalidNumber(text.clone()))?;
                (Token::Number(value), len)
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let len = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
                    .count();
                let word: String = chars[i..i + len].iter().map(|(_, c)| *c).collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "TRUE" => Token::True,
                    "FALSE" => Token::False,
                    _ => Token::Ident(word),
                };
                (token, len)
            }
            other => return Err(CompileError::UnexpectedChar { ch: other, offset }),
        };

        tokens.push(Spanned { token, offset });
        i += width;
    }

    Ok(tokens)
}

// Parsing

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Spanned> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().map(|t| &t.token) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompileError> {
        let lhs = self.parse_operand()?;
        let op = match self.peek() {
            Some(Spanned {
                token: Token::Cmp(op),
                ..
            }) => *op,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.parse_operand()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_operand(&mut self) -> Result<Expr, CompileError> {
        const EXPECTED: &str = "a value, variable or '('";

        let Some(spanned) = self.advance() else {
            return Err(CompileError::UnexpectedEnd(EXPECTED));
        };
        let offset = spanned.offset;

        match spanned.token.clone() {
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Minus => match self.parse_operand()? {
                Expr::Literal(Value::Number(n)) => Ok(Expr::Literal(Value::Number(-n))),
                other => Ok(Expr::Neg(Box::new(other))),
            },
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Spanned {
                        token: Token::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(CompileError::UnexpectedToken {
                        found: other.token.describe(),
                        offset: other.offset,
                        expected: "')'",
                    }),
                    None => Err(CompileError::UnexpectedEnd("')'")),
                }
            }
            other => Err(CompileError::UnexpectedToken {
                found: other.describe(),
                offset,
                expected: EXPECTED,
            }),
        }
    }
}

fn collect_variables(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Ident(name) => {
            out.insert(name.clone());
        }
        Expr::Neg(inner) | Expr::Not(inner) => collect_variables(inner, out),
        Expr::Compare { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            collect_variables(lhs, out);
            collect_variables(rhs, out);
        }
    }
}

// Evaluation

#[derive(Debug, Error)]
enum EvalFault {
    #[error("variable '{0}' is not in the context")]
    Missing(String),
    #[error("{0}")]
    Type(&'static str),
}

fn eval(expr: &Expr, ctx: &Context) -> Result<Value, EvalFault> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => ctx
            .get(name)
            .cloned()
            .ok_or_else(|| EvalFault::Missing(name.clone())),
        Expr::Neg(inner) => match eval(inner, ctx)? {
            Value::Number(n) => Ok(Value::Number(-n)),
            _ => Err(EvalFault::Type("unary minus applied to a non-number")),
        },
        Expr::Not(inner) => Ok(Value::Bool(!truthy(eval(inner, ctx)?)?)),
        Expr::And(lhs, rhs) => {
            if !truthy(eval(lhs, ctx)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(eval(rhs, ctx)?)?))
        }
        Expr::Or(lhs, rhs) => {
            if truthy(eval(lhs, ctx)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(eval(rhs, ctx)?)?))
        }
        Expr::Compare { op, lhs, rhs } => {
            let lhs = eval(lhs, ctx)?;
            let rhs = eval(rhs, ctx)?;
            compare(*op, &lhs, &rhs).map(Value::Bool)
        }
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, EvalFault> {
    if let (Value::Text(a), Value::Text(b)) = (lhs, rhs) {
        return match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err(EvalFault::Type("strings only support == and !=")),
        };
    }

    let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
        return Err(EvalFault::Type("cannot compare a string with a number"));
    };

    Ok(match op {
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
    })
}

fn truthy(value: Value) -> Result<bool, EvalFault> {
    match value {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => Ok(n != 0.0),
        Value::Text(_) => Err(EvalFault::Type("a string is not a condition")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, Value)]) -> Context {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn matches(condition: &str, context: &Context) -> bool {
        evaluate(&compile(condition).unwrap(), context)
    }

    #[test]
    fn range_condition_matches_inside_band_only() {
        let cond = "temperature_c >= 31 AND temperature_c < 35";
        assert!(matches(cond, &ctx(&[("temperature_c", 32.0.into())])));
        assert!(!matches(cond, &ctx(&[("temperature_c", 36.0.into())])));
        assert!(!matches(cond, &ctx(&[("temperature_c", 35.0.into())])));
    }

    #[test]
    fn missing_variable_is_a_non_match() {
        let empty = Context::new();
        assert!(!matches("humidity_pct > 80", &empty));
        assert!(!matches("NOT humidity_pct > 80", &empty));
        // OR does not rescue a condition that references an absent metric
        assert!(!matches(
            "TRUE OR humidity_pct > 80",
            &ctx(&[("sleep_hours", 5.0.into())])
        ));
    }

    #[test]
    fn normalizes_symbolic_and_lowercase_operators() {
        assert_eq!(
            normalize("a > 1 && b < 2 || not c == true"),
            "a > 1 AND b < 2 OR NOT c == TRUE"
        );

        let context = ctx(&[("a", 2.0.into()), ("b", 5.0.into()), ("c", false.into())]);
        assert!(matches("a > 1 && b < 2 || not c", &context));
        assert!(matches("a > 1 and (b > 2 or c)", &context));
        assert!(!matches("a > 1 && b < 2", &context));
    }

    #[test]
    fn literals_and_negation() {
        let empty = Context::new();
        assert!(matches("TRUE", &empty));
        assert!(!matches("false", &empty));
        assert!(matches("NOT FALSE", &empty));
        assert!(matches("!(1 > 2)", &empty));
    }

    #[test]
    fn negative_thresholds_and_unary_minus() {
        let context = ctx(&[("pressure_delta_24h", (-7.0).into())]);
        assert!(matches("pressure_delta_24h <= -6", &context));
        assert!(!matches("pressure_delta_24h <= -8.5", &context));
        assert!(matches("-pressure_delta_24h >= 6", &context));
    }

    #[test]
    fn booleans_compare_as_numbers() {
        let context = ctx(&[
            ("signal_pressure_drop_today", true.into()),
            ("signal_pressure_drop_level", 2.0.into()),
        ]);
        assert!(matches("signal_pressure_drop_today", &context));
        assert!(matches("signal_pressure_drop_today == 1", &context));
        assert!(matches(
            "signal_pressure_drop_today AND signal_pressure_drop_level >= 2",
            &context
        ));
    }

    #[test]
    fn strings_support_equality_only() {
        let context = ctx(&[("season", "summer".into())]);
        assert!(matches("season == 'summer'", &context));
        assert!(matches("season != \"winter\"", &context));
        assert!(!matches("season > 'spring'", &context));
        assert!(!matches("season == 3", &context));
        assert!(!matches("season", &context));
    }

    #[test]
    fn compile_errors_are_reported() {
        assert_eq!(compile("   "), Err(CompileError::Empty));
        assert!(matches!(
            compile("a >"),
            Err(CompileError::UnexpectedEnd(_))
        ));
        assert!(matches!(
            compile("a > 1 b"),
            Err(CompileError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            compile("(a > 1"),
            Err(CompileError::UnexpectedEnd(_))
        ));
        assert!(matches!(
            compile("a # 1"),
            Err(CompileError::UnexpectedChar { ch: '#', .. })
        ));
        assert!(matches!(
            compile("name == 'open"),
            Err(CompileError::UnterminatedString(_))
        ));
        assert!(matches!(
            compile("a > 1.2.3"),
            Err(CompileError::InvalidNumber(_))
        ));
    }

    #[test]
    fn compiled_expression_records_variables() {
        let expr = compile("sleep_hours < 6 AND (fatigue >= 4 OR sleep_hours < 4)").unwrap();
        let vars: Vec<&str> = expr.variables().iter().map(String::as_str).collect();
        assert_eq!(vars, vec!["fatigue", "sleep_hours"]);
        assert_eq!(
            expr.source(),
            "sleep_hours < 6 AND (fatigue >= 4 OR sleep_hours < 4)"
        );
    }

    #[test]
    fn identifiers_skip_keywords_and_duplicates() {
        assert_eq!(
            identifiers("temp_delta_6h <= -4 and temp_delta_6h > -20 OR NOT true && humidity_pct"),
            vec!["temp_delta_6h".to_string(), "humidity_pct".to_string()]
        );
        assert!(identifiers("a # b").is_empty());
    }

    #[test]
    fn value_display_formats_for_messages() {
        assert_eq!(Value::Number(32.0).to_string(), "32");
        assert_eq!(Value::Number(-6.24).to_string(), "-6.2");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Text("hi".into()).to_string(), "hi");
    }
}
