//! Structured predicate language for rule conditions.
//!
//! Conditions are small boolean expressions over the fixed event schema:
//!
//! ```text
//! severity >= "error" AND category IN ["system", "network"]
//! NOT (source == "scheduler") OR context.retry_count > 3
//! kind == "user_command" && context.command CONTAINS "delete"
//! EXISTS context.override
//! ```
//!
//! A condition is parsed once when its rule is built and evaluated against
//! each event without any dynamic code execution. Anything that fails to
//! parse, or compares values of incompatible types, evaluates to `false`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::errors::EngineError;
use crate::domain::models::event::{EngineEvent, EventSeverity};

/// Maximum nesting of parentheses / `NOT` chains accepted by the parser.
const MAX_DEPTH: usize = 64;

/// Event field readable by a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Id,
    Kind,
    Severity,
    Category,
    Source,
    Context(String),
}

impl Field {
    fn parse(name: &str) -> Option<Self> {
        let name = name.strip_prefix("event.").unwrap_or(name);
        if let Some(key) = name.strip_prefix("context.") {
            return (!key.is_empty()).then(|| Self::Context(key.to_string()));
        }
        match name.to_lowercase().as_str() {
            "id" => Some(Self::Id),
            "kind" | "type" => Some(Self::Kind),
            "severity" => Some(Self::Severity),
            "category" => Some(Self::Category),
            "source" => Some(Self::Source),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id => f.write_str("id"),
            Self::Kind => f.write_str("kind"),
            Self::Severity => f.write_str("severity"),
            Self::Category => f.write_str("category"),
            Self::Source => f.write_str("source"),
            Self::Context(key) => write!(f, "context.{key}"),
        }
    }
}

/// Literal value on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Number(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn holds(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ordering == Equal,
            Self::Ne => ordering != Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

/// Parsed predicate tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    True,
    False,
    Compare {
        field: Field,
        cmp: CompareOp,
        value: Literal,
    },
    In {
        field: Field,
        values: Vec<Literal>,
    },
    Contains {
        field: Field,
        needle: String,
    },
    Exists {
        field: Field,
    },
    Not {
        inner: Box<Predicate>,
    },
    And {
        all: Vec<Predicate>,
    },
    Or {
        any: Vec<Predicate>,
    },
}

impl Predicate {
    /// Parse predicate source text.
    pub fn parse(source: &str) -> Result<Self, PredicateError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let predicate = parser.parse_or()?;
        match parser.peek() {
            None => Ok(predicate),
            Some(tok) => Err(PredicateError::new(
                tok.offset,
                format!("unexpected trailing token {}", tok.kind),
            )),
        }
    }

    /// Evaluate against an event.
    pub fn evaluate(&self, event: &EngineEvent) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::Compare { field, cmp, value } => compare(&resolve(field, event), *cmp, value),
            Self::In { field, values } => {
                let resolved = resolve(field, event);
                values.iter().any(|v| compare(&resolved, CompareOp::Eq, v))
            }
            Self::Contains { field, needle } => {
                let resolved = resolve(field, event);
                match (&resolved, resolved.as_text()) {
                    (_, Some(text)) => text.contains(needle.as_str()),
                    (Resolved::Json(serde_json::Value::Array(items)), None) => items
                        .iter()
                        .any(|item| item.as_str() == Some(needle.as_str())),
                    _ => false,
                }
            }
            Self::Exists { field } => match resolve(field, event) {
                Resolved::Missing => false,
                Resolved::Str(s) => !s.is_empty(),
                Resolved::Owned(s) => !s.is_empty(),
                Resolved::Severity(_) => true,
                Resolved::Json(v) => !v.is_null(),
            },
            Self::Not { inner } => !inner.evaluate(event),
            Self::And { all } => all.iter().all(|p| p.evaluate(event)),
            Self::Or { any } => any.iter().any(|p| p.evaluate(event)),
        }
    }
}

/// Evaluate `predicate` against `event`.
pub fn evaluate(predicate: &Predicate, event: &EngineEvent) -> bool {
    predicate.evaluate(event)
}

/// Parse error with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (at offset {offset})")]
pub struct PredicateError {
    pub offset: usize,
    pub message: String,
}

impl PredicateError {
    fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// A rule condition compiled once at registration time.
///
/// An invalid source is kept (so it can be exported and fixed) but always
/// evaluates to `false`.
#[derive(Debug, Clone)]
pub struct CompiledPredicate {
    source: String,
    compiled: Result<Predicate, PredicateError>,
}

impl CompiledPredicate {
    pub fn compile(source: impl Into<String>) -> Self {
        let source = source.into();
        let compiled = Predicate::parse(&source);
        Self { source, compiled }
    }

    pub fn always() -> Self {
        Self {
            source: "true".to_string(),
            compiled: Ok(Predicate::True),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.compiled.as_ref().ok()
    }

    pub fn error(&self) -> Option<&PredicateError> {
        self.compiled.as_ref().err()
    }

    pub fn is_valid(&self) -> bool {
        self.compiled.is_ok()
    }

    /// Strict check used by rule validation.
    pub fn validate(&self) -> Result<(), EngineError> {
        match &self.compiled {
            Ok(_) => Ok(()),
            Err(e) => Err(EngineError::Validation(format!(
                "invalid condition `{}`: {}",
                self.source, e
            ))),
        }
    }

    pub fn evaluate(&self, event: &EngineEvent) -> bool {
        match &self.compiled {
            Ok(predicate) => predicate.evaluate(event),
            Err(e) => {
                tracing::warn!(
                    condition = %self.source,
                    error = %e,
                    event_id = %event.id,
                    "Condition failed to compile, treating as no match"
                );
                false
            }
        }
    }
}

impl PartialEq for CompiledPredicate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

// ---------------------------------------------------------------------------
// Evaluation helpers
// ---------------------------------------------------------------------------

enum Resolved<'a> {
    Str(&'a str),
    Owned(String),
    Severity(EventSeverity),
    Json(&'a serde_json::Value),
    Missing,
}

fn resolve<'a>(field: &Field, event: &'a EngineEvent) -> Resolved<'a> {
    match field {
        Field::Id => Resolved::Owned(event.id.to_string()),
        Field::Kind => Resolved::Str(event.kind.as_str()),
        Field::Severity => Resolved::Severity(event.severity),
        Field::Category => Resolved::Str(&event.category),
        Field::Source => Resolved::Str(&event.source),
        Field::Context(key) => event
            .context
            .get(key)
            .map_or(Resolved::Missing, Resolved::Json),
    }
}

impl Resolved<'_> {
    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            Self::Owned(s) => Some(s.as_str()),
            Self::Json(serde_json::Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

fn compare(resolved: &Resolved<'_>, cmp: CompareOp, literal: &Literal) -> bool {
    match (resolved, literal) {
        (Resolved::Str(_) | Resolved::Owned(_), Literal::String(expected)) => {
            let actual = resolved.as_text().unwrap_or_default();
            match cmp {
                CompareOp::Eq => actual == expected.as_str(),
                CompareOp::Ne => actual != expected.as_str(),
                _ => false,
            }
        }
        (Resolved::Severity(actual), Literal::String(expected)) => {
            EventSeverity::parse_str(expected).is_some_and(|expected| cmp.holds(actual.cmp(&expected)))
        }
        (Resolved::Json(value), literal) => compare_json(value, cmp, literal),
        _ => false,
    }
}

fn compare_json(value: &serde_json::Value, cmp: CompareOp, literal: &Literal) -> bool {
    use serde_json::Value;
    match (value, literal) {
        (Value::String(actual), Literal::String(expected)) => match cmp {
            CompareOp::Eq => actual == expected,
            CompareOp::Ne => actual != expected,
            _ => false,
        },
        (Value::Number(actual), Literal::Number(expected)) => actual
            .as_f64()
            .and_then(|a| a.partial_cmp(expected))
            .is_some_and(|ordering| cmp.holds(ordering)),
        (Value::Bool(actual), Literal::Bool(expected)) => match cmp {
            CompareOp::Eq => actual == expected,
            CompareOp::Ne => actual != expected,
            _ => false,
        },
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Op(CompareOp),
    And,
    Or,
    Not,
    In,
    Contains,
    Exists,
    True,
    False,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "identifier `{s}`"),
            Self::Str(s) => write!(f, "string {s:?}"),
            Self::Number(n) => write!(f, "number {n}"),
            Self::LParen => f.write_str("`(`"),
            Self::RParen => f.write_str("`)`"),
            Self::LBracket => f.write_str("`[`"),
            Self::RBracket => f.write_str("`]`"),
            Self::Comma => f.write_str("`,`"),
            Self::Op(op) => write!(f, "`{}`", op.as_str()),
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
            Self::Not => f.write_str("NOT"),
            Self::In => f.write_str("IN"),
            Self::Contains => f.write_str("CONTAINS"),
            Self::Exists => f.write_str("EXISTS"),
            Self::True => f.write_str("true"),
            Self::False => f.write_str("false"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn tokenize(source: &str) -> Result<Vec<Token>, PredicateError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);

        let simple = match (c, next) {
            (c, _) if c.is_whitespace() => {
                i += 1;
                continue;
            }
            ('(', _) => Some((TokenKind::LParen, 1)),
            (')', _) => Some((TokenKind::RParen, 1)),
            ('[', _) => Some((TokenKind::LBracket, 1)),
            (']', _) => Some((TokenKind::RBracket, 1)),
            (',', _) => Some((TokenKind::Comma, 1)),
            ('=', Some('=')) => Some((TokenKind::Op(CompareOp::Eq), 2)),
            ('!', Some('=')) => Some((TokenKind::Op(CompareOp::Ne), 2)),
            ('<', Some('=')) => Some((TokenKind::Op(CompareOp::Le), 2)),
            ('>', Some('=')) => Some((TokenKind::Op(CompareOp::Ge), 2)),
            ('<', _) => Some((TokenKind::Op(CompareOp::Lt), 1)),
            ('>', _) => Some((TokenKind::Op(CompareOp::Gt), 1)),
            ('&', Some('&')) => Some((TokenKind::And, 2)),
            ('|', Some('|')) => Some((TokenKind::Or, 2)),
            ('!', _) => Some((TokenKind::Not, 1)),
            _ => None,
        };

        if let Some((kind, width)) = simple {
            tokens.push(Token { kind, offset });
            i += width;
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut value = String::new();
            let mut j = i + 1;
            let mut closed = false;
            while j < chars.len() {
                let ch = chars[j].1;
                if ch == '\\' {
                    match chars.get(j + 1) {
                        Some((_, escaped)) => {
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => *other,
                            });
                            j += 2;
                            continue;
                        }
                        None => break,
                    }
                }
                if ch == quote {
                    closed = true;
                    break;
                }
                value.push(ch);
                j += 1;
            }
            if !closed {
                return Err(PredicateError::new(offset, "unterminated string literal"));
            }
            tokens.push(Token {
                kind: TokenKind::Str(value),
                offset,
            });
            i = j + 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].1.is_ascii_digit() || chars[j].1 == '.') {
                j += 1;
            }
            let text: String = chars[i..j].iter().map(|(_, ch)| *ch).collect();
            let number = text
                .parse::<f64>()
                .map_err(|_| PredicateError::new(offset, format!("invalid number `{text}`")))?;
            tokens.push(Token {
                kind: TokenKind::Number(number),
                offset,
            });
            i = j;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut j = i + 1;
            while j < chars.len()
                && (chars[j].1.is_alphanumeric() || matches!(chars[j].1, '_' | '.' | '-'))
            {
                j += 1;
            }
            let word: String = chars[i..j].iter().map(|(_, ch)| *ch).collect();
            let kind = match word.to_uppercase().as_str() {
                "AND" => TokenKind::And,
                "OR" => TokenKind::Or,
                "NOT" => TokenKind::Not,
                "IN" => TokenKind::In,
                "CONTAINS" => TokenKind::Contains,
                "EXISTS" => TokenKind::Exists,
                "TRUE" => TokenKind::True,
                "FALSE" => TokenKind::False,
                _ => TokenKind::Ident(word),
            };
            tokens.push(Token { kind, offset });
            i = j;
            continue;
        }

        return Err(PredicateError::new(offset, format!("unexpected character `{c}`")));
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn end_offset(&self) -> usize {
        self.tokens.last().map_or(0, |t| t.offset + 1)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek().is_some_and(|t| &t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), PredicateError> {
        match self.advance() {
            Some(tok) if tok.kind == kind => Ok(()),
            Some(tok) => Err(PredicateError::new(
                tok.offset,
                format!("expected {kind}, found {}", tok.kind),
            )),
            None => Err(PredicateError::new(
                self.end_offset(),
                format!("expected {kind}, found end of input"),
            )),
        }
    }

    fn descend(&mut self) -> Result<(), PredicateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(PredicateError::new(
                self.peek().map_or_else(|| self.end_offset(), |t| t.offset),
                format!("expression nested deeper than {MAX_DEPTH} levels"),
            ));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Predicate, PredicateError> {
        let mut any = vec![self.parse_and()?];
        while self.eat(&TokenKind::Or) {
            any.push(self.parse_and()?);
        }
        Ok(if any.len() == 1 {
            any.remove(0)
        } else {
            Predicate::Or { any }
        })
    }

    fn parse_and(&mut self) -> Result<Predicate, PredicateError> {
        let mut all = vec![self.parse_unary()?];
        while self.eat(&TokenKind::And) {
            all.push(self.parse_unary()?);
        }
        Ok(if all.len() == 1 {
            all.remove(0)
        } else {
            Predicate::And { all }
        })
    }

    fn parse_unary(&mut self) -> Result<Predicate, PredicateError> {
        if self.eat(&TokenKind::Not) {
            self.descend()?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Predicate::Not {
                inner: Box::new(inner),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, PredicateError> {
        let Some(tok) = self.advance() else {
            return Err(PredicateError::new(
                self.end_offset(),
                "expected expression, found end of input",
            ));
        };

        match tok.kind {
            TokenKind::LParen => {
                self.descend()?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::True => Ok(Predicate::True),
            TokenKind::False => Ok(Predicate::False),
            TokenKind::Exists => {
                let field = self.parse_field()?;
                Ok(Predicate::Exists { field })
            }
            TokenKind::Ident(name) => {
                let field = Field::parse(&name)
                    .ok_or_else(|| PredicateError::new(tok.offset, format!("unknown field `{name}`")))?;
                self.parse_comparison(field)
            }
            other => Err(PredicateError::new(
                tok.offset,
                format!("expected field or `(`, found {other}"),
            )),
        }
    }

    fn parse_field(&mut self) -> Result<Field, PredicateError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::Ident(name),
                offset,
            }) => Field::parse(&name)
                .ok_or_else(|| PredicateError::new(offset, format!("unknown field `{name}`"))),
            Some(tok) => Err(PredicateError::new(
                tok.offset,
                format!("expected field, found {}", tok.kind),
            )),
            None => Err(PredicateError::new(
                self.end_offset(),
                "expected field, found end of input",
            )),
        }
    }

    fn parse_comparison(&mut self, field: Field) -> Result<Predicate, PredicateError> {
        let Some(tok) = self.advance() else {
            return Err(PredicateError::new(
                self.end_offset(),
                format!("expected operator after `{field}`"),
            ));
        };

        match tok.kind {
            TokenKind::Op(cmp) => {
                let value = self.parse_literal()?;
                Ok(Predicate::Compare { field, cmp, value })
            }
            TokenKind::In => {
                self.expect(TokenKind::LBracket)?;
                let mut values = vec![self.parse_literal()?];
                while self.eat(&TokenKind::Comma) {
                    values.push(self.parse_literal()?);
                }
                self.expect(TokenKind::RBracket)?;
                Ok(Predicate::In { field, values })
            }
            TokenKind::Contains => match self.parse_literal()? {
                Literal::String(needle) => Ok(Predicate::Contains { field, needle }),
                other => Err(PredicateError::new(
                    tok.offset,
                    format!("CONTAINS expects a string, found {other}"),
                )),
            },
            other => Err(PredicateError::new(
                tok.offset,
                format!("expected operator after `{field}`, found {other}"),
            )),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal, PredicateError> {
        match self.advance() {
            Some(Token {
                kind: TokenKind::Str(s),
                ..
            }) => Ok(Literal::String(s)),
            Some(Token {
                kind: TokenKind::Number(n),
                ..
            }) => Ok(Literal::Number(n)),
            Some(Token {
                kind: TokenKind::True,
                ..
            }) => Ok(Literal::Bool(true)),
            Some(Token {
                kind: TokenKind::False,
                ..
            }) => Ok(Literal::Bool(false)),
            Some(tok) => Err(PredicateError::new(
                tok.offset,
                format!("expected literal, found {}", tok.kind),
            )),
            None => Err(PredicateError::new(
                self.end_offset(),
                "expected literal, found end of input",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::event::EventKind;

    fn critical_system() -> EngineEvent {
        EngineEvent::error(EventSeverity::Critical, "system")
            .with_source("agent-7")
            .with_context("retry_count", serde_json::json!(4))
            .with_context("tags", serde_json::json!(["gpu", "oom"]))
            .with_context("override", serde_json::json!(true))
    }

    fn eval(source: &str, event: &EngineEvent) -> bool {
        Predicate::parse(source)
            .unwrap_or_else(|e| panic!("`{source}` failed to parse: {e}"))
            .evaluate(event)
    }

    #[test]
    fn test_field_equality() {
        let event = critical_system();
        assert!(eval(r#"severity == "critical""#, &event));
        assert!(eval(r#"event.category == 'system'"#, &event));
        assert!(eval(r#"kind == "error""#, &event));
        assert!(!eval(r#"source == "agent-8""#, &event));
        assert!(eval(r#"source != "agent-8""#, &event));
    }

    #[test]
    fn test_severity_ordering_comparisons() {
        let event = critical_system();
        assert!(eval(r#"severity >= "error""#, &event));
        assert!(!eval(r#"severity < "warning""#, &event));

        let info = EngineEvent::error(EventSeverity::Info, "system");
        assert!(eval(r#"severity < "warning""#, &info));
        // Unknown severity names never match.
        assert!(!eval(r#"severity >= "apocalyptic""#, &info));
    }

    #[test]
    fn test_boolean_combinators() {
        let event = critical_system();
        assert!(eval(
            r#"severity == "critical" AND category == "system""#,
            &event
        ));
        assert!(eval(r#"category == "network" OR category == "system""#, &event));
        assert!(eval(r#"NOT category == "network""#, &event));
        assert!(eval(
            r#"!(category == "network") && (source == "agent-7" || false)"#,
            &event
        ));
        // AND binds tighter than OR.
        assert!(eval(r#"true OR false AND false"#, &event));
    }

    #[test]
    fn test_membership_and_contains() {
        let event = critical_system();
        assert!(eval(r#"category IN ["network", "system"]"#, &event));
        assert!(!eval(r#"category IN ["network", "agent"]"#, &event));
        assert!(eval(r#"context.tags CONTAINS "oom""#, &event));
        assert!(eval(r#"source contains "agent""#, &event));
    }

    #[test]
    fn test_context_comparisons() {
        let event = critical_system();
        assert!(eval("context.retry_count > 3", &event));
        assert!(!eval("context.retry_count > 4", &event));
        assert!(eval("context.override == true", &event));
        assert!(eval("EXISTS context.override", &event));
        assert!(!eval("EXISTS context.missing", &event));
    }

    #[test]
    fn test_type_mismatch_fails_closed() {
        let event = critical_system();
        assert!(!eval(r#"context.retry_count == "4""#, &event));
        assert!(!eval("category > 3", &event));
        assert!(!eval(r#"context.missing != "x""#, &event));
    }

    #[test]
    fn test_parse_errors() {
        for source in [
            "",
            "severity ==",
            r#"severity = "critical""#,
            r#"colour == "red""#,
            r#"(severity == "critical""#,
            r#"category IN "system""#,
            r#"severity == "critical" extra"#,
            r#"source == "unterminated"#,
            "context. == 1",
            "eval('rm -rf /')",
        ] {
            assert!(Predicate::parse(source).is_err(), "`{source}` should not parse");
        }
    }

    #[test]
    fn test_parse_error_display_carries_offset() {
        let err = Predicate::parse("severity ==").unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.ends_with(&format!("(at offset {})", err.offset)), "{rendered}");

        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn test_deep_nesting_rejected_without_overflow() {
        let source = format!("{}true{}", "(".repeat(500), ")".repeat(500));
        let err = Predicate::parse(&source).unwrap_err();
        assert!(err.message.contains("nested"));

        let nots = format!("{}true", "NOT ".repeat(500));
        assert!(Predicate::parse(&nots).is_err());
    }

    #[test]
    fn test_compiled_predicate_fails_closed() {
        let bad = CompiledPredicate::compile("severity === 'critical'");
        assert!(!bad.is_valid());
        assert!(bad.validate().is_err());
        assert!(!bad.evaluate(&critical_system()));

        let good = CompiledPredicate::compile(r#"severity == "critical""#);
        assert!(good.is_valid());
        assert!(good.evaluate(&critical_system()));
    }

    #[test]
    fn test_kind_alias() {
        let event = EngineEvent::new(EventKind::UserCommand, EventSeverity::Info, "command");
        assert!(eval(r#"type == "user_command""#, &event));
    }
}
