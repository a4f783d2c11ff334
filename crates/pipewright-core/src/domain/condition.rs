//! Step guard expressions.
//!
//! Grammar:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := atom ( "&&" atom )*
//! atom    := "(" or ")" | "true" | "false" | ref ( "==" | "!=" ) 'literal'
//! ref     := matrix.<key> | runner.os | env.<NAME>
//! ```
//!
//! The whole expression may be wrapped in `${{ ... }}`.

use std::fmt;
use std::str::FromStr;

use super::error::PipewrightError;

/// A value an expression can refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Matrix(String),
    RunnerOs,
    Env(String),
}

impl Reference {
    /// Parse `matrix.<key>`, `runner.os` or `env.<NAME>`.
    pub fn parse(s: &str) -> Option<Self> {
        let (scope, key) = s.split_once('.')?;
        if key.is_empty() {
            return None;
        }
        match (scope, key) {
            ("matrix", key) => Some(Reference::Matrix(key.to_string())),
            ("runner", "os") => Some(Reference::RunnerOs),
            ("env", key) => Some(Reference::Env(key.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Matrix(key) => write!(f, "matrix.{}", key),
            Reference::RunnerOs => write!(f, "runner.os"),
            Reference::Env(key) => write!(f, "env.{}", key),
        }
    }
}

/// Anything that can resolve references, typically a job context.
pub trait ExpressionContext {
    fn resolve(&self, reference: &Reference) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
}

/// Parsed step condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Literal(bool),
    Compare {
        reference: Reference,
        op: CompareOp,
        value: String,
    },
    All(Vec<Condition>),
    Any(Vec<Condition>),
}

impl Condition {
    /// Evaluate against `ctx`. Unresolved references compare as the empty string.
    pub fn evaluate(&self, ctx: &dyn ExpressionContext) -> bool {
        match self {
            Condition::Literal(b) => *b,
            Condition::Compare {
                reference,
                op,
                value,
            } => {
                let actual = ctx.resolve(reference).unwrap_or_default();
                match op {
                    CompareOp::Eq => actual == *value,
                    CompareOp::Ne => actual != *value,
                }
            }
            Condition::All(parts) => parts.iter().all(|c| c.evaluate(ctx)),
            Condition::Any(parts) => parts.iter().any(|c| c.evaluate(ctx)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Eq,
    Ne,
    And,
    Or,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|ch| *ch == quote)
                    .map(|p| start + p)
                    .ok_or_else(|| "unterminated string literal".to_string())?;
                tokens.push(Token::Literal(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character `{}`", other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Condition, String> {
        let mut parts = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            parts.push(self.parse_and()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::Any(parts)
        })
    }

    fn parse_and(&mut self) -> Result<Condition, String> {
        let mut parts = vec![self.parse_atom()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            parts.push(self.parse_atom()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Condition::All(parts)
        })
    }

    fn parse_atom(&mut self) -> Result<Condition, String> {
        match self.next() {
            Some(Token::Open) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err("expected `)`".to_string()),
                }
            }
            Some(Token::Ident(word)) if word == "true" => Ok(Condition::Literal(true)),
            Some(Token::Ident(word)) if word == "false" => Ok(Condition::Literal(false)),
            Some(Token::Ident(word)) => {
                let reference = Reference::parse(&word)
                    .ok_or_else(|| format!("unknown reference `{}`", word))?;
                let op = match self.next() {
                    Some(Token::Eq) => CompareOp::Eq,
                    Some(Token::Ne) => CompareOp::Ne,
                    _ => return Err(format!("expected `==` or `!=` after `{}`", word)),
                };
                match self.next() {
                    Some(Token::Literal(value)) => Ok(Condition::Compare {
                        reference,
                        op,
                        value,
                    }),
                    _ => Err("expected a quoted literal".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

impl FromStr for Condition {
    type Err = PipewrightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fail = |reason: String| PipewrightError::InvalidCondition {
            expression: s.to_string(),
            reason,
        };

        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix("${{")
            .and_then(|rest| rest.strip_suffix("}}"))
            .unwrap_or(trimmed);

        let tokens = tokenize(body).map_err(fail)?;
        let mut parser = Parser { tokens, pos: 0 };
        let condition = parser.parse_or().map_err(fail)?;
        if parser.pos < parser.tokens.len() {
            return Err(fail("trailing input".to_string()));
        }
        Ok(condition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapContext(HashMap<String, String>);

    impl ExpressionContext for MapContext {
        fn resolve(&self, reference: &Reference) -> Option<String> {
            self.0.get(&reference.to_string()).cloned()
        }
    }

    fn ctx(pairs: &[(&str, &str)]) -> MapContext {
        MapContext(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn parses_simple_comparison() {
        let cond: Condition = "matrix.os == 'windows-latest'".parse().unwrap();
        assert_eq!(
            cond,
            Condition::Compare {
                reference: Reference::Matrix("os".to_string()),
                op: CompareOp::Eq,
                value: "windows-latest".to_string(),
            }
        );
        assert!(cond.evaluate(&ctx(&[("matrix.os", "windows-latest")])));
        assert!(!cond.evaluate(&ctx(&[("matrix.os", "ubuntu-latest")])));
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let cond: Condition = "runner.os == 'a' || matrix.x == 'b' && matrix.y == 'c'"
            .parse()
            .unwrap();
        assert!(cond.evaluate(&ctx(&[("runner.os", "a")])));
        assert!(!cond.evaluate(&ctx(&[("matrix.x", "b")])));
        assert!(cond.evaluate(&ctx(&[("matrix.x", "b"), ("matrix.y", "c")])));
    }

    #[test]
    fn parentheses_and_wrapper() {
        let cond: Condition = "${{ (matrix.a == '1' || matrix.a == '2') && env.CI != 'false' }}"
            .parse()
            .unwrap();
        assert!(cond.evaluate(&ctx(&[("matrix.a", "2"), ("env.CI", "true")])));
        assert!(!cond.evaluate(&ctx(&[("matrix.a", "3"), ("env.CI", "true")])));
    }

    #[test]
    fn missing_reference_is_empty_string() {
        let cond: Condition = "matrix.target != ''".parse().unwrap();
        assert!(!cond.evaluate(&ctx(&[])));
    }

    #[test]
    fn literals() {
        assert!("true".parse::<Condition>().unwrap().evaluate(&ctx(&[])));
        assert!(!"false".parse::<Condition>().unwrap().evaluate(&ctx(&[])));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in [
            "",
            "matrix.os ==",
            "matrix.os = 'x'",
            "github.ref == 'main'",
            "matrix.os == 'x' extra",
            "(matrix.os == 'x'",
            "matrix.os == 'unterminated",
        ] {
            let err = bad.parse::<Condition>().unwrap_err();
            assert!(
                matches!(err, PipewrightError::InvalidCondition { .. }),
                "{bad} should be rejected"
            );
        }
    }
}
