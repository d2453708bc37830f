//! Expression compiler
//!
//! Turns the textual form of a group expression into a [`SeriesMatcher`].
//!
//! # Syntax
//!
//! ```text
//! /a.*/       regular expression, anchored over the full series name
//! /cpu.*/i    same, case-insensitive
//! "a1"        exact series name ("" escapes a quote)
//! a1          bare literal, exact series name
//! ```

use crate::pattern::error::{PatternError, PatternResult};
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::Arc;

/// Upper bound on the compiled program size of a single expression
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A compiled predicate over series names
///
/// Implementations must be pure: membership workers call `matches`
/// concurrently from several tasks.
pub trait SeriesMatcher: fmt::Debug + Send + Sync {
    /// Whether the series name belongs to the set described by the expression
    fn matches(&self, series: &str) -> bool;
}

/// Shared handle to a compiled matcher
pub type Matcher = Arc<dyn SeriesMatcher>;

/// Compiles expressions into matchers
///
/// Injected into the registry so another pattern engine can be swapped in
/// without touching membership maintenance.
pub trait PatternCompiler: Send + Sync {
    fn compile(&self, expression: &str) -> PatternResult<Matcher>;
}

/// Parsed, not yet compiled, expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Exact series name
    Literal(String),
    /// Regular expression body (without delimiters) and flags
    Regex { body: String, case_insensitive: bool },
}

impl Pattern {
    /// Split an expression into its literal or regex form
    pub fn parse(expression: &str) -> PatternResult<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(PatternError::Empty);
        }

        if let Some(rest) = expression.strip_prefix('/') {
            return Self::parse_regex(expression, rest);
        }

        if let Some(rest) = expression.strip_prefix('"') {
            return Self::parse_quoted(expression, rest).map(Pattern::Literal);
        }

        Ok(Pattern::Literal(expression.to_string()))
    }

    fn parse_regex(expression: &str, rest: &str) -> PatternResult<Self> {
        // position of the last unescaped slash
        let mut close = None;
        let mut escaped = false;
        for (idx, c) in rest.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '/' => close = Some(idx),
                _ => {}
            }
        }

        let close = close.ok_or_else(|| PatternError::Unbalanced(expression.to_string()))?;
        let body = rest[..close].replace("\\/", "/");

        let mut case_insensitive = false;
        for flag in rest[close + 1..].chars() {
            match flag {
                'i' => case_insensitive = true,
                _ => {
                    return Err(PatternError::UnsupportedFlag {
                        expression: expression.to_string(),
                        flag,
                    })
                }
            }
        }

        Ok(Pattern::Regex {
            body,
            case_insensitive,
        })
    }

    fn parse_quoted(expression: &str, rest: &str) -> PatternResult<String> {
        let mut out = String::with_capacity(rest.len());
        let mut chars = rest.chars().peekable();

        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    out.push('"');
                    continue;
                }
                if chars.next().is_some() {
                    return Err(PatternError::Unbalanced(expression.to_string()));
                }
                return Ok(out);
            }
            out.push(c);
        }

        Err(PatternError::Unbalanced(expression.to_string()))
    }
}

/// Matcher for a single exact name
#[derive(Debug, Clone)]
pub struct ExactMatcher {
    name: String,
}

impl SeriesMatcher for ExactMatcher {
    fn matches(&self, series: &str) -> bool {
        self.name == series
    }
}

/// Matcher backed by an anchored regular expression
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
}

impl SeriesMatcher for RegexMatcher {
    fn matches(&self, series: &str) -> bool {
        self.regex.is_match(series)
    }
}

/// Default compiler using the `regex` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexCompiler;

impl RegexCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl PatternCompiler for RegexCompiler {
    fn compile(&self, expression: &str) -> PatternResult<Matcher> {
        match Pattern::parse(expression)? {
            Pattern::Literal(name) => Ok(Arc::new(ExactMatcher { name })),
            Pattern::Regex {
                body,
                case_insensitive,
            } => {
                let regex = RegexBuilder::new(&format!("^(?:{})$", body))
                    .case_insensitive(case_insensitive)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(|e| PatternError::Regex {
                        expression: expression.trim().to_string(),
                        reason: diagnostic_summary(&e.to_string()),
                    })?;
                Ok(Arc::new(RegexMatcher { regex }))
            }
        }
    }
}

/// Collapse a multi-line regex syntax error to its `error:` message
fn diagnostic_summary(reason: &str) -> String {
    reason
        .lines()
        .rev()
        .find(|line| line.starts_with("error:"))
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| reason.lines().next().unwrap_or_default().to_string())
}
