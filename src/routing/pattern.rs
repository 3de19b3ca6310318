//! # Route Pattern Compiler
//!
//! Compiles express-style path patterns into anchored regular expressions.
//!
//! Supported syntax:
//! - literal text: `/articles`
//! - named parameters: `/articles/:id`
//! - custom parameter patterns: `/articles/:id(\d+)`
//! - unnamed groups: `/static/(.*)`
//! - modifiers `?`, `*`, `+` on parameters and groups; a `/` or `.` directly
//!   before the parameter is folded into the optional/repeated part
//! - a bare `*`, which matches anything
//! - `\` escapes the next character
//!
//! Matching is case-sensitive and strict: `/a` and `/a/` are different paths,
//! and the whole path has to be consumed.

use crate::core::error::{CacheError, CacheResult};
use regex::Regex;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// A compiled route pattern
#[derive(Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
}

impl RoutePattern {
    /// Compile a pattern string
    pub fn compile(pattern: &str) -> CacheResult<Self> {
        let tokens = tokenize(pattern)?;

        let mut expression = String::from("^");
        for token in &tokens {
            token.write_regex(&mut expression);
        }
        expression.push('$');

        let regex = Regex::new(&expression)
            .map_err(|e| CacheError::pattern(pattern, e.to_string()))?;

        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Test a request path against this pattern
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutePattern")
            .field("source", &self.source)
            .field("regex", &self.regex.as_str())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modifier {
    Optional,
    ZeroOrMore,
    OneOrMore,
}

impl Modifier {
    fn is_optional(self) -> bool {
        matches!(self, Self::Optional | Self::ZeroOrMore)
    }

    fn is_repeated(self) -> bool {
        matches!(self, Self::ZeroOrMore | Self::OneOrMore)
    }
}

#[derive(Debug)]
enum Token {
    Literal(String),
    Capture {
        prefix: Option<char>,
        pattern: String,
        modifier: Option<Modifier>,
    },
}

impl Token {
    fn write_regex(&self, out: &mut String) {
        match self {
            Token::Literal(text) => out.push_str(&regex::escape(text)),
            Token::Capture {
                prefix,
                pattern,
                modifier,
            } => {
                let prefix = prefix
                    .map(|p| regex::escape(p.encode_utf8(&mut [0; 4])))
                    .unwrap_or_default();

                let mut capture = format!("(?:{})", pattern);
                if modifier.is_some_and(Modifier::is_repeated) {
                    capture = format!("{capture}(?:{prefix}{capture})*");
                }

                if modifier.is_some_and(Modifier::is_optional) {
                    out.push_str(&format!("(?:{prefix}({capture}))?"));
                } else {
                    out.push_str(&format!("{prefix}({capture})"));
                }
            }
        }
    }
}

struct Tokenizer<'a> {
    source: &'a str,
    chars: Peekable<Chars<'a>>,
    tokens: Vec<Token>,
    literal: String,
    // the last literal character came from an escape and cannot act as a prefix
    escaped_tail: bool,
}

fn tokenize(source: &str) -> CacheResult<Vec<Token>> {
    let mut tokenizer = Tokenizer {
        source,
        chars: source.chars().peekable(),
        tokens: Vec::new(),
        literal: String::new(),
        escaped_tail: false,
    };

    while let Some(c) = tokenizer.chars.next() {
        match c {
            '\\' => {
                let escaped = tokenizer
                    .chars
                    .next()
                    .ok_or_else(|| CacheError::pattern(source, "trailing escape character"))?;
                tokenizer.literal.push(escaped);
                tokenizer.escaped_tail = true;
            }
            ':' => {
                let name = tokenizer.read_name();
                if name.is_empty() {
                    return Err(CacheError::pattern(source, "missing parameter name after ':'"));
                }
                let custom = if tokenizer.chars.peek() == Some(&'(') {
                    tokenizer.chars.next();
                    Some(tokenizer.read_group()?)
                } else {
                    None
                };
                tokenizer.push_capture(custom, true);
            }
            '(' => {
                let group = tokenizer.read_group()?;
                tokenizer.push_capture(Some(group), true);
            }
            '*' => {
                tokenizer.push_capture(Some(".*".to_string()), false);
            }
            ')' => return Err(CacheError::pattern(source, "unbalanced ')'")),
            other => {
                tokenizer.literal.push(other);
                tokenizer.escaped_tail = false;
            }
        }
    }

    tokenizer.flush_literal();
    Ok(tokenizer.tokens)
}

impl Tokenizer<'_> {
    fn read_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        name
    }

    /// Read a group body up to its matching ')'; the opening '(' is already consumed.
    fn read_group(&mut self) -> CacheResult<String> {
        let mut depth = 1usize;
        let mut body = String::new();

        while let Some(c) = self.chars.next() {
            match c {
                '\\' => {
                    body.push(c);
                    if let Some(next) = self.chars.next() {
                        body.push(next);
                    }
                }
                '(' => {
                    depth += 1;
                    body.push(c);
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        if body.is_empty() {
                            return Err(CacheError::pattern(self.source, "empty group"));
                        }
                        return Ok(body);
                    }
                    body.push(c);
                }
                other => body.push(other),
            }
        }

        Err(CacheError::pattern(self.source, "unbalanced '('"))
    }

    fn read_modifier(&mut self) -> Option<Modifier> {
        let modifier = match self.chars.peek() {
            Some('?') => Modifier::Optional,
            Some('*') => Modifier::ZeroOrMore,
            Some('+') => Modifier::OneOrMore,
            _ => return None,
        };
        self.chars.next();
        Some(modifier)
    }

    fn push_capture(&mut self, pattern: Option<String>, allow_modifier: bool) {
        let last = self.literal.chars().last();
        let prefix = match last {
            Some(c @ ('/' | '.')) if !self.escaped_tail => {
                self.literal.pop();
                Some(c)
            }
            _ => None,
        };
        self.flush_literal();

        let pattern = pattern.unwrap_or_else(|| {
            let delimiter = prefix.unwrap_or('/');
            format!("[^{}]+?", regex::escape(delimiter.encode_utf8(&mut [0; 4])))
        });
        let modifier = if allow_modifier { self.read_modifier() } else { None };

        self.tokens.push(Token::Capture {
            prefix,
            pattern,
            modifier,
        });
    }

    fn flush_literal(&mut self) {
        if !self.literal.is_empty() {
            self.tokens.push(Token::Literal(std::mem::take(&mut self.literal)));
        }
        self.escaped_tail = false;
    }
}
