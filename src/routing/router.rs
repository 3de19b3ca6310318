//! # Route Table
//!
//! Ordered inclusion rules with optional per-rule TTL, plus exclusion patterns.
//! The first inclusion rule that matches wins; any matching exclusion then
//! overrides it.

use super::pattern::RoutePattern;
use crate::core::error::CacheResult;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Inclusion rule as written in configuration
///
/// Either a bare pattern (uses the default TTL) or a pattern with its own TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteRule {
    /// Pattern using the global default TTL
    Pattern(String),

    /// Pattern with a TTL override for matching requests
    WithTtl {
        #[serde(alias = "pattern")]
        path: String,
        #[serde(with = "humantime_serde", alias = "ttl")]
        expire: Duration,
    },
}

impl RouteRule {
    /// Rule with a TTL override
    pub fn with_ttl<S: Into<String>>(path: S, expire: Duration) -> Self {
        Self::WithTtl {
            path: path.into(),
            expire,
        }
    }

    /// The rule's pattern
    pub fn pattern(&self) -> &str {
        match self {
            Self::Pattern(path) => path,
            Self::WithTtl { path, .. } => path,
        }
    }

    /// The rule's TTL override, if any
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Self::Pattern(_) => None,
            Self::WithTtl { expire, .. } => Some(*expire),
        }
    }
}

impl From<&str> for RouteRule {
    fn from(path: &str) -> Self {
        Self::Pattern(path.to_string())
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    pattern: RoutePattern,
    ttl: Option<Duration>,
}

/// Outcome of evaluating a path against the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision<'a> {
    /// An inclusion rule matched and no exclusion did
    Included {
        pattern: &'a str,
        ttl: Option<Duration>,
    },

    /// An inclusion rule matched but so did an exclusion
    Excluded { pattern: &'a str },

    /// No inclusion rule matched
    Unmatched,
}

/// Compiled inclusion and exclusion rules
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<CompiledRule>,
    exclusions: Vec<RoutePattern>,
}

impl RouteTable {
    /// Compile every rule and exclusion up front
    pub fn compile(rules: &[RouteRule], exclude: &[String]) -> CacheResult<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    pattern: RoutePattern::compile(rule.pattern())?,
                    ttl: rule.ttl(),
                })
            })
            .collect::<CacheResult<Vec<_>>>()?;

        let exclusions = exclude
            .iter()
            .map(|pattern| RoutePattern::compile(pattern))
            .collect::<CacheResult<Vec<_>>>()?;

        Ok(Self { rules, exclusions })
    }

    /// Evaluate a request path
    pub fn evaluate(&self, path: &str) -> RouteDecision<'_> {
        let Some(rule) = self.rules.iter().find(|rule| rule.pattern.matches(path)) else {
            return RouteDecision::Unmatched;
        };

        if let Some(exclusion) = self.exclusions.iter().find(|p| p.matches(path)) {
            return RouteDecision::Excluded {
                pattern: exclusion.as_str(),
            };
        }

        RouteDecision::Included {
            pattern: rule.pattern.as_str(),
            ttl: rule.ttl,
        }
    }
}

/// Check whether a query string carries the named parameter
///
/// Keys are URL-decoded before comparison; a key without a value counts as present.
pub fn has_query_param(query: Option<&str>, name: &str) -> bool {
    let Some(query) = query else {
        return false;
    };

    query.split('&').any(|pair| {
        let key = pair.split_once('=').map_or(pair, |(key, _)| key);
        urlencoding::decode(key)
            .map(|decoded| decoded == name)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rules: Vec<RouteRule>, exclude: &[&str]) -> RouteTable {
        let exclude: Vec<String> = exclude.iter().map(|s| s.to_string()).collect();
        RouteTable::compile(&rules, &exclude).unwrap()
    }

    #[test]
    fn test_first_inclusion_wins() {
        let table = table(
            vec![
                RouteRule::with_ttl("/articles/:id", Duration::from_secs(60)),
                RouteRule::with_ttl("/articles/(.*)", Duration::from_secs(600)),
            ],
            &[],
        );

        assert_eq!(
            table.evaluate("/articles/7"),
            RouteDecision::Included {
                pattern: "/articles/:id",
                ttl: Some(Duration::from_secs(60)),
            }
        );
        assert_eq!(
            table.evaluate("/articles/7/comments"),
            RouteDecision::Included {
                pattern: "/articles/(.*)",
                ttl: Some(Duration::from_secs(600)),
            }
        );
    }

    #[test]
    fn test_ttl_only_from_matched_rule() {
        let table = table(
            vec![
                RouteRule::with_ttl("/special", Duration::from_secs(3600)),
                RouteRule::from("/plain"),
            ],
            &[],
        );

        assert_eq!(
            table.evaluate("/plain"),
            RouteDecision::Included {
                pattern: "/plain",
                ttl: None,
            }
        );
    }

    #[test]
    fn test_exclusion_overrides_inclusion() {
        let table = table(vec![RouteRule::from("(.*)")], &["/admin/(.*)", "/login"]);

        assert!(matches!(table.evaluate("/home"), RouteDecision::Included { .. }));
        assert_eq!(
            table.evaluate("/admin/users"),
            RouteDecision::Excluded {
                pattern: "/admin/(.*)"
            }
        );
        assert_eq!(
            table.evaluate("/login"),
            RouteDecision::Excluded { pattern: "/login" }
        );
    }

    #[test]
    fn test_unmatched() {
        let table = table(vec![RouteRule::from("/only")], &[]);
        assert_eq!(table.evaluate("/other"), RouteDecision::Unmatched);
        assert_eq!(table.evaluate("/only/"), RouteDecision::Unmatched);
    }

    #[test]
    fn test_invalid_rule_is_rejected() {
        let result = RouteTable::compile(&[RouteRule::from("/bad/(")], &[]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rule_deserialization() {
        let rules: Vec<RouteRule> =
            serde_json::from_str(r#"["/a", {"path": "/b", "expire": "2h"}, {"pattern": "/c", "ttl": "5s"}]"#)
                .unwrap();

        assert_eq!(rules[0], RouteRule::from("/a"));
        assert_eq!(rules[1], RouteRule::with_ttl("/b", Duration::from_secs(7200)));
        assert_eq!(rules[2], RouteRule::with_ttl("/c", Duration::from_secs(5)));
    }

    #[test]
    fn test_query_param_detection() {
        assert!(has_query_param(Some("nocache=1"), "nocache"));
        assert!(has_query_param(Some("a=1&nocache"), "nocache"));
        assert!(has_query_param(Some("no%63ache=true"), "nocache"));
        assert!(!has_query_param(Some("nocacheX=1"), "nocache"));
        assert!(!has_query_param(Some("a=nocache"), "nocache"));
        assert!(!has_query_param(None, "nocache"));
    }
}
