//! Cache rules: path globs mapped to TTLs.
//!
//! Glob syntax: `*` matches within one segment, `**` matches across
//! segments, `?` matches one non-`/` character. Everything else is literal.

use std::time::Duration;

use regex::Regex;

use crate::config::CacheRuleConfig;
use crate::error::StartupError;

/// Compile a glob into an anchored regex.
pub fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() * 2 + 2);
    pattern.push('^');
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                pattern.push_str(".*");
            }
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            c => {
                let mut buf = [0u8; 4];
                pattern.push_str(&regex::escape(c.encode_utf8(&mut buf)));
            }
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

/// One compiled rule.
#[derive(Debug, Clone)]
pub struct CacheRule {
    glob: String,
    regex: Regex,
    ttl: Duration,
}

impl CacheRule {
    pub fn new(glob: &str, ttl: Duration) -> Result<Self, StartupError> {
        let regex = glob_to_regex(glob).map_err(|source| StartupError::InvalidGlob {
            glob: glob.to_string(),
            source,
        })?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
            ttl,
        })
    }

    pub fn glob(&self) -> &str {
        &self.glob
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

/// Rules in registration order; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct CacheRules {
    rules: Vec<CacheRule>,
}

impl CacheRules {
    pub fn compile(configs: &[CacheRuleConfig]) -> Result<Self, StartupError> {
        let rules = configs
            .iter()
            .map(|c| CacheRule::new(&c.path_glob, Duration::from_secs(c.ttl_seconds)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn rule_for(&self, path: &str) -> Option<&CacheRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(glob: &str, path: &str) -> bool {
        glob_to_regex(glob).unwrap().is_match(path)
    }

    #[test]
    fn single_star_stays_in_segment() {
        assert!(matches("/users/*", "/users/42"));
        assert!(matches("/users/*", "/users/"));
        assert!(!matches("/users/*", "/users/42/posts"));
        assert!(!matches("/users/*", "/users"));
    }

    #[test]
    fn double_star_crosses_segments() {
        assert!(matches("/static/**", "/static/css/site.css"));
        assert!(matches("/**/avatar.png", "/u/1/avatar.png"));
    }

    #[test]
    fn question_mark_and_literals() {
        assert!(matches("/v?/items", "/v1/items"));
        assert!(!matches("/v?/items", "/v10/items"));
        assert!(matches("/a.b+c", "/a.b+c"));
        assert!(!matches("/a.b", "/axb"));
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = CacheRules::compile(&[
            CacheRuleConfig {
                path_glob: "/users/me".into(),
                ttl_seconds: 5,
            },
            CacheRuleConfig {
                path_glob: "/users/*".into(),
                ttl_seconds: 60,
            },
        ])
        .unwrap();
        assert_eq!(rules.rule_for("/users/me").unwrap().ttl(), Duration::from_secs(5));
        assert_eq!(rules.rule_for("/users/7").unwrap().ttl(), Duration::from_secs(60));
        assert!(rules.rule_for("/orders/7").is_none());
    }
}
