//! Paths served without authentication

use crate::core::constants::API_PREFIX;

/// Default unauthenticated paths: the auth endpoints themselves, liveness, and
/// the static assets the login page needs.
pub const DEFAULT_BYPASS_PATTERNS: &[&str] = &[
    "/api/auth/login",
    "/api/auth/logout",
    "/api/auth/status",
    "/api/auth/setup",
    "/api/auth/oidc/login",
    "/api/auth/oidc/callback",
    "/api/health",
    "/assets/*",
    "/static/*",
    "/themes/*",
    "/*.css",
    "/favicon.ico",
    "/login",
    "/login.html",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum BypassRule {
    /// `/api/health`
    Exact(String),
    /// `/assets/*`, stored as `/assets/`
    Prefix(String),
    /// `/*.css`, stored as `.css`
    Suffix(String),
}

impl BypassRule {
    fn parse(pattern: &str) -> Self {
        if let Some(ext) = pattern.strip_prefix("/*")
            && !ext.is_empty()
        {
            return Self::Suffix(ext.to_string());
        }
        if let Some(prefix) = pattern.strip_suffix('*')
            && prefix.ends_with('/')
        {
            return Self::Prefix(prefix.to_string());
        }
        Self::Exact(pattern.to_string())
    }

    /// Wildcards only cover static paths; API paths need an exact rule
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(p) => path == p,
            _ if path.starts_with(API_PREFIX) => false,
            Self::Prefix(p) => path.starts_with(p.as_str()),
            Self::Suffix(s) => path.ends_with(s.as_str()),
        }
    }
}

/// Evaluates request paths against the bypass rule set. Built once at startup.
#[derive(Debug, Clone)]
pub struct BypassMatcher {
    rules: Vec<BypassRule>,
}

impl Default for BypassMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BYPASS_PATTERNS.iter().copied())
    }
}

impl BypassMatcher {
    pub fn new<'a>(patterns: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            rules: patterns.into_iter().map(BypassRule::parse).collect(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(path))
    }
}
