//! Pure key selection for invalidation.
//!
//! A [`KeyMatcher`] selects cache keys by exact key, by prefix, or by a
//! glob pattern with `*` matching any run of characters.

use std::fmt;

/// Selects the cache keys an invalidation applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyMatcher {
    /// Exactly this key.
    Key(String),
    /// Every key starting with this prefix.
    Prefix(String),
    /// Every key matching this glob pattern.
    Pattern(String),
}

impl KeyMatcher {
    pub fn key(key: impl Into<String>) -> Self {
        KeyMatcher::Key(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        KeyMatcher::Prefix(prefix.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        KeyMatcher::Pattern(pattern.into())
    }

    /// Returns true if `key` is selected by this matcher.
    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyMatcher::Key(exact) => exact == key,
            KeyMatcher::Prefix(prefix) => key.starts_with(prefix.as_str()),
            KeyMatcher::Pattern(pattern) => pattern_matches(pattern, key),
        }
    }
}

impl fmt::Display for KeyMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyMatcher::Key(key) => write!(f, "{}", key),
            KeyMatcher::Prefix(prefix) => write!(f, "{}*", prefix),
            KeyMatcher::Pattern(pattern) => write!(f, "{}", pattern),
        }
    }
}

impl From<&str> for KeyMatcher {
    /// A string ending in `:` is a prefix, one containing `*` is a pattern,
    /// anything else is an exact key.
    fn from(value: &str) -> Self {
        if value.contains('*') {
            KeyMatcher::Pattern(value.to_string())
        } else if value.ends_with(':') {
            KeyMatcher::Prefix(value.to_string())
        } else {
            KeyMatcher::Key(value.to_string())
        }
    }
}

impl From<String> for KeyMatcher {
    fn from(value: String) -> Self {
        KeyMatcher::from(value.as_str())
    }
}

/// Checks if a cache key matches a glob pattern.
///
/// `*` matches any sequence of characters, including the empty one.
///
/// # Examples
///
/// ```
/// use finsight_core::cache::pattern_matches;
///
/// assert!(pattern_matches("aggregate:expenses:*", "aggregate:expenses:1:Monthly"));
/// assert!(pattern_matches("aggregate:*:Yearly", "aggregate:vehicles:3:Yearly"));
/// assert!(!pattern_matches("aggregate:*:Yearly", "aggregate:vehicles:3:Monthly"));
/// ```
pub fn pattern_matches(pattern: &str, key: &str) -> bool {
    let pattern = pattern.as_bytes();
    let key = key.as_bytes();

    let (mut p, mut k) = (0, 0);
    // Position of the last `*` seen and the key position it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            backtrack = Some((p, k));
            p += 1;
        } else if p < pattern.len() && pattern[p] == key[k] {
            p += 1;
            k += 1;
        } else if let Some((star, matched)) = backtrack {
            // Let the last `*` swallow one more character and retry.
            p = star + 1;
            k = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
