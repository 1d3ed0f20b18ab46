//! URL patterns used to route intercepted requests.

use url::Url;

/// Type of URL pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Full URL contains the substring.
    Contains,
    /// Path component ends with the pattern (case-sensitive).
    PathSuffix,
    /// Full URL ends with `.{pattern}`, ignoring ASCII case.
    Extension,
}

/// A single URL pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    pub pattern_type: PatternType,
    pub pattern: String,
}

impl UrlPattern {
    /// Create a contains pattern, e.g. a host name.
    pub fn contains(substring: &str) -> Self {
        Self::new(PatternType::Contains, substring)
    }

    /// Match URLs whose path ends with `suffix`.
    pub fn path_suffix(suffix: &str) -> Self {
        Self::new(PatternType::PathSuffix, suffix)
    }

    /// Match URLs ending in `.ext`. A leading dot in `ext` is ignored.
    pub fn extension(ext: &str) -> Self {
        Self::new(
            PatternType::Extension,
            &ext.trim_start_matches('.').to_ascii_lowercase(),
        )
    }

    fn new(pattern_type: PatternType, pattern: &str) -> Self {
        Self {
            pattern_type,
            pattern: pattern.to_string(),
        }
    }

    /// Check if a URL matches this pattern.
    pub fn matches(&self, url: &Url) -> bool {
        let url_str = url.as_str();
        match self.pattern_type {
            PatternType::Contains => url_str.contains(&self.pattern),
            PatternType::PathSuffix => url.path().ends_with(&self.pattern),
            PatternType::Extension => {
                let needle_len = self.pattern.len() + 1;
                if url_str.len() < needle_len {
                    return false;
                }
                let (_, tail) = url_str.split_at(url_str.len() - needle_len);
                tail.starts_with('.') && tail[1..].eq_ignore_ascii_case(&self.pattern)
            }
        }
    }

    /// Check whether any pattern in `patterns` matches.
    pub fn any(patterns: &[UrlPattern], url: &Url) -> bool {
        patterns.iter().any(|p| p.matches(url))
    }
}
