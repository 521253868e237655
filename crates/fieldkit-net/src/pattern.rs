//! URL patterns used to classify intercepted requests.

use url::Url;

/// Which part of the URL a pattern inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternType {
    /// Path contains substring (API markers).
    PathContains,
    /// Host contains substring (backend storage origin).
    HostContains,
}

/// URL pattern for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPattern {
    /// Pattern type.
    pub pattern_type: PatternType,
    /// Pattern string.
    pub pattern: String,
}

impl UrlPattern {
    /// Match paths containing a substring.
    pub fn path_contains(substring: &str) -> Self {
        Self {
            pattern_type: PatternType::PathContains,
            pattern: substring.to_string(),
        }
    }

    /// Match hosts containing a fragment.
    pub fn host_contains(fragment: &str) -> Self {
        Self {
            pattern_type: PatternType::HostContains,
            pattern: fragment.to_string(),
        }
    }

    /// Check if a URL matches this pattern. An empty pattern never matches.
    pub fn matches(&self, url: &Url) -> bool {
        if self.pattern.is_empty() {
            return false;
        }
        let host = url.host_str().unwrap_or("");
        match self.pattern_type {
            PatternType::PathContains => url.path().contains(&self.pattern),
            PatternType::HostContains => host.contains(&self.pattern),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_path_contains_ignores_query_and_host() {
        let pattern = UrlPattern::path_contains("/api/");
        assert!(pattern.matches(&url("https://app.example.com/api/tickets")));
        assert!(pattern.matches(&url("https://app.example.com/v2/api/tickets")));
        assert!(!pattern.matches(&url("https://api.example.com/tickets?next=/api/")));
    }

    #[test]
    fn test_host_contains() {
        let pattern = UrlPattern::host_contains("supabase.co");
        assert!(pattern.matches(&url("https://abcd.supabase.co/storage/v1/object/photo.jpg")));
        assert!(!pattern.matches(&url("https://cdn.example.com/supabase.co")));
    }

    #[test]
    fn test_empty_pattern_never_matches() {
        let pattern = UrlPattern::path_contains("");
        assert!(!pattern.matches(&url("https://app.example.com/api/tickets")));
    }
}
