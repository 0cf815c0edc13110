//! Origin allowlist gate.
//!
//! Exact-string matching, including the literal values `null` and `file://`
//! that browsers send for local documents. A request without an `Origin`
//! header always passes; an unlisted origin is refused before any handler
//! runs.

use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed: HashSet<String>,
}

impl CorsPolicy {
    pub fn new(allowed: HashSet<String>) -> Self {
        Self { allowed }
    }

    /// Builds the allowlist from a comma-separated string (the
    /// `CORS_ORIGINS` configuration value).
    pub fn from_csv(csv: &str) -> Self {
        Self {
            allowed: csv
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    #[inline]
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self.allowed.contains(origin),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_membership() {
        let policy = CorsPolicy::from_csv("https://app.example.com, null,file://");

        #[rustfmt::skip]
        let cases = [
            (None,                              true),
            (Some("https://app.example.com"),   true),
            (Some("null"),                      true),
            (Some("file://"),                   true),

            (Some("https://evil.example.com"),  false),
            (Some("https://app.example.com/"),  false),
            (Some("HTTPS://APP.EXAMPLE.COM"),   false),
            (Some(""),                          false),
        ];

        for (origin, expected) in cases {
            assert_eq!(policy.permits(origin), expected, "origin: {origin:?}");
        }
    }

    #[test]
    fn empty_policy_rejects_any_origin() {
        let policy = CorsPolicy::from_csv("");

        assert!(policy.permits(None));
        assert!(!policy.permits(Some("https://app.example.com")));
    }
}
