//! Route pattern parsing and matching.
//!
//! # Grammar
//! ```text
//! pattern = [ METHOD " " ] path
//! path    = "/" ...          exact match
//!         | "/" ... "/"      subtree (prefix) match
//! ```
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A `GET` pattern also serves `HEAD`
//! - No regex or wildcards; the longest matching path wins

use axum::http::Method;

/// Why a pattern string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("empty pattern")]
    Empty,

    #[error("invalid method in pattern `{0}`")]
    InvalidMethod(String),

    #[error("pattern `{0}` must start with `/`")]
    MissingLeadingSlash(String),
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    method: Option<Method>,
    path: String,
    subtree: bool,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }

        let (method, path) = match raw.split_once(char::is_whitespace) {
            Some((method, path)) if !method.starts_with('/') => {
                let method = Method::from_bytes(method.as_bytes())
                    .map_err(|_| PatternError::InvalidMethod(raw.to_string()))?;
                (Some(method), path.trim_start())
            }
            _ => (None, raw),
        };

        if !path.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash(raw.to_string()));
        }

        Ok(Self {
            method,
            path: path.to_string(),
            subtree: path.ends_with('/'),
        })
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_subtree(&self) -> bool {
        self.subtree
    }

    pub fn matches_path(&self, path: &str) -> bool {
        if self.subtree {
            path.starts_with(&self.path)
        } else {
            path == self.path
        }
    }

    pub fn matches_method(&self, method: &Method) -> bool {
        match &self.method {
            None => true,
            Some(m) if m == method => true,
            Some(m) => *m == Method::GET && *method == Method::HEAD,
        }
    }

    /// Methods this pattern answers, for an `Allow` header.
    pub fn allowed_methods(&self) -> Vec<Method> {
        match &self.method {
            Some(m) if *m == Method::GET => vec![Method::GET, Method::HEAD],
            Some(m) => vec![m.clone()],
            None => Vec::new(),
        }
    }

    /// Ordering key: longer paths first, then method-qualified patterns.
    pub(crate) fn specificity(&self) -> (usize, bool) {
        (self.path.len(), self.method.is_some())
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{} {}", method, self.path),
            None => f.write_str(&self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_and_path() {
        let p = Pattern::parse("POST /users").unwrap();
        assert_eq!(p.method(), Some(&Method::POST));
        assert_eq!(p.path(), "/users");
        assert!(!p.is_subtree());
        assert_eq!(p.to_string(), "POST /users");
    }

    #[test]
    fn trailing_slash_is_subtree() {
        let p = Pattern::parse("/static/").unwrap();
        assert!(p.is_subtree());
        assert!(p.matches_path("/static/"));
        assert!(p.matches_path("/static/css/site.css"));
        assert!(!p.matches_path("/static"));
    }

    #[test]
    fn exact_path_is_case_sensitive() {
        let p = Pattern::parse("/Users").unwrap();
        assert!(p.matches_path("/Users"));
        assert!(!p.matches_path("/users"));
        assert!(!p.matches_path("/Users/1"));
    }

    #[test]
    fn get_serves_head() {
        let p = Pattern::parse("GET /ping").unwrap();
        assert!(p.matches_method(&Method::GET));
        assert!(p.matches_method(&Method::HEAD));
        assert!(!p.matches_method(&Method::POST));
        assert_eq!(p.allowed_methods(), vec![Method::GET, Method::HEAD]);
    }

    #[test]
    fn rejects_malformed_patterns() {
        assert_eq!(Pattern::parse("  "), Err(PatternError::Empty));
        assert!(matches!(
            Pattern::parse("users"),
            Err(PatternError::MissingLeadingSlash(_))
        ));
        assert!(matches!(
            Pattern::parse("GE(T /x"),
            Err(PatternError::InvalidMethod(_))
        ));
    }
}
