//! Access-token scopes, orthogonal to RBAC (spec.md §4.4: "RBAC gates *what
//! resource*, scopes gate *which capability*").

use std::collections::HashSet;

use crate::error::Error;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(HashSet<String>);

impl ScopeSet {
    pub fn new(scopes: impl IntoIterator<Item = String>) -> Self {
        Self(scopes.into_iter().collect())
    }

    pub fn parse_space_separated(s: &str) -> Self {
        Self::new(s.split_whitespace().map(str::to_string))
    }

    pub fn to_space_separated(&self) -> String {
        let mut scopes: Vec<&str> = self.0.iter().map(String::as_str).collect();
        scopes.sort_unstable();
        scopes.join(" ")
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn has_any(&self, scopes: &[&str]) -> bool {
        scopes.iter().any(|s| self.0.contains(*s))
    }

    pub fn has_all(&self, scopes: &[&str]) -> bool {
        scopes.iter().all(|s| self.0.contains(*s))
    }

    pub fn require_any(&self, scopes: &[&str]) -> Result<(), Error> {
        if self.has_any(scopes) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "missing required scope, need any of: {}",
                scopes.join(", ")
            )))
        }
    }

    pub fn require_all(&self, scopes: &[&str]) -> Result<(), Error> {
        if self.has_all(scopes) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "missing required scope, need all of: {}",
                scopes.join(", ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_space_separated_form() {
        let scopes = ScopeSet::parse_space_separated("files:read files:write");
        assert!(scopes.has_scope("files:read"));
        assert!(scopes.has_all(&["files:read", "files:write"]));
        assert!(!scopes.has_scope("models:write"));
    }

    #[test]
    fn require_any_fails_when_absent() {
        let scopes = ScopeSet::parse_space_separated("files:read");
        assert!(scopes.require_any(&["models:write"]).is_err());
        assert!(scopes.require_any(&["files:read", "models:write"]).is_ok());
    }
}
