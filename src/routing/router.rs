//! Route table lookup.
//!
//! # Responsibilities
//! - Store compiled patterns in configuration order
//! - Return every pattern matching a path, least specific first
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan over patterns (acceptable for typical route counts)
//! - Ties in specificity keep configuration order

use crate::error::ConfigurationError;
use crate::routing::matcher::RoutePattern;

/// Compiled patterns, indexed in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    patterns: Vec<RoutePattern>,
    /// Indices into `patterns`, least specific first.
    by_specificity: Vec<usize>,
}

impl RouteTable {
    pub fn compile<'a, I>(patterns: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let patterns = patterns
            .into_iter()
            .map(RoutePattern::parse)
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_specificity: Vec<usize> = (0..patterns.len()).collect();
        by_specificity.sort_by(|&a, &b| patterns[a].specificity_cmp(&patterns[b]));

        Ok(Self {
            patterns,
            by_specificity,
        })
    }

    /// Indices of all patterns matching `path`, least specific first.
    pub fn match_all(&self, path: &str) -> Vec<usize> {
        self.by_specificity
            .iter()
            .copied()
            .filter(|&i| self.patterns[i].matches(path))
            .collect()
    }

    pub fn pattern(&self, index: usize) -> Option<&RoutePattern> {
        self.patterns.get(index)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_all_orders_by_specificity() {
        let table = RouteTable::compile(["/admin/login", "/**", "/admin/**", "/blog/**"]).unwrap();
        assert_eq!(table.match_all("/admin/login"), vec![1, 2, 0]);
        assert_eq!(table.match_all("/blog/post"), vec![1, 3]);
        assert_eq!(table.match_all("/other"), vec![1]);
    }

    #[test]
    fn test_no_match() {
        let table = RouteTable::compile(["/admin/**"]).unwrap();
        assert!(table.match_all("/").is_empty());
    }

    #[test]
    fn test_invalid_pattern_fails_compilation() {
        assert!(RouteTable::compile(["/**", "nope"]).is_err());
    }
}
