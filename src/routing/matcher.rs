//! Route pattern matching.
//!
//! # Responsibilities
//! - Compile `/admin/**`, `/blog/:slug`, `/api/*/items` style patterns
//! - Match request paths segment by segment
//! - Rank patterns by specificity
//!
//! # Design Decisions
//! - Paths are compared case-sensitively
//! - Query strings, fragments and trailing slashes are ignored
//! - `**` matches zero or more trailing segments and must come last
//! - No regex to guarantee O(n) matching

use std::cmp::Ordering;

use crate::error::ConfigurationError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Static(String),
    /// `:name` or `*`: exactly one segment.
    Param,
    /// `**`: any remainder, including nothing.
    CatchAll,
}

/// A compiled route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    source: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("must start with `/`"));
        }

        let raw: Vec<&str> = split_segments(pattern).collect();
        let mut segments = Vec::with_capacity(raw.len());
        for (i, segment) in raw.iter().enumerate() {
            let segment = match *segment {
                "**" if i + 1 == raw.len() => Segment::CatchAll,
                "**" => return Err(invalid("`**` is only allowed as the last segment")),
                "*" => Segment::Param,
                s if s.starts_with(':') && s.len() > 1 => Segment::Param,
                s if s.contains('*') => {
                    return Err(invalid("wildcards must span a whole segment"))
                }
                s => Segment::Static(s.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut path_segments = split_segments(normalize_path(path));
        for segment in &self.segments {
            match segment {
                Segment::CatchAll => return true,
                Segment::Param => {
                    if path_segments.next().is_none() {
                        return false;
                    }
                }
                Segment::Static(expected) => match path_segments.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }
        path_segments.next().is_none()
    }

    /// Orders patterns from least to most specific.
    ///
    /// Exact patterns beat catch-alls, then more static segments win,
    /// then more segments overall.
    pub fn specificity_cmp(&self, other: &Self) -> Ordering {
        self.specificity().cmp(&other.specificity())
    }

    fn specificity(&self) -> (bool, usize, usize) {
        let has_catch_all = self.segments.last() == Some(&Segment::CatchAll);
        let statics = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Static(_)))
            .count();
        (!has_catch_all, statics, self.segments.len())
    }
}

/// Strips query and fragment.
pub fn normalize_path(path: &str) -> &str {
    let end = path.find(['?', '#']).unwrap_or(path.len());
    &path[..end]
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}
