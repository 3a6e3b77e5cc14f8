//! Permission pattern primitives.
//!
//! Patterns are `resource.action.scope` strings where each segment is either
//! a literal token or the whole-segment wildcard `*`. Partial-segment
//! wildcards (`prof*`) are not supported.

use serde::{Deserialize, Serialize};

use crate::errors::{AccessError, AccessResult};

pub const SEGMENT_COUNT: usize = 3;
pub const WILDCARD: &str = "*";

/// Check whether a pattern matches a requested permission string.
///
/// Both sides must have exactly three dot-separated segments; any other
/// shape returns false rather than erroring. A `*` pattern segment matches
/// any non-empty permission segment, otherwise segments compare
/// case-sensitively.
pub fn matches(pattern: &str, permission: &str) -> bool {
    let mut p_segs = pattern.split('.');
    let mut v_segs = permission.split('.');

    for _ in 0..SEGMENT_COUNT {
        let (p, v) = match (p_segs.next(), v_segs.next()) {
            (Some(p), Some(v)) => (p, v),
            _ => return false,
        };
        if v.is_empty() {
            return false;
        }
        if p != WILDCARD && p != v {
            return false;
        }
    }

    // Trailing segments on either side mean the shape is wrong.
    p_segs.next().is_none() && v_segs.next().is_none()
}

/// A validated three-segment permission pattern.
///
/// Constructed only through `parse`, so every held instance is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PermissionPattern(String);

impl PermissionPattern {
    pub fn parse(value: &str) -> AccessResult<Self> {
        let segments: Vec<&str> = value.split('.').collect();
        if segments.len() != SEGMENT_COUNT {
            return Err(AccessError::malformed_pattern(value));
        }
        for segment in &segments {
            if segment.is_empty() {
                return Err(AccessError::malformed_pattern(value));
            }
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if any segment is the `*` wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.0.split('.').any(|segment| segment == WILDCARD)
    }

    pub fn matches(&self, permission: &str) -> bool {
        matches(&self.0, permission)
    }
}

impl std::str::FromStr for PermissionPattern {
    type Err = AccessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for PermissionPattern {
    type Error = AccessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PermissionPattern> for String {
    fn from(pattern: PermissionPattern) -> Self {
        pattern.0
    }
}

impl std::fmt::Display for PermissionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
