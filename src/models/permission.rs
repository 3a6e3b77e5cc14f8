use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pattern::PermissionPattern;

// =============================================================================
// PERMISSION (catalog entry)
// =============================================================================

/// A catalog permission. Immutable once referenced by a role or an
/// inheritance edge; created administratively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub pattern: PermissionPattern,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    pub fn is_wildcard(&self) -> bool {
        self.pattern.is_wildcard()
    }
}

// =============================================================================
// PERMISSION SET
// =============================================================================

/// A named, reusable bundle of catalog permissions attachable to roles.
/// Purely a grouping convenience; it expands to its member patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionSet {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// INHERITANCE EDGE
// =============================================================================

/// A declared implication: granting `parent` implies granting `child`.
/// The loaded edge set must be acyclic; the snapshot loader rejects cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceEdge {
    pub parent: PermissionPattern,
    pub child: PermissionPattern,
}
