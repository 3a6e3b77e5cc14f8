use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    /// None = platform-wide role, Some = scoped to one tenant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    /// Display ordering and provenance tie-breaks only. A higher level never
    /// grants anything by itself.
    pub level: i64,
    /// System roles cannot be deleted by administrators.
    pub is_system: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// Whether this role applies under the given tenant context. Global
    /// roles apply everywhere; tenant roles only within their tenant.
    pub fn applies_to(&self, tenant_id: Option<Uuid>) -> bool {
        match self.tenant_id {
            None => true,
            Some(role_tenant) => tenant_id == Some(role_tenant),
        }
    }
}

// =============================================================================
// USER-ROLE ASSIGNMENT
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: Uuid,
    pub role_id: Uuid,
    /// None = assignment applies in every tenant the role itself allows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_at: DateTime<Utc>,
}

impl UserRole {
    pub fn is_active(&self, now: DateTime<Utc>, tenant_id: Option<Uuid>) -> bool {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return false;
            }
        }
        match self.tenant_id {
            None => true,
            Some(assignment_tenant) => tenant_id == Some(assignment_tenant),
        }
    }
}
