use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pattern::PermissionPattern;

// =============================================================================
// USER OVERRIDE (direct grant or deny)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideEffect {
    Grant,
    Deny,
}

impl OverrideEffect {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideEffect::Grant => "grant",
            OverrideEffect::Deny => "deny",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "grant" => Some(OverrideEffect::Grant),
            "deny" => Some(OverrideEffect::Deny),
            _ => None,
        }
    }
}

/// A per-user grant or deny of a specific pattern, independent of roles.
/// A deny record always suppresses an otherwise-granted pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserOverride {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub pattern: PermissionPattern,
    pub effect: OverrideEffect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl UserOverride {
    pub fn is_active(&self, now: DateTime<Utc>, tenant_id: Option<Uuid>) -> bool {
        if let Some(expires_at) = self.expires_at {
            if expires_at <= now {
                return false;
            }
        }
        match self.tenant_id {
            None => true,
            Some(override_tenant) => tenant_id == Some(override_tenant),
        }
    }
}

// =============================================================================
// EMERGENCY ACCESS
// =============================================================================

/// A time-boxed, reason-carrying escalation for one user, granted outside
/// the normal role machinery. Always expires; an expired record is treated
/// as absent even if not yet deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyGrant {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub pattern: PermissionPattern,
    pub reason: String,
    pub granted_by: Uuid,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl EmergencyGrant {
    pub fn is_active(&self, now: DateTime<Utc>, tenant_id: Option<Uuid>) -> bool {
        if now < self.starts_at || now >= self.expires_at {
            return false;
        }
        match self.tenant_id {
            None => true,
            Some(grant_tenant) => tenant_id == Some(grant_tenant),
        }
    }
}
