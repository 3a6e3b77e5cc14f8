use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// CHECK CONTEXT
// =============================================================================

/// Caller-supplied identity context for a permission check.
///
/// `roles_hint` comes from the session token and is untrusted: the resolver
/// always re-derives roles from the durable store or cache, never from
/// claims embedded in a token.
#[derive(Debug, Clone)]
pub struct CheckContext {
    pub user_id: Uuid,
    pub tenant_id: Option<Uuid>,
    /// Request correlation id carried into audit records.
    pub correlation_id: Option<Uuid>,
    pub roles_hint: Vec<String>,
}

impl CheckContext {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            tenant_id: None,
            correlation_id: None,
            roles_hint: Vec::new(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_roles_hint(mut self, roles: impl IntoIterator<Item = String>) -> Self {
        self.roles_hint = roles.into_iter().collect();
        self
    }
}

/// Scope class for `check_domain_permission`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainType {
    /// Platform-wide check; no tenant context required.
    Global,
    /// Tenant-scoped check; the context must carry a tenant id.
    Tenant,
}

// =============================================================================
// DECISION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionSource {
    Role,
    Override,
    Emergency,
    Deny,
}

impl DecisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionSource::Role => "role",
            DecisionSource::Override => "override",
            DecisionSource::Emergency => "emergency",
            DecisionSource::Deny => "deny",
        }
    }
}

/// Outcome of a permission check. The resolver returns one of these on
/// every path; it never panics or surfaces an error to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
}

impl Decision {
    pub fn granted(
        source: DecisionSource,
        matched_pattern: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            source,
            matched_pattern: Some(matched_pattern.into()),
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            source: DecisionSource::Deny,
            matched_pattern: None,
        }
    }

    pub fn denied_by(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            source: DecisionSource::Deny,
            matched_pattern: Some(pattern.into()),
        }
    }
}

// =============================================================================
// EFFECTIVE PERMISSIONS (computed)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePermissions {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    /// Role names held under this tenant context, highest level first.
    pub roles: Vec<String>,
    pub permissions: Vec<EffectivePermission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub pattern: String,
    /// Source of the pattern: "role", "set", "inherited", or "override"
    pub source: String,
    /// Name of the contributing role if source is "role" or "set"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,
    /// Set name or parent pattern the grant arrived through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}
