//! Permission resolution.
//!
//! The resolver is the public entry point for every permission check:
//!
//! 1. malformed-input check
//! 2. emergency access gate (never cached)
//! 3. decision cache lookup
//! 4. on miss: role aggregation (sets merged, inheritance expanded once
//!    over the combined union), then the user override layer (deny final)
//! 5. cache write, audit write, return
//!
//! No error escapes the decision API: every path returns a [`Decision`].
//! Cache trouble degrades to recomputation; durable-store trouble degrades
//! to a fail-closed denial with a diagnostic reason.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{
    AuditRecord, AuditSink, AuditStore, Severity, EVENT_CHECK, EVENT_EMERGENCY_GRANTED,
    EVENT_OVERRIDE_GRANTED, EVENT_OVERRIDE_REVOKED,
};
use crate::cache::{self, CacheStore, DecisionCache};
use crate::config::EngineConfig;
use crate::errors::AccessResult;
use crate::expand::{self, SOURCE_OVERRIDE, SOURCE_ROLE, SOURCE_SET};
use crate::models::{
    CheckContext, Decision, DecisionSource, DomainType, EffectivePermission,
    EffectivePermissions, EmergencyGrant, OverrideEffect, UserOverride,
};
use crate::pattern::{self, PermissionPattern};
use crate::snapshot::SnapshotHandle;
use crate::store::AccessStore;

const REASON_MALFORMED: &str = "malformed permission";
const REASON_TENANT_REQUIRED: &str = "tenant context required";
const REASON_STORE_UNAVAILABLE: &str = "permission store unavailable";
const REASON_NO_MATCH: &str = "no matching permission";

/// The fully resolved, post-override state for one (user, tenant) pair.
/// This is what the set-shaped cache entry holds; active deny patterns ride
/// along so a cached entry can still attribute denials to their override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSet {
    /// Role names held under this context, highest level first.
    pub roles: Vec<String>,
    pub permissions: Vec<EffectivePermission>,
    /// Active deny override patterns.
    pub denies: Vec<String>,
}

impl ResolvedSet {
    fn decide(&self, permission: &str) -> Decision {
        for deny in &self.denies {
            if pattern::matches(deny, permission) {
                return Decision::denied_by(deny.clone(), "denied by user override");
            }
        }
        for held in &self.permissions {
            if pattern::matches(&held.pattern, permission) {
                let (source, reason) = if held.source == SOURCE_OVERRIDE {
                    (DecisionSource::Override, "granted by user override")
                } else {
                    (DecisionSource::Role, "granted by role-derived pattern")
                };
                return Decision::granted(source, held.pattern.clone(), reason);
            }
        }
        Decision::denied(REASON_NO_MATCH)
    }
}

pub struct PermissionResolver {
    store: Arc<dyn AccessStore>,
    cache: DecisionCache,
    audit: AuditSink,
    snapshot: SnapshotHandle,
}

impl PermissionResolver {
    /// Load the initial reference-data snapshot and assemble the engine.
    pub async fn new(
        store: Arc<dyn AccessStore>,
        cache_store: Arc<dyn CacheStore>,
        audit_store: Arc<dyn AuditStore>,
        config: EngineConfig,
    ) -> AccessResult<Self> {
        let snapshot = SnapshotHandle::load(store.as_ref()).await?;
        let cache = DecisionCache::new(
            cache_store,
            config.set_ttl,
            config.decision_ttl,
            config.cache_timeout,
        );
        let audit = AuditSink::spawn(audit_store, config.audit_queue_depth);
        Ok(Self {
            store,
            cache,
            audit,
            snapshot,
        })
    }

    // =========================================================================
    // DECISION API
    // =========================================================================

    pub async fn has_permission(
        &self,
        ctx: &CheckContext,
        permission: &str,
        resource_scope: Option<&str>,
    ) -> Decision {
        if PermissionPattern::parse(permission).is_err() {
            let decision = Decision::denied(REASON_MALFORMED);
            self.audit_check(ctx, permission, &decision, Severity::Important);
            return decision;
        }

        // Emergency access is checked before the cache and before normal
        // aggregation; a matching active grant wins outright and is never
        // cached.
        if let Some(grant) = self.active_emergency(ctx, permission).await {
            let decision = Decision::granted(
                DecisionSource::Emergency,
                grant.pattern.as_str(),
                format!("emergency access: {}", grant.reason),
            );
            tracing::info!(
                user_id = %ctx.user_id,
                permission = %permission,
                grant_id = %grant.id,
                "emergency access grant matched"
            );
            self.audit_check(ctx, permission, &decision, Severity::Critical);
            return decision;
        }

        let snapshot_version = self.snapshot.current().version;
        let dec_key = cache::decision_key(
            ctx.user_id,
            ctx.tenant_id,
            permission,
            resource_scope,
            snapshot_version,
        );
        if let Some(decision) = self.cache.get_json::<Decision>(&dec_key).await {
            tracing::debug!(
                user_id = %ctx.user_id,
                permission = %permission,
                allowed = decision.allowed,
                "decision cache hit"
            );
            self.audit_check(ctx, permission, &decision, Severity::Important);
            return decision;
        }

        let resolved = match self.resolved_set(ctx, snapshot_version).await {
            Ok(resolved) => resolved,
            Err(e) => {
                // No safe fallback when the source of truth is gone:
                // fail closed, and say why in the reason, not in a panic.
                tracing::error!(
                    user_id = %ctx.user_id,
                    permission = %permission,
                    error = %e,
                    "resolution failed, denying"
                );
                let decision = Decision::denied(REASON_STORE_UNAVAILABLE);
                self.audit_check(ctx, permission, &decision, Severity::Important);
                return decision;
            }
        };

        let decision = resolved.decide(permission);
        let decision_ttl = self.cache.decision_ttl;
        self.cache.put_json(&dec_key, &decision, decision_ttl).await;

        tracing::debug!(
            user_id = %ctx.user_id,
            permission = %permission,
            allowed = decision.allowed,
            source = decision.source.as_str(),
            "permission resolved"
        );
        self.audit_check(ctx, permission, &decision, Severity::Important);
        decision
    }

    /// Like [`has_permission`], but enforces that tenant-scoped checks carry
    /// a tenant id in the context.
    ///
    /// [`has_permission`]: PermissionResolver::has_permission
    pub async fn check_domain_permission(
        &self,
        ctx: &CheckContext,
        permission: &str,
        domain: DomainType,
    ) -> Decision {
        if domain == DomainType::Tenant && ctx.tenant_id.is_none() {
            let decision = Decision::denied(REASON_TENANT_REQUIRED);
            self.audit_check(ctx, permission, &decision, Severity::Important);
            return decision;
        }
        self.has_permission(ctx, permission, None).await
    }

    /// The resolved effective set with provenance, for admin inspection.
    pub async fn effective_permissions(
        &self,
        ctx: &CheckContext,
    ) -> AccessResult<EffectivePermissions> {
        let snapshot_version = self.snapshot.current().version;
        let resolved = self.resolved_set(ctx, snapshot_version).await?;
        Ok(EffectivePermissions {
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
            roles: resolved.roles,
            permissions: resolved.permissions,
        })
    }

    // =========================================================================
    // INVALIDATION HOOKS
    // =========================================================================

    /// Drop cached state for one user. Callers invoke this after any
    /// mutation to the user's roles, overrides, or emergency access, before
    /// acknowledging the mutation.
    pub async fn invalidate_user(&self, user_id: Uuid, tenant_id: Option<Uuid>) {
        self.cache.invalidate_user(user_id, tenant_id).await;
    }

    /// Drop cached state for every user holding a role. Broader and rarer
    /// than per-user invalidation; used after role-definition changes.
    pub async fn invalidate_role(&self, role_id: Uuid) -> AccessResult<()> {
        let users = self.store.users_holding_role(role_id).await?;
        for user_id in users {
            self.cache.invalidate_user(user_id, None).await;
        }
        Ok(())
    }

    /// Rebuild the reference-data snapshot from the store. Keeps the last
    /// known-good snapshot if the new data fails validation.
    pub async fn reload_snapshot(&self) -> AccessResult<u64> {
        self.snapshot.reload(self.store.as_ref()).await
    }

    /// Wait for queued audit records to be written. Tests and shutdown only.
    pub async fn flush_audit(&self) {
        self.audit.flush().await;
    }

    // =========================================================================
    // ADMINISTRATIVE HELPERS (engine-owned records)
    // =========================================================================

    /// Create a per-user grant or deny override. Writes the record, then
    /// invalidates the user's cache entries, then returns, so the change is
    /// visible to the next resolution before the caller is acknowledged.
    pub async fn add_override(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        pattern: &str,
        effect: OverrideEffect,
        expires_at: Option<chrono::DateTime<Utc>>,
        created_by: Option<Uuid>,
    ) -> AccessResult<UserOverride> {
        let record = UserOverride {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            pattern: PermissionPattern::parse(pattern)?,
            effect,
            expires_at,
            created_by,
            created_at: Utc::now(),
        };
        self.store.insert_override(&record).await?;
        self.cache.invalidate_user(user_id, tenant_id).await;
        self.audit.record(AuditRecord {
            id: Uuid::new_v4(),
            event: EVENT_OVERRIDE_GRANTED.to_string(),
            user_id,
            tenant_id,
            permission: record.pattern.as_str().to_string(),
            allowed: true,
            source: DecisionSource::Override,
            matched_pattern: None,
            reason: format!("{} override created", record.effect.as_str()),
            severity: Severity::Critical,
            correlation_id: None,
            occurred_at: Utc::now(),
        });
        Ok(record)
    }

    pub async fn remove_override(&self, id: Uuid) -> AccessResult<Option<UserOverride>> {
        let Some(record) = self.store.delete_override(id).await? else {
            return Ok(None);
        };
        self.cache
            .invalidate_user(record.user_id, record.tenant_id)
            .await;
        self.audit.record(AuditRecord {
            id: Uuid::new_v4(),
            event: EVENT_OVERRIDE_REVOKED.to_string(),
            user_id: record.user_id,
            tenant_id: record.tenant_id,
            permission: record.pattern.as_str().to_string(),
            allowed: true,
            source: DecisionSource::Override,
            matched_pattern: None,
            reason: format!("{} override removed", record.effect.as_str()),
            severity: Severity::Critical,
            correlation_id: None,
            occurred_at: Utc::now(),
        });
        Ok(Some(record))
    }

    /// Create a time-boxed emergency grant. No cache invalidation is needed:
    /// the emergency gate runs before the cache on every check.
    pub async fn grant_emergency(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        pattern: &str,
        reason: &str,
        granted_by: Uuid,
        duration: Duration,
    ) -> AccessResult<EmergencyGrant> {
        let now = Utc::now();
        let record = EmergencyGrant {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            pattern: PermissionPattern::parse(pattern)?,
            reason: reason.to_string(),
            granted_by,
            starts_at: now,
            expires_at: now
                + chrono::Duration::from_std(duration)
                    .map_err(|e| crate::errors::AccessError::configuration(format!(
                        "emergency duration out of range: {}",
                        e
                    )))?,
        };
        self.store.insert_emergency(&record).await?;
        self.audit.record(AuditRecord {
            id: Uuid::new_v4(),
            event: EVENT_EMERGENCY_GRANTED.to_string(),
            user_id,
            tenant_id,
            permission: record.pattern.as_str().to_string(),
            allowed: true,
            source: DecisionSource::Emergency,
            matched_pattern: None,
            reason: reason.to_string(),
            severity: Severity::Critical,
            correlation_id: None,
            occurred_at: now,
        });
        Ok(record)
    }

    /// Remove expired emergency records. Safe to call from a periodic job;
    /// resolution never depends on it.
    pub async fn purge_expired_emergency(&self) -> AccessResult<u64> {
        self.store.purge_expired_emergency(Utc::now()).await
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn active_emergency(
        &self,
        ctx: &CheckContext,
        permission: &str,
    ) -> Option<EmergencyGrant> {
        let grants = match self.store.emergency_for_user(ctx.user_id).await {
            Ok(grants) => grants,
            Err(e) => {
                // The normal path reads the same store and will fail closed
                // if it is really down; an error here only skips the gate.
                tracing::warn!(user_id = %ctx.user_id, error = %e, "emergency lookup failed");
                return None;
            }
        };
        let now = Utc::now();
        grants
            .into_iter()
            .find(|g| g.is_active(now, ctx.tenant_id) && g.pattern.matches(permission))
    }

    /// Fetch the resolved set from cache or recompute it from the source of
    /// truth and cache the result.
    async fn resolved_set(
        &self,
        ctx: &CheckContext,
        snapshot_version: u64,
    ) -> AccessResult<ResolvedSet> {
        let set_key = cache::set_key(ctx.user_id, ctx.tenant_id, snapshot_version);
        if let Some(resolved) = self.cache.get_json::<ResolvedSet>(&set_key).await {
            return Ok(resolved);
        }
        let resolved = self.resolve_from_source(ctx).await?;
        let set_ttl = self.cache.set_ttl;
        self.cache.put_json(&set_key, &resolved, set_ttl).await;
        Ok(resolved)
    }

    /// Role aggregation and the override layer, straight from the durable
    /// store and the current snapshot. `roles_hint` in the context is never
    /// consulted; roles are always re-derived here.
    async fn resolve_from_source(&self, ctx: &CheckContext) -> AccessResult<ResolvedSet> {
        let snapshot = self.snapshot.current();
        let now = Utc::now();

        let assignments = self.store.roles_for_user(ctx.user_id).await?;
        let mut held_roles: Vec<&crate::models::Role> = Vec::new();
        for assignment in &assignments {
            if !assignment.is_active(now, ctx.tenant_id) {
                continue;
            }
            let Some(role) = snapshot.role(&assignment.role_id) else {
                // Assignment to a role the snapshot does not know, e.g. one
                // created after the last reload. Contributes nothing until
                // the snapshot catches up.
                tracing::warn!(
                    user_id = %ctx.user_id,
                    role_id = %assignment.role_id,
                    "user role not present in snapshot"
                );
                continue;
            };
            if role.applies_to(ctx.tenant_id) {
                held_roles.push(role);
            }
        }
        // Highest level first; provenance reporting only.
        held_roles.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.name.cmp(&b.name)));
        held_roles.dedup_by_key(|r| r.id);

        // Union of direct and set-expanded patterns across all held roles.
        let mut granted: BTreeMap<String, EffectivePermission> = BTreeMap::new();
        for role in &held_roles {
            for pattern in snapshot.direct_patterns(&role.id) {
                granted
                    .entry(pattern.as_str().to_string())
                    .or_insert(EffectivePermission {
                        pattern: pattern.as_str().to_string(),
                        source: SOURCE_ROLE.to_string(),
                        role_name: Some(role.name.clone()),
                        via: None,
                    });
            }
            for set_id in snapshot.sets_for_role(&role.id) {
                let set_name = snapshot.set_name(set_id).unwrap_or_default().to_string();
                for pattern in snapshot.set_patterns(set_id) {
                    granted
                        .entry(pattern.as_str().to_string())
                        .or_insert(EffectivePermission {
                            pattern: pattern.as_str().to_string(),
                            source: SOURCE_SET.to_string(),
                            role_name: Some(role.name.clone()),
                            via: Some(set_name.clone()),
                        });
                }
            }
        }

        // Inheritance runs once over the combined union, so a pattern from
        // one role can be the parent that implies a pattern under another.
        expand::inheritance_closure(
            &mut granted,
            snapshot.edges_by_parent(),
            snapshot.edge_count(),
        )?;

        // Override layer: grants first, denies last and final.
        let overrides = self.store.overrides_for_user(ctx.user_id).await?;
        let mut denies: Vec<String> = Vec::new();
        for record in &overrides {
            if !record.is_active(now, ctx.tenant_id) {
                continue;
            }
            match record.effect {
                OverrideEffect::Grant => {
                    granted
                        .entry(record.pattern.as_str().to_string())
                        .or_insert(EffectivePermission {
                            pattern: record.pattern.as_str().to_string(),
                            source: SOURCE_OVERRIDE.to_string(),
                            role_name: None,
                            via: None,
                        });
                }
                OverrideEffect::Deny => denies.push(record.pattern.as_str().to_string()),
            }
        }
        // A deny suppresses exact and wildcard matches in both directions:
        // a literal deny also strips a held wildcard that would re-derive
        // it, and a wildcard deny strips everything it matches.
        granted.retain(|held, _| {
            !denies
                .iter()
                .any(|deny| pattern::matches(deny, held) || pattern::matches(held, deny))
        });

        Ok(ResolvedSet {
            roles: held_roles.iter().map(|r| r.name.clone()).collect(),
            permissions: granted.into_values().collect(),
            denies,
        })
    }

    fn audit_check(
        &self,
        ctx: &CheckContext,
        permission: &str,
        decision: &Decision,
        severity: Severity,
    ) {
        self.audit.record(AuditRecord {
            id: Uuid::new_v4(),
            event: EVENT_CHECK.to_string(),
            user_id: ctx.user_id,
            tenant_id: ctx.tenant_id,
            permission: permission.to_string(),
            allowed: decision.allowed,
            source: decision.source,
            matched_pattern: decision.matched_pattern.clone(),
            reason: decision.reason.clone(),
            severity,
            correlation_id: ctx.correlation_id,
            occurred_at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditStore;
    use crate::cache::MemoryCacheStore;
    use crate::models::{InheritanceEdge, Role, UserRole};
    use crate::store::{MemoryAccessStore, ReferenceData};
    use chrono::Duration as ChronoDuration;

    struct Harness {
        store: Arc<MemoryAccessStore>,
        cache_store: Arc<MemoryCacheStore>,
        audit_store: Arc<MemoryAuditStore>,
        resolver: PermissionResolver,
    }

    fn pattern(value: &str) -> PermissionPattern {
        PermissionPattern::parse(value).unwrap()
    }

    fn role(id: Uuid, name: &str, level: i64) -> Role {
        Role {
            id,
            name: name.to_string(),
            tenant_id: None,
            level,
            is_system: false,
            description: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn assignment(user_id: Uuid, role_id: Uuid) -> UserRole {
        UserRole {
            user_id,
            role_id,
            tenant_id: None,
            expires_at: None,
            granted_at: Utc::now(),
        }
    }

    async fn harness(reference: ReferenceData) -> Harness {
        let store = Arc::new(MemoryAccessStore::new());
        store.set_reference_data(reference);
        let cache_store = Arc::new(MemoryCacheStore::new());
        let audit_store = Arc::new(MemoryAuditStore::new());
        let resolver = PermissionResolver::new(
            store.clone(),
            cache_store.clone(),
            audit_store.clone(),
            EngineConfig::default(),
        )
        .await
        .unwrap();
        Harness {
            store,
            cache_store,
            audit_store,
            resolver,
        }
    }

    /// Role "tenant_admin" grants tenant.*.manage, an inheritance edge
    /// derives tenant.users.manage from it, and a deny override suppresses
    /// tenant.users.manage. The deny must win.
    #[tokio::test]
    async fn deny_override_beats_role_and_inheritance() {
        let user = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(admin, "tenant_admin", 80)],
            role_patterns: vec![(admin, pattern("tenant.*.manage"))],
            edges: vec![InheritanceEdge {
                parent: pattern("tenant.*.manage"),
                child: pattern("tenant.users.manage"),
            }],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(assignment(user, admin));

        let ctx = CheckContext::new(user);
        // Sanity: granted before the deny exists.
        let before = h.resolver.has_permission(&ctx, "tenant.users.manage", None).await;
        assert!(before.allowed);

        h.resolver
            .add_override(user, None, "tenant.users.manage", OverrideEffect::Deny, None, None)
            .await
            .unwrap();

        let decision = h.resolver.has_permission(&ctx, "tenant.users.manage", None).await;
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::Deny);
        assert_eq!(decision.matched_pattern.as_deref(), Some("tenant.users.manage"));
    }

    #[tokio::test]
    async fn deny_suppresses_regrants_from_every_source() {
        let user = Uuid::new_v4();
        let role_a = Uuid::new_v4();
        let role_b = Uuid::new_v4();
        let set_id = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(role_a, "moderator", 40), role(role_b, "editor", 30)],
            role_patterns: vec![
                (role_a, pattern("media.delete.tenant")),
                (role_b, pattern("media.*.tenant")),
            ],
            sets: vec![crate::models::PermissionSet {
                id: set_id,
                name: "media bundle".to_string(),
                description: None,
                created_at: Utc::now(),
            }],
            set_patterns: vec![(set_id, pattern("media.delete.tenant"))],
            role_sets: vec![(role_b, set_id)],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(assignment(user, role_a));
        h.store.assign_role(assignment(user, role_b));
        h.resolver
            .add_override(user, None, "media.delete.tenant", OverrideEffect::Deny, None, None)
            .await
            .unwrap();

        let ctx = CheckContext::new(user);
        let decision = h.resolver.has_permission(&ctx, "media.delete.tenant", None).await;
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::Deny);
    }

    #[tokio::test]
    async fn emergency_grant_bypasses_deny_and_expires() {
        let user = Uuid::new_v4();
        let h = harness(ReferenceData::default()).await;
        h.resolver
            .add_override(user, None, "platform.manage.global", OverrideEffect::Deny, None, None)
            .await
            .unwrap();

        let ctx = CheckContext::new(user);
        let denied = h.resolver.has_permission(&ctx, "platform.manage.global", None).await;
        assert!(!denied.allowed);

        h.resolver
            .grant_emergency(
                user,
                None,
                "platform.*.global",
                "incident 4821",
                Uuid::new_v4(),
                Duration::from_secs(600),
            )
            .await
            .unwrap();

        let granted = h.resolver.has_permission(&ctx, "platform.manage.global", None).await;
        assert!(granted.allowed);
        assert_eq!(granted.source, DecisionSource::Emergency);
        assert_eq!(granted.matched_pattern.as_deref(), Some("platform.*.global"));

        // An already-expired record grants nothing even before cleanup.
        let expired_user = Uuid::new_v4();
        h.store.add_emergency(EmergencyGrant {
            id: Uuid::new_v4(),
            user_id: expired_user,
            tenant_id: None,
            pattern: pattern("platform.*.global"),
            reason: "stale".to_string(),
            granted_by: Uuid::new_v4(),
            starts_at: Utc::now() - ChronoDuration::hours(2),
            expires_at: Utc::now() - ChronoDuration::hours(1),
        });
        let ctx = CheckContext::new(expired_user);
        let decision = h.resolver.has_permission(&ctx, "platform.manage.global", None).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn cache_outage_fails_open_to_recomputation() {
        let user = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(viewer, "viewer", 10)],
            role_patterns: vec![(viewer, pattern("profiles.read.own"))],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(assignment(user, viewer));
        h.cache_store.set_unavailable(true);

        let ctx = CheckContext::new(user);
        let granted = h.resolver.has_permission(&ctx, "profiles.read.own", None).await;
        assert!(granted.allowed);
        assert_eq!(granted.source, DecisionSource::Role);

        // Never allowed merely because the cache is down.
        let denied = h.resolver.has_permission(&ctx, "profiles.write.own", None).await;
        assert!(!denied.allowed);
    }

    #[tokio::test]
    async fn invalidation_makes_new_role_visible() {
        let user = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let manager = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(viewer, "viewer", 10), role(manager, "booking_manager", 50)],
            role_patterns: vec![
                (viewer, pattern("profiles.read.own")),
                (manager, pattern("bookings.manage.tenant")),
            ],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(assignment(user, viewer));

        let ctx = CheckContext::new(user);
        let before = h.resolver.has_permission(&ctx, "bookings.manage.tenant", None).await;
        assert!(!before.allowed);

        // External admin workflow assigns the role, then calls the hook.
        h.store.assign_role(assignment(user, manager));
        h.resolver.invalidate_user(user, None).await;

        let after = h.resolver.has_permission(&ctx, "bookings.manage.tenant", None).await;
        assert!(after.allowed);
    }

    #[tokio::test]
    async fn malformed_permission_is_denied_not_an_error() {
        let h = harness(ReferenceData::default()).await;
        let ctx = CheckContext::new(Uuid::new_v4());
        for bad in ["profiles.read", "a.b.c.d", "", "profiles..own"] {
            let decision = h.resolver.has_permission(&ctx, bad, None).await;
            assert!(!decision.allowed, "{:?} should be denied", bad);
            assert_eq!(decision.reason, "malformed permission");
        }
    }

    #[tokio::test]
    async fn tenant_domain_requires_tenant_context() {
        let h = harness(ReferenceData::default()).await;
        let ctx = CheckContext::new(Uuid::new_v4());
        let decision = h
            .resolver
            .check_domain_permission(&ctx, "tenant.users.manage", DomainType::Tenant)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "tenant context required");

        let decision = h
            .resolver
            .check_domain_permission(
                &ctx.clone().with_tenant(Uuid::new_v4()),
                "tenant.users.manage",
                DomainType::Tenant,
            )
            .await;
        assert_eq!(decision.reason, "no matching permission");
    }

    #[tokio::test]
    async fn store_outage_fails_closed_with_reason() {
        let user = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(viewer, "viewer", 10)],
            role_patterns: vec![(viewer, pattern("profiles.read.own"))],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(assignment(user, viewer));
        h.store.set_unavailable(true);

        let ctx = CheckContext::new(user);
        let decision = h.resolver.has_permission(&ctx, "profiles.read.own", None).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "permission store unavailable");
    }

    #[tokio::test]
    async fn roles_hint_is_never_trusted() {
        let h = harness(ReferenceData::default()).await;
        let ctx = CheckContext::new(Uuid::new_v4())
            .with_roles_hint(vec!["platform_admin".to_string()]);
        let decision = h.resolver.has_permission(&ctx, "platform.manage.global", None).await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn tenant_scoped_role_does_not_leak_across_tenants() {
        let user = Uuid::new_v4();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let scoped = Uuid::new_v4();
        let mut scoped_role = role(scoped, "tenant_admin", 80);
        scoped_role.tenant_id = Some(tenant_a);
        let reference = ReferenceData {
            roles: vec![scoped_role],
            role_patterns: vec![(scoped, pattern("tenant.users.manage"))],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(UserRole {
            user_id: user,
            role_id: scoped,
            tenant_id: Some(tenant_a),
            expires_at: None,
            granted_at: Utc::now(),
        });

        let in_a = CheckContext::new(user).with_tenant(tenant_a);
        assert!(h.resolver.has_permission(&in_a, "tenant.users.manage", None).await.allowed);

        let in_b = CheckContext::new(user).with_tenant(tenant_b);
        assert!(!h.resolver.has_permission(&in_b, "tenant.users.manage", None).await.allowed);
    }

    #[tokio::test]
    async fn effective_permissions_carry_provenance() {
        let user = Uuid::new_v4();
        let admin = Uuid::new_v4();
        let set_id = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(admin, "content_moderator", 40)],
            role_patterns: vec![(admin, pattern("media.review.tenant"))],
            sets: vec![crate::models::PermissionSet {
                id: set_id,
                name: "moderation bundle".to_string(),
                description: None,
                created_at: Utc::now(),
            }],
            set_patterns: vec![(set_id, pattern("media.flag.tenant"))],
            role_sets: vec![(admin, set_id)],
            edges: vec![InheritanceEdge {
                parent: pattern("media.review.tenant"),
                child: pattern("media.read.tenant"),
            }],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(assignment(user, admin));
        h.resolver
            .add_override(user, None, "profiles.feature.tenant", OverrideEffect::Grant, None, None)
            .await
            .unwrap();

        let ctx = CheckContext::new(user);
        let effective = h.resolver.effective_permissions(&ctx).await.unwrap();
        assert_eq!(effective.roles, vec!["content_moderator".to_string()]);

        let by_pattern: std::collections::HashMap<&str, &EffectivePermission> = effective
            .permissions
            .iter()
            .map(|p| (p.pattern.as_str(), p))
            .collect();
        assert_eq!(by_pattern["media.review.tenant"].source, "role");
        assert_eq!(by_pattern["media.flag.tenant"].source, "set");
        assert_eq!(by_pattern["media.flag.tenant"].via.as_deref(), Some("moderation bundle"));
        assert_eq!(by_pattern["media.read.tenant"].source, "inherited");
        assert_eq!(by_pattern["profiles.feature.tenant"].source, "override");
    }

    #[tokio::test]
    async fn every_check_is_audited_including_cache_hits() {
        let user = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(viewer, "viewer", 10)],
            role_patterns: vec![(viewer, pattern("profiles.read.own"))],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(assignment(user, viewer));

        let ctx = CheckContext::new(user).with_correlation_id(Uuid::new_v4());
        h.resolver.has_permission(&ctx, "profiles.read.own", None).await;
        // Second call is served from the point-decision cache.
        h.resolver.has_permission(&ctx, "profiles.read.own", None).await;
        h.resolver.flush_audit().await;

        let checks: Vec<_> = h
            .audit_store
            .records()
            .into_iter()
            .filter(|r| r.event == EVENT_CHECK)
            .collect();
        assert_eq!(checks.len(), 2);
        assert!(checks.iter().all(|r| r.allowed));
        assert!(checks.iter().all(|r| r.correlation_id == ctx.correlation_id));
    }

    #[tokio::test]
    async fn expired_role_assignment_contributes_nothing() {
        let user = Uuid::new_v4();
        let viewer = Uuid::new_v4();
        let reference = ReferenceData {
            roles: vec![role(viewer, "viewer", 10)],
            role_patterns: vec![(viewer, pattern("profiles.read.own"))],
            ..Default::default()
        };
        let h = harness(reference).await;
        h.store.assign_role(UserRole {
            user_id: user,
            role_id: viewer,
            tenant_id: None,
            expires_at: Some(Utc::now() - ChronoDuration::minutes(1)),
            granted_at: Utc::now() - ChronoDuration::days(30),
        });

        let ctx = CheckContext::new(user);
        assert!(!h.resolver.has_permission(&ctx, "profiles.read.own", None).await.allowed);
    }
}
