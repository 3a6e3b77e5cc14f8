mod common;

use anyhow::Result;
use sqlx::Row;
use uuid::Uuid;

use runway_access::models::DomainType;
use runway_access::{CheckContext, DecisionSource};

/// A tenant admin holding direct patterns, a permission-set bundle, and an
/// inheritance edge resolves the full surface the role implies.
#[tokio::test]
async fn role_sets_and_inheritance_resolve_end_to_end() -> Result<()> {
    let (pool, _dir) = common::setup_pool().await?;

    let role = common::seed_role(&pool, "tenant_admin", 80, None).await?;
    let manage = common::seed_permission(&pool, "tenant.*.manage").await?;
    common::grant_role_permission(&pool, role, manage).await?;

    let moderation = common::seed_set(&pool, "moderation_bundle").await?;
    let review = common::seed_permission(&pool, "media.review.tenant").await?;
    common::add_set_member(&pool, moderation, review).await?;
    common::attach_set_to_role(&pool, role, moderation).await?;

    common::seed_edge(&pool, "tenant.*.manage", "tenant.users.manage").await?;

    let user = Uuid::new_v4();
    common::assign_role(&pool, user, role, None).await?;

    let resolver = common::build_resolver(&pool).await?;
    let ctx = CheckContext::new(user);

    // Direct wildcard pattern.
    let decision = resolver.has_permission(&ctx, "tenant.billing.manage", None).await;
    assert!(decision.allowed);
    assert_eq!(decision.source, DecisionSource::Role);
    assert_eq!(decision.matched_pattern.as_deref(), Some("tenant.*.manage"));

    // Set-expanded pattern.
    let decision = resolver.has_permission(&ctx, "media.review.tenant", None).await;
    assert!(decision.allowed);

    // Inherited pattern (also covered by the wildcard; either grants).
    let decision = resolver.has_permission(&ctx, "tenant.users.manage", None).await;
    assert!(decision.allowed);

    // Unrelated permission stays denied.
    let decision = resolver.has_permission(&ctx, "platform.manage.global", None).await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, "no matching permission");

    let effective = resolver.effective_permissions(&ctx).await?;
    assert_eq!(effective.roles, vec!["tenant_admin".to_string()]);
    let patterns: Vec<&str> = effective.permissions.iter().map(|p| p.pattern.as_str()).collect();
    assert!(patterns.contains(&"tenant.*.manage"));
    assert!(patterns.contains(&"media.review.tenant"));
    assert!(patterns.contains(&"tenant.users.manage"));

    Ok(())
}

#[tokio::test]
async fn tenant_domain_check_requires_tenant_context() -> Result<()> {
    let (pool, _dir) = common::setup_pool().await?;
    let resolver = common::build_resolver(&pool).await?;

    let ctx = CheckContext::new(Uuid::new_v4());
    let decision = resolver
        .check_domain_permission(&ctx, "tenant.users.manage", DomainType::Tenant)
        .await;
    assert!(!decision.allowed);
    assert_eq!(decision.reason, "tenant context required");

    let decision = resolver
        .check_domain_permission(&ctx, "platform.manage.global", DomainType::Global)
        .await;
    assert_eq!(decision.reason, "no matching permission");

    Ok(())
}

/// Every check lands in permission_audit, and rows chain through prev_hash.
#[tokio::test]
async fn audit_rows_are_written_and_hash_chained() -> Result<()> {
    let (pool, _dir) = common::setup_pool().await?;

    let role = common::seed_role(&pool, "viewer", 10, None).await?;
    let read = common::seed_permission(&pool, "profiles.read.own").await?;
    common::grant_role_permission(&pool, role, read).await?;
    let user = Uuid::new_v4();
    common::assign_role(&pool, user, role, None).await?;

    let resolver = common::build_resolver(&pool).await?;
    let ctx = CheckContext::new(user).with_correlation_id(Uuid::new_v4());

    assert!(resolver.has_permission(&ctx, "profiles.read.own", None).await.allowed);
    assert!(!resolver.has_permission(&ctx, "profiles.write.own", None).await.allowed);
    resolver.flush_audit().await;

    let rows = sqlx::query(
        "SELECT permission, allowed, prev_hash, hash, correlation_id FROM permission_audit ORDER BY rowid",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].get::<String, _>("permission"), "profiles.read.own");
    assert_eq!(rows[0].get::<i64, _>("allowed"), 1);
    assert_eq!(rows[0].get::<Option<String>, _>("prev_hash"), None);

    assert_eq!(rows[1].get::<String, _>("permission"), "profiles.write.own");
    assert_eq!(rows[1].get::<i64, _>("allowed"), 0);
    // Second row chains off the first.
    assert_eq!(
        rows[1].get::<Option<String>, _>("prev_hash").as_deref(),
        Some(rows[0].get::<String, _>("hash").as_str())
    );

    let correlation = ctx.correlation_id.unwrap().to_string();
    assert_eq!(
        rows[0].get::<Option<String>, _>("correlation_id").as_deref(),
        Some(correlation.as_str())
    );

    Ok(())
}
