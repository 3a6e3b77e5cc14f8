mod common;

use anyhow::Result;
use uuid::Uuid;

use runway_access::CheckContext;

/// A cyclic inheritance edge set is rejected at reload, and the engine
/// keeps resolving against the last known-good snapshot.
#[tokio::test]
async fn cyclic_edges_are_rejected_and_previous_snapshot_survives() -> Result<()> {
    let (pool, _dir) = common::setup_pool().await?;

    let role = common::seed_role(&pool, "viewer", 10, None).await?;
    let read = common::seed_permission(&pool, "profiles.read.own").await?;
    common::grant_role_permission(&pool, role, read).await?;
    let user = Uuid::new_v4();
    common::assign_role(&pool, user, role, None).await?;

    let resolver = common::build_resolver(&pool).await?;
    let ctx = CheckContext::new(user);
    assert!(resolver.has_permission(&ctx, "profiles.read.own", None).await.allowed);

    // An operator mistake introduces a cycle.
    common::seed_edge(&pool, "a.b.c", "d.e.f").await?;
    common::seed_edge(&pool, "d.e.f", "a.b.c").await?;
    assert!(resolver.reload_snapshot().await.is_err());

    // Still resolving correctly against the previous snapshot.
    assert!(resolver.has_permission(&ctx, "profiles.read.own", None).await.allowed);

    // Fixing the data makes the next reload succeed and pick up new edges.
    sqlx::query("DELETE FROM permission_inheritance WHERE parent_pattern = 'd.e.f'")
        .execute(&pool)
        .await?;
    resolver.reload_snapshot().await?;
    assert!(resolver.has_permission(&ctx, "profiles.read.own", None).await.allowed);

    Ok(())
}

/// New reference data (a role granted an extra permission) becomes visible
/// after a snapshot reload without restarting the engine.
#[tokio::test]
async fn reload_picks_up_new_role_grants() -> Result<()> {
    let (pool, _dir) = common::setup_pool().await?;

    let role = common::seed_role(&pool, "editor", 30, None).await?;
    let read = common::seed_permission(&pool, "profiles.read.own").await?;
    common::grant_role_permission(&pool, role, read).await?;
    let user = Uuid::new_v4();
    common::assign_role(&pool, user, role, None).await?;

    let resolver = common::build_resolver(&pool).await?;
    let ctx = CheckContext::new(user);
    assert!(!resolver.has_permission(&ctx, "profiles.update.own", None).await.allowed);

    let update = common::seed_permission(&pool, "profiles.update.own").await?;
    common::grant_role_permission(&pool, role, update).await?;
    resolver.reload_snapshot().await?;
    resolver.invalidate_user(user, None).await;

    assert!(resolver.has_permission(&ctx, "profiles.update.own", None).await.allowed);

    Ok(())
}
