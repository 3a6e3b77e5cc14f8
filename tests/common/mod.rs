#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

use runway_access::audit::SqliteAuditStore;
use runway_access::cache::MemoryCacheStore;
use runway_access::store::SqliteAccessStore;
use runway_access::{EngineConfig, PermissionResolver};

/// Temp-file SQLite pool with migrations applied. The TempDir must be kept
/// alive for the duration of the test.
pub async fn setup_pool() -> Result<(SqlitePool, TempDir)> {
    let dir = tempfile::tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    Ok((pool, dir))
}

pub async fn build_resolver(pool: &SqlitePool) -> Result<PermissionResolver> {
    let store = Arc::new(SqliteAccessStore::new(pool.clone()));
    let cache = Arc::new(MemoryCacheStore::new());
    let audit = Arc::new(SqliteAuditStore::new(pool.clone()));
    let resolver =
        PermissionResolver::new(store, cache, audit, EngineConfig::default()).await?;
    Ok(resolver)
}

pub async fn seed_role(pool: &SqlitePool, name: &str, level: i64, tenant: Option<Uuid>) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO roles (id, name, tenant_id, level, is_system, description, created_at, updated_at) VALUES (?, ?, ?, ?, 0, NULL, ?, ?)",
    )
    .bind(id.to_string())
    .bind(name)
    .bind(tenant.map(|t| t.to_string()))
    .bind(level)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn seed_permission(pool: &SqlitePool, pattern: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO permissions (id, pattern, description, created_at) VALUES (?, ?, NULL, ?)")
        .bind(id.to_string())
        .bind(pattern)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn grant_role_permission(pool: &SqlitePool, role_id: Uuid, permission_id: Uuid) -> Result<()> {
    sqlx::query("INSERT INTO role_permissions (role_id, permission_id, created_at) VALUES (?, ?, ?)")
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn assign_role(pool: &SqlitePool, user_id: Uuid, role_id: Uuid, tenant: Option<Uuid>) -> Result<()> {
    sqlx::query(
        "INSERT INTO user_roles (user_id, role_id, tenant_id, expires_at, granted_at) VALUES (?, ?, ?, NULL, ?)",
    )
    .bind(user_id.to_string())
    .bind(role_id.to_string())
    .bind(tenant.map(|t| t.to_string()))
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed_edge(pool: &SqlitePool, parent: &str, child: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO permission_inheritance (parent_pattern, child_pattern, created_at) VALUES (?, ?, ?)",
    )
    .bind(parent)
    .bind(child)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn seed_set(pool: &SqlitePool, name: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO permission_sets (id, name, description, created_at) VALUES (?, ?, NULL, ?)")
        .bind(id.to_string())
        .bind(name)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(id)
}

pub async fn add_set_member(pool: &SqlitePool, set_id: Uuid, permission_id: Uuid) -> Result<()> {
    sqlx::query("INSERT INTO permission_set_members (set_id, permission_id, created_at) VALUES (?, ?, ?)")
        .bind(set_id.to_string())
        .bind(permission_id.to_string())
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn attach_set_to_role(pool: &SqlitePool, role_id: Uuid, set_id: Uuid) -> Result<()> {
    sqlx::query("INSERT INTO role_permission_sets (role_id, set_id, created_at) VALUES (?, ?, ?)")
        .bind(role_id.to_string())
        .bind(set_id.to_string())
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}
