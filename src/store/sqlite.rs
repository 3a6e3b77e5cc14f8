use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AccessError, AccessResult};
use crate::models::{
    EmergencyGrant, InheritanceEdge, OverrideEffect, Permission, PermissionSet, Role,
    UserOverride, UserRole,
};
use crate::pattern::PermissionPattern;
use crate::store::{AccessStore, ReferenceData};

#[derive(Clone)]
pub struct SqliteAccessStore {
    pool: SqlitePool,
}

impl SqliteAccessStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_uuid(value: &str) -> AccessResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| AccessError::internal(format!("invalid uuid: {}", e)))
}

fn parse_opt_uuid(value: Option<String>) -> AccessResult<Option<Uuid>> {
    match value {
        Some(s) => Ok(Some(parse_uuid(&s)?)),
        None => Ok(None),
    }
}

fn override_from_row(row: &SqliteRow) -> AccessResult<UserOverride> {
    let effect_str: String = row.get("effect");
    let effect = OverrideEffect::parse(&effect_str)
        .ok_or_else(|| AccessError::internal(format!("unknown override effect: {}", effect_str)))?;
    Ok(UserOverride {
        id: parse_uuid(row.get::<&str, _>("id"))?,
        user_id: parse_uuid(row.get::<&str, _>("user_id"))?,
        tenant_id: parse_opt_uuid(row.get("tenant_id"))?,
        pattern: PermissionPattern::parse(row.get::<&str, _>("pattern"))?,
        effect,
        expires_at: row.get("expires_at"),
        created_by: parse_opt_uuid(row.get("created_by"))?,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl AccessStore for SqliteAccessStore {
    async fn load_reference_data(&self) -> AccessResult<ReferenceData> {
        let role_rows = sqlx::query(
            "SELECT id, name, tenant_id, level, is_system, description, created_at, updated_at FROM roles",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut roles = Vec::with_capacity(role_rows.len());
        for r in &role_rows {
            roles.push(Role {
                id: parse_uuid(r.get::<&str, _>("id"))?,
                name: r.get("name"),
                tenant_id: parse_opt_uuid(r.get("tenant_id"))?,
                level: r.get("level"),
                is_system: r.get::<i64, _>("is_system") != 0,
                description: r.get("description"),
                created_at: r.get("created_at"),
                updated_at: r.get("updated_at"),
            });
        }

        let permission_rows =
            sqlx::query("SELECT id, pattern, description, created_at FROM permissions")
                .fetch_all(&self.pool)
                .await?;

        let mut permissions = Vec::with_capacity(permission_rows.len());
        for r in &permission_rows {
            permissions.push(Permission {
                id: parse_uuid(r.get::<&str, _>("id"))?,
                pattern: PermissionPattern::parse(r.get::<&str, _>("pattern"))?,
                description: r.get("description"),
                created_at: r.get("created_at"),
            });
        }

        let role_pattern_rows = sqlx::query(
            r#"
            SELECT rp.role_id, p.pattern
            FROM role_permissions rp
            INNER JOIN permissions p ON p.id = rp.permission_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut role_patterns = Vec::with_capacity(role_pattern_rows.len());
        for r in &role_pattern_rows {
            role_patterns.push((
                parse_uuid(r.get::<&str, _>("role_id"))?,
                PermissionPattern::parse(r.get::<&str, _>("pattern"))?,
            ));
        }

        let set_rows =
            sqlx::query("SELECT id, name, description, created_at FROM permission_sets")
                .fetch_all(&self.pool)
                .await?;

        let mut sets = Vec::with_capacity(set_rows.len());
        for r in &set_rows {
            sets.push(PermissionSet {
                id: parse_uuid(r.get::<&str, _>("id"))?,
                name: r.get("name"),
                description: r.get("description"),
                created_at: r.get("created_at"),
            });
        }

        let set_pattern_rows = sqlx::query(
            r#"
            SELECT m.set_id, p.pattern
            FROM permission_set_members m
            INNER JOIN permissions p ON p.id = m.permission_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut set_patterns = Vec::with_capacity(set_pattern_rows.len());
        for r in &set_pattern_rows {
            set_patterns.push((
                parse_uuid(r.get::<&str, _>("set_id"))?,
                PermissionPattern::parse(r.get::<&str, _>("pattern"))?,
            ));
        }

        let role_set_rows = sqlx::query("SELECT role_id, set_id FROM role_permission_sets")
            .fetch_all(&self.pool)
            .await?;

        let mut role_sets = Vec::with_capacity(role_set_rows.len());
        for r in &role_set_rows {
            role_sets.push((
                parse_uuid(r.get::<&str, _>("role_id"))?,
                parse_uuid(r.get::<&str, _>("set_id"))?,
            ));
        }

        let edge_rows =
            sqlx::query("SELECT parent_pattern, child_pattern FROM permission_inheritance")
                .fetch_all(&self.pool)
                .await?;

        let mut edges = Vec::with_capacity(edge_rows.len());
        for r in &edge_rows {
            edges.push(InheritanceEdge {
                parent: PermissionPattern::parse(r.get::<&str, _>("parent_pattern"))?,
                child: PermissionPattern::parse(r.get::<&str, _>("child_pattern"))?,
            });
        }

        Ok(ReferenceData {
            roles,
            permissions,
            role_patterns,
            sets,
            set_patterns,
            role_sets,
            edges,
        })
    }

    async fn roles_for_user(&self, user_id: Uuid) -> AccessResult<Vec<UserRole>> {
        let rows = sqlx::query(
            "SELECT user_id, role_id, tenant_id, expires_at, granted_at FROM user_roles WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut assignments = Vec::with_capacity(rows.len());
        for r in &rows {
            assignments.push(UserRole {
                user_id: parse_uuid(r.get::<&str, _>("user_id"))?,
                role_id: parse_uuid(r.get::<&str, _>("role_id"))?,
                tenant_id: parse_opt_uuid(r.get("tenant_id"))?,
                expires_at: r.get("expires_at"),
                granted_at: r.get("granted_at"),
            });
        }
        Ok(assignments)
    }

    async fn overrides_for_user(&self, user_id: Uuid) -> AccessResult<Vec<UserOverride>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, tenant_id, pattern, effect, expires_at, created_by, created_at
            FROM user_overrides
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut overrides = Vec::with_capacity(rows.len());
        for r in &rows {
            overrides.push(override_from_row(r)?);
        }
        Ok(overrides)
    }

    async fn emergency_for_user(&self, user_id: Uuid) -> AccessResult<Vec<EmergencyGrant>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, tenant_id, pattern, reason, granted_by, starts_at, expires_at
            FROM emergency_access
            WHERE user_id = ?
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut grants = Vec::with_capacity(rows.len());
        for r in &rows {
            grants.push(EmergencyGrant {
                id: parse_uuid(r.get::<&str, _>("id"))?,
                user_id: parse_uuid(r.get::<&str, _>("user_id"))?,
                tenant_id: parse_opt_uuid(r.get("tenant_id"))?,
                pattern: PermissionPattern::parse(r.get::<&str, _>("pattern"))?,
                reason: r.get("reason"),
                granted_by: parse_uuid(r.get::<&str, _>("granted_by"))?,
                starts_at: r.get("starts_at"),
                expires_at: r.get("expires_at"),
            });
        }
        Ok(grants)
    }

    async fn users_holding_role(&self, role_id: Uuid) -> AccessResult<Vec<Uuid>> {
        let rows = sqlx::query("SELECT DISTINCT user_id FROM user_roles WHERE role_id = ?")
            .bind(role_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        let mut users = Vec::with_capacity(rows.len());
        for r in &rows {
            users.push(parse_uuid(r.get::<&str, _>("user_id"))?);
        }
        Ok(users)
    }

    async fn insert_override(&self, record: &UserOverride) -> AccessResult<()> {
        sqlx::query(
            r#"
            INSERT INTO user_overrides (id, user_id, tenant_id, pattern, effect, expires_at, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.tenant_id.map(|t| t.to_string()))
        .bind(record.pattern.as_str())
        .bind(record.effect.as_str())
        .bind(record.expires_at)
        .bind(record.created_by.map(|u| u.to_string()))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_override(&self, id: Uuid) -> AccessResult<Option<UserOverride>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, tenant_id, pattern, effect, expires_at, created_by, created_at
            FROM user_overrides
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let record = override_from_row(&row)?;

        sqlx::query("DELETE FROM user_overrides WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(Some(record))
    }

    async fn insert_emergency(&self, record: &EmergencyGrant) -> AccessResult<()> {
        sqlx::query(
            r#"
            INSERT INTO emergency_access (id, user_id, tenant_id, pattern, reason, granted_by, starts_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.user_id.to_string())
        .bind(record.tenant_id.map(|t| t.to_string()))
        .bind(record.pattern.as_str())
        .bind(&record.reason)
        .bind(record.granted_by.to_string())
        .bind(record.starts_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_expired_emergency(&self, now: DateTime<Utc>) -> AccessResult<u64> {
        let result = sqlx::query("DELETE FROM emergency_access WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
