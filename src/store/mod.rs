//! Durable-store access.
//!
//! The engine only needs simple keyed lookups and set-membership queries;
//! `AccessStore` is the seam the surrounding system implements with whatever
//! persistence it has. `SqliteAccessStore` is the production implementation,
//! `MemoryAccessStore` backs unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AccessResult;
use crate::models::{
    EmergencyGrant, InheritanceEdge, Permission, PermissionSet, Role, UserOverride, UserRole,
};
use crate::pattern::PermissionPattern;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryAccessStore;
pub use sqlite::SqliteAccessStore;

/// Raw reference data rows from which a snapshot is built. Validation
/// (cycles, dangling references) happens in the snapshot loader, not here.
#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
    /// (role id, directly granted pattern)
    pub role_patterns: Vec<(Uuid, PermissionPattern)>,
    pub sets: Vec<PermissionSet>,
    /// (set id, member pattern)
    pub set_patterns: Vec<(Uuid, PermissionPattern)>,
    /// (role id, attached set id)
    pub role_sets: Vec<(Uuid, Uuid)>,
    pub edges: Vec<InheritanceEdge>,
}

#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Load all reference data for a snapshot rebuild.
    async fn load_reference_data(&self) -> AccessResult<ReferenceData>;

    /// All role assignments for a user, active or not; the aggregator
    /// filters by expiry and tenant.
    async fn roles_for_user(&self, user_id: Uuid) -> AccessResult<Vec<UserRole>>;

    async fn overrides_for_user(&self, user_id: Uuid) -> AccessResult<Vec<UserOverride>>;

    async fn emergency_for_user(&self, user_id: Uuid) -> AccessResult<Vec<EmergencyGrant>>;

    /// Users currently holding a role; drives role-wide cache invalidation.
    async fn users_holding_role(&self, role_id: Uuid) -> AccessResult<Vec<Uuid>>;

    // Administrative writes for the record types the engine owns. Role and
    // role-assignment writes stay with the external admin workflow.

    async fn insert_override(&self, record: &UserOverride) -> AccessResult<()>;

    async fn delete_override(&self, id: Uuid) -> AccessResult<Option<UserOverride>>;

    async fn insert_emergency(&self, record: &EmergencyGrant) -> AccessResult<()>;

    /// Lazy cleanup of expired emergency records. Returns rows removed.
    async fn purge_expired_emergency(&self, now: DateTime<Utc>) -> AccessResult<u64>;
}
