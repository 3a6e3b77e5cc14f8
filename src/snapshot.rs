//! Reference-data snapshots.
//!
//! Role definitions, catalog permissions, permission sets, and inheritance
//! edges are read-mostly. The engine resolves against an immutable
//! [`Snapshot`] swapped atomically on reload; an in-flight resolution never
//! observes a partially updated graph. A failed reload keeps the last
//! known-good snapshot and surfaces the error to operators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{AccessError, AccessResult};
use crate::expand;
use crate::models::Role;
use crate::pattern::PermissionPattern;
use crate::store::{AccessStore, ReferenceData};

#[derive(Debug)]
pub struct Snapshot {
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    roles: HashMap<Uuid, Role>,
    role_patterns: HashMap<Uuid, Vec<PermissionPattern>>,
    role_sets: HashMap<Uuid, Vec<Uuid>>,
    set_names: HashMap<Uuid, String>,
    set_patterns: HashMap<Uuid, Vec<PermissionPattern>>,
    edges_by_parent: HashMap<String, Vec<PermissionPattern>>,
    edge_count: usize,
}

impl Snapshot {
    /// Build and validate a snapshot from raw reference data.
    ///
    /// Rejects inheritance cycles and dangling set references here, at load
    /// time, so resolution never has to cope with a broken graph.
    pub fn build(reference: ReferenceData, version: u64) -> AccessResult<Self> {
        if let Some(on_cycle) = expand::find_cycle(&reference.edges) {
            return Err(AccessError::inheritance_cycle(on_cycle));
        }

        let roles: HashMap<Uuid, Role> =
            reference.roles.into_iter().map(|r| (r.id, r)).collect();
        let set_names: HashMap<Uuid, String> = reference
            .sets
            .iter()
            .map(|s| (s.id, s.name.clone()))
            .collect();

        let mut set_patterns: HashMap<Uuid, Vec<PermissionPattern>> = HashMap::new();
        for (set_id, pattern) in reference.set_patterns {
            if !set_names.contains_key(&set_id) {
                return Err(AccessError::configuration(format!(
                    "permission set member references unknown set {}",
                    set_id
                )));
            }
            set_patterns.entry(set_id).or_default().push(pattern);
        }

        let mut role_sets: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (role_id, set_id) in reference.role_sets {
            if !set_names.contains_key(&set_id) {
                return Err(AccessError::configuration(format!(
                    "role {} references unknown permission set {}",
                    role_id, set_id
                )));
            }
            role_sets.entry(role_id).or_default().push(set_id);
        }

        let mut role_patterns: HashMap<Uuid, Vec<PermissionPattern>> = HashMap::new();
        for (role_id, pattern) in reference.role_patterns {
            role_patterns.entry(role_id).or_default().push(pattern);
        }

        Ok(Self {
            version,
            loaded_at: Utc::now(),
            roles,
            role_patterns,
            role_sets,
            set_names,
            set_patterns,
            edges_by_parent: expand::index_edges(&reference.edges),
            edge_count: reference.edges.len(),
        })
    }

    pub fn role(&self, role_id: &Uuid) -> Option<&Role> {
        self.roles.get(role_id)
    }

    pub fn direct_patterns(&self, role_id: &Uuid) -> &[PermissionPattern] {
        self.role_patterns
            .get(role_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn sets_for_role(&self, role_id: &Uuid) -> &[Uuid] {
        self.role_sets.get(role_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_name(&self, set_id: &Uuid) -> Option<&str> {
        self.set_names.get(set_id).map(String::as_str)
    }

    pub fn set_patterns(&self, set_id: &Uuid) -> &[PermissionPattern] {
        self.set_patterns
            .get(set_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn edges_by_parent(&self) -> &HashMap<String, Vec<PermissionPattern>> {
        &self.edges_by_parent
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }
}

/// Shared handle over the current snapshot. Readers clone the `Arc` and
/// resolve against it; `reload` swaps in a replacement atomically.
pub struct SnapshotHandle {
    current: RwLock<Arc<Snapshot>>,
    next_version: AtomicU64,
}

impl SnapshotHandle {
    pub fn new(snapshot: Snapshot) -> Self {
        let version = snapshot.version;
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            next_version: AtomicU64::new(version + 1),
        }
    }

    pub async fn load(store: &dyn AccessStore) -> AccessResult<Self> {
        let reference = store.load_reference_data().await?;
        let snapshot = Snapshot::build(reference, 1)?;
        Ok(Self::new(snapshot))
    }

    pub fn current(&self) -> Arc<Snapshot> {
        self.current.read().unwrap().clone()
    }

    /// Rebuild from the store and swap. On any failure the previous
    /// snapshot stays in place and the error is returned to the caller.
    pub async fn reload(&self, store: &dyn AccessStore) -> AccessResult<u64> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let reference = match store.load_reference_data().await {
            Ok(reference) => reference,
            Err(e) => {
                tracing::error!(error = %e, "snapshot reload failed, keeping previous snapshot");
                return Err(e);
            }
        };
        let snapshot = match Snapshot::build(reference, version) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!(error = %e, "snapshot rejected, keeping previous snapshot");
                return Err(e);
            }
        };
        *self.current.write().unwrap() = Arc::new(snapshot);
        tracing::info!(version, "reference data snapshot swapped");
        Ok(version)
    }
}
