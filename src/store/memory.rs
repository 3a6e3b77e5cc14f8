//! In-memory store used by unit tests and local experiments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::{AccessError, AccessResult};
use crate::models::{EmergencyGrant, UserOverride, UserRole};
use crate::store::{AccessStore, ReferenceData};

#[derive(Default)]
struct Inner {
    reference: ReferenceData,
    user_roles: Vec<UserRole>,
    overrides: Vec<UserOverride>,
    emergency: Vec<EmergencyGrant>,
}

#[derive(Default)]
pub struct MemoryAccessStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reference_data(&self, reference: ReferenceData) {
        self.inner.lock().unwrap().reference = reference;
    }

    pub fn assign_role(&self, assignment: UserRole) {
        self.inner.lock().unwrap().user_roles.push(assignment);
    }

    pub fn remove_role(&self, user_id: Uuid, role_id: Uuid) {
        self.inner
            .lock()
            .unwrap()
            .user_roles
            .retain(|ur| !(ur.user_id == user_id && ur.role_id == role_id));
    }

    pub fn add_override(&self, record: UserOverride) {
        self.inner.lock().unwrap().overrides.push(record);
    }

    pub fn add_emergency(&self, record: EmergencyGrant) {
        self.inner.lock().unwrap().emergency.push(record);
    }

    /// Simulate a durable-store outage; reads fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> AccessResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AccessError::internal("store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessStore for MemoryAccessStore {
    async fn load_reference_data(&self) -> AccessResult<ReferenceData> {
        self.check_available()?;
        Ok(self.inner.lock().unwrap().reference.clone())
    }

    async fn roles_for_user(&self, user_id: Uuid) -> AccessResult<Vec<UserRole>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .user_roles
            .iter()
            .filter(|ur| ur.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn overrides_for_user(&self, user_id: Uuid) -> AccessResult<Vec<UserOverride>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .overrides
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn emergency_for_user(&self, user_id: Uuid) -> AccessResult<Vec<EmergencyGrant>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .unwrap()
            .emergency
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn users_holding_role(&self, role_id: Uuid) -> AccessResult<Vec<Uuid>> {
        self.check_available()?;
        let mut users: Vec<Uuid> = self
            .inner
            .lock()
            .unwrap()
            .user_roles
            .iter()
            .filter(|ur| ur.role_id == role_id)
            .map(|ur| ur.user_id)
            .collect();
        users.dedup();
        Ok(users)
    }

    async fn insert_override(&self, record: &UserOverride) -> AccessResult<()> {
        self.check_available()?;
        self.inner.lock().unwrap().overrides.push(record.clone());
        Ok(())
    }

    async fn delete_override(&self, id: Uuid) -> AccessResult<Option<UserOverride>> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        let found = inner.overrides.iter().position(|o| o.id == id);
        Ok(found.map(|idx| inner.overrides.remove(idx)))
    }

    async fn insert_emergency(&self, record: &EmergencyGrant) -> AccessResult<()> {
        self.check_available()?;
        self.inner.lock().unwrap().emergency.push(record.clone());
        Ok(())
    }

    async fn purge_expired_emergency(&self, now: DateTime<Utc>) -> AccessResult<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.emergency.len();
        inner.emergency.retain(|e| e.expires_at > now);
        Ok((before - inner.emergency.len()) as u64)
    }
}
