//! Append-only audit trail.
//!
//! Every resolver decision and every administrative change to grants emits
//! one record. Writes are fire-and-forget relative to the decision: records
//! go through a bounded queue drained by a background task, so audit-store
//! latency never shows up in the permission-check path. Rows are chained
//! with SHA-256 over `prev_hash || payload` so tampering is detectable.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::errors::AccessResult;
use crate::models::DecisionSource;

// =============================================================================
// SEVERITY
// =============================================================================

/// Retention class for audit rows. Administrative changes and emergency
/// decisions are critical; routine checks are important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Long-term retention, never auto-deleted
    Critical,
    /// Medium-term retention (default)
    Important,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
        }
    }
}

// =============================================================================
// RECORD
// =============================================================================

pub const EVENT_CHECK: &str = "permission.checked";
pub const EVENT_OVERRIDE_GRANTED: &str = "override.granted";
pub const EVENT_OVERRIDE_REVOKED: &str = "override.revoked";
pub const EVENT_EMERGENCY_GRANTED: &str = "emergency.granted";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Event name like "permission.checked" or "override.granted".
    pub event: String,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    /// The pattern requested (checks) or affected (administrative changes).
    pub permission: String,
    pub allowed: bool,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    pub reason: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

// =============================================================================
// STORE
// =============================================================================

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> AccessResult<()>;
}

pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn append(&self, record: &AuditRecord) -> AccessResult<()> {
        let payload = serde_json::to_string(record).unwrap_or_default();

        // Single consumer (the sink's drain task), so reading the chain head
        // and inserting is not racy.
        let prev_hash: Option<String> =
            sqlx::query("SELECT hash FROM permission_audit ORDER BY occurred_at DESC, rowid DESC LIMIT 1")
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.get("hash"));

        let mut hasher = Sha256::new();
        if let Some(ref ph) = prev_hash {
            hasher.update(ph.as_bytes());
        }
        hasher.update(payload.as_bytes());
        let hash = hex::encode(hasher.finalize());

        sqlx::query(
            r#"
            INSERT INTO permission_audit
                (id, event, user_id, tenant_id, permission, allowed, source, matched_pattern,
                 reason, severity, correlation_id, occurred_at, payload, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.event)
        .bind(record.user_id.to_string())
        .bind(record.tenant_id.map(|t| t.to_string()))
        .bind(&record.permission)
        .bind(record.allowed as i64)
        .bind(record.source.as_str())
        .bind(record.matched_pattern.as_deref())
        .bind(&record.reason)
        .bind(record.severity.as_str())
        .bind(record.correlation_id.map(|c| c.to_string()))
        .bind(record.occurred_at)
        .bind(payload)
        .bind(prev_hash)
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Collects records in memory; unit tests assert against it.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: std::sync::Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> AccessResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// =============================================================================
// SINK
// =============================================================================

enum AuditMsg {
    Record(AuditRecord),
    Flush(oneshot::Sender<()>),
}

/// Bounded-queue front end for audit writes.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditMsg>,
}

impl AuditSink {
    /// Spawn the drain task and return the sink. The task exits when the
    /// last sink clone is dropped.
    pub fn spawn(store: Arc<dyn AuditStore>, queue_depth: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditMsg>(queue_depth);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    AuditMsg::Record(record) => {
                        if let Err(first) = store.append(&record).await {
                            // One retry, then log; an audit failure must never
                            // become a decision failure.
                            if let Err(second) = store.append(&record).await {
                                tracing::error!(
                                    event = %record.event,
                                    user_id = %record.user_id,
                                    first_error = %first,
                                    error = %second,
                                    "audit write failed after retry, record dropped"
                                );
                            }
                        }
                    }
                    AuditMsg::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Enqueue a record without waiting. If the queue is full the record is
    /// dropped with a warning rather than blocking the decision path.
    pub fn record(&self, record: AuditRecord) {
        if let Err(e) = self.tx.try_send(AuditMsg::Record(record)) {
            tracing::warn!(error = %e, "audit queue full, record dropped");
        }
    }

    /// Wait until every record enqueued before this call has been written.
    /// Used by tests and by graceful shutdown.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(AuditMsg::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_record(allowed: bool) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            event: EVENT_CHECK.to_string(),
            user_id: Uuid::new_v4(),
            tenant_id: None,
            permission: "profiles.read.own".to_string(),
            allowed,
            source: if allowed { DecisionSource::Role } else { DecisionSource::Deny },
            matched_pattern: allowed.then(|| "profiles.*.own".to_string()),
            reason: "matched role pattern".to_string(),
            severity: Severity::Important,
            correlation_id: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_drain_in_order() {
        let store = Arc::new(MemoryAuditStore::new());
        let sink = AuditSink::spawn(store.clone(), 16);

        sink.record(check_record(true));
        sink.record(check_record(false));
        sink.flush().await;

        let records = store.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].allowed);
        assert!(!records[1].allowed);
    }

    #[tokio::test]
    async fn flush_on_empty_queue_returns() {
        let store = Arc::new(MemoryAuditStore::new());
        let sink = AuditSink::spawn(store, 4);
        sink.flush().await;
    }
}
