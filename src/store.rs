//! # Sync Record Store
//!
//! Durable bookkeeping of what has been pushed where.
//!
//! One record per `(pkiSyncId, certificateId)` pair that has ever been
//! synced, mapping the certificate to its external identifier in the
//! destination and carrying the last sync outcome. The store is the only
//! authoritative certificate-to-external-identifier mapping; adapters must
//! never re-derive it from the name schema, because a record may have been
//! created under a predecessor certificate's id during a
//! preserve-on-renewal chain.
//!
//! The trait is implemented against the application database in production;
//! [`InMemorySyncRecordStore`] backs tests and the one-shot CLI.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Outcome of the last push for a certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Succeeded,
    Failed,
}

/// One tracked certificate within a sync
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: Uuid,
    pub pki_sync_id: String,
    pub certificate_id: String,
    pub external_identifier: String,
    pub sync_status: SyncStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_message: Option<String>,
}

/// Insert payload for [`SyncRecordStore::add_certificates`]
#[derive(Debug, Clone)]
pub struct NewSyncRecord {
    pub certificate_id: String,
    pub external_identifier: String,
}

/// Partial update for [`SyncRecordStore::update_by_id`]
#[derive(Debug, Clone, Default)]
pub struct SyncRecordUpdate {
    pub external_identifier: Option<String>,
    pub sync_status: Option<SyncStatus>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_message: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sync record already exists for certificate {certificate_id} in sync {pki_sync_id}")]
    Conflict {
        pki_sync_id: String,
        certificate_id: String,
    },

    #[error("sync record {0} not found")]
    NotFound(Uuid),

    #[error("sync record store backend error: {0}")]
    Backend(String),
}

/// Persistent mapping from `(pkiSyncId, certificateId)` to external identifier
/// and sync status.
///
/// Invariant: at most one record per `(pkiSyncId, certificateId)` pair.
#[async_trait]
pub trait SyncRecordStore: Send + Sync {
    async fn find_by_pki_sync_id(&self, pki_sync_id: &str) -> Result<Vec<SyncRecord>, StoreError>;

    async fn find_by_pki_sync_and_certificate(
        &self,
        pki_sync_id: &str,
        certificate_id: &str,
    ) -> Result<Option<SyncRecord>, StoreError>;

    /// Insert new records. Fails with [`StoreError::Conflict`] if a
    /// `(pkiSyncId, certificateId)` pair already exists; callers are
    /// expected to use [`SyncRecordStore::update_by_id`] in that case.
    async fn add_certificates(
        &self,
        pki_sync_id: &str,
        certificates: &[NewSyncRecord],
    ) -> Result<(), StoreError>;

    async fn update_by_id(
        &self,
        id: Uuid,
        update: SyncRecordUpdate,
    ) -> Result<SyncRecord, StoreError>;

    /// Update status and message by `(pkiSyncId, certificateId)`. A missing
    /// record is a no-op.
    async fn update_sync_status(
        &self,
        pki_sync_id: &str,
        certificate_id: &str,
        status: SyncStatus,
        message: &str,
    ) -> Result<(), StoreError>;

    /// Remove tracking rows for certificates whose destination object has
    /// been deleted or superseded.
    async fn remove_certificates(
        &self,
        pki_sync_id: &str,
        certificate_ids: &[String],
    ) -> Result<(), StoreError>;
}

/// In-memory store for tests and the one-shot CLI
#[derive(Debug, Default)]
pub struct InMemorySyncRecordStore {
    records: RwLock<HashMap<Uuid, SyncRecord>>,
}

impl InMemorySyncRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncRecordStore for InMemorySyncRecordStore {
    async fn find_by_pki_sync_id(&self, pki_sync_id: &str) -> Result<Vec<SyncRecord>, StoreError> {
        let records = self.records.read().await;
        let mut found: Vec<SyncRecord> = records
            .values()
            .filter(|record| record.pki_sync_id == pki_sync_id)
            .cloned()
            .collect();
        // Deterministic output independent of map iteration order
        found.sort_by(|a, b| a.certificate_id.cmp(&b.certificate_id));
        Ok(found)
    }

    async fn find_by_pki_sync_and_certificate(
        &self,
        pki_sync_id: &str,
        certificate_id: &str,
    ) -> Result<Option<SyncRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|record| {
                record.pki_sync_id == pki_sync_id && record.certificate_id == certificate_id
            })
            .cloned())
    }

    async fn add_certificates(
        &self,
        pki_sync_id: &str,
        certificates: &[NewSyncRecord],
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        for new_record in certificates {
            let exists = records.values().any(|record| {
                record.pki_sync_id == pki_sync_id
                    && record.certificate_id == new_record.certificate_id
            });
            if exists {
                return Err(StoreError::Conflict {
                    pki_sync_id: pki_sync_id.to_string(),
                    certificate_id: new_record.certificate_id.clone(),
                });
            }

            let id = Uuid::new_v4();
            records.insert(
                id,
                SyncRecord {
                    id,
                    pki_sync_id: pki_sync_id.to_string(),
                    certificate_id: new_record.certificate_id.clone(),
                    external_identifier: new_record.external_identifier.clone(),
                    sync_status: SyncStatus::Succeeded,
                    last_synced_at: None,
                    last_sync_message: None,
                },
            );
        }
        Ok(())
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        update: SyncRecordUpdate,
    ) -> Result<SyncRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if let Some(external_identifier) = update.external_identifier {
            record.external_identifier = external_identifier;
        }
        if let Some(sync_status) = update.sync_status {
            record.sync_status = sync_status;
        }
        if let Some(last_synced_at) = update.last_synced_at {
            record.last_synced_at = Some(last_synced_at);
        }
        if let Some(last_sync_message) = update.last_sync_message {
            record.last_sync_message = Some(last_sync_message);
        }

        Ok(record.clone())
    }

    async fn update_sync_status(
        &self,
        pki_sync_id: &str,
        certificate_id: &str,
        status: SyncStatus,
        message: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.values_mut().find(|record| {
            record.pki_sync_id == pki_sync_id && record.certificate_id == certificate_id
        }) {
            record.sync_status = status;
            record.last_sync_message = Some(message.to_string());
        }
        Ok(())
    }

    async fn remove_certificates(
        &self,
        pki_sync_id: &str,
        certificate_ids: &[String],
    ) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        records.retain(|_, record| {
            !(record.pki_sync_id == pki_sync_id
                && certificate_ids.contains(&record.certificate_id))
        });
        Ok(())
    }
}
