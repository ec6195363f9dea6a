//! # Reconciliation Engine
//!
//! Drives one reconciliation run against any [`DestinationClient`].
//!
//! ## Run state machine
//!
//! 1. **Enumerate** existing destination objects (paginated, through the
//!    connection queue, with bounded tolerance for throttled pages)
//! 2. **Load** sync records for this sync; index by certificate id and by
//!    external identifier
//! 3. **Plan** per desired certificate, in insertion order of the map:
//!    validation, stale-skip, renewal-chain resolution, target-name
//!    computation, create-vs-update decision
//! 4. **Execute** planned uploads, each item isolated; persist outcomes to
//!    the sync record store
//! 5. **Delete orphans** within the managed namespace, when enabled
//! 6. **Return** granular counts plus itemized error details
//!
//! Enumeration and record loading complete before planning starts; planning
//! decisions depend on both snapshots being consistent as of the start of
//! the run. Items in steps 4 and 5 are mutually independent: one failure
//! never changes the disposition of another.
//!
//! Concurrent runs against the same sync id are not safe against each other
//! and must be serialized by the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::certificate::{CertificateLookup, CertificateMap};
use crate::error::{DestinationError, DestinationErrorKind, SyncError};
use crate::naming;
use crate::observability::metrics;
use crate::queue::{ConnectionQueue, OperationContext};
use crate::store::{NewSyncRecord, SyncRecord, SyncRecordStore, SyncRecordUpdate, SyncStatus};
use crate::PkiSyncConfig;

use super::{
    build_certificate_payload, DestinationClient, ExecutionMode, ItemError,
    RemoveCertificatesResult, SyncCertificatesResult,
};

/// Bounded tolerance for throttled listing pages, on top of the queue's own
/// retry budget
const LIST_THROTTLE_MAX_RETRIES: u32 = 10;
const LIST_THROTTLE_PAUSE: Duration = Duration::from_secs(1);

const SYNC_SUCCESS_MESSAGE: &str = "Certificate successfully synced to destination";

/// One planned create-or-update
#[derive(Debug)]
struct UploadPlan {
    logical_name: String,
    certificate_id: String,
    payload: Map<String, Value>,
    is_update: bool,
    target_name: String,
    /// Set when a preserve-on-renewal chain repoints the predecessor's
    /// record to this certificate
    old_certificate_id_to_remove: Option<String>,
}

/// Reconciles a sync's desired certificate set against one destination.
///
/// Construct one adapter per destination client; the connection queue, sync
/// record store, and certificate lookup are injected by the composition
/// root.
pub struct DestinationAdapter {
    client: Arc<dyn DestinationClient>,
    queue: ConnectionQueue,
    records: Arc<dyn SyncRecordStore>,
    certificates: Arc<dyn CertificateLookup>,
}

impl std::fmt::Debug for DestinationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationAdapter")
            .field("destination", &self.client.destination())
            .finish_non_exhaustive()
    }
}

impl DestinationAdapter {
    pub fn new(
        client: Arc<dyn DestinationClient>,
        queue: ConnectionQueue,
        records: Arc<dyn SyncRecordStore>,
        certificates: Arc<dyn CertificateLookup>,
    ) -> Self {
        Self {
            client,
            queue,
            records,
            certificates,
        }
    }

    /// Converge the destination to match `certificate_map`.
    ///
    /// Never returns `Err` for per-item failures; those are collected into
    /// the result. `Err` means a fatal condition (auth failure, enumeration
    /// failure, store failure) and the run produced no complete result,
    /// though sync records already committed stay committed.
    pub async fn sync_certificates(
        &self,
        sync: &PkiSyncConfig,
        certificate_map: &CertificateMap,
    ) -> Result<SyncCertificatesResult, SyncError> {
        let destination = self.client.destination();
        let start = Instant::now();
        info!(
            "Starting certificate sync to {} [syncId={}] ({} certificates)",
            destination,
            sync.id,
            certificate_map.len()
        );
        metrics::increment_sync_runs(destination.as_str());

        let run = self.sync_certificates_inner(sync, certificate_map).await;
        metrics::observe_sync_run_duration(destination.as_str(), start.elapsed().as_secs_f64());

        match &run {
            Ok(result) => {
                info!(
                    "Sync complete [syncId={}]: uploaded={} updated={} removed={} failedRemovals={} skipped={}",
                    sync.id,
                    result.uploaded,
                    result.updated,
                    result.removed,
                    result.failed_removals,
                    result.skipped
                );
            }
            Err(err) => {
                metrics::increment_sync_run_errors(destination.as_str());
                error!("Sync failed [syncId={}]: {}", sync.id, err);
            }
        }

        run
    }

    async fn sync_certificates_inner(
        &self,
        sync: &PkiSyncConfig,
        certificate_map: &CertificateMap,
    ) -> Result<SyncCertificatesResult, SyncError> {
        let options = &sync.sync_options;
        let schema = options.certificate_name_schema.as_deref();
        let environment = self.client.default_environment();

        // Step 1: snapshot of the destination namespace
        let existing = self.enumerate_objects(&sync.id).await?;

        // Step 2: snapshot of the record store, indexed both directions
        let sync_records = self.records.find_by_pki_sync_id(&sync.id).await?;
        let mut records_by_cert_id: HashMap<String, SyncRecord> = HashMap::new();
        let mut records_by_external_id: HashMap<String, SyncRecord> = HashMap::new();
        for record in sync_records {
            records_by_external_id.insert(record.external_identifier.clone(), record.clone());
            records_by_cert_id.insert(record.certificate_id.clone(), record);
        }

        let mut result = SyncCertificatesResult::default();
        let mut plans: Vec<UploadPlan> = Vec::new();
        let mut active_identifiers: HashSet<String> = HashSet::new();

        // Step 3: plan, in insertion order of the desired map
        for (logical_name, bundle) in certificate_map.iter() {
            if bundle.cert.trim().is_empty() {
                result.details.validation_errors.push(ItemError {
                    name: logical_name.to_string(),
                    error: "Certificate content is empty or missing".to_string(),
                });
                result.skipped += 1;
                continue;
            }
            if bundle.private_key.trim().is_empty() {
                result.details.validation_errors.push(ItemError {
                    name: logical_name.to_string(),
                    error: "Private key content is empty or missing".to_string(),
                });
                result.skipped += 1;
                continue;
            }
            if bundle.certificate_id.trim().is_empty() {
                result.details.validation_errors.push(ItemError {
                    name: logical_name.to_string(),
                    error: "Certificate id is missing".to_string(),
                });
                result.skipped += 1;
                continue;
            }

            let certificate = self
                .certificates
                .find_by_id(&bundle.certificate_id)
                .await
                .map_err(SyncError::CertificateLookup)?;

            // Superseded certificates are handled by their successor's entry
            if certificate
                .as_ref()
                .is_some_and(|cert| cert.renewed_by_certificate_id.is_some())
            {
                debug!(
                    "Skipping superseded certificate {} [syncId={}]",
                    bundle.certificate_id, sync.id
                );
                result.skipped += 1;
                continue;
            }

            let renewed_from = certificate
                .as_ref()
                .and_then(|cert| cert.renewed_from_certificate_id.clone());

            let mut target_name = naming::resolve_target_name(
                schema,
                &bundle.certificate_id,
                bundle.common_name.as_deref(),
                environment,
                &self
                    .client
                    .default_object_name(logical_name, &bundle.certificate_id),
            );

            // Renewal chains keep their record under the predecessor's id
            // until the repoint below; look up by that key.
            let lookup_id = renewed_from.as_deref().unwrap_or(&bundle.certificate_id);
            let existing_record = records_by_cert_id.get(lookup_id);

            let mut should_process = true;
            let mut is_update = false;
            let mut old_certificate_id_to_remove = None;

            if let Some(record) = existing_record {
                if existing.contains(&record.external_identifier) {
                    match (&renewed_from, options.preserve_secret_on_renewal) {
                        (Some(old_id), true) => {
                            // Reuse the predecessor's destination object and
                            // repoint its record to this certificate
                            target_name = record.external_identifier.clone();
                            is_update = true;
                            if *old_id != bundle.certificate_id {
                                old_certificate_id_to_remove = Some(old_id.clone());
                            }
                        }
                        (Some(_), false) => {
                            // Leave the predecessor's object untouched; the
                            // renewal gets its own object under target_name
                            active_identifiers.insert(record.external_identifier.clone());
                        }
                        (None, _) => {
                            // Already synced and not a renewal: nothing to do
                            active_identifiers.insert(record.external_identifier.clone());
                            should_process = false;
                        }
                    }
                }
                // Record exists but the object was deleted out-of-band:
                // fall through and create under the computed target_name.
            }

            if !should_process {
                result.skipped += 1;
                continue;
            }

            if existing.contains(&target_name) {
                is_update = true;
            }
            active_identifiers.insert(target_name.clone());

            plans.push(UploadPlan {
                logical_name: logical_name.to_string(),
                certificate_id: bundle.certificate_id.clone(),
                payload: build_certificate_payload(bundle, &options.field_mappings),
                is_update,
                target_name,
                old_certificate_id_to_remove,
            });
        }

        // Step 4: execute uploads, each independently isolated
        let outcomes = self.execute_uploads(&sync.id, plans).await;
        for (plan, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    if plan.is_update {
                        result.updated += 1;
                    } else {
                        result.uploaded += 1;
                    }
                    self.persist_upload_success(&sync.id, &plan).await?;
                }
                Err(err) => {
                    error!(
                        "Failed to sync certificate {} to {} [syncId={}]: {}",
                        plan.certificate_id,
                        self.client.destination(),
                        sync.id,
                        err
                    );
                    result.details.failed_uploads.push(ItemError {
                        name: plan.logical_name.clone(),
                        error: err.to_string(),
                    });
                    if let Some(record) = self
                        .records
                        .find_by_pki_sync_and_certificate(&sync.id, &plan.certificate_id)
                        .await?
                    {
                        self.records
                            .update_by_id(
                                record.id,
                                SyncRecordUpdate {
                                    sync_status: Some(SyncStatus::Failed),
                                    last_sync_message: Some(err.to_string()),
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                }
            }
        }
        metrics::increment_certificates_uploaded(
            self.client.destination().as_str(),
            u64::from(result.uploaded + result.updated),
        );

        // Step 5: delete orphans within the managed namespace
        if options.can_remove_certificates {
            let mut orphans: Vec<String> = existing
                .iter()
                .filter(|name| {
                    !active_identifiers.contains(*name)
                        && naming::is_managed_name(
                            name,
                            environment,
                            schema,
                            self.client.default_prefix(),
                        )
                })
                .cloned()
                .collect();
            orphans.sort();

            let outcomes = self.execute_deletions(&sync.id, orphans).await;
            for (name, outcome) in outcomes {
                match outcome {
                    Ok(()) => {
                        result.removed += 1;
                        if let Some(record) = records_by_external_id.get(&name) {
                            self.records
                                .remove_certificates(
                                    &sync.id,
                                    std::slice::from_ref(&record.certificate_id),
                                )
                                .await?;
                        }
                    }
                    Err(err) => {
                        error!(
                            "Failed to remove orphaned object {} [syncId={}]: {}",
                            name, sync.id, err
                        );
                        result.failed_removals += 1;
                        result.details.failed_removals.push(ItemError {
                            name,
                            error: err.to_string(),
                        });
                    }
                }
            }
            metrics::increment_certificates_removed(
                self.client.destination().as_str(),
                u64::from(result.removed),
            );
        }

        Ok(result)
    }

    /// Explicit teardown: delete the destination objects for the named
    /// certificates and drop their sync records.
    ///
    /// External identifiers resolve from the supplied certificate map when
    /// available, otherwise by treating the name as an external identifier.
    /// Deletions are isolated; one failure does not block the others, and
    /// tracking rows are removed for everything that was resolved.
    pub async fn remove_certificates(
        &self,
        sync: &PkiSyncConfig,
        certificate_names: &[String],
        certificate_map: Option<&CertificateMap>,
    ) -> Result<RemoveCertificatesResult, SyncError> {
        let sync_records = self.records.find_by_pki_sync_id(&sync.id).await?;

        let mut certificate_ids_to_remove: Vec<String> = Vec::new();
        let mut objects_to_remove: Vec<String> = Vec::new();

        for name in certificate_names {
            let bundle = certificate_map.and_then(|map| map.get(name));
            let record = match bundle {
                Some(bundle) => sync_records
                    .iter()
                    .find(|record| record.certificate_id == bundle.certificate_id),
                None => sync_records
                    .iter()
                    .find(|record| record.external_identifier == *name),
            };

            if let Some(record) = record {
                certificate_ids_to_remove.push(record.certificate_id.clone());
                objects_to_remove.push(record.external_identifier.clone());
            } else {
                debug!(
                    "No sync record for certificate {} [syncId={}], nothing to remove",
                    name, sync.id
                );
            }
        }

        let outcomes = self.execute_deletions(&sync.id, objects_to_remove).await;
        let mut result = RemoveCertificatesResult::default();
        for (name, outcome) in outcomes {
            match outcome {
                // An object already deleted out-of-band still counts as removed
                Ok(()) => result.removed += 1,
                Err(err) if err.kind == DestinationErrorKind::NotFound => result.removed += 1,
                Err(err) => {
                    result.failed += 1;
                    error!(
                        "Failed to remove object {} [syncId={}]: {}",
                        name, sync.id, err
                    );
                }
            }
        }

        if !certificate_ids_to_remove.is_empty() {
            self.records
                .remove_certificates(&sync.id, &certificate_ids_to_remove)
                .await?;
        }

        metrics::increment_certificates_removed(
            self.client.destination().as_str(),
            u64::from(result.removed),
        );
        Ok(result)
    }

    /// Paginated listing with bounded tolerance for throttled pages.
    ///
    /// Auth failures abort the run as [`SyncError::Auth`]; other
    /// non-throttling failures abort as [`SyncError::Enumeration`].
    async fn enumerate_objects(&self, sync_id: &str) -> Result<HashSet<String>, SyncError> {
        let mut names = HashSet::new();
        let mut page_token: Option<String> = None;
        let mut throttle_attempts: u32 = 0;

        loop {
            let token = page_token.clone();
            let page = self
                .queue
                .with_rate_limit_retry(
                    OperationContext {
                        operation: "list-objects",
                        sync_id,
                    },
                    || self.client.list_objects(token.as_deref()),
                )
                .await;

            match page {
                Ok(page) => {
                    throttle_attempts = 0;
                    names.extend(page.names);
                    match page.next_token {
                        Some(token) => page_token = Some(token),
                        None => break,
                    }
                }
                Err(err) if err.is_auth() => return Err(SyncError::Auth(err.message)),
                Err(err)
                    if err.kind == DestinationErrorKind::Throttled
                        && throttle_attempts < LIST_THROTTLE_MAX_RETRIES =>
                {
                    throttle_attempts += 1;
                    warn!(
                        "Throttled while listing destination objects [syncId={}], pausing before retry ({}/{})",
                        sync_id, throttle_attempts, LIST_THROTTLE_MAX_RETRIES
                    );
                    tokio::time::sleep(LIST_THROTTLE_PAUSE).await;
                }
                Err(err) => return Err(SyncError::Enumeration(err)),
            }
        }

        Ok(names)
    }

    async fn execute_uploads(
        &self,
        sync_id: &str,
        plans: Vec<UploadPlan>,
    ) -> Vec<(UploadPlan, Result<(), DestinationError>)> {
        match self.client.execution_mode() {
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(plans.len());
                for plan in plans {
                    let outcome = self.push_object(sync_id, &plan).await;
                    outcomes.push((plan, outcome));
                }
                outcomes
            }
            ExecutionMode::Concurrent => {
                join_all(plans.into_iter().map(|plan| async move {
                    let outcome = self.push_object(sync_id, &plan).await;
                    (plan, outcome)
                }))
                .await
            }
        }
    }

    async fn push_object(
        &self,
        sync_id: &str,
        plan: &UploadPlan,
    ) -> Result<(), DestinationError> {
        if plan.is_update {
            self.queue
                .with_rate_limit_retry(
                    OperationContext {
                        operation: "update-object",
                        sync_id,
                    },
                    || self.client.update_object(&plan.target_name, &plan.payload),
                )
                .await
        } else {
            self.queue
                .with_rate_limit_retry(
                    OperationContext {
                        operation: "create-object",
                        sync_id,
                    },
                    || self.client.create_object(&plan.target_name, &plan.payload),
                )
                .await
        }
    }

    async fn execute_deletions(
        &self,
        sync_id: &str,
        names: Vec<String>,
    ) -> Vec<(String, Result<(), DestinationError>)> {
        let delete_one = |name: String| async move {
            let outcome = self
                .queue
                .with_rate_limit_retry(
                    OperationContext {
                        operation: "delete-object",
                        sync_id,
                    },
                    || self.client.delete_object(&name),
                )
                .await;
            (name, outcome)
        };

        match self.client.execution_mode() {
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(names.len());
                for name in names {
                    outcomes.push(delete_one(name).await);
                }
                outcomes
            }
            ExecutionMode::Concurrent => join_all(names.into_iter().map(delete_one)).await,
        }
    }

    /// Upsert the sync record for a successful push, repointing across a
    /// preserve-on-renewal chain when needed.
    async fn persist_upload_success(
        &self,
        sync_id: &str,
        plan: &UploadPlan,
    ) -> Result<(), SyncError> {
        match self
            .records
            .find_by_pki_sync_and_certificate(sync_id, &plan.certificate_id)
            .await?
        {
            Some(record) => {
                self.records
                    .update_by_id(
                        record.id,
                        SyncRecordUpdate {
                            external_identifier: Some(plan.target_name.clone()),
                            sync_status: Some(SyncStatus::Succeeded),
                            last_synced_at: Some(Utc::now()),
                            last_sync_message: Some(SYNC_SUCCESS_MESSAGE.to_string()),
                        },
                    )
                    .await?;
            }
            None => {
                self.records
                    .add_certificates(
                        sync_id,
                        &[NewSyncRecord {
                            certificate_id: plan.certificate_id.clone(),
                            external_identifier: plan.target_name.clone(),
                        }],
                    )
                    .await?;
                self.records
                    .update_sync_status(
                        sync_id,
                        &plan.certificate_id,
                        SyncStatus::Succeeded,
                        SYNC_SUCCESS_MESSAGE,
                    )
                    .await?;
            }
        }

        if let Some(old_id) = &plan.old_certificate_id_to_remove {
            self.records
                .remove_certificates(sync_id, std::slice::from_ref(old_id))
                .await?;
        }

        Ok(())
    }
}
