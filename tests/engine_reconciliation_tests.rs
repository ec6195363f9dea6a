//! # Reconciliation Engine Integration Tests
//!
//! Exercises the full sync state machine against a mock destination client:
//! fresh uploads, idempotent re-runs, renewal chains, orphan deletion,
//! per-item failure isolation, and retry bounds.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use pki_sync_engine::certificate::{
    Certificate, CertificateBundle, CertificateLookup, CertificateMap, InMemoryCertificateLookup,
};
use pki_sync_engine::destination::aws_secrets_manager::AwsConnection;
use pki_sync_engine::destination::{
    Destination, DestinationAdapter, DestinationClient, ExecutionMode, ObjectPage,
};
use pki_sync_engine::error::{DestinationError, SyncError};
use pki_sync_engine::naming::NameConstraints;
use pki_sync_engine::queue::{ConnectionQueue, RateLimitConfig};
use pki_sync_engine::store::{InMemorySyncRecordStore, NewSyncRecord, SyncRecordStore, SyncStatus};
use pki_sync_engine::{DestinationConfig, PkiSyncConfig, SyncOptions};

const TEST_CONSTRAINTS: NameConstraints = NameConstraints {
    max_length: 512,
    allowed_chars: "[A-Za-z0-9/_+=.@-]",
};

/// In-memory destination with scriptable failures and a call log
#[derive(Default)]
struct MockDestination {
    objects: Mutex<BTreeMap<String, Map<String, Value>>>,
    fail_create: Mutex<HashMap<String, DestinationError>>,
    fail_delete: Mutex<HashMap<String, DestinationError>>,
    fail_list: Mutex<Option<DestinationError>>,
    /// Throttle this many list calls before serving pages again
    throttle_lists: Mutex<u32>,
    /// Serve the listing in pages of this size; unpaginated when unset
    list_page_size: Option<usize>,
    calls: Mutex<Vec<String>>,
    concurrent: bool,
}

impl MockDestination {
    fn new() -> Self {
        Self::default()
    }

    fn with_objects(names: &[&str]) -> Self {
        let mock = Self::new();
        {
            let mut objects = mock.objects.lock().unwrap();
            for name in names {
                objects.insert((*name).to_string(), Map::new());
            }
        }
        mock
    }

    fn object_names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn object(&self, name: &str) -> Option<Map<String, Value>> {
        self.objects.lock().unwrap().get(name).cloned()
    }

    fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl DestinationClient for MockDestination {
    fn destination(&self) -> Destination {
        Destination::AwsSecretsManager
    }

    fn default_object_name(&self, _logical_name: &str, certificate_id: &str) -> String {
        format!("infisical-{certificate_id}")
    }

    fn default_prefix(&self) -> &'static str {
        "infisical-"
    }

    fn default_environment(&self) -> &'static str {
        "production"
    }

    fn name_constraints(&self) -> &'static NameConstraints {
        &TEST_CONSTRAINTS
    }

    fn execution_mode(&self) -> ExecutionMode {
        if self.concurrent {
            ExecutionMode::Concurrent
        } else {
            ExecutionMode::Sequential
        }
    }

    async fn list_objects(&self, page_token: Option<&str>) -> Result<ObjectPage, DestinationError> {
        self.calls.lock().unwrap().push("list".to_string());
        {
            let mut throttled = self.throttle_lists.lock().unwrap();
            if *throttled > 0 {
                *throttled -= 1;
                return Err(DestinationError::throttled("listing throttled").with_status(429));
            }
        }
        if let Some(err) = self.fail_list.lock().unwrap().clone() {
            return Err(err);
        }

        let names = self.object_names();
        let Some(page_size) = self.list_page_size else {
            return Ok(ObjectPage {
                names,
                next_token: None,
            });
        };

        let offset: usize = page_token.map(|token| token.parse().unwrap()).unwrap_or(0);
        let next = offset + page_size;
        Ok(ObjectPage {
            names: names.iter().skip(offset).take(page_size).cloned().collect(),
            next_token: (next < names.len()).then(|| next.to_string()),
        })
    }

    async fn create_object(
        &self,
        name: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), DestinationError> {
        self.calls.lock().unwrap().push(format!("create:{name}"));
        if let Some(err) = self.fail_create.lock().unwrap().get(name) {
            return Err(err.clone());
        }
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), payload.clone());
        Ok(())
    }

    async fn update_object(
        &self,
        name: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), DestinationError> {
        self.calls.lock().unwrap().push(format!("update:{name}"));
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), payload.clone());
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<(), DestinationError> {
        self.calls.lock().unwrap().push(format!("delete:{name}"));
        if let Some(err) = self.fail_delete.lock().unwrap().get(name) {
            return Err(err.clone());
        }
        if self.objects.lock().unwrap().remove(name).is_none() {
            return Err(DestinationError::not_found(format!("no such object: {name}")));
        }
        Ok(())
    }
}

fn fast_queue() -> ConnectionQueue {
    ConnectionQueue::new(RateLimitConfig {
        max_concurrent_requests: 4,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_retries: 3,
        rate_limit_status_codes: vec![429, 503],
    })
}

fn sync_config(options: SyncOptions) -> PkiSyncConfig {
    PkiSyncConfig {
        id: "sync-1".to_string(),
        destination: DestinationConfig::AwsSecretsManager {
            connection: AwsConnection {
                region: "us-east-1".to_string(),
                access_key_id: None,
                secret_access_key: None,
            },
            config: Default::default(),
        },
        sync_options: options,
    }
}

fn bundle(certificate_id: &str, cert: &str, key: &str) -> CertificateBundle {
    CertificateBundle {
        cert: cert.to_string(),
        private_key: key.to_string(),
        certificate_chain: None,
        ca_certificate: None,
        certificate_id: certificate_id.to_string(),
        common_name: None,
    }
}

struct Harness {
    adapter: DestinationAdapter,
    mock: Arc<MockDestination>,
    store: Arc<InMemorySyncRecordStore>,
}

fn harness(mock: MockDestination, lookup: Arc<dyn CertificateLookup>) -> Harness {
    let mock = Arc::new(mock);
    let store = Arc::new(InMemorySyncRecordStore::new());
    let adapter = DestinationAdapter::new(
        Arc::clone(&mock) as Arc<dyn DestinationClient>,
        fast_queue(),
        Arc::clone(&store) as Arc<dyn SyncRecordStore>,
        lookup,
    );
    Harness {
        adapter,
        mock,
        store,
    }
}

fn empty_lookup() -> Arc<dyn CertificateLookup> {
    Arc::new(InMemoryCertificateLookup::default())
}

#[tokio::test]
async fn test_fresh_sync_uploads_new_certificate() {
    let h = harness(MockDestination::new(), empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-1", "PEM1", "KEY1"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.uploaded, 1);
    assert_eq!(result.updated, 0);
    assert_eq!(result.removed, 0);
    assert_eq!(result.skipped, 0);
    assert!(result.details.failed_uploads.is_empty());

    let object = h.mock.object("infisical-id-1").expect("secret missing");
    assert_eq!(object.get("certificate"), Some(&Value::String("PEM1".into())));
    assert_eq!(object.get("private_key"), Some(&Value::String("KEY1".into())));

    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].certificate_id, "id-1");
    assert_eq!(records[0].external_identifier, "infisical-id-1");
    assert_eq!(records[0].sync_status, SyncStatus::Succeeded);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = harness(MockDestination::new(), empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-1", "PEM1", "KEY1"));

    h.adapter.sync_certificates(&sync, &map).await.expect("first sync failed");
    let result = h.adapter.sync_certificates(&sync, &map).await.expect("second sync failed");

    // already synced and unchanged: no writes, counted as skipped
    assert_eq!(result.uploaded, 0);
    assert_eq!(result.updated, 0);
    assert_eq!(result.removed, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(h.mock.calls_matching("create:"), 1);
    assert_eq!(h.mock.calls_matching("update:"), 0);
    assert_eq!(h.mock.calls_matching("delete:"), 0);
}

#[tokio::test]
async fn test_validation_errors_skip_without_api_calls() {
    let h = harness(MockDestination::new(), empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("no-cert", bundle("id-1", "   ", "KEY1"));
    map.insert("no-key", bundle("id-2", "PEM2", ""));
    map.insert("ok", bundle("id-3", "PEM3", "KEY3"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.uploaded, 1);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.details.validation_errors.len(), 2);
    assert_eq!(result.details.validation_errors[0].name, "no-cert");
    assert_eq!(result.details.validation_errors[1].name, "no-key");
    // invalid entries never reach the destination
    assert_eq!(h.mock.calls_matching("create:"), 1);
}

#[tokio::test]
async fn test_superseded_certificate_is_skipped() {
    let lookup = Arc::new(InMemoryCertificateLookup::new([Certificate {
        id: "id-old".to_string(),
        renewed_from_certificate_id: None,
        renewed_by_certificate_id: Some("id-new".to_string()),
    }]));
    let h = harness(MockDestination::new(), lookup);
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("stale", bundle("id-old", "PEM", "KEY"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.uploaded, 0);
    assert_eq!(result.skipped, 1);
    assert_eq!(h.mock.calls_matching("create:"), 0);
}

#[tokio::test]
async fn test_renewal_preserves_secret_in_place() {
    let lookup = Arc::new(InMemoryCertificateLookup::new([Certificate {
        id: "id-new".to_string(),
        renewed_from_certificate_id: Some("id-old".to_string()),
        renewed_by_certificate_id: None,
    }]));
    let h = harness(
        MockDestination::with_objects(&["infisical-id-old"]),
        lookup,
    );
    h.store
        .add_certificates(
            "sync-1",
            &[NewSyncRecord {
                certificate_id: "id-old".to_string(),
                external_identifier: "infisical-id-old".to_string(),
            }],
        )
        .await
        .expect("seed failed");

    let sync = sync_config(SyncOptions::default());
    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-new", "PEM-NEW", "KEY-NEW"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    // predecessor's object is overwritten in place
    assert_eq!(result.updated, 1);
    assert_eq!(result.uploaded, 0);
    assert_eq!(result.removed, 0);
    let object = h.mock.object("infisical-id-old").expect("object missing");
    assert_eq!(object.get("certificate"), Some(&Value::String("PEM-NEW".into())));

    // the record is repointed to the new certificate, net one row
    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].certificate_id, "id-new");
    assert_eq!(records[0].external_identifier, "infisical-id-old");
}

#[tokio::test]
async fn test_renewal_without_preserve_creates_new_object() {
    let lookup = Arc::new(InMemoryCertificateLookup::new([Certificate {
        id: "id-new".to_string(),
        renewed_from_certificate_id: Some("id-old".to_string()),
        renewed_by_certificate_id: None,
    }]));
    let h = harness(
        MockDestination::with_objects(&["infisical-id-old"]),
        lookup,
    );
    h.store
        .add_certificates(
            "sync-1",
            &[NewSyncRecord {
                certificate_id: "id-old".to_string(),
                external_identifier: "infisical-id-old".to_string(),
            }],
        )
        .await
        .expect("seed failed");

    let sync = sync_config(SyncOptions {
        preserve_secret_on_renewal: false,
        ..SyncOptions::default()
    });
    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-new", "PEM-NEW", "KEY-NEW"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.uploaded, 1);
    assert_eq!(result.updated, 0);
    // the predecessor's object stays active, never orphan-deleted
    assert_eq!(result.removed, 0);
    assert!(h.mock.object("infisical-id-old").is_some());
    assert!(h.mock.object("infisical-id-new").is_some());

    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_orphan_deletion_scoped_to_managed_namespace() {
    let h = harness(
        MockDestination::with_objects(&["infisical-id-gone", "team-db-password"]),
        empty_lookup(),
    );
    h.store
        .add_certificates(
            "sync-1",
            &[NewSyncRecord {
                certificate_id: "id-gone".to_string(),
                external_identifier: "infisical-id-gone".to_string(),
            }],
        )
        .await
        .expect("seed failed");

    let sync = sync_config(SyncOptions::default());
    let result = h
        .adapter
        .sync_certificates(&sync, &CertificateMap::new())
        .await
        .expect("sync failed");

    assert_eq!(result.removed, 1);
    assert_eq!(result.failed_removals, 0);
    // only the managed name is deleted; foreign objects are untouched
    assert!(h.mock.object("infisical-id-gone").is_none());
    assert!(h.mock.object("team-db-password").is_some());

    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_orphan_deletion_disabled() {
    let h = harness(
        MockDestination::with_objects(&["infisical-id-gone"]),
        empty_lookup(),
    );

    let sync = sync_config(SyncOptions {
        can_remove_certificates: false,
        ..SyncOptions::default()
    });
    let result = h
        .adapter
        .sync_certificates(&sync, &CertificateMap::new())
        .await
        .expect("sync failed");

    assert_eq!(result.removed, 0);
    assert_eq!(h.mock.calls_matching("delete:"), 0);
    assert!(h.mock.object("infisical-id-gone").is_some());
}

#[tokio::test]
async fn test_upload_failure_is_isolated() {
    let mock = MockDestination::new();
    mock.fail_create.lock().unwrap().insert(
        "infisical-id-bad".to_string(),
        DestinationError::api("access denied").with_status(403),
    );
    let h = harness(mock, empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("bad", bundle("id-bad", "PEM1", "KEY1"));
    map.insert("good", bundle("id-good", "PEM2", "KEY2"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.uploaded, 1);
    assert_eq!(result.details.failed_uploads.len(), 1);
    assert_eq!(result.details.failed_uploads[0].name, "bad");
    assert!(h.mock.object("infisical-id-good").is_some());

    // only the successful certificate is tracked
    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].certificate_id, "id-good");
}

#[tokio::test]
async fn test_failed_upload_marks_existing_record_failed() {
    let mock = MockDestination::new();
    mock.fail_create.lock().unwrap().insert(
        "infisical-id-1".to_string(),
        DestinationError::api("boom").with_status(500),
    );
    let h = harness(mock, empty_lookup());
    // record exists but the object was deleted out-of-band
    h.store
        .add_certificates(
            "sync-1",
            &[NewSyncRecord {
                certificate_id: "id-1".to_string(),
                external_identifier: "infisical-id-1".to_string(),
            }],
        )
        .await
        .expect("seed failed");

    let sync = sync_config(SyncOptions::default());
    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-1", "PEM1", "KEY1"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.details.failed_uploads.len(), 1);
    let record = h
        .store
        .find_by_pki_sync_and_certificate("sync-1", "id-1")
        .await
        .expect("find failed")
        .expect("record missing");
    assert_eq!(record.sync_status, SyncStatus::Failed);
    assert!(record.last_sync_message.expect("message missing").contains("boom"));
}

#[tokio::test(start_paused = true)]
async fn test_throttled_upload_retried_to_bound() {
    let mock = MockDestination::new();
    mock.fail_create.lock().unwrap().insert(
        "infisical-id-1".to_string(),
        DestinationError::throttled("ThrottlingException"),
    );
    let h = harness(mock, empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-1", "PEM1", "KEY1"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    // max_retries = 3 means 4 attempts, then the item fails without
    // aborting the run
    assert_eq!(h.mock.calls_matching("create:infisical-id-1"), 4);
    assert_eq!(result.details.failed_uploads.len(), 1);
}

#[tokio::test]
async fn test_enumeration_auth_failure_aborts_run() {
    let mock = MockDestination::new();
    *mock.fail_list.lock().unwrap() =
        Some(DestinationError::auth("expired credentials").with_status(403));
    let h = harness(mock, empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-1", "PEM1", "KEY1"));

    let result = h.adapter.sync_certificates(&sync, &map).await;
    assert!(matches!(result, Err(SyncError::Auth(_))));
    assert_eq!(h.mock.calls_matching("create:"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_enumeration_survives_sustained_throttling() {
    // Six throttled listing calls outlast the queue's retry budget
    // (max_retries = 3, so four attempts per pass) and force the engine's
    // own paused retry before the first page loads
    let mock = MockDestination {
        throttle_lists: Mutex::new(6),
        ..MockDestination::default()
    };
    let h = harness(mock, empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-1", "PEM1", "KEY1"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.uploaded, 1);
    assert!(h.mock.object("infisical-id-1").is_some());
    // four throttled attempts, a pause, two more, then the listing succeeds
    assert_eq!(h.mock.calls_matching("list"), 7);
}

#[tokio::test]
async fn test_paginated_enumeration_collects_every_page() {
    let mock = MockDestination {
        list_page_size: Some(2),
        ..MockDestination::with_objects(&[
            "infisical-id-a",
            "infisical-id-b",
            "infisical-id-c",
            "infisical-id-d",
            "infisical-id-e",
            "team-db-password",
        ])
    };
    let h = harness(mock, empty_lookup());
    for id in ["id-a", "id-b", "id-c", "id-d", "id-e"] {
        h.store
            .add_certificates(
                "sync-1",
                &[NewSyncRecord {
                    certificate_id: id.to_string(),
                    external_identifier: format!("infisical-{id}"),
                }],
            )
            .await
            .expect("seed failed");
    }

    let sync = sync_config(SyncOptions::default());
    let result = h
        .adapter
        .sync_certificates(&sync, &CertificateMap::new())
        .await
        .expect("sync failed");

    // orphans from every page land in the snapshot, not just the first
    assert_eq!(h.mock.calls_matching("list"), 3);
    assert_eq!(result.removed, 5);
    assert_eq!(h.mock.object_names(), vec!["team-db-password".to_string()]);

    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_schema_names_follow_configuration() {
    let h = harness(MockDestination::new(), empty_lookup());
    let sync = sync_config(SyncOptions {
        certificate_name_schema: Some("cert-{{certificateId}}-{{environment}}".to_string()),
        ..SyncOptions::default()
    });

    let mut map = CertificateMap::new();
    map.insert("cert1", bundle("id-1", "PEM1", "KEY1"));

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");

    assert_eq!(result.uploaded, 1);
    assert!(h.mock.object("cert-id-1-production").is_some());
}

#[tokio::test]
async fn test_concurrent_execution_uploads_everything() {
    let mock = MockDestination {
        concurrent: true,
        ..MockDestination::default()
    };
    let h = harness(mock, empty_lookup());
    let sync = sync_config(SyncOptions::default());

    let mut map = CertificateMap::new();
    for i in 0..6 {
        map.insert(format!("cert{i}"), bundle(&format!("id-{i}"), "PEM", "KEY"));
    }

    let result = h.adapter.sync_certificates(&sync, &map).await.expect("sync failed");
    assert_eq!(result.uploaded, 6);
    assert_eq!(h.mock.object_names().len(), 6);
}

#[tokio::test]
async fn test_remove_certificates_by_external_identifier() {
    let h = harness(
        MockDestination::with_objects(&["infisical-id-1"]),
        empty_lookup(),
    );
    h.store
        .add_certificates(
            "sync-1",
            &[
                NewSyncRecord {
                    certificate_id: "id-1".to_string(),
                    external_identifier: "infisical-id-1".to_string(),
                },
                NewSyncRecord {
                    certificate_id: "id-2".to_string(),
                    external_identifier: "infisical-id-2".to_string(),
                },
            ],
        )
        .await
        .expect("seed failed");

    let sync = sync_config(SyncOptions::default());
    let result = h
        .adapter
        .remove_certificates(
            &sync,
            &["infisical-id-1".to_string(), "infisical-id-2".to_string()],
            None,
        )
        .await
        .expect("remove failed");

    // id-2's object was already gone; its deletion still counts as removed
    assert_eq!(result.removed, 2);
    assert_eq!(result.failed, 0);
    assert!(h.mock.object("infisical-id-1").is_none());

    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert!(records.is_empty());
}

#[tokio::test]
async fn test_remove_certificates_resolves_through_certificate_map() {
    let h = harness(
        MockDestination::with_objects(&["cert-id-1-production"]),
        empty_lookup(),
    );
    h.store
        .add_certificates(
            "sync-1",
            &[NewSyncRecord {
                certificate_id: "id-1".to_string(),
                external_identifier: "cert-id-1-production".to_string(),
            }],
        )
        .await
        .expect("seed failed");

    let mut map = CertificateMap::new();
    map.insert("web-cert", bundle("id-1", "PEM", "KEY"));

    let sync = sync_config(SyncOptions::default());
    let result = h
        .adapter
        .remove_certificates(&sync, &["web-cert".to_string()], Some(&map))
        .await
        .expect("remove failed");

    assert_eq!(result.removed, 1);
    assert!(h.mock.object("cert-id-1-production").is_none());
}

#[tokio::test]
async fn test_failed_removal_reported_without_aborting() {
    let mock = MockDestination::with_objects(&["infisical-id-a", "infisical-id-b"]);
    mock.fail_delete.lock().unwrap().insert(
        "infisical-id-a".to_string(),
        DestinationError::api("delete denied").with_status(403),
    );
    let h = harness(mock, empty_lookup());
    h.store
        .add_certificates(
            "sync-1",
            &[
                NewSyncRecord {
                    certificate_id: "id-a".to_string(),
                    external_identifier: "infisical-id-a".to_string(),
                },
                NewSyncRecord {
                    certificate_id: "id-b".to_string(),
                    external_identifier: "infisical-id-b".to_string(),
                },
            ],
        )
        .await
        .expect("seed failed");

    let sync = sync_config(SyncOptions::default());
    let result = h
        .adapter
        .sync_certificates(&sync, &CertificateMap::new())
        .await
        .expect("sync failed");

    assert_eq!(result.removed, 1);
    assert_eq!(result.failed_removals, 1);
    assert_eq!(result.details.failed_removals.len(), 1);
    assert_eq!(result.details.failed_removals[0].name, "infisical-id-a");
    // the failed item's record survives for the next run
    let records = h.store.find_by_pki_sync_id("sync-1").await.expect("find failed");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].certificate_id, "id-a");
}
