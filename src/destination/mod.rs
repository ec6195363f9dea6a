//! # Destination Adapters
//!
//! Per-destination reconciliation of locally-managed certificates against
//! objects in an external system.
//!
//! Each destination implements the [`DestinationClient`] capability trait
//! (paginated list, create, update, delete, plus naming defaults); the
//! shared [`DestinationAdapter`](engine::DestinationAdapter) drives the
//! reconciliation state machine over any client. Destinations are a closed
//! [`Destination`] enum dispatched with exhaustive matches - no string-keyed
//! lookup, no runtime config casts.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::certificate::CertificateBundle;
use crate::error::DestinationError;
use crate::naming::NameConstraints;
use crate::FieldMappings;

pub mod aws_secrets_manager;
pub mod chef;
mod engine;

pub use engine::DestinationAdapter;

/// Supported sync destinations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Destination {
    AwsSecretsManager,
    Chef,
}

impl Destination {
    pub fn as_str(self) -> &'static str {
        match self {
            Destination::AwsSecretsManager => "aws-secrets-manager",
            Destination::Chef => "chef",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One page of a destination listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub names: Vec<String>,
    pub next_token: Option<String>,
}

/// How planned uploads and orphan deletions are issued.
///
/// Either mode respects the connection queue's concurrency cap and per-item
/// failure isolation; this only controls whether items are dispatched one
/// at a time or fanned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Concurrent,
}

/// Destination API surface the reconciliation engine needs.
///
/// Implementations perform single remote calls and classify failures into
/// [`DestinationError`]; retry and concurrency policy live in the
/// connection queue, never here.
#[async_trait]
pub trait DestinationClient: Send + Sync {
    fn destination(&self) -> Destination;

    /// External name used when no name schema is configured
    fn default_object_name(&self, logical_name: &str, certificate_id: &str) -> String;

    /// Prefix that marks a default-named object as managed by this system
    fn default_prefix(&self) -> &'static str;

    /// Environment substituted into `{{environment}}` when matching names
    fn default_environment(&self) -> &'static str;

    fn name_constraints(&self) -> &'static NameConstraints;

    fn execution_mode(&self) -> ExecutionMode;

    async fn list_objects(&self, page_token: Option<&str>) -> Result<ObjectPage, DestinationError>;

    async fn create_object(
        &self,
        name: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), DestinationError>;

    async fn update_object(
        &self,
        name: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), DestinationError>;

    async fn delete_object(&self, name: &str) -> Result<(), DestinationError>;
}

/// A single failed item in a run result
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ItemError {
    pub name: String,
    pub error: String,
}

/// Itemized failure lists accompanying the run counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncDetails {
    pub failed_uploads: Vec<ItemError>,
    pub failed_removals: Vec<ItemError>,
    pub validation_errors: Vec<ItemError>,
}

/// Result of one reconciliation run.
///
/// Counts are derived from the outcomes of this run's operations, never
/// re-queried from the destination. A partially failed run still reports
/// granular counts plus itemized errors.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncCertificatesResult {
    pub uploaded: u32,
    pub updated: u32,
    pub removed: u32,
    pub failed_removals: u32,
    pub skipped: u32,
    pub details: SyncDetails,
}

/// Result of an explicit certificate teardown
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveCertificatesResult {
    pub removed: u32,
    pub failed: u32,
}

/// Build the destination-native payload for a certificate bundle by mapping
/// its fields through the configured field mappings. Optional fields are
/// omitted when empty or whitespace-only.
pub fn build_certificate_payload(
    bundle: &CertificateBundle,
    mappings: &FieldMappings,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        mappings.certificate.clone(),
        Value::String(bundle.cert.clone()),
    );
    payload.insert(
        mappings.private_key.clone(),
        Value::String(bundle.private_key.clone()),
    );

    if let Some(chain) = &bundle.certificate_chain {
        if !chain.trim().is_empty() {
            payload.insert(
                mappings.certificate_chain.clone(),
                Value::String(chain.clone()),
            );
        }
    }
    if let Some(ca) = &bundle.ca_certificate {
        if !ca.trim().is_empty() {
            payload.insert(mappings.ca_certificate.clone(), Value::String(ca.clone()));
        }
    }

    payload
}
