//! # Certificates
//!
//! Certificate inputs to a sync run and read-only access to certificate
//! metadata.
//!
//! [`CertificateBundle`] carries the PEM material pushed to a destination;
//! bundles are provided per run and never persisted here. [`Certificate`]
//! exposes the renewal chain (`renewed_from` / `renewed_by`) the
//! reconciliation engine needs to detect superseded certificates, looked up
//! through the [`CertificateLookup`] trait (backed by the certificate
//! issuance subsystem in production, by [`InMemoryCertificateLookup`] in
//! tests and the CLI).

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use zeroize::Zeroize;

/// Certificate material to publish to a destination
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateBundle {
    /// Leaf certificate, PEM
    pub cert: String,
    /// Private key, PEM
    pub private_key: String,
    #[serde(default)]
    pub certificate_chain: Option<String>,
    #[serde(default)]
    pub ca_certificate: Option<String>,
    pub certificate_id: String,
    #[serde(default)]
    pub common_name: Option<String>,
}

impl Drop for CertificateBundle {
    fn drop(&mut self) {
        self.private_key.zeroize();
    }
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate_id", &self.certificate_id)
            .field("common_name", &self.common_name)
            .field("private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

/// Desired state of one sync run: logical name to certificate bundle.
///
/// Iteration follows insertion order; the reconciliation engine plans in
/// this order, which is the tie-break when two logical names resolve to the
/// same target identifier.
#[derive(Debug, Clone, Default)]
pub struct CertificateMap {
    entries: Vec<(String, CertificateBundle)>,
}

impl CertificateMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a bundle under a logical name. Replaces in place (keeping the
    /// original position) if the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, bundle: CertificateBundle) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = bundle;
        } else {
            self.entries.push((name, bundle));
        }
    }

    pub fn get(&self, name: &str) -> Option<&CertificateBundle> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bundle)| bundle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CertificateBundle)> {
        self.entries.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, CertificateBundle)> for CertificateMap {
    fn from_iter<I: IntoIterator<Item = (String, CertificateBundle)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, bundle) in iter {
            map.insert(name, bundle);
        }
        map
    }
}

/// Certificate metadata, read-only to the sync engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: String,
    /// The certificate this one renewed, if any
    #[serde(default)]
    pub renewed_from_certificate_id: Option<String>,
    /// The certificate that superseded this one. When set, this certificate
    /// is stale and must be skipped by reconciliation.
    #[serde(default)]
    pub renewed_by_certificate_id: Option<String>,
}

/// Read-only access to certificate metadata
#[async_trait]
pub trait CertificateLookup: Send + Sync {
    async fn find_by_id(&self, certificate_id: &str) -> Result<Option<Certificate>>;
}

/// Map-backed lookup for tests and the one-shot CLI
#[derive(Debug, Default)]
pub struct InMemoryCertificateLookup {
    certificates: HashMap<String, Certificate>,
}

impl InMemoryCertificateLookup {
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        Self {
            certificates: certificates
                .into_iter()
                .map(|cert| (cert.id.clone(), cert))
                .collect(),
        }
    }
}

#[async_trait]
impl CertificateLookup for InMemoryCertificateLookup {
    async fn find_by_id(&self, certificate_id: &str) -> Result<Option<Certificate>> {
        Ok(self.certificates.get(certificate_id).cloned())
    }
}
