//! # CLI
//!
//! One-shot command-line interface for the sync engine.
//!
//! ## Usage
//!
//! ```bash
//! # Reconcile a destination against a set of certificates
//! pki-sync-engine sync --config sync.json --certificates certs.json
//!
//! # Same, with certificate renewal metadata for renewal-chain handling
//! pki-sync-engine sync --config sync.json --certificates certs.json --metadata meta.json
//!
//! # Tear down specific certificates from the destination
//! pki-sync-engine remove --config sync.json --names web-cert,db-cert
//!
//! # Validate a name schema against a destination's naming rules
//! pki-sync-engine validate-schema --destination chef --schema 'cert-{{certificateId}}'
//! ```
//!
//! Sync records are held in memory for the duration of a run; embedding the
//! library is the way to get durable record tracking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

use crate::certificate::{Certificate, CertificateBundle, CertificateMap, InMemoryCertificateLookup};
use crate::destination::{aws_secrets_manager, chef};
use crate::naming;
use crate::server::RunTracker;
use crate::store::InMemorySyncRecordStore;
use crate::{build_adapter, PkiSyncConfig};

/// PKI destination sync engine
#[derive(Parser)]
#[command(name = "pki-sync-engine")]
#[command(about = "Reconciles issued certificates against external secret stores", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile a destination against the desired certificate set
    Sync {
        /// Sync configuration file (JSON)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Certificates to sync (JSON array of named bundles)
        #[arg(long, value_name = "FILE")]
        certificates: PathBuf,

        /// Certificate renewal metadata (JSON array); without it every
        /// certificate is treated as non-renewed
        #[arg(long, value_name = "FILE")]
        metadata: Option<PathBuf>,
    },
    /// Remove certificates from the destination and drop their records
    Remove {
        /// Sync configuration file (JSON)
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        /// Comma-separated certificate names to remove
        #[arg(long, value_delimiter = ',', value_name = "NAMES")]
        names: Vec<String>,

        /// Optional certificate bundles used to resolve names to
        /// certificate ids
        #[arg(long, value_name = "FILE")]
        certificates: Option<PathBuf>,
    },
    /// Validate a certificate name schema against a destination's rules
    ValidateSchema {
        #[arg(long, value_enum)]
        destination: DestinationArg,

        /// Schema string, e.g. 'infisical-{{certificateId}}'
        #[arg(long)]
        schema: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DestinationArg {
    #[value(name = "aws-secrets-manager")]
    AwsSecretsManager,
    #[value(name = "chef")]
    Chef,
}

/// One named certificate bundle in the `--certificates` input file
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CertificateEntry {
    name: String,
    #[serde(flatten)]
    bundle: CertificateBundle,
}

pub async fn run(cli: Cli, tracker: Arc<RunTracker>) -> Result<()> {
    match cli.command {
        Commands::Sync {
            config,
            certificates,
            metadata,
        } => sync_command(&config, &certificates, metadata.as_deref(), &tracker).await,
        Commands::Remove {
            config,
            names,
            certificates,
        } => remove_command(&config, &names, certificates.as_deref()).await,
        Commands::ValidateSchema {
            destination,
            schema,
        } => validate_schema_command(destination, &schema),
    }
}

async fn sync_command(
    config_path: &Path,
    certificates_path: &Path,
    metadata_path: Option<&Path>,
    tracker: &RunTracker,
) -> Result<()> {
    let sync = load_sync_config(config_path)?;
    let certificate_map = load_certificate_map(certificates_path)?;
    let lookup = load_certificate_metadata(metadata_path)?;

    let store = Arc::new(InMemorySyncRecordStore::new());
    let adapter = build_adapter(&sync, store, lookup).await?;

    tracker.run_started();
    let run = adapter.sync_certificates(&sync, &certificate_map).await;
    tracker.run_finished(&sync.id, &run);

    let result = run?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if !result.details.failed_uploads.is_empty() || result.failed_removals > 0 {
        anyhow::bail!(
            "{} certificate(s) failed to sync",
            result.details.failed_uploads.len() + result.details.failed_removals.len()
        );
    }
    Ok(())
}

async fn remove_command(
    config_path: &Path,
    names: &[String],
    certificates_path: Option<&Path>,
) -> Result<()> {
    let sync = load_sync_config(config_path)?;
    let certificate_map = certificates_path.map(load_certificate_map).transpose()?;

    let store = Arc::new(InMemorySyncRecordStore::new());
    let lookup = Arc::new(InMemoryCertificateLookup::default());
    let adapter = build_adapter(&sync, store, lookup).await?;

    let result = adapter
        .remove_certificates(&sync, names, certificate_map.as_ref())
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.failed > 0 {
        anyhow::bail!("{} certificate(s) failed to remove", result.failed);
    }
    Ok(())
}

fn validate_schema_command(destination: DestinationArg, schema: &str) -> Result<()> {
    let constraints = match destination {
        DestinationArg::AwsSecretsManager => &aws_secrets_manager::NAME_CONSTRAINTS,
        DestinationArg::Chef => &chef::NAME_CONSTRAINTS,
    };

    naming::validate_certificate_name_schema(schema, constraints)
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    println!("Schema is valid");
    Ok(())
}

fn load_sync_config(path: &Path) -> Result<PkiSyncConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sync config {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid sync config {}", path.display()))
}

fn load_certificate_map(path: &Path) -> Result<CertificateMap> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read certificates {}", path.display()))?;
    // An array keeps the caller's ordering, which drives plan order
    let entries: Vec<CertificateEntry> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid certificates file {}", path.display()))?;
    Ok(entries
        .into_iter()
        .map(|entry| (entry.name, entry.bundle))
        .collect())
}

fn load_certificate_metadata(path: Option<&Path>) -> Result<Arc<InMemoryCertificateLookup>> {
    let Some(path) = path else {
        return Ok(Arc::new(InMemoryCertificateLookup::default()));
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read certificate metadata {}", path.display()))?;
    let certificates: Vec<Certificate> = serde_json::from_str(&text)
        .with_context(|| format!("Invalid certificate metadata {}", path.display()))?;
    Ok(Arc::new(InMemoryCertificateLookup::new(certificates)))
}
