//! # AWS Secrets Manager Destination
//!
//! [`DestinationClient`] backed by the AWS Secrets Manager API.
//!
//! Certificates are stored as JSON secrets (one secret per certificate),
//! created with a fixed description and an optional customer KMS key.
//! Deletion always uses `force_delete_without_recovery`; a deleted secret's
//! name must be reusable immediately on the next run.
//!
//! Supports static access keys and the SDK's default credential chain
//! (instance profiles, SSO, env vars).

use anyhow::Result;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_secretsmanager::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::DestinationError;
use crate::naming::NameConstraints;
use crate::observability::metrics;

use super::{Destination, DestinationClient, ExecutionMode, ObjectPage};

/// Prefix marking default-named secrets as managed by this system
pub const DEFAULT_PREFIX: &str = "infisical-";

pub const DEFAULT_ENVIRONMENT: &str = "production";

/// AWS-managed key used when no customer KMS key is configured
const DEFAULT_KMS_KEY_ID: &str = "alias/aws/secretsmanager";

const SECRET_DESCRIPTION: &str = "Certificate managed by Infisical";

const LIST_PAGE_SIZE: i32 = 100;

/// Secret names: 1-512 chars of letters, digits, `/_+=.@-`
pub const NAME_CONSTRAINTS: NameConstraints = NameConstraints {
    max_length: 512,
    allowed_chars: "[A-Za-z0-9/_+=.@-]",
};

/// AWS connection credentials.
///
/// With no static keys the SDK's default credential chain is used.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsConnection {
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

/// Destination-specific configuration for an AWS Secrets Manager sync
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsSecretsManagerConfig {
    /// Customer KMS key for secret encryption; AWS-managed key when unset
    #[serde(default)]
    pub kms_key_id: Option<String>,
}

/// AWS Secrets Manager implementation of [`DestinationClient`]
#[derive(Debug)]
pub struct SdkSecretsManagerClient {
    client: SecretsManagerClient,
    kms_key_id: String,
}

impl SdkSecretsManagerClient {
    pub async fn new(connection: &AwsConnection, config: &AwsSecretsManagerConfig) -> Result<Self> {
        let loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(connection.region.clone()));

        let sdk_config = match (&connection.access_key_id, &connection.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                info!("Using static access keys for AWS authentication");
                loader
                    .credentials_provider(Credentials::from_keys(
                        access_key_id.clone(),
                        secret_access_key.clone(),
                        None,
                    ))
                    .load()
                    .await
            }
            _ => {
                info!("No static access keys configured, using default AWS credential chain");
                loader.load().await
            }
        };

        Ok(Self {
            client: SecretsManagerClient::new(&sdk_config),
            kms_key_id: config
                .kms_key_id
                .clone()
                .unwrap_or_else(|| DEFAULT_KMS_KEY_ID.to_string()),
        })
    }

    fn payload_string(payload: &Map<String, Value>) -> String {
        Value::Object(payload.clone()).to_string()
    }
}

/// Map an SDK failure onto the engine's error taxonomy
fn classify_sdk_error<E>(err: &SdkError<E>) -> DestinationError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let code = err.code().unwrap_or_default().to_string();
    let message = match err.message() {
        Some(message) => format!("{code}: {message}"),
        None => err.to_string(),
    };

    let mut classified = match code.as_str() {
        "ThrottlingException" | "LimitExceededException" | "TooManyRequestsException" => {
            DestinationError::throttled(message)
        }
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "InvalidSignatureException"
        | "ExpiredTokenException" => DestinationError::auth(message),
        "ResourceNotFoundException" => DestinationError::not_found(message),
        _ => DestinationError::api(message),
    };

    if let Some(response) = err.raw_response() {
        classified = classified.with_status(response.status().as_u16());
    }
    classified
}

#[async_trait]
impl DestinationClient for SdkSecretsManagerClient {
    fn destination(&self) -> Destination {
        Destination::AwsSecretsManager
    }

    fn default_object_name(&self, _logical_name: &str, certificate_id: &str) -> String {
        format!("{DEFAULT_PREFIX}{certificate_id}")
    }

    fn default_prefix(&self) -> &'static str {
        DEFAULT_PREFIX
    }

    fn default_environment(&self) -> &'static str {
        DEFAULT_ENVIRONMENT
    }

    fn name_constraints(&self) -> &'static NameConstraints {
        &NAME_CONSTRAINTS
    }

    /// Secrets Manager mutations are issued one at a time; the API throttles
    /// aggressively on concurrent writes to the same account.
    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    async fn list_objects(&self, page_token: Option<&str>) -> Result<ObjectPage, DestinationError> {
        let start = std::time::Instant::now();
        let response = self
            .client
            .list_secrets()
            .max_results(LIST_PAGE_SIZE)
            .set_next_token(page_token.map(str::to_string))
            .send()
            .await
            .map_err(|err| classify_sdk_error(&err))?;
        metrics::record_destination_operation(
            "aws-secrets-manager",
            "list",
            start.elapsed().as_secs_f64(),
        );

        Ok(ObjectPage {
            names: response
                .secret_list()
                .iter()
                .filter_map(|entry| entry.name().map(str::to_string))
                .collect(),
            next_token: response.next_token().map(str::to_string),
        })
    }

    async fn create_object(
        &self,
        name: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), DestinationError> {
        let start = std::time::Instant::now();
        info!("Creating AWS secret: {}", name);
        let result = self
            .client
            .create_secret()
            .name(name)
            .description(SECRET_DESCRIPTION)
            .kms_key_id(&self.kms_key_id)
            .secret_string(Self::payload_string(payload))
            .send()
            .await;

        match result {
            Ok(_) => {
                metrics::record_destination_operation(
                    "aws-secrets-manager",
                    "create",
                    start.elapsed().as_secs_f64(),
                );
                Ok(())
            }
            // Lost the race against an out-of-band creation: fall through to
            // an update of the existing secret.
            Err(err) if err.code() == Some("ResourceExistsException") => {
                debug!("AWS secret {} already exists, updating instead", name);
                self.update_object(name, payload).await
            }
            Err(err) => Err(classify_sdk_error(&err)),
        }
    }

    async fn update_object(
        &self,
        name: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), DestinationError> {
        let start = std::time::Instant::now();
        info!("Updating AWS secret: {}", name);
        self.client
            .put_secret_value()
            .secret_id(name)
            .secret_string(Self::payload_string(payload))
            .send()
            .await
            .map_err(|err| classify_sdk_error(&err))?;
        metrics::record_destination_operation(
            "aws-secrets-manager",
            "update",
            start.elapsed().as_secs_f64(),
        );
        Ok(())
    }

    async fn delete_object(&self, name: &str) -> Result<(), DestinationError> {
        let start = std::time::Instant::now();
        info!("Deleting AWS secret: {}", name);
        self.client
            .delete_secret()
            .secret_id(name)
            .force_delete_without_recovery(true)
            .send()
            .await
            .map_err(|err| classify_sdk_error(&err))?;
        metrics::record_destination_operation(
            "aws-secrets-manager",
            "delete",
            start.elapsed().as_secs_f64(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming;

    #[test]
    fn test_connection_deserializes_without_static_keys() {
        let connection: AwsConnection =
            serde_json::from_str(r#"{"region": "us-east-1"}"#).expect("parse failed");
        assert_eq!(connection.region, "us-east-1");
        assert!(connection.access_key_id.is_none());
    }

    #[test]
    fn test_config_kms_key_defaults_to_none() {
        let config: AwsSecretsManagerConfig = serde_json::from_str("{}").expect("parse failed");
        assert!(config.kms_key_id.is_none());
    }

    #[test]
    fn test_default_secret_name_uses_prefix_and_certificate_id() {
        // the logical name never leaks into the default AWS secret name
        let name = format!("{DEFAULT_PREFIX}{}", "abc-123");
        assert_eq!(name, "infisical-abc-123");
        assert!(naming::is_managed_name(&name, DEFAULT_ENVIRONMENT, None, DEFAULT_PREFIX));
    }

    #[test]
    fn test_name_constraints_match_secrets_manager_limits() {
        assert_eq!(NAME_CONSTRAINTS.max_length, 512);
        assert!(naming::validate_certificate_name_schema(
            "infisical-{{certificateId}}",
            &NAME_CONSTRAINTS
        )
        .is_ok());
        // spaces are not legal in secret names
        assert!(naming::validate_certificate_name_schema(
            "my cert {{certificateId}}",
            &NAME_CONSTRAINTS
        )
        .is_err());
    }

    #[test]
    fn test_payload_string_is_compact_json() {
        let mut payload = Map::new();
        payload.insert("certificate".to_string(), Value::String("PEM".to_string()));
        let text = SdkSecretsManagerClient::payload_string(&payload);
        assert_eq!(text, r#"{"certificate":"PEM"}"#);
    }
}
