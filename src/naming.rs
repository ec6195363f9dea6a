//! # Name Resolution
//!
//! Computes the destination-visible name for a certificate and recognizes
//! whether an existing destination name belongs to the managed namespace.
//!
//! Names come from a user-configurable schema string with `{{placeholder}}`
//! substitution (e.g. `"infisical-{{certificateId}}-{{commonName}}"`), or
//! from a destination-specific default when no schema is configured.
//!
//! Managed-name recognition is a best-effort heuristic: an externally
//! created name that happens to match the schema pattern is
//! indistinguishable from a managed one.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("placeholder regex is valid")
});

/// Upper bound assumed for a single placeholder expansion when validating
/// worst-case schema length (certificate ids are UUIDs; common names are
/// capped well below this by issuance).
const MAX_PLACEHOLDER_EXPANSION: usize = 64;

/// Destination naming constraints, enforced at configuration-save time
#[derive(Debug, Clone, Copy)]
pub struct NameConstraints {
    /// Maximum length of a destination object name
    pub max_length: usize,
    /// Regex character class of allowed characters, e.g. `[A-Za-z0-9_.-]`
    pub allowed_chars: &'static str,
}

/// Schema validation failures, surfaced when a sync configuration is saved
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaValidationError {
    #[error("certificate name schema must contain the {{{{certificateId}}}} placeholder")]
    MissingCertificateId,

    #[error("certificate name schema contains characters not allowed by the destination: {0:?}")]
    ForbiddenCharacters(Vec<char>),

    #[error("certificate name schema can expand to {worst_case} characters, destination allows at most {max_length}")]
    TooLong { worst_case: usize, max_length: usize },
}

/// Compute the destination object name for a certificate.
///
/// With a schema, substitutes `{{certificateId}}`, `{{commonName}}` and
/// `{{environment}}`; any unknown placeholder resolves to the empty string.
/// Without a schema, returns `default_name` unchanged.
///
/// This function never fails: names that violate destination constraints
/// surface later as provider API errors. Constraint checking belongs to
/// [`validate_certificate_name_schema`] at configuration-save time.
pub fn resolve_target_name(
    schema: Option<&str>,
    certificate_id: &str,
    common_name: Option<&str>,
    environment: &str,
    default_name: &str,
) -> String {
    let Some(schema) = schema else {
        return default_name.to_string();
    };

    PLACEHOLDER_RE
        .replace_all(schema, |caps: &regex::Captures<'_>| match &caps[1] {
            "certificateId" => certificate_id.to_string(),
            "commonName" => common_name.unwrap_or("").to_string(),
            "environment" => environment.to_string(),
            _ => String::new(),
        })
        .into_owned()
}

/// Test whether `name` plausibly matches the configured schema pattern.
///
/// Literal schema text must match exactly, `{{environment}}` is substituted
/// with the given environment, `{{certificateId}}` must match at least one
/// character, and every other placeholder matches anything (including the
/// empty string).
pub fn matches_certificate_name_schema(name: &str, environment: &str, schema: &str) -> bool {
    let mut pattern = String::from("^");
    let mut last_end = 0;

    for caps in PLACEHOLDER_RE.captures_iter(schema) {
        let whole = caps.get(0).expect("capture group 0 always present");
        pattern.push_str(&regex::escape(&schema[last_end..whole.start()]));
        match &caps[1] {
            "environment" => pattern.push_str(&regex::escape(environment)),
            "certificateId" => pattern.push_str(".+"),
            _ => pattern.push_str(".*"),
        }
        last_end = whole.end();
    }
    pattern.push_str(&regex::escape(&schema[last_end..]));
    pattern.push('$');

    match Regex::new(&pattern) {
        Ok(re) => re.is_match(name),
        Err(_) => false,
    }
}

/// Whether `name` belongs to the namespace this system believes it owns:
/// the schema pattern when one is configured, otherwise the destination's
/// default prefix.
pub fn is_managed_name(
    name: &str,
    environment: &str,
    schema: Option<&str>,
    default_prefix: &str,
) -> bool {
    match schema {
        Some(schema) => matches_certificate_name_schema(name, environment, schema),
        None => name.starts_with(default_prefix),
    }
}

/// Validate a name schema against a destination's naming constraints.
///
/// Rejects schemas lacking `{{certificateId}}` (the global uniqueness
/// guarantee), schemas whose literal text contains characters the
/// destination forbids, and schemas whose worst-case expansion exceeds the
/// destination's length limit.
pub fn validate_certificate_name_schema(
    schema: &str,
    constraints: &NameConstraints,
) -> Result<(), SchemaValidationError> {
    if !schema.contains("{{certificateId}}") {
        return Err(SchemaValidationError::MissingCertificateId);
    }

    let literal = PLACEHOLDER_RE.replace_all(schema, "");
    let allowed = Regex::new(constraints.allowed_chars)
        .unwrap_or_else(|_| Regex::new("[^\\s\\S]").expect("never-matching regex is valid"));
    let forbidden: Vec<char> = literal
        .chars()
        .filter(|c| !allowed.is_match(&c.to_string()))
        .collect();
    if !forbidden.is_empty() {
        return Err(SchemaValidationError::ForbiddenCharacters(forbidden));
    }

    let placeholder_count = PLACEHOLDER_RE.find_iter(schema).count();
    let worst_case = literal.chars().count() + placeholder_count * MAX_PLACEHOLDER_EXPANSION;
    if worst_case > constraints.max_length {
        return Err(SchemaValidationError::TooLong {
            worst_case,
            max_length: constraints.max_length,
        });
    }

    Ok(())
}
