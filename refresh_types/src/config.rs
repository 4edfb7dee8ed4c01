//! Static configuration for the partition refresh service.
//!
//! The configuration is read once per cycle from two JSON files in a configuration
//! directory:
//!
//! * `global.json`, holding the account settings shared by every deployed function
//! * `lambda.json`, holding the `athena_partition_refresh_config` section
//!
//! Both are parsed into typed structs; any missing file, malformed JSON or invalid value
//! aborts the cycle with a [`ConfigError`] before any work is attempted.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, de::DeserializeOwned};

use crate::strategy::{RefreshStrategy, StrategyMap};

/// File holding the account-wide settings
pub const GLOBAL_FILE: &str = "global.json";

/// File holding the per-function settings
pub const LAMBDA_FILE: &str = "lambda.json";

const DEFAULT_RESULTS_KEY_PREFIX: &str = "athena_partition_refresh";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file {} does not exist", .path.display())]
    Missing { path: PathBuf },

    #[error("failed to read configuration file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration file {} is not valid: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid {kind} name '{name}': only ASCII letters, digits and '_' are allowed")]
    InvalidIdentifier { kind: &'static str, name: String },

    #[error(
        "bucket '{bucket}' is configured for both repair_hive_table and add_hive_partition"
    )]
    ConflictingStrategy { bucket: String },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Account settings from `global.json`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccountConfig {
    pub aws_account_id: String,
    pub prefix: String,
    pub region: String,
}

/// Fully resolved configuration for one refresh cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    pub account: AccountConfig,
    /// When disabled the service exits without touching the queue
    pub enabled: bool,
    /// Name of the queue receiving storage event notifications
    pub queue_name: String,
    /// Database holding the tables to refresh
    pub database_name: String,
    /// Storage location query results are written under, e.g. `s3://bucket`
    pub results_bucket: String,
    /// Key prefix below `results_bucket`; the current date is appended per query
    pub results_key_prefix: String,
    /// Strategy used to refresh each known bucket
    pub strategies: StrategyMap,
}

#[derive(Debug, Deserialize)]
struct GlobalFile {
    account: AccountConfig,
}

#[derive(Debug, Deserialize)]
struct LambdaFile {
    athena_partition_refresh_config: RawRefreshConfig,
}

#[derive(Debug, Deserialize)]
struct RawRefreshConfig {
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    queue_name: Option<String>,
    database_name: Option<String>,
    results_bucket: Option<String>,
    results_key_prefix: Option<String>,
    #[serde(default)]
    refresh_type: RawRefreshType,
}

#[derive(Debug, Default, Deserialize)]
struct RawRefreshType {
    #[serde(default)]
    repair_hive_table: BTreeMap<String, String>,
    #[serde(default)]
    add_hive_partition: BTreeMap<String, String>,
}

fn enabled_by_default() -> bool {
    true
}

impl RefreshConfig {
    /// Load and validate the configuration stored in `dir`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let global: GlobalFile = read_json(&dir.join(GLOBAL_FILE))?;
        let lambda: LambdaFile = read_json(&dir.join(LAMBDA_FILE))?;
        Self::resolve(global.account, lambda.athena_partition_refresh_config)
    }

    fn resolve(account: AccountConfig, raw: RawRefreshConfig) -> Result<Self> {
        if account.prefix.trim().is_empty() {
            return Err(ConfigError::Empty {
                field: "account.prefix",
            });
        }

        let queue_name = raw
            .queue_name
            .unwrap_or_else(|| format!("{}_athena_data_bucket_notifications", account.prefix));
        let database_name = raw
            .database_name
            .unwrap_or_else(|| format!("{}_athena", sanitize_identifier(&account.prefix)));
        validate_identifier("database", &database_name)?;

        let results_bucket = raw.results_bucket.unwrap_or_else(|| {
            format!(
                "s3://aws-athena-query-results-{}-{}",
                account.aws_account_id, account.region
            )
        });
        let results_key_prefix = raw
            .results_key_prefix
            .unwrap_or_else(|| DEFAULT_RESULTS_KEY_PREFIX.to_string());
        if results_key_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Empty {
                field: "results_key_prefix",
            });
        }

        let mut strategies = StrategyMap::new();
        for (bucket, table) in raw.refresh_type.repair_hive_table {
            validate_identifier("table", &table)?;
            strategies.insert(bucket, RefreshStrategy::RepairTable { table });
        }
        for (bucket, table) in raw.refresh_type.add_hive_partition {
            validate_identifier("table", &table)?;
            if strategies
                .insert(bucket.clone(), RefreshStrategy::AddPartition { table })
                .is_some()
            {
                return Err(ConfigError::ConflictingStrategy { bucket });
            }
        }

        Ok(Self {
            account,
            enabled: raw.enabled,
            queue_name,
            database_name,
            results_bucket: results_bucket.trim_end_matches('/').to_string(),
            results_key_prefix: results_key_prefix.trim_matches('/').to_string(),
            strategies,
        })
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ConfigError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Table and database names are interpolated into query text, so they are restricted to
/// plain identifiers
fn validate_identifier(kind: &'static str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ConfigError::InvalidIdentifier {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
