//! Explicit configuration for connection resolution.
//!
//! # Responsibility
//! - Read the datacenter suffix from the process environment exactly once.
//! - Hand resolution an explicit value so lookup keys are a pure function of
//!   `(pool_name, config)`.
//!
//! # Invariants
//! - An unset `DATACENTRE` yields the suffix `hx`.
//! - Any set value, including the empty string, is used verbatim.

use std::time::Duration;

/// Environment variable holding the datacenter suffix.
pub const DATACENTRE_ENV_VAR: &str = "DATACENTRE";
/// Suffix used when `DATACENTRE` is not set.
pub const DEFAULT_DATACENTER_SUFFIX: &str = "hx";
/// Name of the environment sub-context under the root naming context.
pub const DEFAULT_ENV_CONTEXT: &str = "env";
/// Prefix of every data-source binding inside the environment context.
pub const DATA_SOURCE_KEY_PREFIX: &str = "jdbc/";

const DEFAULT_MAX_CONNECTIONS: usize = 8;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection-provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Appended to the pool name when building the data-source key.
    pub datacenter_suffix: String,
    /// Sub-context looked up from the root naming context.
    pub env_context: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            datacenter_suffix: DEFAULT_DATACENTER_SUFFIX.to_string(),
            env_context: DEFAULT_ENV_CONTEXT.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Builds configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let datacenter_suffix =
            lookup(DATACENTRE_ENV_VAR).unwrap_or_else(|| DEFAULT_DATACENTER_SUFFIX.to_string());
        Self {
            datacenter_suffix,
            ..Self::default()
        }
    }

    pub fn with_datacenter_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.datacenter_suffix = suffix.into();
        self
    }

    pub fn with_env_context(mut self, name: impl Into<String>) -> Self {
        self.env_context = name.into();
        self
    }
}

/// Identifies one named pool within one datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolDescriptor {
    pub pool_name: String,
    pub datacenter_suffix: String,
}

impl PoolDescriptor {
    pub fn new(pool_name: impl Into<String>, config: &ProviderConfig) -> Self {
        Self {
            pool_name: pool_name.into(),
            datacenter_suffix: config.datacenter_suffix.clone(),
        }
    }

    /// Key under which the data source is bound, e.g. `jdbc/qualhx`.
    pub fn lookup_key(&self) -> String {
        format!(
            "{DATA_SOURCE_KEY_PREFIX}{}{}",
            self.pool_name, self.datacenter_suffix
        )
    }
}

/// Sizing and timeouts for the SQLite-backed data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    /// Upper bound on physical connections checked out at once.
    pub max_connections: usize,
    /// SQLite busy timeout applied to every physical connection.
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PoolDescriptor, ProviderConfig, DATACENTRE_ENV_VAR};

    #[test]
    fn unset_datacentre_defaults_to_hx() {
        let config = ProviderConfig::from_lookup(|_| None);
        assert_eq!(config.datacenter_suffix, "hx");
        assert_eq!(config.env_context, "env");
        assert_eq!(PoolDescriptor::new("qual", &config).lookup_key(), "jdbc/qualhx");
    }

    #[test]
    fn set_datacentre_is_used_verbatim() {
        let config = ProviderConfig::from_lookup(|key| {
            (key == DATACENTRE_ENV_VAR).then(|| "prod".to_string())
        });
        assert_eq!(PoolDescriptor::new("qual", &config).lookup_key(), "jdbc/qualprod");

        let empty = ProviderConfig::from_lookup(|_| Some(String::new()));
        assert_eq!(PoolDescriptor::new("qual", &empty).lookup_key(), "jdbc/qual");
    }

    #[test]
    fn builders_override_defaults() {
        let config = ProviderConfig::default()
            .with_datacenter_suffix("pg")
            .with_env_context("comp/env");
        assert_eq!(config.datacenter_suffix, "pg");
        assert_eq!(config.env_context, "comp/env");
    }
}
