//! Operator configuration
//!
//! Settings are read once at startup from environment variables, falling back
//! to the defaults in [`crate::constants`].

use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::reconcilers::RetryPolicy;
use crate::store::ObjectKey;

/// Process-wide operator settings
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Port of the metrics and probe server
    pub metrics_port: u16,
    /// Deadline applied to each reconciliation pass
    pub reconcile_timeout: Duration,
    /// Where the cluster pull secret lives
    pub pull_secret: PullSecretConfig,
    /// Backoff used when a write hits a conflict
    pub conflict_retry: RetryPolicy,
}

/// Location of the cluster pull secret and the token inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullSecretConfig {
    pub namespace: String,
    pub name: String,
    pub key: String,
    pub auth_registry: String,
}

impl PullSecretConfig {
    pub fn object_key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }
}

impl Default for PullSecretConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_PULL_SECRET_NAMESPACE.to_string(),
            name: DEFAULT_PULL_SECRET_NAME.to_string(),
            key: DEFAULT_PULL_SECRET_KEY.to_string(),
            auth_registry: DEFAULT_PULL_SECRET_AUTH_REGISTRY.to_string(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
            pull_secret: PullSecretConfig::default(),
            conflict_retry: RetryPolicy::default(),
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let metrics_port = parse_or(&lookup, "METRICS_PORT", defaults.metrics_port)?;
        let timeout_secs = parse_or(
            &lookup,
            "RECONCILE_TIMEOUT_SECS",
            defaults.reconcile_timeout.as_secs(),
        )?;
        if timeout_secs == 0 {
            return Err(Error::config("RECONCILE_TIMEOUT_SECS must be greater than 0"));
        }

        let attempts = parse_or(
            &lookup,
            "CONFLICT_RETRY_ATTEMPTS",
            defaults.conflict_retry.attempts,
        )?;
        if attempts == 0 {
            return Err(Error::config("CONFLICT_RETRY_ATTEMPTS must be at least 1"));
        }

        let pull_secret = PullSecretConfig {
            namespace: lookup("PULL_SECRET_NAMESPACE").unwrap_or(defaults.pull_secret.namespace),
            name: lookup("PULL_SECRET_NAME").unwrap_or(defaults.pull_secret.name),
            key: lookup("PULL_SECRET_KEY").unwrap_or(defaults.pull_secret.key),
            auth_registry: lookup("PULL_SECRET_AUTH_REGISTRY")
                .unwrap_or(defaults.pull_secret.auth_registry),
        };

        Ok(Self {
            metrics_port,
            reconcile_timeout: Duration::from_secs(timeout_secs),
            pull_secret,
            conflict_retry: RetryPolicy {
                attempts,
                ..defaults.conflict_retry
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::config(format!("Invalid value '{}' for {}: {}", raw, key, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = OperatorConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(60));
        assert_eq!(config.pull_secret, PullSecretConfig::default());
        assert_eq!(config.conflict_retry.attempts, DEFAULT_CONFLICT_RETRY_ATTEMPTS);
    }

    #[test]
    fn overrides_are_applied() {
        let config = OperatorConfig::from_lookup(lookup_from(&[
            ("METRICS_PORT", "9090"),
            ("RECONCILE_TIMEOUT_SECS", "15"),
            ("PULL_SECRET_NAMESPACE", "kube-system"),
            ("CONFLICT_RETRY_ATTEMPTS", "7"),
        ]))
        .unwrap();
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.reconcile_timeout, Duration::from_secs(15));
        assert_eq!(config.pull_secret.namespace, "kube-system");
        assert_eq!(config.pull_secret.name, DEFAULT_PULL_SECRET_NAME);
        assert_eq!(config.conflict_retry.attempts, 7);
    }

    #[test]
    fn unparseable_port_is_a_config_error() {
        let err = OperatorConfig::from_lookup(lookup_from(&[("METRICS_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("METRICS_PORT"));
    }

    #[test]
    fn zero_retry_attempts_rejected() {
        let err = OperatorConfig::from_lookup(lookup_from(&[("CONFLICT_RETRY_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("CONFLICT_RETRY_ATTEMPTS"));
    }
}
