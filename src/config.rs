//! Operator configuration from the environment.

use std::time::Duration;

use tracing::warn;

const DEFAULT_HEALTH_PORT: u16 = 8080;
const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;

/// Runtime settings for the operator process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch. `None` watches cluster-wide.
    pub watch_namespace: Option<String>,
    /// Leader election holder identity
    pub pod_name: String,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    pub health_port: u16,
    /// Deadline for one reconcile tick
    pub reconcile_timeout: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            pod_name: "unknown".to_string(),
            pod_namespace: "default".to_string(),
            health_port: DEFAULT_HEALTH_PORT,
            reconcile_timeout: Duration::from_secs(DEFAULT_RECONCILE_TIMEOUT_SECS),
        }
    }
}

impl OperatorConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let pod_name = non_empty("POD_NAME").unwrap_or_else(|| {
            warn!("POD_NAME not set, using hostname");
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| defaults.pod_name.clone())
        });
        let pod_namespace = non_empty("POD_NAMESPACE").unwrap_or_else(|| {
            warn!("POD_NAMESPACE not set, using 'default'");
            defaults.pod_namespace.clone()
        });

        Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            pod_name,
            pod_namespace,
            health_port: parse_or("HEALTH_PORT", non_empty("HEALTH_PORT"), DEFAULT_HEALTH_PORT),
            reconcile_timeout: Duration::from_secs(parse_or(
                "RECONCILE_TIMEOUT_SECS",
                non_empty("RECONCILE_TIMEOUT_SECS"),
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            )),
        }
    }
}

fn parse_or<T>(key: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}
