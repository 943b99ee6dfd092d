use std::time::Duration;

use anyhow::Context;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Runtime settings read from the environment.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub store_timeout: Duration,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

impl PortalConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            ..Self::default()
        };

        if let Some(raw) = lookup("PORTAL_MAX_CONNECTIONS") {
            config.max_connections = raw.trim().parse().with_context(|| {
                format!("PORTAL_MAX_CONNECTIONS must be a positive integer, got {raw:?}")
            })?;
            anyhow::ensure!(
                config.max_connections > 0,
                "PORTAL_MAX_CONNECTIONS must be at least 1"
            );
        }

        if let Some(raw) = lookup("PORTAL_STORE_TIMEOUT_MS") {
            let millis: u64 = raw.trim().parse().with_context(|| {
                format!("PORTAL_STORE_TIMEOUT_MS must be milliseconds, got {raw:?}")
            })?;
            anyhow::ensure!(millis > 0, "PORTAL_STORE_TIMEOUT_MS must be at least 1");
            config.store_timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = PortalConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.store_timeout, DEFAULT_STORE_TIMEOUT);
        assert!(config.require_database_url().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = PortalConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/portal"),
            ("PORTAL_MAX_CONNECTIONS", "12"),
            ("PORTAL_STORE_TIMEOUT_MS", "250"),
        ]))
        .expect("config");
        assert_eq!(config.require_database_url().expect("url"), "postgres://localhost/portal");
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.store_timeout, Duration::from_millis(250));
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(PortalConfig::from_lookup(lookup(&[("PORTAL_STORE_TIMEOUT_MS", "soon")])).is_err());
        assert!(PortalConfig::from_lookup(lookup(&[("PORTAL_MAX_CONNECTIONS", "0")])).is_err());
    }
}
