//! Tunables for the session layer.

use std::collections::BTreeMap;
use std::time::Duration;

/// Timeouts, cache and cleanup policy for a [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub auto_cleanup: bool,
    /// READY sessions idle longer than this are reclaimed.
    pub idle_timeout: Duration,
    /// FAILED sessions are reclaimed after this grace period.
    pub failed_grace: Duration,
    pub cleanup_interval: Duration,
    pub handshake_timeout: Duration,
    /// Bound for discovery requests (`tools/list`).
    pub request_timeout: Duration,
    /// Bound for `tools/call`.
    pub call_timeout: Duration,
    /// How long a child gets to exit after stdin closes before it is killed.
    pub shutdown_grace: Duration,
    pub launch: LaunchDefaults,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            auto_cleanup: true,
            idle_timeout: Duration::from_secs(600),
            failed_grace: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            launch: LaunchDefaults::default(),
        }
    }
}

/// Environment injected into every child between the inherited environment
/// and the per-server `env` map.
#[derive(Debug, Clone, Default)]
pub struct LaunchDefaults {
    pub env: BTreeMap<String, String>,
}

impl LaunchDefaults {
    /// Defaults for Node-based servers: an npm cache dir and optional `NODE_PATH`.
    pub fn node(npm_config_cache: Option<String>, node_path: Option<String>) -> Self {
        let mut env = BTreeMap::new();
        if let Some(cache) = npm_config_cache {
            env.insert("NPM_CONFIG_CACHE".to_string(), cache);
        }
        if let Some(path) = node_path {
            env.insert("NODE_PATH".to_string(), path);
        }
        Self { env }
    }
}
