//! Launch configuration for MCP servers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a launch target.
///
/// `env` is a `BTreeMap` so the canonical serialization used for the
/// fingerprint has a stable key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Logical server name (e.g., "filesystem").
    pub name: String,
    /// Command to run (e.g., "npx", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables layered over the inherited environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Canonical serialization: name, command, args, then env sorted by key.
    pub fn canonical(&self) -> String {
        // Serializing a struct of strings and a BTreeMap cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Configuration fingerprint used for caching and mismatch detection.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

/// SHA-256 digest of a config's canonical serialization, hex encoded.
///
/// Hashing keeps env values (often credentials) out of logs and status output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(config: &ServerConfig) -> Self {
        Self(hex::encode(Sha256::digest(config.canonical().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filesystem() -> ServerConfig {
        ServerConfig::new("filesystem", "npx")
            .with_args(["-y", "@modelcontextprotocol/server-filesystem", "/tmp"])
    }

    #[test]
    fn parse_api_payload() {
        let json = r#"{
            "name": "github",
            "command": "npx",
            "args": ["-y", "@modelcontextprotocol/server-github"],
            "env": {"GITHUB_TOKEN": "ghp_xxxx"}
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.command, "npx");
        assert_eq!(config.args.len(), 2);
        assert_eq!(config.env["GITHUB_TOKEN"], "ghp_xxxx");
    }

    #[test]
    fn args_and_env_default_to_empty() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"name": "local", "command": "./server"}"#).unwrap();
        assert!(config.args.is_empty());
        assert!(config.env.is_empty());
    }

    #[test]
    fn env_insertion_order_does_not_change_fingerprint() {
        let a = filesystem().with_env("A", "1").with_env("B", "2");
        let b = filesystem().with_env("B", "2").with_env("A", "1");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn every_field_contributes_to_fingerprint() {
        let base = filesystem();
        let renamed = ServerConfig {
            name: "fs".into(),
            ..base.clone()
        };
        let other_command = ServerConfig {
            command: "node".into(),
            ..base.clone()
        };
        let reordered_args = ServerConfig {
            args: base.args.iter().rev().cloned().collect(),
            ..base.clone()
        };
        let with_env = base.clone().with_env("DEBUG", "1");

        for other in [renamed, other_command, reordered_args, with_env] {
            assert_ne!(base.fingerprint(), other.fingerprint());
        }
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = filesystem().fingerprint();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 12);
    }

    #[test]
    fn fingerprint_matches_known_digest() {
        let config = ServerConfig::new("a", "b");
        assert_eq!(config.canonical(), r#"{"name":"a","command":"b","args":[],"env":{}}"#);
        assert_eq!(
            config.fingerprint().as_str(),
            hex::encode(Sha256::digest(config.canonical().as_bytes()))
        );
        assert!(
            config
                .fingerprint()
                .as_str()
                .chars()
                .all(|c| !c.is_ascii_uppercase())
        );
    }

    #[test]
    fn canonical_form_sorts_env() {
        let config = ServerConfig::new("x", "y").with_env("Z", "1").with_env("A", "2");
        let canonical = config.canonical();
        assert!(canonical.find("\"A\"").unwrap() < canonical.find("\"Z\"").unwrap());
    }
}
