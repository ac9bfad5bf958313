//! Server configuration

use serde::{Deserialize, Serialize};
use shotcheck_compare::CompareConfig;
use shotcheck_engine::{EngineConfig, DEFAULT_TOPIC};
use std::net::SocketAddr;
use std::path::Path;

/// Report server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address
    pub listen: String,

    /// Channel topic screenshot producers join
    pub topic: String,

    /// Queue depth between sockets and the session
    pub transport_capacity: usize,

    /// Engine settings: image layout, groups, errored policy
    pub engine: EngineConfig,

    /// Pixel comparison settings
    pub compare: CompareConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:4000".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            transport_capacity: 256,
            engine: EngineConfig::default(),
            compare: CompareConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.engine.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listen.parse()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shotcheck_engine::{ErroredPolicy, ResultGroupSpec};

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.topic, "screenshots:test");
        assert_eq!(config.listen_addr().unwrap().port(), 4000);
        assert_eq!(config.compare.tolerance, 0);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ServerConfig = toml::from_str(
            r#"
            listen = "0.0.0.0:9000"

            [engine]
            errored_policy = "fail"

            [engine.images]
            reference_dir = "shots/ref"

            [[engine.groups]]
            id = "home"
            breakpoints = ["hero", "footer"]

            [compare]
            tolerance = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.topic, "screenshots:test");
        assert_eq!(config.engine.errored_policy, ErroredPolicy::Fail);
        assert_eq!(config.engine.images.reference_dir, Path::new("shots/ref"));
        assert_eq!(config.engine.images.test_dir, Path::new("test"));
        assert_eq!(
            config.engine.groups,
            vec![ResultGroupSpec {
                id: "home".to_string(),
                breakpoints: vec!["hero".to_string(), "footer".to_string()],
            }]
        );
        assert_eq!(config.compare.tolerance, 4);
        assert!(config.compare.hash_shortcut);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("shotcheck.toml");
        let mut config = ServerConfig::default();
        config.topic = "screenshots:nightly".to_string();
        config.save(&path).unwrap();

        let loaded = ServerConfig::load(&path).unwrap();
        assert_eq!(loaded.topic, "screenshots:nightly");
    }

    #[test]
    fn test_invalid_groups_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shotcheck.toml");
        std::fs::write(
            &path,
            r#"
            [[engine.groups]]
            id = "home"
            breakpoints = ["hero"]

            [[engine.groups]]
            id = "about"
            breakpoints = ["hero"]
            "#,
        )
        .unwrap();
        assert!(ServerConfig::load(&path).is_err());
    }
}
