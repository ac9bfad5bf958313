//! Engine configuration

use crate::types::{ErroredPolicy, ImageRef, ResultGroupSpec, Role};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where reference and test screenshots live
    pub images: ImageLayout,

    /// How Errored breakpoints count toward their group
    pub errored_policy: ErroredPolicy,

    /// Result groups and their breakpoints, in display order
    pub groups: Vec<ResultGroupSpec>,

    /// Capacity of the state-change broadcast channel
    pub notify_capacity: usize,

    /// Capacity of the session command queue
    pub command_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            images: ImageLayout::default(),
            errored_policy: ErroredPolicy::default(),
            groups: Vec::new(),
            notify_capacity: 256,
            command_capacity: 64,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// A breakpoint may belong to at most one group, and group ids are unique
    pub fn validate(&self) -> Result<()> {
        if self.notify_capacity == 0 || self.command_capacity == 0 {
            return Err(Error::InvalidConfig(
                "channel capacities must be non-zero".to_string(),
            ));
        }

        let mut group_ids = HashSet::new();
        let mut seen = HashSet::new();
        for group in &self.groups {
            if !group_ids.insert(group.id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate result group '{}'",
                    group.id
                )));
            }
            for name in &group.breakpoints {
                if !seen.insert(name.as_str()) {
                    return Err(Error::InvalidConfig(format!(
                        "breakpoint '{}' is listed in more than one group",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn with_groups(mut self, groups: Vec<ResultGroupSpec>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_errored_policy(mut self, policy: ErroredPolicy) -> Self {
        self.errored_policy = policy;
        self
    }
}

/// Directory layout of the screenshots: `<dir>/<name>.<extension>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLayout {
    pub reference_dir: PathBuf,
    pub test_dir: PathBuf,
    pub extension: String,
}

impl Default for ImageLayout {
    fn default() -> Self {
        Self {
            reference_dir: PathBuf::from("ref"),
            test_dir: PathBuf::from("test"),
            extension: "png".to_string(),
        }
    }
}

impl ImageLayout {
    pub fn dir(&self, role: Role) -> &Path {
        match role {
            Role::Reference => &self.reference_dir,
            Role::Test => &self.test_dir,
        }
    }

    /// Resolve the image for `name` in `role`
    pub fn resolve(&self, name: &str, role: Role) -> ImageRef {
        ImageRef {
            role,
            name: name.to_string(),
            path: self.dir(role).join(format!("{}.{}", name, self.extension)),
        }
    }
}
