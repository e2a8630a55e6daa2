//! Capability packages: deployment profile → enabled tool set.
//!
//! A package file is a YAML mapping of profile names to tool name lists:
//!
//! ```yaml
//! service_desk:
//!   - get_incident_by_number
//! full:
//!   - get_incident_by_number
//!   - create_category
//! none: []
//! ```
//!
//! A profile resolves to a [`RegistryView`] that only exposes the tools the
//! profile enables. The profile named `full` must be a superset of every
//! other profile; `none` always resolves to an empty view.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::envelope::ToolEnvelope;
use super::registry::{ToolDescription, ToolDescriptor, ToolRegistry};
use crate::backend::BackendClient;
use crate::types::{Error, Result};

/// Profile that must contain every tool enabled anywhere else.
pub const SUPERSET_PROFILE: &str = "full";

/// Reserved profile that enables nothing.
pub const EMPTY_PROFILE: &str = "none";

const BUILTIN_PACKAGES: &str = include_str!("../../config/tool_packages.yaml");

/// Profile name → set of enabled tool names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPackages {
    profiles: BTreeMap<String, BTreeSet<String>>,
}

impl ToolPackages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare (or extend) a profile.
    pub fn insert<I, S>(&mut self, profile: &str, tools: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.profiles
            .entry(profile.to_string())
            .or_default()
            .extend(tools.into_iter().map(Into::into));
    }

    /// Parse a YAML package mapping. A profile with a null value enables nothing.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let raw: BTreeMap<String, Option<Vec<String>>> = serde_yaml::from_str(yaml)?;
        let profiles = raw
            .into_iter()
            .map(|(profile, tools)| (profile, tools.unwrap_or_default().into_iter().collect()))
            .collect();
        Ok(Self { profiles })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read package file {}: {}", path.display(), e))
        })?;
        let packages = Self::from_yaml_str(&yaml)?;
        tracing::info!(path = %path.display(), profiles = packages.profiles.len(), "loaded tool packages");
        Ok(packages)
    }

    /// Packages shipped with the crate (`config/tool_packages.yaml`).
    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_PACKAGES)
    }

    /// Declared profile names, sorted.
    pub fn profile_names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn tools(&self, profile: &str) -> Option<&BTreeSet<String>> {
        self.profiles.get(profile)
    }

    /// Check every profile against `registry` and enforce the superset rule.
    pub fn validate(&self, registry: &ToolRegistry) -> Result<()> {
        for (profile, tools) in &self.profiles {
            check_registered(profile, tools, registry)?;
        }

        if let Some(full) = self.profiles.get(SUPERSET_PROFILE) {
            let missing: BTreeSet<&String> = self
                .profiles
                .iter()
                .filter(|(name, _)| name.as_str() != SUPERSET_PROFILE)
                .flat_map(|(_, tools)| tools.iter())
                .filter(|tool| !full.contains(*tool))
                .collect();
            if !missing.is_empty() {
                return Err(Error::ProfileNotSuperset {
                    profile: SUPERSET_PROFILE.to_string(),
                    missing: missing.into_iter().cloned().collect(),
                });
            }
        }
        Ok(())
    }

    /// Restrict `registry` to the tools enabled by `profile`.
    pub fn resolve_profile<'a>(
        &self,
        profile: &str,
        registry: &'a ToolRegistry,
    ) -> Result<RegistryView<'a>> {
        let enabled = match self.profiles.get(profile) {
            Some(tools) => {
                check_registered(profile, tools, registry)?;
                tools.clone()
            }
            None if profile == EMPTY_PROFILE => BTreeSet::new(),
            None => return Err(Error::UnknownProfile(profile.to_string())),
        };
        if profile == EMPTY_PROFILE && !enabled.is_empty() {
            return Err(Error::config(format!(
                "profile '{}' is reserved and cannot enable tools",
                EMPTY_PROFILE
            )));
        }

        tracing::debug!(profile, tools = enabled.len(), "resolved tool profile");
        Ok(RegistryView {
            profile: profile.to_string(),
            registry,
            enabled,
        })
    }
}

fn check_registered(profile: &str, tools: &BTreeSet<String>, registry: &ToolRegistry) -> Result<()> {
    match tools.iter().find(|tool| !registry.contains(tool)) {
        Some(tool) => Err(Error::DanglingToolReference {
            profile: profile.to_string(),
            tool: tool.clone(),
        }),
        None => Ok(()),
    }
}

// =============================================================================
// Registry view
// =============================================================================

/// The registry as seen through one deployment profile.
#[derive(Debug)]
pub struct RegistryView<'a> {
    profile: String,
    registry: &'a ToolRegistry,
    enabled: BTreeSet<String>,
}

impl<'a> RegistryView<'a> {
    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn is_enabled(&self, tool: &str) -> bool {
        self.enabled.contains(tool)
    }

    /// Enabled tool names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        self.enabled.iter().cloned().collect()
    }

    pub fn resolve(&self, name: &str) -> Result<&'a ToolDescriptor> {
        let descriptor = self.registry.resolve(name)?;
        self.ensure_enabled(name)?;
        Ok(descriptor)
    }

    pub async fn invoke(
        &self,
        name: &str,
        raw_params: &Value,
        client: &BackendClient,
    ) -> Result<ToolEnvelope> {
        self.resolve(name)?;
        self.registry.invoke(name, raw_params, client).await
    }

    pub fn describe_all(&self) -> BTreeMap<String, ToolDescription> {
        self.registry
            .describe_all()
            .into_iter()
            .filter(|(name, _)| self.enabled.contains(name))
            .collect()
    }

    fn ensure_enabled(&self, name: &str) -> Result<()> {
        if self.enabled.contains(name) {
            Ok(())
        } else {
            Err(Error::ToolNotEnabled {
                profile: self.profile.clone(),
                tool: name.to_string(),
            })
        }
    }
}
