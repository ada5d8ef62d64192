//! Configuration parsing and validation for the transport tools.

use eyre::{Result, WrapErr, ensure};
use indexmap::IndexMap;
use point_cloud_transport::{
    NodeHandle, PluginManifest, PointCloudTransport, TransportPlugins, node::clean_name,
};
use serde::Deserialize;
use std::{fs, path::Path, path::PathBuf, time::Duration};
use tracing::debug;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Name of the node, possibly including its namespace.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Additional plugin manifests declaring transports.
    #[serde(default)]
    pub manifests: Vec<PathBuf>,

    /// Parameters set on the node before any topic is created, keyed by
    /// name relative to the node's namespace.
    #[serde(default)]
    pub parameters: IndexMap<String, serde_yaml::Value>,

    /// How often queued messages are dispatched.
    #[serde(with = "humantime_serde", default = "default_spin_period")]
    pub spin_period: Duration,

    /// Optional republishing between transports.
    #[serde(default)]
    pub republish: Option<RepublishConfig>,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.node_name.is_empty(), "node_name cannot be empty");
        ensure!(
            !self.spin_period.is_zero(),
            "spin_period must be greater than zero"
        );

        if let Some(republish) = &self.republish {
            republish.validate()?;
        }

        Ok(())
    }

    /// The built-in transports plus every configured manifest.
    pub fn plugins(&self) -> Result<TransportPlugins> {
        let mut plugins = TransportPlugins::builtin();
        for path in &self.manifests {
            let manifest = PluginManifest::load(path)?;
            debug!(
                manifest = %path.display(),
                num_plugins = manifest.plugins.len(),
                "Loaded plugin manifest"
            );
            plugins = plugins.with_manifest(manifest);
        }
        Ok(plugins)
    }

    /// Create the node, apply the configured parameters and build the
    /// transport facade on it.
    pub fn build_transport(&self) -> Result<PointCloudTransport> {
        let nh = NodeHandle::new(&self.node_name);
        for (name, value) in &self.parameters {
            nh.set_param(name, value)
                .wrap_err_with(|| format!("Failed to set parameter '{name}'"))?;
        }

        Ok(PointCloudTransport::with_plugins(nh, self.plugins()?))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            manifests: Vec::new(),
            parameters: IndexMap::new(),
            spin_period: default_spin_period(),
            republish: None,
        }
    }
}

fn default_node_name() -> String {
    "point_cloud_transport".to_string()
}

fn default_spin_period() -> Duration {
    Duration::from_millis(10)
}

/// Republishing from one transport to others.
#[derive(Debug, Clone, Deserialize)]
pub struct RepublishConfig {
    /// Base topic to read from.
    pub in_topic: String,

    /// Base topic to publish to.
    pub out_topic: String,

    /// Transport used to read `in_topic`.
    #[serde(default = "default_in_transport")]
    pub in_transport: String,

    /// Single transport used for `out_topic`; all transports when unset.
    #[serde(default)]
    pub out_transport: Option<String>,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl RepublishConfig {
    fn validate(&self) -> Result<()> {
        ensure!(!self.in_topic.is_empty(), "republish.in_topic cannot be empty");
        ensure!(
            !self.out_topic.is_empty(),
            "republish.out_topic cannot be empty"
        );
        ensure!(
            !self.in_transport.is_empty(),
            "republish.in_transport cannot be empty"
        );
        if let Some(out_transport) = &self.out_transport {
            ensure!(
                !out_transport.is_empty(),
                "republish.out_transport cannot be empty"
            );
        }
        ensure!(
            clean_name(&self.in_topic) != clean_name(&self.out_topic) || !self.feeds_back(),
            "Republishing '{}' onto itself with transport '{}'",
            self.in_topic,
            self.in_transport
        );
        Ok(())
    }

    /// Whether the output includes `in_transport`, so that republishing on
    /// the input topic would loop.
    pub fn feeds_back(&self) -> bool {
        self.out_transport
            .as_ref()
            .is_none_or(|out_transport| *out_transport == self.in_transport)
    }
}

fn default_in_transport() -> String {
    point_cloud_transport::DEFAULT_TRANSPORT.to_string()
}

fn default_queue_size() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_example_config() {
        let yaml = r#"
node_name: lidar/republisher
spin_period: 5ms
parameters:
  out/disable_pub_plugins: [draco]
republish:
  in_topic: points
  out_topic: out
  in_transport: raw
  out_transport: raw
  queue_size: 4
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.node_name, "lidar/republisher");
        assert_eq!(config.spin_period, Duration::from_millis(5));
        assert!(config.manifests.is_empty());
        let republish = config.republish.as_ref().unwrap();
        assert_eq!(republish.in_transport, "raw");
        assert_eq!(republish.out_transport.as_deref(), Some("raw"));
        assert_eq!(republish.queue_size, 4);
    }

    #[test]
    fn test_shipped_example_config() {
        let config: Config =
            serde_yaml::from_str(include_str!("../config/example.yaml")).unwrap();
        config.validate().unwrap();

        let republish = config.republish.as_ref().unwrap();
        assert_eq!(republish.out_topic, "points_relayed");
        assert!(republish.out_transport.is_none());
        assert_eq!(config.parameters.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        config.validate().unwrap();

        assert_eq!(config.node_name, "point_cloud_transport");
        assert_eq!(config.spin_period, Duration::from_millis(10));
        assert!(config.republish.is_none());
    }

    #[test]
    fn test_reject_zero_spin_period() {
        let config: Config = serde_yaml::from_str("spin_period: 0s").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_republish_onto_itself() {
        let yaml = r#"
republish:
  in_topic: points
  out_topic: points
  out_transport: raw
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_republish_onto_itself_through_all_transports() {
        let yaml = r#"
republish:
  in_topic: points
  out_topic: points/
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_same_topic_with_other_transport_is_allowed() {
        let yaml = r#"
republish:
  in_topic: points
  out_topic: points
  in_transport: draco
  out_transport: raw
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert!(!config.republish.unwrap().feeds_back());
    }

    #[test]
    fn test_build_transport_applies_parameters() {
        let yaml = r#"
node_name: tools
parameters:
  points/disable_pub_plugins: [raw]
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let pct = config.build_transport().unwrap();

        let disabled: Option<Vec<String>> = pct
            .node()
            .get_param("/points/disable_pub_plugins")
            .unwrap();
        assert_eq!(disabled, Some(vec!["raw".to_string()]));
        assert!(pct.advertise("points", 1, false).is_err());
    }

    #[test]
    fn test_missing_manifest_is_an_error() {
        let yaml = r#"
manifests:
  - /nonexistent/plugins.yaml
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.build_transport().is_err());
    }
}
