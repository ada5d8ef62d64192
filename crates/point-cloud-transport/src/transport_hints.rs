//! Selection of the transport used by a subscriber.

use crate::node::NodeHandle;
use tracing::warn;

pub const DEFAULT_TRANSPORT: &str = "raw";

/// Name of the private parameter that overrides the default transport.
pub const DEFAULT_PARAMETER: &str = "point_cloud_transport";

/// Chooses which transport a [`Subscriber`](crate::Subscriber) uses.
///
/// The transport is the value of the configured parameter when it is set,
/// and the default transport otherwise.
#[derive(Debug, Clone)]
pub struct TransportHints {
    default_transport: String,
    parameter: Option<(NodeHandle, String)>,
}

impl Default for TransportHints {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSPORT)
    }
}

impl TransportHints {
    pub fn new(default_transport: impl Into<String>) -> Self {
        Self {
            default_transport: default_transport.into(),
            parameter: None,
        }
    }

    /// Hints that read [`DEFAULT_PARAMETER`] from the node's private
    /// namespace.
    pub fn from_node(default_transport: impl Into<String>, nh: &NodeHandle) -> Self {
        Self::new(default_transport).with_parameter(&nh.private(), DEFAULT_PARAMETER)
    }

    /// Let the parameter `name`, resolved against `nh`, override the
    /// default transport.
    pub fn with_parameter(mut self, nh: &NodeHandle, name: impl Into<String>) -> Self {
        self.parameter = Some((nh.clone(), name.into()));
        self
    }

    pub fn default_transport(&self) -> &str {
        &self.default_transport
    }

    pub fn transport(&self) -> String {
        let Some((nh, name)) = &self.parameter else {
            return self.default_transport.clone();
        };

        match nh.get_param::<String>(name) {
            Ok(Some(transport)) => transport,
            Ok(None) => self.default_transport.clone(),
            Err(err) => {
                warn!(
                    parameter = %name,
                    error = %err,
                    default = %self.default_transport,
                    "Ignoring transport parameter"
                );
                self.default_transport.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transport() {
        assert_eq!(TransportHints::default().transport(), "raw");
        assert_eq!(TransportHints::new("draco").transport(), "draco");
    }

    #[test]
    fn test_parameter_overrides_default() {
        let nh = NodeHandle::new("listener");
        let hints = TransportHints::from_node("raw", &nh);
        assert_eq!(hints.transport(), "raw");

        nh.set_param("~point_cloud_transport", "draco").unwrap();
        assert_eq!(hints.transport(), "draco");
        assert_eq!(hints.default_transport(), "raw");
    }

    #[test]
    fn test_invalid_parameter_falls_back() {
        let nh = NodeHandle::new("listener");
        nh.set_param("transport", vec![1, 2]).unwrap();
        let hints = TransportHints::new("raw").with_parameter(&nh, "transport");
        assert_eq!(hints.transport(), "raw");
    }
}
