//! TransportNode implementation.

use crate::{config::Config, republish::Republisher};
use eyre::Result;
use point_cloud_transport::PointCloudTransport;
use std::time::Duration;
use tracing::info;

/// A configured node: the transport facade, an optional republisher, and
/// the loop that dispatches queued clouds.
pub struct TransportNode {
    transport: PointCloudTransport,
    republisher: Option<Republisher>,
    spin_period: Duration,
}

impl TransportNode {
    pub fn new(config: &Config) -> Result<Self> {
        let transport = config.build_transport()?;

        info!(
            node = %transport.node().node_name(),
            declared = ?transport.declared_transports(),
            spin_period = ?config.spin_period,
            "Creating TransportNode"
        );

        let republisher = config
            .republish
            .as_ref()
            .map(|republish| Republisher::new(&transport, republish))
            .transpose()?;

        Ok(Self {
            transport,
            republisher,
            spin_period: config.spin_period,
        })
    }

    pub fn transport(&self) -> &PointCloudTransport {
        &self.transport
    }

    pub fn republisher(&self) -> Option<&Republisher> {
        self.republisher.as_ref()
    }

    /// Dispatch queued clouds until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        self.transport
            .node()
            .spin(self.spin_period, shutdown)
            .await;

        if let Some(republisher) = &self.republisher {
            republisher.shutdown();
        }
        info!("TransportNode shutting down");
        Ok(())
    }
}
