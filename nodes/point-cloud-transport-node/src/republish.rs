//! Bridge a point cloud topic from one transport to others.

use crate::config::RepublishConfig;
use eyre::{Result, WrapErr, ensure};
use point_cloud_transport::{
    PointCloud2, PointCloudTransport, Publisher, PublisherPlugin, StatusCallbacks, Subscriber,
    TransportHints, plugin::publisher_lookup_name,
};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Where republished clouds go.
#[derive(Clone)]
enum Output {
    /// Every enabled transport, through a regular publisher.
    All(Publisher),
    /// One transport plugin, advertised directly.
    Single(Arc<Mutex<Box<dyn PublisherPlugin>>>),
}

impl Output {
    fn publish(&self, cloud: Arc<PointCloud2>) {
        match self {
            Self::All(publisher) => publisher.publish(cloud),
            Self::Single(plugin) => {
                let plugin = plugin.lock().unwrap_or_else(|err| err.into_inner());
                if let Err(err) = plugin.publish(&cloud) {
                    warn!(
                        transport = %plugin.transport_name(),
                        error = %err,
                        "Failed to republish point cloud"
                    );
                }
            }
        }
    }

    fn topics(&self) -> Vec<String> {
        match self {
            Self::All(publisher) => publisher.transport_topics(),
            Self::Single(plugin) => plugin
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .topic()
                .into_iter()
                .collect(),
        }
    }

    fn shutdown(&self) {
        match self {
            Self::All(publisher) => publisher.shutdown(),
            Self::Single(plugin) => plugin
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .shutdown(),
        }
    }
}

/// Subscribes to `in_topic` with `in_transport` and publishes every cloud
/// on `out_topic`, either through all transports or only `out_transport`.
pub struct Republisher {
    subscriber: Subscriber,
    output: Output,
}

impl Republisher {
    pub fn new(pct: &PointCloudTransport, config: &RepublishConfig) -> Result<Self> {
        let in_topic = pct.node().resolve_name(&config.in_topic)?;
        let out_topic = pct.node().resolve_name(&config.out_topic)?;
        ensure!(
            in_topic != out_topic || !config.feeds_back(),
            "Republishing '{in_topic}' onto itself with transport '{}'",
            config.in_transport
        );

        let output = match &config.out_transport {
            None => Output::All(
                pct.advertise(&config.out_topic, config.queue_size, false)
                    .wrap_err_with(|| format!("Failed to advertise '{}'", config.out_topic))?,
            ),
            Some(transport) => {
                let mut plugin = pct
                    .publisher_loader()
                    .create_instance(&publisher_lookup_name(transport))
                    .wrap_err_with(|| format!("Failed to load publisher for transport '{transport}'"))?;
                plugin
                    .advertise(
                        pct.node(),
                        &out_topic,
                        config.queue_size,
                        StatusCallbacks::default(),
                        false,
                    )
                    .wrap_err_with(|| format!("Failed to advertise '{out_topic}'"))?;
                Output::Single(Arc::new(Mutex::new(plugin)))
            }
        };

        let forward = output.clone();
        let subscriber = pct
            .subscribe_with(
                &config.in_topic,
                config.queue_size,
                move |cloud| forward.publish(cloud),
                None,
                TransportHints::new(config.in_transport.as_str()),
            )
            .wrap_err_with(|| format!("Failed to subscribe to '{}'", config.in_topic))?;

        info!(
            in_topic = %subscriber.topic(),
            in_transport = %config.in_transport,
            out_topics = ?output.topics(),
            "Republishing point clouds"
        );

        Ok(Self { subscriber, output })
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    /// Resolved topics clouds are republished on.
    pub fn output_topics(&self) -> Vec<String> {
        self.output.topics()
    }

    pub fn shutdown(&self) {
        self.subscriber.shutdown();
        self.output.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use point_cloud_transport::NodeHandle;

    fn config(out_transport: Option<&str>) -> RepublishConfig {
        config_between("points", "relayed", out_transport)
    }

    fn config_between(in_topic: &str, out_topic: &str, out_transport: Option<&str>) -> RepublishConfig {
        RepublishConfig {
            in_topic: in_topic.to_string(),
            out_topic: out_topic.to_string(),
            in_transport: "raw".to_string(),
            out_transport: out_transport.map(str::to_string),
            queue_size: 4,
        }
    }

    #[test]
    fn test_republish_all_transports() {
        let nh = NodeHandle::new("relay");
        let pct = PointCloudTransport::new(nh.clone());
        let republisher = Republisher::new(&pct, &config(None)).unwrap();
        assert_eq!(republisher.output_topics(), vec!["/relayed"]);

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _sub = pct
            .subscribe("relayed", 4, move |cloud: Arc<PointCloud2>| {
                sink.lock().unwrap().push(cloud.width);
            })
            .unwrap();

        let source = pct.advertise("points", 4, false).unwrap();
        source.publish(PointCloud2 {
            width: 6,
            ..Default::default()
        });

        // One spin delivers to the republisher, the next to the listener.
        nh.spin_once();
        nh.spin_once();
        assert_eq!(*received.lock().unwrap(), vec![6]);
    }

    #[test]
    fn test_republish_single_transport() {
        let nh = NodeHandle::new("relay");
        let pct = PointCloudTransport::new(nh.clone());
        let republisher = Republisher::new(&pct, &config(Some("raw"))).unwrap();
        assert_eq!(republisher.output_topics(), vec!["/relayed"]);
        assert_eq!(republisher.subscriber().transport(), "raw");

        republisher.shutdown();
        assert!(republisher.output_topics().is_empty());
        assert_eq!(republisher.subscriber().topic(), "");
    }

    #[test]
    fn test_unknown_out_transport() {
        let pct = PointCloudTransport::new(NodeHandle::new("relay"));
        assert!(Republisher::new(&pct, &config(Some("draco"))).is_err());
    }

    #[test]
    fn test_reject_loop_after_name_resolution() {
        let pct = PointCloudTransport::new(NodeHandle::new("relay"));

        for out_transport in [None, Some("raw")] {
            let err = Republisher::new(&pct, &config_between("points", "/points", out_transport))
                .err()
                .unwrap();
            assert!(err.to_string().contains("onto itself"));
        }
        assert!(pct.node().topics().is_empty());
    }

    #[test]
    fn test_loop_rejected_in_namespace() {
        let pct = PointCloudTransport::new(NodeHandle::new("lidar/relay"));
        assert!(Republisher::new(&pct, &config_between("points", "/lidar/points", None)).is_err());
        assert!(Republisher::new(&pct, &config_between("points", "/points", None)).is_ok());
    }
}
