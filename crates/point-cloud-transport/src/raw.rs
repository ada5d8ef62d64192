//! The `raw` transport: point clouds travel unchanged on the base topic.

use crate::{
    loader::{PluginDescription, PluginLibrary, PluginManifest},
    message::PointCloud2,
    plugin::{
        PUBLISHER_BASE_CLASS, PublisherPlugin, SUBSCRIBER_BASE_CLASS, SimplePublisher,
        SimplePublisherPlugin, SimpleSubscriber, SimpleSubscriberPlugin, SubscriberPlugin,
        publisher_lookup_name, subscriber_lookup_name,
    },
};
use std::sync::Arc;

/// Library name under which the built-in transports are registered.
pub const LIBRARY: &str = "point_cloud_transport";

pub const TRANSPORT: &str = "raw";

#[derive(Debug, Clone, Copy, Default)]
pub struct RawPublisher;

impl SimplePublisherPlugin for RawPublisher {
    type Message = PointCloud2;

    fn transport_name(&self) -> String {
        TRANSPORT.to_string()
    }

    fn topic_to_advertise(&self, base_topic: &str) -> String {
        base_topic.to_string()
    }

    fn encode(&self, cloud: &Arc<PointCloud2>) -> eyre::Result<Arc<PointCloud2>> {
        Ok(cloud.clone())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RawSubscriber;

impl SimpleSubscriberPlugin for RawSubscriber {
    type Message = PointCloud2;

    fn transport_name(&self) -> String {
        TRANSPORT.to_string()
    }

    fn topic_to_subscribe(&self, base_topic: &str) -> String {
        base_topic.to_string()
    }

    fn decode(&self, message: &Arc<PointCloud2>) -> eyre::Result<Arc<PointCloud2>> {
        Ok(message.clone())
    }
}

/// Declarations of the built-in transport classes.
pub fn manifest() -> PluginManifest {
    PluginManifest {
        plugins: vec![
            PluginDescription {
                name: publisher_lookup_name(TRANSPORT),
                library: LIBRARY.to_string(),
                base_class: PUBLISHER_BASE_CLASS.to_string(),
                description: "Publishes point clouds unchanged on the base topic.".to_string(),
            },
            PluginDescription {
                name: subscriber_lookup_name(TRANSPORT),
                library: LIBRARY.to_string(),
                base_class: SUBSCRIBER_BASE_CLASS.to_string(),
                description: "Receives point clouds unchanged from the base topic.".to_string(),
            },
        ],
    }
}

pub fn publisher_library() -> PluginLibrary<dyn PublisherPlugin> {
    PluginLibrary::<dyn PublisherPlugin>::new(LIBRARY).with_class(
        publisher_lookup_name(TRANSPORT),
        || Ok(Box::new(SimplePublisher::new(RawPublisher)) as Box<dyn PublisherPlugin>),
    )
}

pub fn subscriber_library() -> PluginLibrary<dyn SubscriberPlugin> {
    PluginLibrary::<dyn SubscriberPlugin>::new(LIBRARY).with_class(
        subscriber_lookup_name(TRANSPORT),
        || Ok(Box::new(SimpleSubscriber::new(RawSubscriber)) as Box<dyn SubscriberPlugin>),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        node::NodeHandle,
        plugin::{PointCloudCallback, StatusCallbacks},
        transport_hints::TransportHints,
    };
    use std::sync::Mutex;

    #[test]
    fn test_raw_uses_base_topic() {
        let nh = NodeHandle::new("node");
        let received = Arc::new(Mutex::new(Vec::new()));

        let mut subscriber = SimpleSubscriber::new(RawSubscriber);
        let sink = received.clone();
        let callback: PointCloudCallback = Arc::new(move |cloud: Arc<PointCloud2>| {
            sink.lock().unwrap().push(cloud.header.frame_id.clone());
        });
        subscriber
            .subscribe(&nh, "points", 1, callback, &TransportHints::default())
            .unwrap();

        let mut publisher = SimplePublisher::new(RawPublisher);
        publisher
            .advertise(&nh, "/points", 1, StatusCallbacks::default(), false)
            .unwrap();

        assert_eq!(publisher.topic().as_deref(), Some("/points"));
        assert_eq!(subscriber.topic().as_deref(), Some("/points"));
        assert_eq!(publisher.num_subscribers(), 1);
        assert_eq!(subscriber.num_publishers(), 1);

        let mut cloud = PointCloud2::default();
        cloud.header.frame_id = "lidar".to_string();
        publisher.publish(&Arc::new(cloud)).unwrap();
        nh.spin_once();

        assert_eq!(*received.lock().unwrap(), vec!["lidar".to_string()]);
    }

    #[test]
    fn test_publish_before_advertise_fails() {
        let publisher = SimplePublisher::new(RawPublisher);
        assert!(publisher.publish(&Arc::new(PointCloud2::default())).is_err());
    }

    #[test]
    fn test_manifest_matches_libraries() {
        let manifest = manifest();
        let pub_library = publisher_library();
        let sub_library = subscriber_library();

        assert_eq!(manifest.plugins.len(), 2);
        assert_eq!(pub_library.classes().collect::<Vec<_>>(), vec!["raw_pub"]);
        assert_eq!(sub_library.classes().collect::<Vec<_>>(), vec!["raw_sub"]);
        assert!(manifest.plugins.iter().all(|p| p.library == LIBRARY));
    }
}
