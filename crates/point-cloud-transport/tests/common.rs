use point_cloud_transport::{
    Message, PluginLibrary, PluginManifest, PointCloud2, PointField, PublisherPlugin,
    SimplePublisher, SimplePublisherPlugin, SimpleSubscriber, SimpleSubscriberPlugin,
    SubscriberPlugin, TransportPlugins,
};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

pub const TEST_LIBRARY: &str = "test_transports";

/// Declares the `framed` transport, a `broken` transport whose factories
/// fail and a `ghost` transport whose library is never registered.
pub const TEST_MANIFEST: &str = r#"
plugins:
  - name: framed_pub
    library: test_transports
    base_class: point_cloud_transport::PublisherPlugin
  - name: framed_sub
    library: test_transports
    base_class: point_cloud_transport::SubscriberPlugin
  - name: broken_pub
    library: test_transports
    base_class: point_cloud_transport::PublisherPlugin
  - name: broken_sub
    library: test_transports
    base_class: point_cloud_transport::SubscriberPlugin
  - name: ghost_pub
    library: missing_library
    base_class: point_cloud_transport::PublisherPlugin
  - name: ghost_sub
    library: missing_library
    base_class: point_cloud_transport::SubscriberPlugin
"#;

/// A cloud wrapped with a per-publisher frame counter.
pub struct Framed {
    pub frame: u64,
    pub cloud: Arc<PointCloud2>,
}

impl Message for Framed {
    const TYPE_NAME: &'static str = "test_msgs/Framed";
}

#[derive(Default)]
pub struct FramedPublisher {
    frames: AtomicU64,
}

impl SimplePublisherPlugin for FramedPublisher {
    type Message = Framed;

    fn transport_name(&self) -> String {
        "framed".to_string()
    }

    fn encode(&self, cloud: &Arc<PointCloud2>) -> eyre::Result<Arc<Framed>> {
        Ok(Arc::new(Framed {
            frame: self.frames.fetch_add(1, Ordering::SeqCst),
            cloud: cloud.clone(),
        }))
    }
}

pub struct FramedSubscriber;

impl SimpleSubscriberPlugin for FramedSubscriber {
    type Message = Framed;

    fn transport_name(&self) -> String {
        "framed".to_string()
    }

    fn decode(&self, message: &Arc<Framed>) -> eyre::Result<Arc<PointCloud2>> {
        Ok(message.cloud.clone())
    }
}

pub fn test_plugins() -> TransportPlugins {
    let manifest = PluginManifest::from_yaml(TEST_MANIFEST).expect("valid test manifest");

    TransportPlugins::builtin()
        .with_manifest(manifest)
        .with_publisher_library(
            PluginLibrary::<dyn PublisherPlugin>::new(TEST_LIBRARY)
                .with_class("framed_pub", || {
                    Ok(Box::new(SimplePublisher::new(FramedPublisher::default()))
                        as Box<dyn PublisherPlugin>)
                })
                .with_class("broken_pub", || Err(eyre::eyre!("codec unavailable"))),
        )
        .with_subscriber_library(
            PluginLibrary::<dyn SubscriberPlugin>::new(TEST_LIBRARY)
                .with_class("framed_sub", || {
                    Ok(Box::new(SimpleSubscriber::new(FramedSubscriber))
                        as Box<dyn SubscriberPlugin>)
                })
                .with_class("broken_sub", || Err(eyre::eyre!("codec unavailable"))),
        )
}

/// A single-row XYZ cloud with `width` points.
pub fn cloud(width: u32) -> PointCloud2 {
    let mut cloud = PointCloud2 {
        height: 1,
        width,
        fields: vec![
            PointField::new("x", 0, PointField::FLOAT32, 1),
            PointField::new("y", 4, PointField::FLOAT32, 1),
            PointField::new("z", 8, PointField::FLOAT32, 1),
        ],
        point_step: 12,
        row_step: 12 * width,
        data: vec![0; 12 * width as usize],
        is_dense: true,
        ..Default::default()
    };
    cloud.header.frame_id = "lidar".to_string();
    cloud
}

/// Records the width of every received cloud.
#[derive(Clone, Default)]
pub struct Collector {
    widths: Arc<Mutex<Vec<u32>>>,
}

#[allow(dead_code)]
impl Collector {
    pub fn callback(&self) -> impl Fn(Arc<PointCloud2>) + Send + Sync + 'static {
        let widths = self.widths.clone();
        move |cloud| widths.lock().unwrap().push(cloud.width)
    }

    pub fn widths(&self) -> Vec<u32> {
        self.widths.lock().unwrap().clone()
    }
}
