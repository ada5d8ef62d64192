//! Entry point for advertising and subscribing to point cloud topics.

use crate::{
    error::TransportResult,
    loader::{LoaderError, PluginLibrary, PluginManifest},
    message::PointCloud2,
    node::NodeHandle,
    plugin::{
        PUBLISHER_BASE_CLASS, PubLoader, PublisherPlugin, SUBSCRIBER_BASE_CLASS,
        SUBSCRIBER_SUFFIX, SubLoader, SubscriberPlugin, erase_last,
    },
    publisher::{AdvertiseOptions, Publisher, TrackedObject},
    raw,
    subscriber::Subscriber,
    transport_hints::{DEFAULT_TRANSPORT, TransportHints},
};
use std::sync::Arc;
use tracing::{debug, error};

/// Package whose plugins the transport loads.
pub const PACKAGE: &str = "point_cloud_transport";

/// The plugin classes available to a [`PointCloudTransport`]: what is
/// declared, and the libraries that provide the implementations.
#[derive(Debug, Clone, Default)]
pub struct TransportPlugins {
    manifest: PluginManifest,
    publishers: Vec<PluginLibrary<dyn PublisherPlugin>>,
    subscribers: Vec<PluginLibrary<dyn SubscriberPlugin>>,
}

impl TransportPlugins {
    /// No plugins at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in `raw` transport.
    pub fn builtin() -> Self {
        Self::empty()
            .with_manifest(raw::manifest())
            .with_publisher_library(raw::publisher_library())
            .with_subscriber_library(raw::subscriber_library())
    }

    pub fn with_manifest(mut self, manifest: PluginManifest) -> Self {
        self.manifest.extend(manifest);
        self
    }

    pub fn with_publisher_library(mut self, library: PluginLibrary<dyn PublisherPlugin>) -> Self {
        self.publishers.push(library);
        self
    }

    pub fn with_subscriber_library(mut self, library: PluginLibrary<dyn SubscriberPlugin>) -> Self {
        self.subscribers.push(library);
        self
    }

    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    fn into_loaders(self) -> (PubLoader, SubLoader) {
        let mut pub_loader = PubLoader::new(PACKAGE, PUBLISHER_BASE_CLASS);
        let mut sub_loader = SubLoader::new(PACKAGE, SUBSCRIBER_BASE_CLASS);

        pub_loader.add_manifest(&self.manifest);
        sub_loader.add_manifest(&self.manifest);
        for library in self.publishers {
            pub_loader.register_library(library);
        }
        for library in self.subscribers {
            sub_loader.register_library(library);
        }

        (pub_loader, sub_loader)
    }
}

/// Advertises and subscribes to point cloud topics through transport
/// plugins.
///
/// # Example
///
/// ```
/// use point_cloud_transport::{NodeHandle, PointCloud2, PointCloudTransport};
/// use std::sync::{Arc, Mutex};
///
/// let nh = NodeHandle::new("example");
/// let pct = PointCloudTransport::new(nh.clone());
///
/// let received = Arc::new(Mutex::new(Vec::new()));
/// let sink = received.clone();
/// let _sub = pct.subscribe("points", 1, move |cloud: Arc<PointCloud2>| {
///     sink.lock().unwrap().push(cloud.width);
/// })?;
///
/// let publisher = pct.advertise("points", 1, false)?;
/// publisher.publish(PointCloud2 { width: 3, ..Default::default() });
/// nh.spin_once();
///
/// assert_eq!(*received.lock().unwrap(), vec![3]);
/// assert_eq!(pct.declared_transports(), vec!["raw"]);
/// # Ok::<(), point_cloud_transport::TransportError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PointCloudTransport {
    nh: NodeHandle,
    pub_loader: Arc<PubLoader>,
    sub_loader: Arc<SubLoader>,
}

impl PointCloudTransport {
    /// A transport offering the built-in plugins.
    pub fn new(nh: NodeHandle) -> Self {
        Self::with_plugins(nh, TransportPlugins::builtin())
    }

    pub fn with_plugins(nh: NodeHandle, plugins: TransportPlugins) -> Self {
        let (pub_loader, sub_loader) = plugins.into_loaders();
        Self {
            nh,
            pub_loader: Arc::new(pub_loader),
            sub_loader: Arc::new(sub_loader),
        }
    }

    pub fn node(&self) -> &NodeHandle {
        &self.nh
    }

    pub fn publisher_loader(&self) -> &Arc<PubLoader> {
        &self.pub_loader
    }

    pub fn subscriber_loader(&self) -> &Arc<SubLoader> {
        &self.sub_loader
    }

    /// Advertise `base_topic` through every enabled publisher plugin.
    pub fn advertise(&self, base_topic: &str, queue_size: usize, latch: bool) -> TransportResult<Publisher> {
        self.advertise_with(
            base_topic,
            queue_size,
            AdvertiseOptions::default().latched(latch),
        )
    }

    /// Like [`advertise`](Self::advertise), with connection callbacks and a
    /// tracked object.
    pub fn advertise_with(
        &self,
        base_topic: &str,
        queue_size: usize,
        options: AdvertiseOptions,
    ) -> TransportResult<Publisher> {
        Publisher::new(&self.nh, base_topic, queue_size, options, &self.pub_loader)
    }

    /// Subscribe through the transport chosen by the node's private
    /// `point_cloud_transport` parameter, or `raw` when it is not set.
    pub fn subscribe<F>(&self, base_topic: &str, queue_size: usize, callback: F) -> TransportResult<Subscriber>
    where
        F: Fn(Arc<PointCloud2>) + Send + Sync + 'static,
    {
        let hints = TransportHints::from_node(DEFAULT_TRANSPORT, &self.nh);
        self.subscribe_with(base_topic, queue_size, callback, None, hints)
    }

    pub fn subscribe_with<F>(
        &self,
        base_topic: &str,
        queue_size: usize,
        callback: F,
        tracked_object: Option<TrackedObject>,
        hints: TransportHints,
    ) -> TransportResult<Subscriber>
    where
        F: Fn(Arc<PointCloud2>) + Send + Sync + 'static,
    {
        Subscriber::new(
            &self.nh,
            base_topic,
            queue_size,
            Arc::new(callback),
            tracked_object,
            &hints,
            &self.sub_loader,
        )
    }

    /// Transports with a declared subscriber plugin, in declaration order.
    pub fn declared_transports(&self) -> Vec<String> {
        self.sub_loader
            .declared_classes()
            .iter()
            .map(|class| erase_last(class, SUBSCRIBER_SUFFIX))
            .collect()
    }

    /// Declared transports whose subscriber plugin can actually be
    /// instantiated.
    pub fn loadable_transports(&self) -> Vec<String> {
        self.sub_loader
            .declared_classes()
            .into_iter()
            .filter(|class| match self.sub_loader.create_instance(class) {
                Ok(_) => true,
                Err(err) if is_load_failure(&err) => {
                    debug!(class = %class, error = %err, "Transport plugin is not loadable");
                    false
                }
                Err(err) => {
                    error!(class = %class, error = %err, "Declared transport plugin could not be looked up");
                    false
                }
            })
            .map(|class| erase_last(&class, SUBSCRIBER_SUFFIX))
            .collect()
    }
}

/// Errors that mean a declared plugin exists but cannot be instantiated.
fn is_load_failure(err: &LoaderError) -> bool {
    matches!(
        err,
        LoaderError::LibraryLoad { .. } | LoaderError::CreateClass { .. }
    )
}
