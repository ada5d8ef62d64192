//! Publisher handle advertising a base topic through every available
//! transport.

use crate::{
    error::{TransportError, TransportResult},
    message::PointCloud2,
    node::NodeHandle,
    plugin::{
        PUBLISHER_SUFFIX, PubLoader, PublisherPlugin, SingleSubscriberPublisher, StatusCallbacks,
        SubscriberStatusCallback, erase_last,
    },
};
use std::{
    any::Any,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, Ordering},
    },
};
use tracing::{debug, error, warn};

/// An object whose lifetime gates callbacks. Callbacks are skipped once the
/// last strong reference is dropped.
pub type TrackedObject = Arc<dyn Any + Send + Sync>;

/// Options accepted by [`PointCloudTransport::advertise_with`](crate::PointCloudTransport::advertise_with).
#[derive(Clone, Default)]
pub struct AdvertiseOptions {
    pub connect: Option<SubscriberStatusCallback>,
    pub disconnect: Option<SubscriberStatusCallback>,
    pub tracked_object: Option<TrackedObject>,
    pub latch: bool,
}

impl AdvertiseOptions {
    pub fn latched(mut self, latch: bool) -> Self {
        self.latch = latch;
        self
    }

    pub fn on_connect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SingleSubscriberPublisher<'_>) + Send + Sync + 'static,
    {
        self.connect = Some(Arc::new(callback));
        self
    }

    pub fn on_disconnect<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SingleSubscriberPublisher<'_>) + Send + Sync + 'static,
    {
        self.disconnect = Some(Arc::new(callback));
        self
    }

    pub fn tracked(mut self, object: TrackedObject) -> Self {
        self.tracked_object = Some(object);
        self
    }
}

struct PublisherInner {
    base_topic: String,
    plugins: Mutex<Vec<Box<dyn PublisherPlugin>>>,
    unadvertised: Arc<AtomicBool>,
}

impl PublisherInner {
    fn plugins(&self) -> MutexGuard<'_, Vec<Box<dyn PublisherPlugin>>> {
        self.plugins.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn is_valid(&self) -> bool {
        !self.unadvertised.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        if self.unadvertised.swap(true, Ordering::AcqRel) {
            return;
        }
        for plugin in self.plugins().iter_mut() {
            plugin.shutdown();
        }
        debug!(topic = %self.base_topic, "Publisher shut down");
    }
}

impl Drop for PublisherInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Publishes point clouds on a base topic through every loadable publisher
/// plugin that is not disabled by the `<base_topic>/disable_pub_plugins`
/// parameter.
///
/// Clones share the same set of plugins. The plugins are shut down when
/// [`shutdown`](Self::shutdown) is called or the last clone is dropped.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.inner.base_topic)
            .field("transports", &self.transports())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl Publisher {
    pub(crate) fn new(
        nh: &NodeHandle,
        base_topic: &str,
        queue_size: usize,
        options: AdvertiseOptions,
        loader: &PubLoader,
    ) -> TransportResult<Self> {
        let base_topic = nh.resolve_name(base_topic)?;
        let blacklist = disabled_transports(nh, &base_topic);

        let unadvertised = Arc::new(AtomicBool::new(false));
        let tracked = options.tracked_object.as_ref().map(Arc::downgrade);
        let callbacks = StatusCallbacks {
            connect: rebind(options.connect, &unadvertised, &tracked),
            disconnect: rebind(options.disconnect, &unadvertised, &tracked),
        };

        let mut plugins = Vec::new();
        for lookup_name in loader.declared_classes() {
            let transport = erase_last(&lookup_name, PUBLISHER_SUFFIX);
            if blacklist.contains(&transport) {
                debug!(topic = %base_topic, transport = %transport, "Publisher plugin disabled");
                continue;
            }

            let mut plugin = match loader.create_instance(&lookup_name) {
                Ok(plugin) => plugin,
                Err(err) => {
                    debug!(class = %lookup_name, error = %err, "Failed to load plugin");
                    continue;
                }
            };

            if let Err(err) = plugin.advertise(
                nh,
                &base_topic,
                queue_size,
                callbacks.clone(),
                options.latch,
            ) {
                debug!(class = %lookup_name, error = %err, "Failed to advertise plugin");
                continue;
            }

            plugins.push(plugin);
        }

        if plugins.is_empty() {
            return Err(TransportError::NoPlugins { topic: base_topic });
        }

        debug!(
            topic = %base_topic,
            num_plugins = plugins.len(),
            "Advertised point cloud topic"
        );

        Ok(Self {
            inner: Arc::new(PublisherInner {
                base_topic,
                plugins: Mutex::new(plugins),
                unadvertised,
            }),
        })
    }

    /// Total number of subscribers across all transports.
    pub fn num_subscribers(&self) -> usize {
        if !self.is_valid() {
            return 0;
        }
        self.inner
            .plugins()
            .iter()
            .map(|plugin| plugin.num_subscribers())
            .sum()
    }

    /// The resolved base topic.
    pub fn topic(&self) -> &str {
        &self.inner.base_topic
    }

    /// Names of the transports this publisher advertises.
    pub fn transports(&self) -> Vec<String> {
        self.inner
            .plugins()
            .iter()
            .map(|plugin| plugin.transport_name())
            .collect()
    }

    /// Resolved topics of the advertised transports.
    pub fn transport_topics(&self) -> Vec<String> {
        self.inner
            .plugins()
            .iter()
            .filter_map(|plugin| plugin.topic())
            .collect()
    }

    /// Publish through every transport that currently has subscribers.
    pub fn publish(&self, message: impl Into<Arc<PointCloud2>>) {
        if !self.is_valid() {
            error!(topic = %self.inner.base_topic, "Call to publish() on an invalid Publisher");
            return;
        }

        let message = message.into();
        for plugin in self.inner.plugins().iter() {
            if plugin.num_subscribers() == 0 {
                continue;
            }
            if let Err(err) = plugin.publish(&message) {
                warn!(
                    topic = %self.inner.base_topic,
                    transport = %plugin.transport_name(),
                    error = %err,
                    "Failed to publish point cloud"
                );
            }
        }
    }

    /// Unadvertise every transport. Further calls to `publish` are errors.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_valid()
    }
}

fn disabled_transports(nh: &NodeHandle, base_topic: &str) -> Vec<String> {
    let name = format!("{base_topic}/disable_pub_plugins");
    match nh.get_param::<Vec<String>>(&name) {
        Ok(list) => list.unwrap_or_default(),
        Err(err) => {
            warn!(parameter = %name, error = %err, "Ignoring disabled plugin list");
            Vec::new()
        }
    }
}

/// Wrap a status callback so it stops firing once the publisher is shut
/// down or the tracked object is gone.
fn rebind(
    callback: Option<SubscriberStatusCallback>,
    unadvertised: &Arc<AtomicBool>,
    tracked: &Option<Weak<dyn Any + Send + Sync>>,
) -> Option<SubscriberStatusCallback> {
    let callback = callback?;
    let unadvertised = unadvertised.clone();
    let tracked = tracked.clone();

    Some(Arc::new(move |single: &SingleSubscriberPublisher<'_>| {
        if unadvertised.load(Ordering::Acquire) {
            return;
        }
        if let Some(tracked) = &tracked
            && tracked.strong_count() == 0
        {
            return;
        }
        callback(single);
    }))
}
