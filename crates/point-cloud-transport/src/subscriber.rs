//! Subscriber handle receiving point clouds through one chosen transport.

use crate::{
    error::{TransportError, TransportResult},
    message::PointCloud2,
    node::{NodeHandle, clean_name},
    plugin::{PointCloudCallback, SubLoader, SubscriberPlugin, subscriber_lookup_name},
    publisher::TrackedObject,
    transport_hints::TransportHints,
};
use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, warn};

struct SubscriberInner {
    plugin: Mutex<Box<dyn SubscriberPlugin>>,
    unsubscribed: AtomicBool,
}

impl SubscriberInner {
    fn plugin(&self) -> MutexGuard<'_, Box<dyn SubscriberPlugin>> {
        self.plugin.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn shutdown(&self) {
        if self.unsubscribed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.plugin().shutdown();
    }
}

impl Drop for SubscriberInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Receives point clouds published on a base topic through the transport
/// selected by [`TransportHints`].
///
/// Clones share the same subscription, which ends when
/// [`shutdown`](Self::shutdown) is called or the last clone is dropped.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("topic", &self.topic())
            .field("transport", &self.transport())
            .finish()
    }
}

impl Subscriber {
    pub(crate) fn new(
        nh: &NodeHandle,
        base_topic: &str,
        queue_size: usize,
        callback: PointCloudCallback,
        tracked_object: Option<TrackedObject>,
        hints: &TransportHints,
        loader: &SubLoader,
    ) -> TransportResult<Self> {
        let transport = hints.transport();
        let lookup_name = subscriber_lookup_name(&transport);
        let mut plugin =
            loader
                .create_instance(&lookup_name)
                .map_err(|source| TransportError::TransportLoad {
                    transport: transport.clone(),
                    source,
                })?;

        if let Some((real_base_topic, topic_transport)) =
            transport_specific_base(base_topic, loader)
        {
            warn!(
                topic = %base_topic,
                base_topic = %real_base_topic,
                transport = %topic_transport,
                "It looks like you are subscribing directly to a transport-specific topic; \
                 pass the base topic with a transport hint instead"
            );
        }

        let callback = track(callback, tracked_object);
        plugin.subscribe(nh, base_topic, queue_size, callback, hints)?;

        debug!(
            topic = ?plugin.topic(),
            transport = %transport,
            "Subscribed to point cloud topic"
        );

        Ok(Self {
            inner: Arc::new(SubscriberInner {
                plugin: Mutex::new(plugin),
                unsubscribed: AtomicBool::new(false),
            }),
        })
    }

    /// Resolved topic of the underlying transport, empty after shutdown.
    pub fn topic(&self) -> String {
        if self.inner.unsubscribed.load(Ordering::Acquire) {
            return String::new();
        }
        self.inner.plugin().topic().unwrap_or_default()
    }

    pub fn num_publishers(&self) -> usize {
        if self.inner.unsubscribed.load(Ordering::Acquire) {
            return 0;
        }
        self.inner.plugin().num_publishers()
    }

    pub fn transport(&self) -> String {
        self.inner.plugin().transport_name()
    }

    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

/// When the last element of `base_topic` names a declared transport,
/// return the base topic the caller probably meant and that transport.
pub fn transport_specific_base(base_topic: &str, loader: &SubLoader) -> Option<(String, String)> {
    let clean_topic = clean_name(base_topic);
    let found = clean_topic.rfind('/')?;
    let transport = &clean_topic[found + 1..];

    if transport.is_empty() || !loader.is_class_declared(&subscriber_lookup_name(transport)) {
        return None;
    }

    Some((clean_topic[..found].to_string(), transport.to_string()))
}

fn track(callback: PointCloudCallback, tracked_object: Option<TrackedObject>) -> PointCloudCallback {
    let Some(tracked_object) = tracked_object else {
        return callback;
    };

    let tracked = Arc::downgrade(&tracked_object);
    Arc::new(move |cloud: Arc<PointCloud2>| {
        if tracked.strong_count() > 0 {
            callback(cloud);
        }
    })
}
