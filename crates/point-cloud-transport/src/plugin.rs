//! Interfaces implemented by transport plugins.
//!
//! A transport is a pair of classes: `<transport>_pub` implementing
//! [`PublisherPlugin`] and `<transport>_sub` implementing
//! [`SubscriberPlugin`]. Most transports only need to map a point cloud to a
//! message and back; [`SimplePublisherPlugin`] and [`SimpleSubscriberPlugin`]
//! cover that case and handle the topic plumbing.

use crate::{
    error::{TransportError, TransportResult},
    loader::ClassLoader,
    message::{Message, PointCloud2},
    node::{NodeHandle, PeerCallback, PeerCallbacks, SinglePeer, TopicPublisher, TopicSubscription},
    transport_hints::TransportHints,
};
use std::sync::Arc;
use tracing::warn;

pub const PUBLISHER_BASE_CLASS: &str = "point_cloud_transport::PublisherPlugin";
pub const SUBSCRIBER_BASE_CLASS: &str = "point_cloud_transport::SubscriberPlugin";

pub const PUBLISHER_SUFFIX: &str = "_pub";
pub const SUBSCRIBER_SUFFIX: &str = "_sub";

pub type PubLoader = ClassLoader<dyn PublisherPlugin>;
pub type SubLoader = ClassLoader<dyn SubscriberPlugin>;

/// Callback receiving decoded point clouds.
pub type PointCloudCallback = Arc<dyn Fn(Arc<PointCloud2>) + Send + Sync>;

/// Callback invoked when a subscriber connects to or disconnects from a
/// transport topic.
pub type SubscriberStatusCallback = Arc<dyn Fn(&SingleSubscriberPublisher<'_>) + Send + Sync>;

#[derive(Clone, Default)]
pub struct StatusCallbacks {
    pub connect: Option<SubscriberStatusCallback>,
    pub disconnect: Option<SubscriberStatusCallback>,
}

/// Lookup name of the publisher class of `transport`.
pub fn publisher_lookup_name(transport: &str) -> String {
    format!("{transport}{PUBLISHER_SUFFIX}")
}

/// Lookup name of the subscriber class of `transport`.
pub fn subscriber_lookup_name(transport: &str) -> String {
    format!("{transport}{SUBSCRIBER_SUFFIX}")
}

/// Remove the last occurrence of `pattern` from `name`.
pub fn erase_last(name: &str, pattern: &str) -> String {
    match name.rfind(pattern) {
        Some(pos) if !pattern.is_empty() => {
            format!("{}{}", &name[..pos], &name[pos + pattern.len()..])
        }
        _ => name.to_string(),
    }
}

/// Publishing side of a transport.
pub trait PublisherPlugin: Send {
    /// Name of the transport, e.g. `raw`.
    fn transport_name(&self) -> String;

    /// Advertise the transport topic derived from `base_topic`.
    fn advertise(
        &mut self,
        nh: &NodeHandle,
        base_topic: &str,
        queue_size: usize,
        callbacks: StatusCallbacks,
        latch: bool,
    ) -> TransportResult<()>;

    fn num_subscribers(&self) -> usize;

    /// Resolved transport topic, or `None` before advertising.
    fn topic(&self) -> Option<String>;

    fn publish(&self, message: &Arc<PointCloud2>) -> TransportResult<()>;

    fn shutdown(&mut self);
}

/// Subscribing side of a transport.
pub trait SubscriberPlugin: Send {
    fn transport_name(&self) -> String;

    /// Subscribe to the transport topic derived from `base_topic`. A second
    /// call replaces the previous subscription.
    fn subscribe(
        &mut self,
        nh: &NodeHandle,
        base_topic: &str,
        queue_size: usize,
        callback: PointCloudCallback,
        hints: &TransportHints,
    ) -> TransportResult<()>;

    fn topic(&self) -> Option<String>;

    fn num_publishers(&self) -> usize;

    fn shutdown(&mut self);
}

/// Publishes point clouds to one particular subscriber of a transport topic.
pub struct SingleSubscriberPublisher<'a> {
    subscriber_name: &'a str,
    topic: &'a str,
    num_subscribers: Box<dyn Fn() -> usize + 'a>,
    publish: Box<dyn Fn(&Arc<PointCloud2>) -> TransportResult<()> + 'a>,
}

impl<'a> SingleSubscriberPublisher<'a> {
    pub fn new(
        subscriber_name: &'a str,
        topic: &'a str,
        num_subscribers: impl Fn() -> usize + 'a,
        publish: impl Fn(&Arc<PointCloud2>) -> TransportResult<()> + 'a,
    ) -> Self {
        Self {
            subscriber_name,
            topic,
            num_subscribers: Box::new(num_subscribers),
            publish: Box::new(publish),
        }
    }

    pub fn subscriber_name(&self) -> &str {
        self.subscriber_name
    }

    pub fn topic(&self) -> &str {
        self.topic
    }

    pub fn num_subscribers(&self) -> usize {
        (self.num_subscribers)()
    }

    pub fn publish(&self, message: &Arc<PointCloud2>) -> TransportResult<()> {
        (self.publish)(message)
    }
}

/// A transport that maps each point cloud to one message on
/// `<base_topic>/<transport>`.
pub trait SimplePublisherPlugin: Send + Sync + 'static {
    type Message: Message;

    fn transport_name(&self) -> String;

    fn topic_to_advertise(&self, base_topic: &str) -> String {
        format!("{base_topic}/{}", self.transport_name())
    }

    fn encode(&self, cloud: &Arc<PointCloud2>) -> eyre::Result<Arc<Self::Message>>;
}

/// Counterpart of [`SimplePublisherPlugin`].
pub trait SimpleSubscriberPlugin: Send + Sync + 'static {
    type Message: Message;

    fn transport_name(&self) -> String;

    fn topic_to_subscribe(&self, base_topic: &str) -> String {
        format!("{base_topic}/{}", self.transport_name())
    }

    fn decode(&self, message: &Arc<Self::Message>) -> eyre::Result<Arc<PointCloud2>>;
}

/// Adapts a [`SimplePublisherPlugin`] into a [`PublisherPlugin`].
pub struct SimplePublisher<P: SimplePublisherPlugin> {
    codec: Arc<P>,
    publisher: Option<TopicPublisher<P::Message>>,
}

impl<P: SimplePublisherPlugin> SimplePublisher<P> {
    pub fn new(codec: P) -> Self {
        Self {
            codec: Arc::new(codec),
            publisher: None,
        }
    }

    fn bind(&self, callback: Option<SubscriberStatusCallback>) -> Option<PeerCallback<P::Message>> {
        let callback = callback?;
        let codec = self.codec.clone();
        let bound: PeerCallback<P::Message> = Arc::new(move |peer: &SinglePeer<P::Message>| {
            let single = SingleSubscriberPublisher::new(
                peer.subscriber_name(),
                peer.topic(),
                || peer.num_subscribers(),
                |cloud| {
                    peer.publish(encode(codec.as_ref(), cloud)?);
                    Ok(())
                },
            );
            callback(&single);
        });
        Some(bound)
    }
}

fn encode<P: SimplePublisherPlugin>(
    codec: &P,
    cloud: &Arc<PointCloud2>,
) -> TransportResult<Arc<P::Message>> {
    codec.encode(cloud).map_err(|err| TransportError::Encode {
        transport: codec.transport_name(),
        reason: format!("{err:#}"),
    })
}

impl<P: SimplePublisherPlugin> PublisherPlugin for SimplePublisher<P> {
    fn transport_name(&self) -> String {
        self.codec.transport_name()
    }

    fn advertise(
        &mut self,
        nh: &NodeHandle,
        base_topic: &str,
        queue_size: usize,
        callbacks: StatusCallbacks,
        latch: bool,
    ) -> TransportResult<()> {
        let topic = self.codec.topic_to_advertise(base_topic);
        let peer_callbacks = PeerCallbacks {
            connect: self.bind(callbacks.connect),
            disconnect: self.bind(callbacks.disconnect),
        };

        self.shutdown();
        self.publisher = Some(nh.advertise(&topic, queue_size, latch, peer_callbacks)?);
        Ok(())
    }

    fn num_subscribers(&self) -> usize {
        self.publisher
            .as_ref()
            .map(|publisher| publisher.num_subscribers())
            .unwrap_or(0)
    }

    fn topic(&self) -> Option<String> {
        self.publisher
            .as_ref()
            .map(|publisher| publisher.topic().to_string())
    }

    fn publish(&self, message: &Arc<PointCloud2>) -> TransportResult<()> {
        let Some(publisher) = &self.publisher else {
            return Err(TransportError::NotAdvertised {
                transport: self.codec.transport_name(),
            });
        };

        publisher.publish(encode(self.codec.as_ref(), message)?);
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(mut publisher) = self.publisher.take() {
            publisher.shutdown();
        }
    }
}

/// Adapts a [`SimpleSubscriberPlugin`] into a [`SubscriberPlugin`].
pub struct SimpleSubscriber<S: SimpleSubscriberPlugin> {
    codec: Arc<S>,
    subscription: Option<TopicSubscription<S::Message>>,
}

impl<S: SimpleSubscriberPlugin> SimpleSubscriber<S> {
    pub fn new(codec: S) -> Self {
        Self {
            codec: Arc::new(codec),
            subscription: None,
        }
    }
}

impl<S: SimpleSubscriberPlugin> SubscriberPlugin for SimpleSubscriber<S> {
    fn transport_name(&self) -> String {
        self.codec.transport_name()
    }

    fn subscribe(
        &mut self,
        nh: &NodeHandle,
        base_topic: &str,
        queue_size: usize,
        callback: PointCloudCallback,
        _hints: &TransportHints,
    ) -> TransportResult<()> {
        let topic = self.codec.topic_to_subscribe(base_topic);
        let codec = self.codec.clone();

        self.shutdown();
        let subscription = nh.subscribe::<S::Message, _>(&topic, queue_size, move |message| {
            match codec.decode(&message) {
                Ok(cloud) => callback(cloud),
                Err(err) => warn!(
                    transport = %codec.transport_name(),
                    error = %format!("{err:#}"),
                    "Failed to decode point cloud"
                ),
            }
        })?;
        self.subscription = Some(subscription);
        Ok(())
    }

    fn topic(&self) -> Option<String> {
        self.subscription.as_ref().map(|sub| sub.topic().to_string())
    }

    fn num_publishers(&self) -> usize {
        self.subscription
            .as_ref()
            .map(|sub| sub.num_publishers())
            .unwrap_or(0)
    }

    fn shutdown(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.shutdown();
        }
    }
}
