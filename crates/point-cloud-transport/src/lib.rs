//! Publish and subscribe point clouds through pluggable transports.
//!
//! A [`PointCloudTransport`] owns two plugin class loaders, one for
//! publisher plugins and one for subscriber plugins. Advertising a base topic
//! creates a [`Publisher`] that fans each cloud out to every enabled
//! transport; subscribing creates a [`Subscriber`] bound to the single
//! transport chosen by [`TransportHints`].
//!
//! # Transports
//!
//! A transport named `foo` consists of the plugin classes `foo_pub` and
//! `foo_sub`. Classes are declared by a [`PluginManifest`] and implemented by
//! a [`PluginLibrary`]; a declared class whose library is missing, or whose
//! factory fails, is *declared* but not *loadable*:
//!
//! ```
//! use point_cloud_transport::{
//!     NodeHandle, PluginManifest, PointCloudTransport, TransportPlugins,
//! };
//!
//! let manifest = PluginManifest::from_yaml(
//!     r#"
//! plugins:
//!   - name: draco_sub
//!     library: draco_point_cloud_transport
//!     base_class: point_cloud_transport::SubscriberPlugin
//! "#,
//! )?;
//!
//! let plugins = TransportPlugins::builtin().with_manifest(manifest);
//! let pct = PointCloudTransport::with_plugins(NodeHandle::new("probe"), plugins);
//!
//! assert_eq!(pct.declared_transports(), vec!["raw", "draco"]);
//! assert_eq!(pct.loadable_transports(), vec!["raw"]);
//! # Ok::<(), eyre::Report>(())
//! ```
//!
//! Only the `raw` transport ships with this crate. Compressing transports
//! implement [`SimplePublisherPlugin`] and [`SimpleSubscriberPlugin`] (or the
//! full [`PublisherPlugin`] and [`SubscriberPlugin`] traits) and register
//! their libraries through [`TransportPlugins`].
//!
//! # Delivery
//!
//! Topics live on the in-process bus behind [`NodeHandle`]. Messages are
//! queued per subscription and callbacks run when the bus is spun with
//! [`NodeHandle::spin_once`] or [`NodeHandle::spin`].

mod error;
pub mod loader;
pub mod message;
pub mod node;
pub mod plugin;
mod publisher;
pub mod raw;
mod subscriber;
mod transport;
mod transport_hints;

pub use error::{TransportError, TransportResult};
pub use loader::{ClassLoader, LoaderError, PluginDescription, PluginLibrary, PluginManifest};
pub use message::{Header, Message, PointCloud2, PointField, Time};
pub use node::{BusError, NodeHandle, PeerCallbacks, SinglePeer, TopicPublisher, TopicSubscription};
pub use plugin::{
    PointCloudCallback, PubLoader, PublisherPlugin, SimplePublisher, SimplePublisherPlugin,
    SimpleSubscriber, SimpleSubscriberPlugin, SingleSubscriberPublisher, StatusCallbacks,
    SubLoader, SubscriberPlugin, SubscriberStatusCallback,
};
pub use publisher::{AdvertiseOptions, Publisher, TrackedObject};
pub use subscriber::{Subscriber, transport_specific_base};
pub use transport::{PACKAGE, PointCloudTransport, TransportPlugins};
pub use transport_hints::{DEFAULT_PARAMETER, DEFAULT_TRANSPORT, TransportHints};
