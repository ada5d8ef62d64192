//! point-cloud-transport-node - Tools built on the point cloud transport
//! facade.
//!
//! # Configuration
//!
//! A YAML file (see `config/example.yaml`) specifies:
//! - The node name, possibly with a namespace
//! - Extra plugin manifests declaring transports
//! - Parameters to set before any topic is created, such as
//!   `<topic>/disable_pub_plugins`
//! - An optional republisher bridging one transport to others
//!
//! The `list_transports` binary prints which declared transports can be
//! loaded and why the others cannot.

pub mod config;
pub mod node;
pub mod report;
pub mod republish;

pub use config::{Config, RepublishConfig};
pub use node::TransportNode;
pub use report::{
    PluginReport, PluginStatus, TransportReport, TransportTable, describe_transports, render,
};
pub use republish::Republisher;
