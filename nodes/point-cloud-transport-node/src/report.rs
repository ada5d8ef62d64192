//! Status report of the declared transports.

use indexmap::IndexSet;
use point_cloud_transport::{
    ClassLoader, LoaderError, PointCloudTransport,
    plugin::{PUBLISHER_SUFFIX, SUBSCRIBER_SUFFIX, erase_last},
};
use std::fmt;

/// Whether one plugin class of a transport can be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginStatus {
    Loadable,
    NotDeclared,
    LibraryNotFound { library: String },
    CreateFailed { reason: String },
}

impl PluginStatus {
    pub fn is_loadable(&self) -> bool {
        matches!(self, Self::Loadable)
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loadable => write!(f, "loadable"),
            Self::NotDeclared => write!(f, "not declared"),
            Self::LibraryNotFound { library } => write!(f, "library '{library}' not found"),
            Self::CreateFailed { reason } => write!(f, "failed to create: {reason}"),
        }
    }
}

/// One side of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginReport {
    pub class: String,
    pub library: Option<String>,
    pub description: String,
    pub status: PluginStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReport {
    pub name: String,
    pub publisher: PluginReport,
    pub subscriber: PluginReport,
}

impl TransportReport {
    /// Both the publisher and the subscriber can be instantiated.
    pub fn is_available(&self) -> bool {
        self.publisher.status.is_loadable() && self.subscriber.status.is_loadable()
    }
}

/// Describe every transport with a declared publisher or subscriber class,
/// in declaration order.
pub fn describe_transports(pct: &PointCloudTransport) -> Vec<TransportReport> {
    let pub_loader = pct.publisher_loader();
    let sub_loader = pct.subscriber_loader();

    let mut names = IndexSet::new();
    for class in pub_loader.declared_classes() {
        names.insert(erase_last(&class, PUBLISHER_SUFFIX));
    }
    for class in sub_loader.declared_classes() {
        names.insert(erase_last(&class, SUBSCRIBER_SUFFIX));
    }

    names
        .into_iter()
        .map(|name| TransportReport {
            publisher: plugin_report(pub_loader, &format!("{name}{PUBLISHER_SUFFIX}")),
            subscriber: plugin_report(sub_loader, &format!("{name}{SUBSCRIBER_SUFFIX}")),
            name,
        })
        .collect()
}

fn plugin_report<B: ?Sized>(loader: &ClassLoader<B>, class: &str) -> PluginReport {
    let description = loader.class_description(class);
    let status = match loader.create_instance(class) {
        Ok(_) => PluginStatus::Loadable,
        Err(LoaderError::ClassNotDeclared { .. }) => PluginStatus::NotDeclared,
        Err(LoaderError::LibraryLoad { library, .. }) => PluginStatus::LibraryNotFound { library },
        Err(LoaderError::CreateClass { reason, .. }) => PluginStatus::CreateFailed { reason },
    };

    PluginReport {
        class: class.to_string(),
        library: description.map(|plugin| plugin.library.clone()),
        description: description
            .map(|plugin| plugin.description.clone())
            .unwrap_or_default(),
        status,
    }
}

/// Render reports the way `list_transports` prints them.
pub fn render(reports: &[TransportReport]) -> String {
    TransportTable(reports).to_string()
}

/// Text layout of a set of transport reports.
pub struct TransportTable<'a>(pub &'a [TransportReport]);

impl fmt::Display for TransportTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Declared transports:")?;
        for report in self.0 {
            if report.is_available() {
                writeln!(f, "{}", report.name)?;
            } else {
                writeln!(f, "{} (*): Not available.", report.name)?;
            }
        }

        writeln!(f)?;
        writeln!(f, "Details:")?;
        for report in self.0 {
            writeln!(f, "----------")?;
            writeln!(f, "\"{}\"", report.name)?;
            for (side, plugin) in [("Publisher", &report.publisher), ("Subscriber", &report.subscriber)] {
                writeln!(f, " - {side} ({}): {}", plugin.class, plugin.status)?;
                if let Some(library) = &plugin.library {
                    writeln!(f, "      Provided by library: {library}")?;
                }
                if !plugin.description.is_empty() {
                    writeln!(f, "      {}", plugin.description)?;
                }
            }
        }
        Ok(())
    }
}
