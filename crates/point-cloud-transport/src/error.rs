use crate::{loader::LoaderError, node::BusError};

/// Errors raised by transport plugins and the handles built on them.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("unable to load plugin for transport '{transport}': {source}")]
    TransportLoad {
        transport: String,
        #[source]
        source: LoaderError,
    },

    #[error("no plugins found for topic '{topic}'; check the declared publisher plugins")]
    NoPlugins { topic: String },

    #[error("transport '{transport}' has not been advertised")]
    NotAdvertised { transport: String },

    #[error("transport '{transport}' failed to encode the point cloud: {reason}")]
    Encode { transport: String, reason: String },
}

pub type TransportResult<T> = Result<T, TransportError>;
