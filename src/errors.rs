//! Configuration Watch Engine Error Hierarchy
//!
//! Errors are grouped by the layer that raises them: the remote config
//! service boundary, the watch engine itself, and endpoint balancing.
//!
//! Transient failures inside an established watch loop never surface
//! here; they are logged and retried by the loop. A missing remote file
//! is not an error either: `fetch_file` reports it as `Ok(None)`.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Remote config service call failures (transport, decode, status)
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Watch setup, cancellation and protocol failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Endpoint selection failures
    #[error(transparent)]
    Balancer(#[from] BalancerError),

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// HTTP transport failures (connect, timeout, body read)
    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Malformed response payload
    #[error("Failed to decode {operation} response: {source}")]
    Decode {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Service answered with a code the operation does not accept
    #[error("{operation} rejected by server: code={code}, info={info}")]
    Status {
        operation: &'static str,
        code: u32,
        info: String,
    },

    /// DNS lookup failure for a configured endpoint
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// Simulated outage of an in-process service
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Initial fetch or listing failed while creating a watch
    #[error("Failed to set up watch for {file}: {source}")]
    Setup {
        file: String,
        #[source]
        source: Box<Error>,
    },

    /// The caller's cancellation token fired
    #[error("Watch cancelled")]
    Cancelled,

    /// The owning client or coordinator is shutting down
    #[error("Watch engine is shutting down")]
    ShuttingDown,

    /// The service reported a watch status the engine does not recognise
    #[error("Unrecognized watch status from server: code={code}, info={info}")]
    Protocol { code: u32, info: String },

    /// Wildcard file name could not be turned into a pattern
    #[error("Invalid wildcard pattern {pattern}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("At least one file name is required")]
    EmptyFileList,

    #[error("File name must not be empty")]
    EmptyFileName,

    #[error("At least one key is required")]
    EmptyKeySet,

    /// Revision signal dropped while a waiter was blocked
    #[error("Revision signal closed")]
    SignalClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum BalancerError {
    /// `select` called on a balancer without nodes
    #[error("No backend node available")]
    EmptyNodeSet,

    /// Nodes must carry a positive weight
    #[error("Invalid weight {weight} for node {endpoint}")]
    InvalidWeight { endpoint: String, weight: i64 },

    /// Acknowledgement for a node the balancer does not know
    #[error("Unknown node {0}")]
    UnknownNode(String),
}

impl Error {
    /// True when the error came from a cancelled or shut-down watch
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Watch(WatchError::Cancelled) | Error::Watch(WatchError::ShuttingDown))
    }
}
