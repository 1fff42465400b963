//! Error taxonomy for the reconciliation pipeline.

/// Errors crossing a capability-trait boundary (ticket store, code host,
/// CI runner, config repo host). Adapters map their transport errors into
/// this shape so the pipeline never sees vendor-specific types.
#[derive(Debug, thiserror::Error)]
pub enum VendorError {
    #[error("http transport error: {0}")]
    Http(String),

    #[error("{service} rejected the request: {detail}")]
    Api { service: String, detail: String },

    #[error("not found: {0}")]
    NotFound(String),
}

/// Pipeline errors. Every variant aborts the run; the distinction exists
/// for the operator reading the log, not for retry logic.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("upstream unavailable: {url} returned status {status}")]
    UpstreamUnavailable { url: String, status: u16 },

    #[error("malformed upstream data from {url}: {detail}")]
    MalformedUpstreamData { url: String, detail: String },

    #[error("git error: {0}")]
    Git(String),

    #[error("verification command `{command}` exited with code {code:?}")]
    VerificationFailed { command: String, code: Option<i32> },

    #[error("malformed deployment document: {0}")]
    MalformedDocument(String),

    #[error("vendor error: {0}")]
    Vendor(#[from] VendorError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type for capability-trait methods.
pub type VendorResult<T> = std::result::Result<T, VendorError>;
