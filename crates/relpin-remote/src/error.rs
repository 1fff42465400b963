//! Mappings from HTTP failures into the pipeline error types.
//!
//! The capability traits speak [`VendorError`]; everything reqwest-shaped
//! is flattened here so the adapters stay free of transport plumbing.

use relpin_core::{PipelineError, VendorError};

/// A request that never produced a response: connect, TLS, or body error.
pub(crate) fn transport(err: reqwest::Error) -> VendorError {
    VendorError::Http(err.to_string())
}

/// Same failure on a version-feed fetch, which crosses the pipeline error
/// boundary instead of the vendor one.
pub(crate) fn feed_transport(err: reqwest::Error) -> PipelineError {
    PipelineError::Vendor(transport(err))
}

/// Consume a non-success response into an API rejection, keeping a bounded
/// slice of the body for the log line.
pub(crate) async fn rejection(service: &str, response: reqwest::Response) -> VendorError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail: String = body.trim().chars().take(300).collect();
    VendorError::Api {
        service: service.to_string(),
        detail: format!("{status}: {detail}"),
    }
}
