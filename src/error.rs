//! Error taxonomy for the Lambda backend.

/// Result alias used by the backend pipeline.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while setting up or running a Lambda-backed route.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The route carries no configuration under [`crate::options::NAMESPACE`].
    ///
    /// This is a routing decision (delegate to the fallback), not a failure to report.
    #[error("aws lambda: no extra config defined")]
    NoAdapterConfig,

    /// The namespace value is present but can't be turned into [`crate::options::Options`].
    #[error("aws lambda: unable to parse the defined extra config: {0}")]
    MalformedAdapterConfig(String),

    /// Reading the inbound request body failed.
    #[error("aws lambda: reading request body: {0}")]
    BodyRead(#[source] std::io::Error),

    /// Serializing the invocation payload failed.
    #[error("aws lambda: encoding payload: {0}")]
    PayloadEncode(#[source] serde_json::Error),

    /// The invocation transport failed. Propagated as reported by the invoker.
    #[error(transparent)]
    Invoke(anyhow::Error),

    /// The invocation returned a status other than exactly 200.
    #[error("aws lambda: bad status code ({})", display_status(.0))]
    BadStatusCode(Option<i32>),

    /// The function result is not a JSON object.
    #[error("aws lambda: decoding response: {0}")]
    ResponseDecode(#[source] serde_json::Error),

    /// The caller cancelled the request while the invocation was in flight.
    #[error("aws lambda: request cancelled")]
    Cancelled,

    /// The request deadline elapsed while the invocation was in flight.
    #[error("aws lambda: deadline exceeded")]
    DeadlineExceeded,
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "missing".to_string(),
    }
}
