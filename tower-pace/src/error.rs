/// Errors produced by the paced transport stack itself.
///
/// Failures of the underlying transport are never wrapped in this type; they
/// reach the caller exactly as the transport produced them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaceError {
    /// The caller's context, or the pacer's lifetime context, was canceled.
    #[error("Request canceled")]
    Canceled,

    /// The caller's deadline passed before the request could complete.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// A credential or user agent could not be encoded as a header value.
    #[error("Invalid value for header `{name}`")]
    InvalidHeader {
        /// The header that was being set.
        name: &'static str,
    },

    /// The built-in HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}
