use thiserror::Error;

/// Failures surfaced to the caller of a traceroute request.
/// Persistence problems are not represented here; they never reach the caller.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Target address or domain is required")]
    MissingTarget,

    #[error("Invalid target format: {0}. Please provide a valid IPv4, IPv6 address, or domain name")]
    InvalidTarget(String),

    #[error("Unsupported operating system: {0}")]
    UnsupportedPlatform(String),

    #[error("Traceroute tool not found: {0}")]
    ToolMissing(String),

    #[error("Traceroute error: {0}")]
    ToolFailed(String),

    #[error("Traceroute timed out after {0} seconds")]
    Timeout(u64),

    #[error("Traceroute output exceeded {0} bytes")]
    OutputTooLarge(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Whether the request was rejected before any process was started
    pub fn is_rejection(&self) -> bool {
        matches!(self, TraceError::MissingTarget | TraceError::InvalidTarget(_))
    }
}
