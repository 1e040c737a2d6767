use crate::decode::BarcodeFormat;

/// Errors surfaced by the scanner's public operations.
///
/// A barcode that is simply not in view is never an error; it keeps the
/// scan loop going. Cancellation and timeouts arrive as
/// [`ScanOutcome`](crate::ScanOutcome) values instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("invalid scanner options: {0}")]
    InvalidOptions(&'static str),
    #[error("barcode format {0:?} is not supported by the configured reader")]
    UnsupportedFormat(BarcodeFormat),
    #[error("preview preset `{0}` is not loaded")]
    MissingPreset(&'static str),
    #[error("camera permission denied")]
    PermissionDenied,
    #[error("a scan session is already active")]
    SessionActive,
    #[error("scan session has been disposed")]
    Disposed,
    #[error("no camera device matches the request")]
    NoDevice,
    #[error("camera error: {0}")]
    Camera(String),
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
