/// Errors that can occur while reconstructing an image from a raw transfer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RawError {
    /// The raw buffer length does not match the packed size of the declared sensor.
    #[error("size mismatch (expected {expected} bytes, got {actual})")]
    SizeMismatch { expected: usize, actual: usize },

    /// The color-filter tiling is not one of the recognised forms.
    #[error("unsupported filter pattern '{0}'")]
    UnsupportedPattern(String),

    /// The transfer format tag is not recognised.
    #[error("unsupported format '{0}'")]
    UnsupportedFormat(String),

    /// Width or height is zero, or the pixel count overflows.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
}

pub type Result<T> = std::result::Result<T, RawError>;
