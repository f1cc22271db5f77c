//! Error type shared by the backend, converter and pipeline.

/// Error type for decoding operations
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("No decoding context")]
    NoContext,
    #[error("Failed to open container: {0}")]
    OpenFailed(String),
    #[error("No video or audio stream found")]
    NoStreamFound,
    #[error("No decoder found for codec {0}")]
    NoDecoderFound(String),
    #[error("Failed to open decoder: {0}")]
    DecoderOpen(String),
    #[error("Allocation failed: {0}")]
    AllocFailed(String),
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),
    #[error("Seek failed: {0}")]
    SeekFailed(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Read failed: {0}")]
    Read(String),
    /// Not a failure: the stream has been fully delivered.
    #[error("End of stream")]
    EndOfStream,
}

impl AdapterError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn conversion(message: impl Into<String>) -> Self {
        Self::ConversionFailed(message.into())
    }

    /// Returns true if this is the end-of-stream signal.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
