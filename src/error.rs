//! Error types for rasterblock

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Boxed error returned by user block callbacks
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for rasterblock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while setting up or running a block job
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing grid inputs, incompatible projections, invalid window/overlap
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operating system I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure reported by the raster I/O collaborator for a specific file
    #[error("Raster I/O error on {}: {message}", .path.display())]
    Raster { path: PathBuf, message: String },

    /// A buffer was resolved against a block that never registered it
    #[error("Lookup error: {0}")]
    Lookup(String),

    /// Block-local state queried before the context was specialized
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The user transformation failed
    #[error("Callback error: {0}")]
    Callback(CallbackError),

    /// A distributed participant failed or is unreachable
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Failure while processing one block
    #[error("Block ({xblock}, {yblock}) failed: {source}")]
    Block {
        xblock: usize,
        yblock: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a Configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a Raster error for the given file.
    pub fn raster(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Raster {
            path: path.as_ref().to_path_buf(),
            message: msg.into(),
        }
    }

    /// Create a Lookup error.
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create an InvalidState error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Create a Callback error from a message.
    pub fn callback(msg: impl Into<String>) -> Self {
        let message: String = msg.into();
        Self::Callback(message.into())
    }

    /// Create a Dispatch error.
    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }

    /// Attaches a block index to an error raised while processing that block.
    pub fn in_block(self, xblock: usize, yblock: usize) -> Self {
        match self {
            Error::Block { .. } => self,
            other => Error::Block {
                xblock,
                yblock,
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through block context.
    pub fn root(&self) -> &Error {
        match self {
            Error::Block { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::configuration("overlap too large");
        assert_eq!(err.to_string(), "Configuration error: overlap too large");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_raster_error_names_file() {
        let err = Error::raster("/data/ramp1.raw", "short read");
        let text = err.to_string();
        assert!(text.contains("ramp1.raw"));
        assert!(text.contains("short read"));
    }

    #[test]
    fn test_block_context_wraps_once() {
        let err = Error::lookup("missing").in_block(2, 3).in_block(9, 9);
        match &err {
            Error::Block { xblock, yblock, .. } => assert_eq!((*xblock, *yblock), (2, 3)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(err.root(), Error::Lookup(_)));
        assert!(err.to_string().contains("(2, 3)"));
    }

    #[test]
    fn test_callback_error_from_message() {
        let err = Error::callback("bad pixel");
        assert!(err.to_string().contains("bad pixel"));
    }
}
