//! Error types
//!
//! Crate-wide error type plus the domain errors raised by media handling
//! and the capture source. Per-viewer transport failures never surface
//! here: they are logged and end only the affected session.

use crate::hub::HubError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure (socket bind, capture input)
    Io(std::io::Error),
    /// Malformed media input
    Media(MediaError),
    /// Capture source failed to initialize or deliver
    Source(SourceError),
    /// Hub is no longer running
    Hub(HubError),
    /// Viewer transport failure
    Transport(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Source(e) => write!(f, "Source error: {}", e),
            Error::Hub(e) => write!(f, "Hub error: {}", e),
            Error::Transport(msg) => write!(f, "Transport error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Media(e) => Some(e),
            Error::Source(e) => Some(e),
            Error::Hub(e) => Some(e),
            Error::Transport(_) => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<SourceError> for Error {
    fn from(e: SourceError) -> Self {
        Error::Source(e)
    }
}

impl From<HubError> for Error {
    fn from(e: HubError) -> Self {
        Error::Hub(e)
    }
}

/// Media-level validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Coded frame has no bytes (no unit-type header available)
    EmptyFrame,
    /// Coded frame cannot be described by a 32-bit box length
    FrameTooLarge(usize),
    /// Parameter set is missing or too short to carry profile/level
    InvalidParameterSet,
    /// Box header or payload runs past the end of the buffer
    TruncatedBox,
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::EmptyFrame => write!(f, "Empty coded frame"),
            MediaError::FrameTooLarge(len) => write!(f, "Coded frame too large: {} bytes", len),
            MediaError::InvalidParameterSet => write!(f, "Invalid parameter set"),
            MediaError::TruncatedBox => write!(f, "Truncated box"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Capture source errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Input ended before both SPS and PPS were seen
    MissingParameterSets,
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::MissingParameterSets => {
                write!(f, "Input ended before SPS and PPS were received")
            }
        }
    }
}

impl std::error::Error for SourceError {}
