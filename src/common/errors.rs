use thiserror::Error;

/// Errors surfaced by the mixer engine and its construction path.
#[derive(Debug, Error)]
pub enum MixerError {
    /// The background asset is missing or could not be decoded to PCM.
    #[error("failed to decode background audio `{source_name}`: {reason}")]
    Decode { source_name: String, reason: String },

    /// The background asset decoded to zero samples.
    #[error("background audio decoded to an empty track")]
    EmptyTrack,

    #[error("invalid mixer configuration: {0}")]
    InvalidConfig(String),

    /// A foreground chunk does not match the configured PCM format.
    #[error("foreground chunk rejected: {0}")]
    FormatMismatch(String),

    #[error("mixer engine already started")]
    AlreadyStarted,

    /// The engine has been stopped; late pushes land here.
    #[error("mixer engine is stopped")]
    Stopped,
}

impl MixerError {
    pub fn decode(source_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Construction-time errors prevent the call leg from starting at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Decode { .. } | Self::EmptyTrack | Self::InvalidConfig(_)
        )
    }
}

/// A failed write to a network sink.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed by remote")]
    Closed,

    #[error("transport send timed out after {0} ms")]
    Timeout(u64),
}

pub type MixerResult<T> = std::result::Result<T, MixerError>;
