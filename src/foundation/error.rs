/// Convenience result type used across the export pipeline.
pub type ExportResult<T> = Result<T, ExportError>;

/// Which encoder an [`ExportError::Encoder`] refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// The H.264/HEVC video encoder.
    Video,
    /// The AAC audio encoder.
    Audio,
}

impl std::fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// Pipeline stage an error is attributed to, used for user-facing status strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportStage {
    /// Fetching or decoding audio sources.
    AudioDecode,
    /// Validating or configuring encoders.
    EncoderConfig,
    /// Encoding frames or audio windows.
    Encoding,
    /// Assembling the MP4 container.
    Muxing,
    /// The runtime lacks a required capability.
    Environment,
    /// Worker thread failures (panics, lost channels).
    Worker,
    /// Invalid input or misuse of the API.
    Input,
    /// The job was cancelled by the caller.
    Cancelled,
}

impl ExportStage {
    /// Human-readable status string naming the failed stage.
    pub fn status_message(self) -> &'static str {
        match self {
            Self::AudioDecode => "export failed while decoding audio sources",
            Self::EncoderConfig => "export failed: this device cannot encode the requested format",
            Self::Encoding => "export failed while encoding",
            Self::Muxing => "export failed while writing the MP4 file",
            Self::Environment => "export failed: this environment lacks media encoding support",
            Self::Worker => "export failed: a background worker stopped unexpectedly",
            Self::Input => "export failed: invalid export settings",
            Self::Cancelled => "export cancelled",
        }
    }
}

/// Top-level error taxonomy of the export pipeline.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    /// Invalid user-provided settings or project data.
    #[error("validation error: {0}")]
    Validation(String),

    /// One audio source could not be fetched. Soft failure inside the mixer.
    #[error("failed to fetch audio source '{source_ref}': {reason}")]
    FetchFailed {
        /// URL or path of the source.
        source_ref: String,
        /// Status line or IO error.
        reason: String,
    },

    /// One audio source could not be decoded. Soft failure inside the mixer.
    #[error("failed to decode audio source '{source_ref}': {reason}")]
    DecodeFailed {
        /// URL or path of the source.
        source_ref: String,
        /// Decoder diagnostics.
        reason: String,
    },

    /// Audio sources were supplied but none of them could be decoded.
    #[error("none of the {attempted} audio sources could be decoded")]
    NoDecodableSources {
        /// Number of sources that were attempted.
        attempted: usize,
    },

    /// The runtime lacks a capability the pipeline needs.
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// The requested encoder configuration is not supported by the backend.
    #[error("unsupported {encoder} encoder config: {reason}")]
    UnsupportedEncoderConfig {
        /// Encoder that rejected the configuration.
        encoder: EncoderKind,
        /// Why the configuration was rejected.
        reason: String,
    },

    /// An encoder failed while running.
    #[error("{encoder} encoder error: {message}")]
    Encoder {
        /// Failing encoder.
        encoder: EncoderKind,
        /// Encoder diagnostics.
        message: String,
    },

    /// The container could not be assembled.
    #[error("mux error: {0}")]
    Mux(String),

    /// `finish` was called without any video frame having been submitted.
    #[error("no video frames were submitted before finish")]
    NoVideoFrames,

    /// The finalized container was empty despite a successful flush.
    #[error("encoding produced an empty output file")]
    EmptyOutput,

    /// An operation was invoked in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A worker thread panicked.
    #[error("{worker} worker panicked: {message}")]
    WorkerPanicked {
        /// Worker name.
        worker: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// A worker's message channel closed before it replied.
    #[error("{0} worker disconnected before replying")]
    WorkerDisconnected(String),

    /// The job was cancelled through its [`CancelToken`](crate::CancelToken).
    #[error("export cancelled")]
    Cancelled,

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExportError {
    /// Build a [`ExportError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`ExportError::Encoder`] value.
    pub fn encoder(encoder: EncoderKind, msg: impl Into<String>) -> Self {
        Self::Encoder {
            encoder,
            message: msg.into(),
        }
    }

    /// Build a [`ExportError::UnsupportedEncoderConfig`] value.
    pub fn unsupported_config(encoder: EncoderKind, reason: impl Into<String>) -> Self {
        Self::UnsupportedEncoderConfig {
            encoder,
            reason: reason.into(),
        }
    }

    /// Build a [`ExportError::Mux`] value.
    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux(msg.into())
    }

    /// Build a [`ExportError::InvalidState`] value.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Return `true` for per-source failures the mixer skips instead of aborting.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::FetchFailed { .. } | Self::DecodeFailed { .. })
    }

    /// Stage this error is attributed to.
    pub fn stage(&self) -> ExportStage {
        match self {
            Self::Validation(_) | Self::InvalidState(_) => ExportStage::Input,
            Self::FetchFailed { .. } | Self::DecodeFailed { .. } | Self::NoDecodableSources { .. } => {
                ExportStage::AudioDecode
            }
            Self::UnsupportedEnvironment(_) => ExportStage::Environment,
            Self::UnsupportedEncoderConfig { .. } => ExportStage::EncoderConfig,
            Self::Encoder { .. } | Self::NoVideoFrames => ExportStage::Encoding,
            Self::Mux(_) | Self::EmptyOutput => ExportStage::Muxing,
            Self::WorkerPanicked { .. } | Self::WorkerDisconnected(_) | Self::Other(_) => {
                ExportStage::Worker
            }
            Self::Cancelled => ExportStage::Cancelled,
        }
    }

    /// Readable status line: the failed stage followed by the error detail.
    pub fn status_message(&self) -> String {
        match self {
            Self::Cancelled => ExportStage::Cancelled.status_message().to_owned(),
            other => format!("{} ({other})", other.stage().status_message()),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
