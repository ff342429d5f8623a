use thiserror::Error;

/// Failures raised while configuring or running an annotation purge.
#[derive(Debug, Error)]
pub(crate) enum PurgeError {
    /// Invalid or incomplete rule set; detected before any artifact is read.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("invalid regular expression {pattern:?}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// The input could not be parsed as a class file or archive.
    #[error("malformed artifact: {0}")]
    MalformedArtifact(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PurgeError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedArtifact(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<zip::result::ZipError> for PurgeError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(err) => Self::Io(err),
            other => Self::MalformedArtifact(format!("unreadable archive: {other}")),
        }
    }
}

pub(crate) type PurgeResult<T> = std::result::Result<T, PurgeError>;
