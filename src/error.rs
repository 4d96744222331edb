pub type AppResult<T> = Result<T, AppError>;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("failed to open archive: {0}")]
    ArchiveOpen(String),
    #[error("unrecognized archive type: {0}")]
    UnknownArchiveType(String),
    #[error("entry not found in archive: {0}")]
    EntryNotFound(String),
    #[error("failed to decode entry {entry}: {reason}")]
    Decode { entry: String, reason: String },
    #[error("page {0} contains no raster image")]
    NoImageOnPage(String),
    #[error("document is encrypted and empty-password decryption failed")]
    EncryptedUnsupported,
    #[error("no displayable entries in archive")]
    EmptyAlbum,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<std::io::Error> for AppError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            source,
            context: "I/O operation failed".to_string(),
        }
    }
}

impl AppError {
    pub fn io_with_context(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            source,
            context: context.into(),
        }
    }

    pub fn archive_open(message: impl Into<String>) -> Self {
        Self::ArchiveOpen(message.into())
    }

    pub fn decode(entry: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            entry: entry.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
