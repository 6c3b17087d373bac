use axum::http::StatusCode;
use ulid::Ulid;

/// Failures of the block upload operations.
///
/// Client errors carry a message that is safe to return verbatim. Storage
/// failures keep their cause for logging only; the caller sees a generic
/// message.
#[derive(Debug, thiserror::Error)]
pub enum BlockUploadError {
    #[error("invalid block ID")]
    InvalidIdentifier(String),

    #[error("invalid tenant ID")]
    InvalidTenant(String),

    #[error("missing or invalid file path")]
    MissingPath,

    #[error("meta.json is not allowed")]
    MetaFileNotAllowed,

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("file cannot be empty")]
    EmptyBody,

    #[error("malformed request body")]
    MalformedBody(#[source] serde_json::Error),

    #[error("unsupported external label(s): {}", .0.join(","))]
    UnsupportedLabels(Vec<String>),

    #[error("block already exists in object storage")]
    AlreadyComplete,

    #[error("upload of block {0} not started yet")]
    NotStarted(Ulid),

    #[error("internal server error")]
    StorageUnavailable(#[source] anyhow::Error),

    #[error("failed uploading block file to bucket")]
    UploadFailed(#[source] anyhow::Error),
}

impl BlockUploadError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier(_) |
            Self::InvalidTenant(_) |
            Self::MissingPath |
            Self::MetaFileNotAllowed |
            Self::InvalidPath(_) |
            Self::EmptyBody |
            Self::MalformedBody(_) |
            Self::UnsupportedLabels(_) |
            Self::NotStarted(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyComplete => StatusCode::CONFLICT,
            Self::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UploadFailed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
