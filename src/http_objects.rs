use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::{IntoParams, ToSchema};

use crate::{error::BlockUploadError, upload::UploadState};

#[derive(Debug, ToSchema, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(skip)]
    status_code: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<BlockUploadError> for ApiError {
    fn from(e: BlockUploadError) -> Self {
        Self::new(e.status_code(), &e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status_code.is_server_error() {
            error!("API Error: {} - {}", self.status_code, self.message);
        } else {
            debug!("API Error: {} - {}", self.status_code, self.message);
        }
        (self.status_code, self.message).into_response()
    }
}

#[derive(Debug, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BlockUploadParams {
    /// `true` completes the upload; anything else starts it.
    #[serde(rename = "uploadComplete")]
    pub upload_complete: Option<String>,
}

impl BlockUploadParams {
    pub fn is_complete_request(&self) -> bool {
        self.upload_complete.as_deref() == Some("true")
    }
}

#[derive(Debug, Default, Serialize, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BlockFileParams {
    /// Destination of the file inside the block: `index` or `chunks/NNNNNN`.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BlockUploadResult {
    Uploading,
    Complete,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BlockUploadCheck {
    pub result: BlockUploadResult,
}

impl BlockUploadCheck {
    /// `None` for blocks whose upload never started.
    pub fn from_state(state: UploadState) -> Option<Self> {
        let result = match state {
            UploadState::NotStarted => return None,
            UploadState::InProgress => BlockUploadResult::Uploading,
            UploadState::Complete => BlockUploadResult::Complete,
        };
        Some(Self { result })
    }
}
