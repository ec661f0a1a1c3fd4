use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// No `image` field, or the field carried no bytes.
    #[error("no image uploaded")]
    MissingInput,

    #[error("only one image may be uploaded per request")]
    DuplicateImage,

    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("invalid caption count: {0}")]
    InvalidVariantCount(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("upload exceeds the size limit")]
    TooLarge,

    #[error("failed to save image")]
    Storage(#[source] std::io::Error),

    #[error("failed to generate captions: {0}")]
    Inference(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captions: Option<Vec<String>>,
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingInput
            | AppError::DuplicateImage
            | AppError::InvalidFilename(_)
            | AppError::InvalidVariantCount(_)
            | AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::TooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Storage(_) | AppError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::MissingInput => "missing_image",
            AppError::DuplicateImage => "duplicate_image",
            AppError::InvalidFilename(_) => "invalid_filename",
            AppError::InvalidVariantCount(_) => "invalid_variant_count",
            AppError::MalformedRequest(_) => "malformed_request",
            AppError::TooLarge => "payload_too_large",
            AppError::Storage(_) => "save_failed",
            AppError::Inference(_) => "inference_failed",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            // Display for Storage never includes the io error text.
            error: self.to_string(),
            code: self.code(),
            captions: matches!(self, AppError::Inference(_)).then(Vec::new),
        }
    }

    /// Emit the error at a level matching who is at fault.
    pub fn log(&self) {
        match self {
            AppError::Storage(source) => tracing::error!("{self}: {source}"),
            AppError::Inference(_) => tracing::error!("{self}"),
            _ => tracing::debug!("client error: {self}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.log();
        (self.status_code(), Json(self.body())).into_response()
    }
}
