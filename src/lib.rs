//! Upload an image, get back ranked captions from a pretrained captioning model.

pub mod caption;
pub mod config;
pub mod error;
pub mod page;
pub mod routes;
pub mod upload;

#[cfg(test)]
mod test_utils;

pub use caption::{CaptionModel, CaptionOutcome, CaptionRequester, RemoteCaptionModel};
pub use config::{AppConfig, CaptionRequestConfig, ConfigError};
pub use error::AppError;
pub use routes::{router, AppState};
pub use upload::{UploadStore, UploadedImage};
