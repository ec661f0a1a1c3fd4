//! Caption generation.
//!
//! The captioning model itself lives outside this crate and is reached through
//! [`CaptionModel`]. [`CaptionRequester`] is the handle request handlers hold; it
//! forwards jobs to a single worker that owns the model, so inference calls never
//! overlap.

mod remote;
mod worker;

use std::future::Future;

use image::RgbImage;

use crate::config::CaptionRequestConfig;

pub use remote::RemoteCaptionModel;
pub use worker::CaptionRequester;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("inference request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("inference endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to decode tokens: {0}")]
    Decode(String),
}

/// A pretrained image-to-text model.
///
/// `generate` takes `&mut self`: implementations may keep per-call state and are
/// only ever driven by one caller at a time.
pub trait CaptionModel: Send + 'static {
    /// Returns token sequences in the model's ranking order, best first.
    fn generate(
        &mut self,
        image: &RgbImage,
        params: &CaptionRequestConfig,
    ) -> impl Future<Output = Result<Vec<Vec<u32>>, ModelError>> + Send;

    /// Turns one token sequence into text with special tokens removed.
    fn decode(&self, tokens: &[u32]) -> Result<String, ModelError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptionOutcome {
    Captions(Vec<String>),
    /// Inference succeeded but produced nothing, or zero captions were requested.
    Empty,
    Failed(String),
}

impl CaptionOutcome {
    fn from_captions(captions: Vec<String>) -> Self {
        if captions.is_empty() {
            CaptionOutcome::Empty
        } else {
            CaptionOutcome::Captions(captions)
        }
    }
}
