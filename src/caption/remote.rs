use std::io::Cursor;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use super::{CaptionModel, ModelError};
use crate::config::{AppConfig, CaptionRequestConfig, ConfigError};

/// Longest slice of an error body kept for logs.
const MAX_ERROR_BODY: usize = 500;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    image: InlineImage,
    parameters: &'a CaptionRequestConfig,
}

#[derive(Serialize)]
struct InlineImage {
    mime_type: &'static str,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    sequences: Vec<Vec<u32>>,
}

/// BLIP-style captioner served over HTTP.
///
/// Generation (including beam search) happens on the inference server; this side only
/// ships the pixels and decodes the returned token ids with the model's tokenizer.
pub struct RemoteCaptionModel {
    client: reqwest::Client,
    endpoint: reqwest::Url,
    api_token: Option<String>,
    tokenizer: Tokenizer,
}

impl RemoteCaptionModel {
    pub fn new(
        endpoint: reqwest::Url,
        tokenizer: Tokenizer,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_token,
            tokenizer,
        })
    }

    pub fn from_config(config: &AppConfig, api_token: Option<String>) -> Result<Self, ConfigError> {
        let tokenizer =
            Tokenizer::from_file(&config.processor_path).map_err(|e| ConfigError::Tokenizer {
                path: config.processor_path.clone(),
                reason: e.to_string(),
            })?;

        Self::new(
            config.model_url.clone(),
            tokenizer,
            api_token,
            config.request_timeout,
        )
    }
}

fn encode_png(image: &RgbImage) -> Result<String, ModelError> {
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(general_purpose::STANDARD.encode(&png))
}

impl CaptionModel for RemoteCaptionModel {
    async fn generate(
        &mut self,
        image: &RgbImage,
        params: &CaptionRequestConfig,
    ) -> Result<Vec<Vec<u32>>, ModelError> {
        let payload = GenerateRequest {
            image: InlineImage {
                mime_type: "image/png",
                data: encode_png(image)?,
            },
            parameters: params,
        };

        tracing::debug!(
            "sending {}x{} image to {} ({:?})",
            image.width(),
            image.height(),
            self.endpoint,
            params
        );

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ModelError::Status { status, body });
        }

        let result: GenerateResponse = response.json().await?;
        Ok(result.sequences)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, ModelError> {
        self.tokenizer
            .decode(tokens, true)
            .map_err(|e| ModelError::Decode(e.to_string()))
    }
}
