use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_UPLOAD_DIR: &str = "static/uploads";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 64;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config value `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("failed to load tokenizer from {path}: {reason}")]
    Tokenizer { path: PathBuf, reason: String },
    #[error("failed to prepare upload directory {path}: {source}")]
    UploadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to build inference client: {0}")]
    Client(String),
}

/// Decoding parameters handed to the captioning model on every call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CaptionRequestConfig {
    pub max_length: u32,
    pub num_beams: u32,
    pub num_return_sequences: u32,
    pub temperature: f32,
}

impl CaptionRequestConfig {
    pub fn new(
        max_length: u32,
        num_beams: u32,
        num_return_sequences: u32,
        temperature: f32,
    ) -> Result<Self, ConfigError> {
        if max_length == 0 {
            return Err(invalid("max_length", "must be a positive integer"));
        }
        if num_beams == 0 {
            return Err(invalid("num_beams", "must be a positive integer"));
        }
        if num_return_sequences == 0 {
            return Err(invalid("num_return_sequences", "must be a positive integer"));
        }
        if num_return_sequences > num_beams {
            return Err(invalid(
                "num_return_sequences",
                format!("{num_return_sequences} exceeds num_beams ({num_beams})"),
            ));
        }
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(invalid("temperature", "must be a positive number"));
        }

        Ok(Self {
            max_length,
            num_beams,
            num_return_sequences,
            temperature,
        })
    }

    /// Copy of this config asking the model for `k` sequences.
    pub fn with_return_sequences(&self, k: u32) -> Self {
        Self {
            num_return_sequences: k,
            ..*self
        }
    }
}

/// On-disk layout of `config.json`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    processor_path: PathBuf,
    model_path: String,
    max_length: u32,
    num_beams: u32,
    num_return_sequences: u32,
    temperature: f32,
    upload_dir: Option<PathBuf>,
    bind_addr: Option<String>,
    max_upload_bytes: Option<usize>,
    queue_capacity: Option<usize>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Path of the `tokenizer.json` used to turn token ids back into text.
    pub processor_path: PathBuf,
    /// Inference endpoint serving the captioning model.
    pub model_url: reqwest::Url,
    pub caption: CaptionRequestConfig,
    pub upload_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub max_upload_bytes: usize,
    pub queue_capacity: usize,
    pub request_timeout: Duration,
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
                path: PathBuf::new(),
                source,
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let caption = CaptionRequestConfig::new(
            raw.max_length,
            raw.num_beams,
            raw.num_return_sequences,
            raw.temperature,
        )?;

        if raw.processor_path.as_os_str().is_empty() {
            return Err(invalid("processor_path", "must not be empty"));
        }

        let model_url = reqwest::Url::parse(&raw.model_path)
            .map_err(|e| invalid("model_path", format!("not a valid URL: {e}")))?;
        if !matches!(model_url.scheme(), "http" | "https") {
            return Err(invalid("model_path", "must be an http(s) URL"));
        }

        let bind_addr: SocketAddr = raw
            .bind_addr
            .as_deref()
            .unwrap_or(DEFAULT_BIND_ADDR)
            .parse()
            .map_err(|e| invalid("bind_addr", format!("{e}")))?;

        let max_upload_bytes = raw.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        if max_upload_bytes == 0 {
            return Err(invalid("max_upload_bytes", "must be a positive integer"));
        }

        let queue_capacity = raw.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(invalid("queue_capacity", "must be a positive integer"));
        }

        let timeout_secs = raw
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be a positive integer"));
        }

        Ok(Self {
            processor_path: raw.processor_path,
            model_url,
            caption,
            upload_dir: raw
                .upload_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            bind_addr,
            max_upload_bytes,
            queue_capacity,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.into(),
    }
}
