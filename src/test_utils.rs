//! Shared fixtures for unit and handler tests.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::{ImageFormat, Rgb, RgbImage};

use crate::caption::{CaptionModel, ModelError};
use crate::config::CaptionRequestConfig;

/// Vocabulary shared by [`ScriptedModel`] and [`write_tokenizer`]. Ids 1-3 are special.
const VOCAB: &[&str] = &[
    "[UNK]", "[CLS]", "[SEP]", "[PAD]", "a", "dog", "on", "the", "beach", "running", "brown",
];

fn is_special(id: u32) -> bool {
    (1..=3).contains(&id)
}

enum Script {
    Ranked,
    Silent,
    Failing,
    PanicsOnce,
}

/// Deterministic stand-in for the captioning model.
///
/// Records how it was called so tests can assert on parameters, call counts and
/// whether calls ever overlapped.
pub struct ScriptedModel {
    script: Script,
    delay: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub seen_params: Arc<Mutex<Vec<CaptionRequestConfig>>>,
}

impl ScriptedModel {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: None,
            calls: Arc::default(),
            in_flight: Arc::default(),
            max_in_flight: Arc::default(),
            seen_params: Arc::default(),
        }
    }

    /// Always answers with the same three captions, best first:
    /// "a dog on the beach", "a dog running", "a brown dog".
    pub fn ranked() -> Self {
        Self::with_script(Script::Ranked)
    }

    /// Succeeds with no sequences.
    pub fn silent() -> Self {
        Self::with_script(Script::Silent)
    }

    /// Fails every call the way an unavailable inference server would.
    pub fn failing() -> Self {
        Self::with_script(Script::Failing)
    }

    /// Panics on its first call, then behaves like [`ScriptedModel::ranked`].
    pub fn panics_once() -> Self {
        Self::with_script(Script::PanicsOnce)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl CaptionModel for ScriptedModel {
    async fn generate(
        &mut self,
        _image: &RgbImage,
        params: &CaptionRequestConfig,
    ) -> Result<Vec<Vec<u32>>, ModelError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(self.script, Script::PanicsOnce) && call == 1 {
            panic!("scripted model failure");
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.seen_params.lock().unwrap().push(*params);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let ranked = vec![
            vec![1, 4, 5, 6, 7, 8, 2],
            vec![1, 4, 5, 9, 2, 3],
            vec![1, 4, 10, 5, 2],
        ];
        match self.script {
            Script::Ranked | Script::PanicsOnce => Ok(ranked
                .into_iter()
                .take(params.num_return_sequences as usize)
                .collect()),
            Script::Silent => Ok(Vec::new()),
            Script::Failing => Err(ModelError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "model is loading".into(),
            }),
        }
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, ModelError> {
        let words = tokens
            .iter()
            .filter(|id| !is_special(**id))
            .map(|id| {
                VOCAB
                    .get(*id as usize)
                    .copied()
                    .ok_or_else(|| ModelError::Decode(format!("unknown token id {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(words.join(" "))
    }
}

/// A small valid PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 128]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Writes a word-level `tokenizer.json` over [`VOCAB`] and returns its path.
pub fn write_tokenizer(dir: &tempfile::TempDir) -> PathBuf {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, word)| (word.to_string(), serde_json::json!(id)))
        .collect();
    let added_tokens: Vec<_> = (1..=3u32)
        .map(|id| {
            serde_json::json!({
                "id": id,
                "content": VOCAB[id as usize],
                "single_word": false,
                "lstrip": false,
                "rstrip": false,
                "normalized": false,
                "special": true
            })
        })
        .collect();
    let tokenizer = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": added_tokens,
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    });

    let path = dir.path().join("tokenizer.json");
    std::fs::write(&path, serde_json::to_vec(&tokenizer).unwrap()).unwrap();
    path
}
