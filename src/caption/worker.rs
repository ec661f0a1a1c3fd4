use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::FutureExt;
use image::RgbImage;
use tokio::sync::{mpsc, oneshot};

use super::{CaptionModel, CaptionOutcome};
use crate::config::CaptionRequestConfig;

struct Job {
    image_path: PathBuf,
    count: u32,
    reply: oneshot::Sender<CaptionOutcome>,
}

/// Cloneable handle to the caption worker.
///
/// Every clone feeds the same queue. The worker owns the model and runs one job at a
/// time in arrival order, so the model never sees concurrent calls regardless of how
/// many requests are in flight.
#[derive(Debug, Clone)]
pub struct CaptionRequester {
    tx: mpsc::Sender<Job>,
    config: CaptionRequestConfig,
}

impl CaptionRequester {
    /// Moves `model` onto a dedicated worker task. Must be called inside a tokio runtime.
    pub fn spawn<M: CaptionModel>(
        model: M,
        config: CaptionRequestConfig,
        queue_capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        tokio::spawn(run_worker(model, config, rx));
        Self { tx, config }
    }

    pub fn config(&self) -> &CaptionRequestConfig {
        &self.config
    }

    /// A handle whose worker has already exited.
    #[cfg(test)]
    pub(crate) fn detached(config: CaptionRequestConfig) -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx, config }
    }

    /// Whether the worker is still accepting jobs.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Produces up to `count` captions for the image stored at `image_path`.
    pub async fn caption(&self, image_path: PathBuf, count: u32) -> CaptionOutcome {
        if count == 0 {
            return CaptionOutcome::Empty;
        }

        let (reply, rx) = oneshot::channel();
        let job = Job {
            image_path,
            count,
            reply,
        };
        if self.tx.send(job).await.is_err() {
            tracing::error!("caption worker is gone, dropping request");
            return CaptionOutcome::Failed("caption worker unavailable".into());
        }

        rx.await
            .unwrap_or_else(|_| CaptionOutcome::Failed("caption worker unavailable".into()))
    }
}

async fn run_worker<M: CaptionModel>(
    mut model: M,
    config: CaptionRequestConfig,
    mut rx: mpsc::Receiver<Job>,
) {
    tracing::info!("caption worker started");

    while let Some(job) = rx.recv().await {
        // The requester gave up waiting; skip the inference entirely.
        if job.reply.is_closed() {
            tracing::debug!("skipping cancelled job for {}", job.image_path.display());
            continue;
        }

        let start = Instant::now();
        // A panicking model must not take the worker down with it.
        let outcome = AssertUnwindSafe(run_job(&mut model, &config, &job.image_path, job.count))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                CaptionOutcome::Failed(format!("model panicked: {}", panic_message(&*panic)))
            });
        match &outcome {
            CaptionOutcome::Captions(captions) => tracing::info!(
                "captioned {} with {} variant(s) in {}ms",
                job.image_path.display(),
                captions.len(),
                start.elapsed().as_millis()
            ),
            CaptionOutcome::Empty => tracing::info!(
                "model returned no captions for {}",
                job.image_path.display()
            ),
            CaptionOutcome::Failed(reason) => tracing::error!(
                "failed to generate captions for {}: {reason}",
                job.image_path.display()
            ),
        }

        let _ = job.reply.send(outcome);
    }

    tracing::info!("caption worker stopped");
}

async fn run_job<M: CaptionModel>(
    model: &mut M,
    config: &CaptionRequestConfig,
    image_path: &Path,
    count: u32,
) -> CaptionOutcome {
    let path = image_path.to_path_buf();
    let image = match tokio::task::spawn_blocking(move || load_rgb(&path)).await {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => return CaptionOutcome::Failed(format!("unreadable image: {e}")),
        Err(e) => return CaptionOutcome::Failed(format!("image loader panicked: {e}")),
    };

    let params = config.with_return_sequences(count);
    let sequences = match model.generate(&image, &params).await {
        Ok(sequences) => sequences,
        Err(e) => return CaptionOutcome::Failed(e.to_string()),
    };

    let mut captions = Vec::with_capacity(sequences.len().min(count as usize));
    for tokens in sequences.iter().take(count as usize) {
        match model.decode(tokens) {
            Ok(text) => captions.push(text.trim().to_string()),
            Err(e) => return CaptionOutcome::Failed(e.to_string()),
        }
    }

    CaptionOutcome::from_captions(captions)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Reads an image by content rather than extension and normalizes it to 8-bit RGB.
fn load_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
    let image = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;
    Ok(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{png_bytes, ScriptedModel};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config() -> CaptionRequestConfig {
        CaptionRequestConfig::new(16, 4, 3, 1.0).unwrap()
    }

    fn write_png(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, png_bytes(8, 8)).unwrap();
        path
    }

    #[tokio::test]
    async fn returns_captions_in_model_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "dog.png");
        let model = ScriptedModel::ranked();
        let requester = CaptionRequester::spawn(model, config(), 4);

        let outcome = requester.caption(path, 3).await;

        assert_eq!(
            outcome,
            CaptionOutcome::Captions(vec![
                "a dog on the beach".into(),
                "a dog running".into(),
                "a brown dog".into(),
            ])
        );
    }

    #[tokio::test]
    async fn never_returns_more_than_requested() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "dog.png");
        let requester = CaptionRequester::spawn(ScriptedModel::ranked(), config(), 4);

        match requester.caption(path, 2).await {
            CaptionOutcome::Captions(captions) => {
                assert_eq!(captions, vec!["a dog on the beach", "a dog running"]);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn passes_requested_count_to_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "dog.png");
        let model = ScriptedModel::ranked();
        let seen = model.seen_params.clone();
        let requester = CaptionRequester::spawn(model, config(), 4);

        requester.caption(path, 1).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].num_return_sequences, 1);
        assert_eq!(seen[0].num_beams, 4);
        assert_eq!(seen[0].max_length, 16);
        assert_eq!(requester.config().num_return_sequences, 3);
    }

    #[tokio::test]
    async fn zero_count_skips_the_model() {
        let model = ScriptedModel::ranked();
        let calls = model.calls.clone();
        let requester = CaptionRequester::spawn(model, config(), 4);

        let outcome = requester.caption(PathBuf::from("/does/not/matter.png"), 0).await;

        assert_eq!(outcome, CaptionOutcome::Empty);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_returning_nothing_is_empty_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "blank.png");
        let requester = CaptionRequester::spawn(ScriptedModel::silent(), config(), 4);

        assert_eq!(requester.caption(path, 3).await, CaptionOutcome::Empty);
    }

    #[tokio::test]
    async fn corrupt_image_fails_without_calling_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"\xff\xd8\xff not really a jpeg").unwrap();
        let model = ScriptedModel::ranked();
        let calls = model.calls.clone();
        let requester = CaptionRequester::spawn(model, config(), 4);

        let outcome = requester.caption(path, 3).await;

        assert!(matches!(outcome, CaptionOutcome::Failed(_)), "{outcome:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn model_error_becomes_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "dog.png");
        let requester = CaptionRequester::spawn(ScriptedModel::failing(), config(), 4);

        match requester.caption(path, 3).await {
            CaptionOutcome::Failed(reason) => assert!(reason.contains("503"), "{reason}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeated_calls_keep_the_same_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "dog.png");
        let requester = CaptionRequester::spawn(ScriptedModel::ranked(), config(), 4);

        let first = requester.caption(path.clone(), 3).await;
        let second = requester.caption(path, 3).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn worker_survives_a_panicking_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "dog.png");
        let requester = CaptionRequester::spawn(ScriptedModel::panics_once(), config(), 4);

        match requester.caption(path.clone(), 1).await {
            CaptionOutcome::Failed(reason) => {
                assert!(reason.contains("model panicked"), "{reason}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert!(requester.is_alive());
        assert_eq!(
            requester.caption(path, 1).await,
            CaptionOutcome::Captions(vec!["a dog on the beach".into()])
        );
    }

    #[tokio::test]
    async fn dropped_worker_is_reported_dead() {
        let requester = CaptionRequester::detached(config());

        assert!(!requester.is_alive());
        assert_eq!(
            requester.caption(PathBuf::from("/x.png"), 1).await,
            CaptionOutcome::Failed("caption worker unavailable".into())
        );
    }

    #[tokio::test]
    async fn concurrent_requests_never_overlap_in_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(&dir, "dog.png");
        let model = ScriptedModel::ranked().with_delay(Duration::from_millis(20));
        let max_in_flight = model.max_in_flight.clone();
        let calls = model.calls.clone();
        let requester = CaptionRequester::spawn(model, config(), 16);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let requester = requester.clone();
                let path = path.clone();
                tokio::spawn(async move { requester.caption(path, 2).await })
            })
            .collect();
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                CaptionOutcome::Captions(_)
            ));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }
}
