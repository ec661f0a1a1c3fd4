use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use image_captioner::{
    router, AppConfig, AppState, CaptionRequester, ConfigError, RemoteCaptionModel, UploadStore,
};

#[derive(Debug, Parser)]
#[command(version, about = "Web front-end for a pretrained image captioning model")]
struct Args {
    /// JSON config file
    #[arg(long, env = "CAPTIONER_CONFIG", default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    // Everything that can be wrong with the configuration fails here, before binding.
    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let api_token = std::env::var("CAPTIONER_API_TOKEN").ok();
    let model = RemoteCaptionModel::from_config(&config, api_token)?;

    let uploads = UploadStore::new(&config.upload_dir);
    uploads.ensure_dir().map_err(|source| ConfigError::UploadDir {
        path: config.upload_dir.clone(),
        source,
    })?;

    let captioner = CaptionRequester::spawn(model, config.caption, config.queue_capacity);
    tracing::info!(
        "caption model at {} (max_length={}, num_beams={}, num_return_sequences={}, temperature={})",
        config.model_url,
        config.caption.max_length,
        config.caption.num_beams,
        config.caption.num_return_sequences,
        config.caption.temperature
    );

    let app = router(
        AppState {
            uploads,
            captioner,
        },
        config.max_upload_bytes,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
