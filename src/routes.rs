use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::caption::{CaptionOutcome, CaptionRequester};
use crate::config::CaptionRequestConfig;
use crate::error::AppError;
use crate::page;
use crate::upload::{UploadStore, UploadedImage};

#[derive(Clone)]
pub struct AppState {
    pub uploads: UploadStore,
    pub captioner: CaptionRequester,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptionResponse {
    pub captions: Vec<String>,
}

#[derive(Debug, Default)]
struct CaptionForm {
    image: Option<UploadedImage>,
    variants: Option<String>,
    num_captions: Option<String>,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/process_image", post(process_image))
        .route("/predict", post(process_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(Arc::new(state))
}

async fn index() -> Html<&'static str> {
    Html(page::index())
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.captioner.is_alive() {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unavailable", "detail": "caption worker stopped"})),
        )
    }
}

async fn process_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let html = wants_html(&headers);
    let result = caption_upload(&state, multipart).await;

    match (result, html) {
        (Ok(captions), false) => Json(CaptionResponse { captions }).into_response(),
        (Ok(captions), true) => Html(page::render(Some(&captions), None)).into_response(),
        (Err(e), false) => e.into_response(),
        (Err(e), true) => {
            e.log();
            let captions = matches!(e, AppError::Inference(_)).then(Vec::new);
            let body = page::render(captions.as_deref(), Some(&e.to_string()));
            (e.status_code(), Html(body)).into_response()
        }
    }
}

async fn caption_upload(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Vec<String>, AppError> {
    let mut multipart = multipart.map_err(|e| AppError::MalformedRequest(e.body_text()))?;
    let form = read_form(&mut multipart).await?;

    let image = form.image.ok_or(AppError::MissingInput)?;
    let count = resolve_count(
        form.variants.as_deref(),
        form.num_captions.as_deref(),
        state.captioner.config(),
    )?;

    let path = state.uploads.save(&image).await?;

    match state.captioner.caption(path, count).await {
        CaptionOutcome::Captions(captions) => Ok(captions),
        CaptionOutcome::Empty => Ok(Vec::new()),
        CaptionOutcome::Failed(reason) => Err(AppError::Inference(reason)),
    }
}

async fn read_form(multipart: &mut Multipart) -> Result<CaptionForm, AppError> {
    let mut form = CaptionForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                if form.image.is_some() {
                    return Err(AppError::DuplicateImage);
                }
                let filename = field.file_name().map(str::to_owned);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                // Browsers send an empty part when the file input is left blank.
                if bytes.is_empty() {
                    return Err(AppError::MissingInput);
                }
                form.image = Some(UploadedImage {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            "variants" => form.variants = Some(field.text().await.map_err(multipart_error)?),
            "num_captions" => {
                form.num_captions = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => tracing::debug!("ignoring form field `{name}`"),
        }
    }

    Ok(form)
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::TooLarge
    } else {
        AppError::MalformedRequest(e.body_text())
    }
}

/// Works out how many captions to ask for. An explicit `num_captions` wins over the
/// `variants` switch; with neither, the configured count is used.
fn resolve_count(
    variants: Option<&str>,
    num_captions: Option<&str>,
    config: &CaptionRequestConfig,
) -> Result<u32, AppError> {
    if let Some(raw) = num_captions.map(str::trim).filter(|raw| !raw.is_empty()) {
        let count: u32 = raw
            .parse()
            .map_err(|_| AppError::InvalidVariantCount(format!("`{raw}` is not a number")))?;
        if count > config.num_beams {
            return Err(AppError::InvalidVariantCount(format!(
                "at most {} captions can be requested",
                config.num_beams
            )));
        }
        return Ok(count);
    }

    match variants.map(str::trim) {
        Some("single") => Ok(1),
        None | Some("") | Some("multiple") => Ok(config.num_return_sequences),
        Some(other) => Err(AppError::InvalidVariantCount(format!(
            "unknown variants mode `{other}`"
        ))),
    }
}

/// HTML is served only when the client weights `text/html` strictly above
/// `application/json`; ties and wildcards get JSON.
fn wants_html(headers: &HeaderMap) -> bool {
    let Some(accept) = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let mut html = 0.0f32;
    let mut json = 0.0f32;
    for range in accept.split(',') {
        let mut parts = range.split(';');
        let media = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let quality = parts
            .filter_map(|param| param.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);
        match media.as_str() {
            "text/html" => html = html.max(quality),
            "application/json" => json = json.max(quality),
            _ => {}
        }
    }

    html > 0.0 && html > json
}
