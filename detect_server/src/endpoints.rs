//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    extract::{DefaultBodyLimit, Multipart, Path},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Extension, Router,
};
use futures::StreamExt;

use crate::{
    encoder::{EncodedChunk, STREAM_CONTENT_TYPE},
    inferer::Detector,
    pages,
    streamer::StreamController,
    uploads::{allowed_file, secure_filename, UploadStore},
};

/// Largest accepted upload request.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// State shared by all handlers.
pub struct AppState {
    pub controller: StreamController,
    pub detector: Arc<dyn Detector>,
    pub store: UploadStore,
}

/// Build the router with all endpoints.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index).post(upload))
        .route("/result/:filename", get(show_result))
        .route("/static/results/:filename", get(result_file))
        .route("/camera", get(camera))
        .route("/video_feed", get(video_feed))
        .route("/stop_camera", get(stop_camera))
        .route("/healthcheck", get(healthcheck))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(Extension(state))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn index() -> Html<&'static str> {
    Html(pages::INDEX)
}

pub async fn camera() -> Html<&'static str> {
    Html(pages::CAMERA)
}

/// Receive an image, run detection on it and redirect to the result page.
pub async fn upload(
    Extension(state): Extension<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut upload = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_owned();
                match field.bytes().await {
                    Ok(data) => {
                        upload = Some((filename, data));
                        break;
                    }
                    Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
                }
            }
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    let Some((filename, data)) = upload else {
        return (StatusCode::BAD_REQUEST, "missing file field").into_response();
    };

    let filename = secure_filename(&filename);
    if filename.is_empty() || !allowed_file(&filename) {
        log::info!("Rejected upload {:?}", &filename);
        return Html(pages::invalid_format()).into_response();
    }

    let state_ = Arc::clone(&state);
    let detected = tokio::task::spawn_blocking(move || {
        let input = state_.store.save_upload(&filename, &data)?;
        state_.store.detect_file(&input, state_.detector.as_ref())
    })
    .await;

    match detected {
        Ok(Ok(output_filename)) => {
            Redirect::to(&format!("/result/{output_filename}")).into_response()
        }
        Ok(Err(e)) => {
            log::warn!("Detection on upload failed: {e:#}");
            Html(pages::detection_error(&format!("{e:#}"))).into_response()
        }
        Err(e) => Html(pages::detection_error(&e.to_string())).into_response(),
    }
}

pub async fn show_result(Path(filename): Path<String>) -> Response {
    if filename.is_empty() || secure_filename(&filename) != filename {
        return StatusCode::NOT_FOUND.into_response();
    }

    Html(pages::result(&filename)).into_response()
}

/// Serve a written result image.
pub async fn result_file(
    Extension(state): Extension<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    let Some(path) = state.store.result_path(&filename) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(data) => {
            let content_type = match path.extension().and_then(|ext| ext.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("png") => "image/png",
                _ => "image/jpeg",
            };
            ([(header::CONTENT_TYPE, content_type)], data).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Stream of annotated camera frames.
pub async fn video_feed(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let session = state.controller.stream_default();
    log::info!("Camera stream requested");

    let frame_timeout = state.controller.settings().frame_timeout;
    let stream = session.into_stream(frame_timeout).map(|item| {
        let chunk = match item {
            Ok(chunk) => chunk,
            // Report the failure as a last part instead of cutting the connection
            Err(err) => EncodedChunk::error_message(&err.to_string()),
        };
        Ok::<_, std::io::Error>(chunk.into_part())
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)];

    (headers, body)
}

/// Stop all running camera streams.
pub async fn stop_camera(Extension(state): Extension<Arc<AppState>>) -> Redirect {
    state.controller.stop();
    Redirect::to("/")
}
