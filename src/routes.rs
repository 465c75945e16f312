use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::batch::{analyze_batch, BatchError};
use crate::models::UploadedImage;
use crate::openai::OpenAiClient;

// 10 screenshots plus multipart framing.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub openai: Arc<OpenAiClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn analyze(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut images = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                // Plain text form fields carry no filename; only files count
                // toward the batch.
                let Some(filename) = field.file_name().map(|s| s.to_string()) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(data) => images.push(UploadedImage {
                        data,
                        filename: Some(filename),
                    }),
                    Err(e) => {
                        return detail_response(
                            StatusCode::BAD_REQUEST,
                            &format!("Malformed multipart body: {}", e),
                        )
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                return detail_response(
                    StatusCode::BAD_REQUEST,
                    &format!("Malformed multipart body: {}", e),
                )
            }
        }
    }

    match analyze_batch(Arc::clone(&state.openai), images).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            let status = match e {
                BatchError::Empty | BatchError::TooLarge => StatusCode::BAD_REQUEST,
                BatchError::MissingCredential => StatusCode::INTERNAL_SERVER_ERROR,
            };
            detail_response(status, &e.to_string())
        }
    }
}

fn detail_response(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({"detail": detail}))).into_response()
}
