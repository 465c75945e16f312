use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::encode::encode_image;
use crate::models::{AnalyzeResponse, ImageResult, UploadedImage};
use crate::openai::{ExtractError, OpenAiClient, RawExtraction};

pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("At least one image is required")]
    Empty,
    #[error("Maximum of {MAX_BATCH_SIZE} images allowed")]
    TooLarge,
    #[error("OPENAI_API_KEY not configured")]
    MissingCredential,
}

async fn extract_products(
    openai: &OpenAiClient,
    image: &UploadedImage,
) -> Result<RawExtraction, ExtractError> {
    let data_url = encode_image(&image.data, image.filename.as_deref())?;
    openai.extract(&data_url).await
}

/// Run one extraction end to end. Any failure becomes an error-typed result,
/// so a bad image never takes down its siblings or the batch.
pub async fn analyze_image(openai: &OpenAiClient, image: UploadedImage) -> ImageResult {
    let filename = image.filename.clone().unwrap_or_default();
    match extract_products(openai, &image).await {
        Ok(raw) => ImageResult {
            filename,
            kind: raw.kind,
            products: raw.extracted,
            error: None,
        },
        Err(e) => {
            error!("analysis of {:?} failed: {}", filename, e);
            ImageResult {
                filename,
                kind: "error".to_string(),
                products: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

/// Validate the batch, fan out one extraction task per image, then join in
/// submission order. Once the preconditions pass this cannot fail; per-image
/// failures ride along inside their own result.
pub async fn analyze_batch(
    openai: Arc<OpenAiClient>,
    images: Vec<UploadedImage>,
) -> Result<AnalyzeResponse, BatchError> {
    if images.is_empty() {
        return Err(BatchError::Empty);
    }
    if images.len() > MAX_BATCH_SIZE {
        return Err(BatchError::TooLarge);
    }
    if !openai.has_credential() {
        return Err(BatchError::MissingCredential);
    }

    info!("Analyzing batch of {} image(s)", images.len());

    let handles: Vec<_> = images
        .into_iter()
        .map(|image| {
            let openai = Arc::clone(&openai);
            tokio::spawn(async move { analyze_image(&openai, image).await })
        })
        .collect();

    // Awaiting in spawn order keeps results aligned with submission order no
    // matter which call finishes first.
    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                error!("analysis task aborted: {}", e);
                results.push(ImageResult {
                    filename: String::new(),
                    kind: "error".to_string(),
                    products: Vec::new(),
                    error: Some(format!("analysis task aborted: {}", e)),
                });
            }
        }
    }

    Ok(AnalyzeResponse { results })
}
