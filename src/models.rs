use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One file pulled out of the multipart request. Read once, never persisted.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub data: Bytes,
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ExtractedProduct {
    #[serde(default)]
    pub brand: Option<String>,
    pub product_name: String,
    #[serde(default)]
    pub price: Option<String>,
}

/// Outcome for a single image. Either `kind` and `products` come from a
/// successful extraction and `error` is absent, or `kind` is `"error"`,
/// `products` is empty and `error` carries the failure message.
#[derive(Debug, Serialize, Clone)]
pub struct ImageResult {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub products: Vec<ExtractedProduct>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
pub struct AnalyzeResponse {
    pub results: Vec<ImageResult>,
}
