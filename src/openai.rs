use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

use crate::models::ExtractedProduct;

const MODEL: &str = "gpt-4.1";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const SYSTEM_PROMPT: &str = "\
You are a vision model specialized in analyzing shopping app screenshots.

TASK:
1. Identify the general type of screenshot.
2. Extract all clothing products visible in the screenshot.
Each product includes: brand, product_name, price.
3. Output JSON EXACTLY following:
{
  \"type\": \"...\",
  \"extracted\": [
    { \"brand\": null, \"product_name\": \"...\", \"price\": \"$21.42\" }
  ]
}
";

const USER_PROMPT: &str = "Analyze this shopping screenshot.";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("empty file")]
    EmptyImage,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("request to the vision service timed out")]
    Timeout,
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

/// What the model is asked to return, after the output text has been parsed
/// back out of the response envelope. The response-format schema makes both
/// keys required, but parsing stays tolerant of either being dropped.
#[derive(Debug, Deserialize)]
pub struct RawExtraction {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub extracted: Vec<ExtractedProduct>,
}

fn default_kind() -> String {
    "unknown".to_string()
}

pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        let base_url = std::env::var("OPENAI_API_BASE")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs = std::env::var("OPENAI_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self::with_base_url(api_key, base_url, timeout_secs)
    }

    pub fn with_base_url(api_key: String, base_url: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            api_key,
            base_url,
        }
    }

    pub fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// One structured-extraction call against the Responses API. The model is
    /// constrained to the shopping_extraction schema, but the returned text is
    /// still parsed defensively.
    pub async fn extract(&self, image_data_url: &str) -> Result<RawExtraction, ExtractError> {
        let url = format!("{}/responses", self.base_url);

        let request_body = json!({
            "model": MODEL,
            "input": [
                {
                    "role": "system",
                    "content": [{"type": "input_text", "text": SYSTEM_PROMPT}]
                },
                {
                    "role": "user",
                    "content": [
                        {"type": "input_text", "text": USER_PROMPT},
                        {"type": "input_image", "image_url": image_data_url, "detail": "high"}
                    ]
                }
            ],
            "text": {"format": output_schema()}
        });

        info!("Requesting extraction from {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractError::Timeout
                } else {
                    ExtractError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = match response.text().await {
                Ok(body) => body,
                Err(e) if e.is_timeout() => return Err(ExtractError::Timeout),
                Err(_) => String::new(),
            };
            error!("API error response: status={} body={}", status, error_body);
            return Err(ExtractError::Http(format!(
                "status={} body={}",
                status, error_body
            )));
        }

        // The client timeout can also fire mid-body, surfacing here instead
        // of on send().
        let envelope: ResponsesEnvelope = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ExtractError::Timeout
            } else {
                ExtractError::MalformedResponse(format!("invalid envelope: {}", e))
            }
        })?;

        let output_text = envelope
            .output_text()
            .ok_or_else(|| ExtractError::MalformedResponse("no output text in response".into()))?;

        serde_json::from_str(&output_text).map_err(|e| {
            ExtractError::MalformedResponse(format!("output is not valid JSON: {}", e))
        })
    }
}

/// Strict response-format constraint sent with every request: an object with
/// a `type` string and an `extracted` array of products, nothing else.
fn output_schema() -> serde_json::Value {
    json!({
        "type": "json_schema",
        "name": "shopping_extraction",
        "schema": {
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "type": {"type": "string"},
                "extracted": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "brand": {"type": ["string", "null"]},
                            "product_name": {"type": "string"},
                            "price": {"type": ["string", "null"]}
                        },
                        "required": ["brand", "product_name", "price"]
                    }
                }
            },
            "required": ["type", "extracted"]
        },
        "strict": true
    })
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ResponsesEnvelope {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputPart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OutputPart {
    Text { text: String },
    Other(serde_json::Value),
}

impl ResponsesEnvelope {
    fn output_text(&self) -> Option<String> {
        let mut text = String::new();
        for item in &self.output {
            for part in &item.content {
                if let OutputPart::Text { text: t } = part {
                    text.push_str(t);
                }
            }
        }
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn envelope_with(text: &str) -> String {
        json!({
            "output": [{
                "type": "message",
                "content": [{"type": "output_text", "text": text}]
            }]
        })
        .to_string()
    }

    #[test]
    fn raw_extraction_maps_all_fields() {
        let raw: RawExtraction = serde_json::from_str(
            r#"{"type":"checkout page","extracted":[{"brand":"Nike","product_name":"Running Shorts","price":"$24.99"}]}"#,
        )
        .unwrap();
        assert_eq!(raw.kind, "checkout page");
        assert_eq!(raw.extracted.len(), 1);
        assert_eq!(raw.extracted[0].brand.as_deref(), Some("Nike"));
        assert_eq!(raw.extracted[0].product_name, "Running Shorts");
        assert_eq!(raw.extracted[0].price.as_deref(), Some("$24.99"));
    }

    #[test]
    fn raw_extraction_defaults_missing_keys() {
        let raw: RawExtraction = serde_json::from_str("{}").unwrap();
        assert_eq!(raw.kind, "unknown");
        assert!(raw.extracted.is_empty());
    }

    #[test]
    fn product_without_brand_is_null_not_error() {
        let raw: RawExtraction = serde_json::from_str(
            r#"{"type":"product page","extracted":[{"product_name":"Hoodie","price":null}]}"#,
        )
        .unwrap();
        assert_eq!(raw.extracted[0].brand, None);
        assert_eq!(raw.extracted[0].price, None);
        assert_eq!(raw.extracted[0].product_name, "Hoodie");
    }

    #[test]
    fn envelope_concatenates_output_text_parts() {
        let envelope: ResponsesEnvelope = serde_json::from_value(json!({
            "output": [
                {"type": "reasoning"},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"type\":"},
                    {"type": "output_text", "text": "\"grid\"}"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(envelope.output_text().as_deref(), Some("{\"type\":\"grid\"}"));
    }

    #[tokio::test]
    async fn extract_parses_well_formed_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/responses")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(envelope_with(
                r#"{"type":"checkout page","extracted":[{"brand":"Nike","product_name":"Running Shorts","price":"$24.99"}]}"#,
            ))
            .create_async()
            .await;

        let client = OpenAiClient::with_base_url("test-key".into(), server.url(), 5);
        let raw = client.extract("data:image/png;base64,aGk=").await.unwrap();

        mock.assert_async().await;
        assert_eq!(raw.kind, "checkout page");
        assert_eq!(raw.extracted[0].product_name, "Running Shorts");
    }

    #[tokio::test]
    async fn extract_fails_on_non_json_output() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(envelope_with("sorry, I could not read that screenshot"))
            .create_async()
            .await;

        let client = OpenAiClient::with_base_url("test-key".into(), server.url(), 5);
        let err = client.extract("data:image/png;base64,aGk=").await.unwrap_err();
        assert!(matches!(err, ExtractError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn extract_fails_on_missing_output_text() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"output":[]}"#)
            .create_async()
            .await;

        let client = OpenAiClient::with_base_url("test-key".into(), server.url(), 5);
        let err = client.extract("data:image/png;base64,aGk=").await.unwrap_err();
        assert!(matches!(err, ExtractError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn extract_times_out_on_stalled_response_body() {
        use std::io::Write;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_chunked_body(|w| {
                // Send the start of a valid envelope, then stall well past
                // the client timeout before finishing it.
                w.write_all(b"{\"output\":[")?;
                w.flush()?;
                std::thread::sleep(std::time::Duration::from_millis(2500));
                w.write_all(b"]}")
            })
            .create_async()
            .await;

        let client = OpenAiClient::with_base_url("test-key".into(), server.url(), 1);
        let err = client.extract("data:image/png;base64,aGk=").await.unwrap_err();
        assert!(matches!(err, ExtractError::Timeout), "got {:?}", err);
    }

    #[tokio::test]
    async fn extract_surfaces_http_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/responses")
            .with_status(500)
            .with_body("upstream exploded")
            .create_async()
            .await;

        let client = OpenAiClient::with_base_url("test-key".into(), server.url(), 5);
        let err = client.extract("data:image/png;base64,aGk=").await.unwrap_err();
        match err {
            ExtractError::Http(msg) => assert!(msg.contains("500")),
            other => panic!("expected Http error, got {:?}", other),
        }
    }
}
