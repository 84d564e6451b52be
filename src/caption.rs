// src/caption.rs

use crate::error::CaptionError;
use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-05-20";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model ids the pipeline has been run against. Others are allowed but warned about.
pub const KNOWN_MODELS: &[&str] = &[
    "gemini-2.5-pro-preview-05-06",
    "gemini-2.5-flash-preview-05-20",
    "gemini-2.0-flash",
    "gemini-2.0-flash-001",
    "gemini-2.0-flash-lite",
    "gemini-2.0-flash-lite-001",
    "gemini-2.0-pro-exp-02-05",
    "gemini-2.0-flash-thinking-exp-01-21",
    "gemini-1.5-pro",
    "gemini-1.5-pro-latest",
    "gemini-1.5-pro-002",
    "gemini-1.5-flash",
    "gemini-1.5-flash-latest",
    "gemini-1.5-flash-002",
    "gemini-1.5-flash-8b",
    "gemini-1.5-flash-8b-latest",
    "gemini-1.5-flash-8b-001",
];

const HARM_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
];

/// Image bytes checked to decode, with their MIME type
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

/// Sends an image plus instruction and prompt text to a model and returns its raw answer.
pub trait Captioner: Send + Sync {
    fn caption(
        &self,
        instructions: &str,
        prompt: &str,
        image: &EncodedImage,
    ) -> Result<String, CaptionError>;
}

/// Reads an image and makes sure it actually decodes before it is sent anywhere.
pub fn load_image(path: &Path) -> Result<EncodedImage, CaptionError> {
    let bytes = std::fs::read(path)?;
    let format = image::guess_format(&bytes)?;
    image::load_from_memory_with_format(&bytes, format)?;
    Ok(EncodedImage {
        bytes,
        mime_type: mime_type(format),
    })
}

fn mime_type(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Png => "image/png",
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Tiff => "image/tiff",
        _ => "application/octet-stream",
    }
}

// --- generateContent wire types ---

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Debug)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: Blob },
}

#[derive(Serialize, Debug)]
struct Blob {
    mime_type: &'static str,
    data: String,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub max_output_tokens: u32,
    pub response_modalities: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 0.95,
            max_output_tokens: 8192,
            response_modalities: vec!["TEXT".to_string()],
        }
    }
}

#[derive(Serialize, Debug)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: Option<String>,
}

fn build_request<'a>(
    instructions: &'a str,
    prompt: &'a str,
    image: &EncodedImage,
    config: &GenerationConfig,
) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![
                Part::Text { text: instructions },
                Part::Text { text: prompt },
                Part::InlineData {
                    inline_data: Blob {
                        mime_type: image.mime_type,
                        data: general_purpose::STANDARD.encode(&image.bytes),
                    },
                },
            ],
        }],
        generation_config: config.clone(),
        safety_settings: HARM_CATEGORIES
            .iter()
            .map(|&category| SafetySetting {
                category,
                threshold: "OFF",
            })
            .collect(),
    }
}

/// Text parts of the first candidate, concatenated.
fn response_text(response: GenerateResponse) -> Option<String> {
    let text: String = response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    (!text.trim().is_empty()).then_some(text)
}

/// Captioner backed by the Gemini `generateContent` REST endpoint.
pub struct GeminiCaptioner {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    config: GenerationConfig,
}

impl GeminiCaptioner {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: &str,
        timeout: Duration,
    ) -> Result<Self, CaptionError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
            config: GenerationConfig::default(),
        })
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

impl Captioner for GeminiCaptioner {
    fn caption(
        &self,
        instructions: &str,
        prompt: &str,
        image: &EncodedImage,
    ) -> Result<String, CaptionError> {
        let body = build_request(instructions, prompt, image, &self.config);
        debug!("POST {} ({} image bytes)", self.url(), image.bytes.len());

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CaptionError::Api {
                status,
                body: response.text().unwrap_or_default(),
            });
        }

        let parsed: GenerateResponse = response.json()?;
        response_text(parsed).ok_or(CaptionError::EmptyResponse)
    }
}
