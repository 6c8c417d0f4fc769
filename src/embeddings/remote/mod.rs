
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{Caption, Embedder, normalize};
use crate::ImageSearchError;
use crate::config::Config;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

const CAPTION_PROMPT: &str = "Identify the main object category/type in this image. \
Answer with 1-2 words describing the species or object type only \
(e.g., 'dog', 'car', 'tree', 'building'). Focus on WHAT it is, not how it looks.";
const CAPTION_TEMPERATURE: f32 = 0.1;

/// Client for an OpenAI-compatible embedding and vision API
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    base_url: Url,
    embedding_model: String,
    caption_model: String,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<EmbeddingInput<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum EmbeddingInput<'a> {
    Text(&'a str),
    /// Data URL of the encoded image
    Image(String),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

impl RemoteEmbedder {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let settings = &config.embedder;
        let base_url = settings
            .base_url()
            .context("Failed to parse embedding API URL from config")?;

        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(settings.timeout_seconds)))
            .build()
            .into();

        Ok(Self {
            base_url,
            embedding_model: settings.embedding_model.clone(),
            caption_model: settings.caption_model.clone(),
            api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
            agent,
            retry_attempts: settings.retry_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Delay before the first retry; later retries back off exponentially
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Check the API is reachable and serves the configured models
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        for model in [&self.embedding_model, &self.caption_model] {
            if !models.iter().any(|m| &m.id == model) {
                let available: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
                warn!(
                    "Model {} not found. Available models: {:?}",
                    model, available
                );
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    model,
                    available
                ));
            }
        }

        info!(
            "Health check passed for {} with models {} and {}",
            self.base_url, self.embedding_model, self.caption_model
        );
        Ok(())
    }

    /// List all models the API serves
    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self
            .base_url
            .join("models")
            .context("Failed to build models URL")?;

        debug!("Fetching available models from {}", url);

        let response_text = self
            .make_request_with_retry(|| {
                let mut request = self.agent.get(url.as_str());
                if let Some(key) = &self.api_key {
                    request = request.header("Authorization", format!("Bearer {}", key));
                }
                request
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models: ModelsResponse =
            serde_json::from_str(&response_text).context("Failed to parse models response")?;

        debug!("Found {} models", models.data.len());
        Ok(models.data)
    }

    /// Embed an image file, blocking the calling thread
    #[inline]
    pub fn embed_image_blocking(&self, path: &Path) -> Result<Vec<f32>> {
        debug!("Generating embedding for image {}", path.display());

        let data_url = image_data_url(path)?;
        self.embed(EmbeddingInput::Image(data_url))
    }

    /// Embed a text query, blocking the calling thread
    #[inline]
    pub fn embed_text_blocking(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());
        self.embed(EmbeddingInput::Text(text))
    }

    /// Caption an image, blocking the calling thread
    #[inline]
    pub fn caption_blocking(&self, path: &Path) -> Result<Caption> {
        let request = ChatRequest {
            model: &self.caption_model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text {
                        text: CAPTION_PROMPT,
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_data_url(path)?,
                        },
                    },
                ],
            }],
            temperature: CAPTION_TEMPERATURE,
        };

        let response_text = self
            .post_json("chat/completions", &request)
            .context("Failed to generate caption")?;
        let response: ChatResponse =
            serde_json::from_str(&response_text).context("Failed to parse caption response")?;

        let caption = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty());

        Ok(match caption {
            Some(text) => {
                info!("Generated caption for {}: {}", path.display(), text);
                Caption::Text(text)
            }
            None => {
                warn!("No caption generated for {}", path.display());
                Caption::Unavailable("model returned no caption".to_string())
            }
        })
    }

    fn embed(&self, input: EmbeddingInput<'_>) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: vec![input],
        };

        let response_text = self
            .post_json("embeddings", &request)
            .context("Failed to generate embedding")?;
        let response: EmbeddingResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        let mut embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .filter(|embedding| !embedding.is_empty())
            .context("Embedding response contained no vector")?;
        normalize(&mut embedding);

        debug!("Generated embedding with {} dimensions", embedding.len());
        Ok(embedding)
    }

    fn post_json<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<String> {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| format!("Failed to build {} URL", endpoint))?;
        let request_json = serde_json::to_string(body).context("Failed to serialize request")?;

        self.make_request_with_retry(|| {
            let mut request = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json");
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }
            request
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn() {
                Ok(response_text) => {
                    debug!("Request succeeded on attempt {}", attempt);
                    return Ok(response_text);
                }
                Err(error) => {
                    let should_retry = match &error {
                        ureq::Error::StatusCode(status) => {
                            if *status >= 500 {
                                warn!(
                                    "Server error (status {}), attempt {}/{}",
                                    status, attempt, self.retry_attempts
                                );
                                true
                            } else {
                                warn!("Client error (status {}), not retrying", status);
                                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                            }
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                            true
                        }
                        _ => false,
                    };

                    if !should_retry {
                        warn!("Non-retryable error: {}", error);
                        return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                    }

                    last_error = Some(anyhow::anyhow!("Request error: {}", error));

                    if attempt < self.retry_attempts {
                        let delay = self.retry_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                        debug!("Waiting {:?} before retry", delay);
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

/// Read an image and encode it as a base64 `data:` URL
fn image_data_url(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    if bytes.is_empty() {
        anyhow::bail!("Image file {} is empty", path.display());
    }

    let mime = match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };

    Ok(format!("data:{};base64,{}", mime, BASE64.encode(bytes)))
}

/// Run a blocking HTTP call off the async runtime
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("Embedding worker panicked")?
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed_image(&self, path: &Path) -> crate::Result<Vec<f32>> {
        let client = self.clone();
        let owned: PathBuf = path.to_path_buf();

        run_blocking(move || client.embed_image_blocking(&owned))
            .await
            .map_err(|e| ImageSearchError::Embed(format!("{}: {:#}", path.display(), e)))
    }

    async fn embed_text(&self, text: &str) -> crate::Result<Vec<f32>> {
        let client = self.clone();
        let owned = text.to_string();

        run_blocking(move || client.embed_text_blocking(&owned))
            .await
            .map_err(|e| ImageSearchError::Embed(format!("{:#}", e)))
    }

    async fn caption_image(&self, path: &Path) -> Caption {
        let client = self.clone();
        let owned: PathBuf = path.to_path_buf();

        match run_blocking(move || client.caption_blocking(&owned)).await {
            Ok(caption) => caption,
            Err(e) => {
                error!("Failed to generate caption for {}: {:#}", path.display(), e);
                Caption::Unavailable(format!("{:#}", e))
            }
        }
    }
}
