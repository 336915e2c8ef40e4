//! Rendering Mermaid markup to PNG bytes.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use diagai_core::RenderSettings;

use crate::parse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderContext {
    Static,
    AnimationFrame,
}

impl RenderContext {
    /// Target (width, height) in pixels.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            RenderContext::Static => (1200, 800),
            RenderContext::AnimationFrame => (800, 600),
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("renderer returned an empty body")]
    EmptyBody,
    #[error("nothing to render")]
    EmptyMarkup,
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport: {0}")]
    Transport(String),
}

#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// `encoded` is the URL-safe base64 form of the markup.
    async fn render_markup(
        &self,
        encoded: &str,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError>;
}

/// The mermaid.ink HTTP renderer: `GET {base}/img/{encoded}?type=png&width=W&height=H`.
pub struct MermaidInk {
    client: reqwest::Client,
    base_url: String,
}

impl MermaidInk {
    pub fn new(settings: &RenderSettings) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| RenderError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, encoded: &str, width: u32, height: u32) -> String {
        format!(
            "{}/img/{encoded}?type=png&width={width}&height={height}",
            self.base_url
        )
    }
}

#[async_trait]
impl RenderBackend for MermaidInk {
    async fn render_markup(
        &self,
        encoded: &str,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError> {
        let response = self
            .client
            .get(self.url(encoded, width, height))
            .send()
            .await
            .map_err(|e| RenderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::Status {
                code: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RenderError::Transport(e.to_string()))?;
        if bytes.is_empty() {
            return Err(RenderError::EmptyBody);
        }
        Ok(bytes.to_vec())
    }
}

pub fn encode(markup: &str) -> String {
    URL_SAFE.encode(markup.as_bytes())
}

/// Confirms markup renders and hands back the image bytes. Applies output
/// hygiene and the per-call timeout around whichever backend is plugged in.
#[derive(Clone)]
pub struct RenderValidator {
    backend: Arc<dyn RenderBackend>,
    timeout: Duration,
}

impl RenderValidator {
    pub fn new(backend: Arc<dyn RenderBackend>, settings: &RenderSettings) -> Self {
        Self {
            backend,
            timeout: settings.timeout(),
        }
    }

    pub async fn render(&self, markup: &str, context: RenderContext) -> Result<Vec<u8>, RenderError> {
        let markup = parse::normalize(markup);
        if markup.is_empty() {
            return Err(RenderError::EmptyMarkup);
        }
        let (width, height) = context.dimensions();
        let encoded = encode(&markup);
        debug!(?context, bytes = markup.len(), "rendering markup");

        let image = tokio::time::timeout(
            self.timeout,
            self.backend.render_markup(&encoded, width, height),
        )
        .await
        .map_err(|_| RenderError::Timeout(self.timeout))??;

        if image.is_empty() {
            return Err(RenderError::EmptyBody);
        }
        Ok(image)
    }
}
