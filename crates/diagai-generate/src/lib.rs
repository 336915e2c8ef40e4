pub mod engine;
pub mod frames;
pub mod markup;
mod parse;
mod prompt;
pub mod render;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use engine::{
    CompletionRequest, FirstModel, LlmBackend, ModelPicker, Prompter, RandomModel, TextBackend,
    TextGenError,
};
pub use frames::{FrameSequencer, FRAME_COUNT};
pub use markup::MarkupGenerator;
pub use parse::FRAME_DELIMITER;
pub use render::{MermaidInk, RenderBackend, RenderContext, RenderError, RenderValidator};

/// Markup that rendered successfully, with the bytes it rendered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMarkup {
    pub markup: String,
    pub image: Vec<u8>,
}

/// Why a single attempt was rejected. Never leaves this crate: the retry
/// loops fold the last one into the terminal error message.
#[derive(Debug, Error)]
pub(crate) enum AttemptError {
    #[error(transparent)]
    Text(#[from] TextGenError),
    #[error("{0}")]
    Invalid(String),
    #[error("render: {0}")]
    Render(#[from] RenderError),
    #[error("expected {expected} frames, got {got}")]
    FrameCount { expected: usize, got: usize },
    #[error("frame {index}: {source}")]
    Frame { index: usize, source: RenderError },
}

/// Run `attempt` up to `attempts` times with a fixed pause in between.
/// Each call returns the model it used next to its outcome. On exhaustion
/// the last failure is returned as text.
pub(crate) async fn with_retries<T, F, Fut>(
    stage: &'static str,
    attempts: u32,
    pause: Duration,
    mut attempt: F,
) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = (String, Result<T, AttemptError>)>,
{
    let mut last = String::from("no attempts made");
    for n in 1..=attempts {
        let (model, outcome) = attempt().await;
        match outcome {
            Ok(value) => {
                tracing::debug!(stage, attempt = n, %model, "attempt succeeded");
                return Ok(value);
            }
            Err(AttemptError::Text(TextGenError::Timeout(after))) => {
                warn!(stage, attempt = n, %model, ?after, "text generation timed out");
                last = format!("timed out after {after:?}");
            }
            Err(e) => {
                warn!(stage, attempt = n, %model, error = %e, "attempt failed");
                last = e.to_string();
            }
        }
        if n < attempts && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    Err(last)
}
