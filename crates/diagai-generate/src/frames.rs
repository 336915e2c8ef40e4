use tracing::{error, info};

use diagai_core::{DiagramStyle, GenerationError};

use crate::engine::Prompter;
use crate::render::{RenderContext, RenderValidator};
use crate::{parse, prompt, with_retries, AttemptError, ValidatedMarkup};

/// Number of progression frames in every animation.
pub const FRAME_COUNT: usize = 5;

/// Turns base markup into exactly [`FRAME_COUNT`] progressive frames.
///
/// Frames only stay visually coherent within one completion, so an attempt
/// is accepted or discarded as a whole: a wrong frame count or any frame
/// that fails to render throws away the entire set and asks again.
#[derive(Clone)]
pub struct FrameSequencer {
    prompter: Prompter,
    validator: RenderValidator,
}

impl FrameSequencer {
    pub fn new(prompter: Prompter, validator: RenderValidator) -> Self {
        Self {
            prompter,
            validator,
        }
    }

    /// Ordered frames, each rendered at animation-frame size.
    pub async fn sequence(
        &self,
        base: &str,
        style: DiagramStyle,
    ) -> Result<Vec<ValidatedMarkup>, GenerationError> {
        let settings = self.prompter.settings();
        let attempts = settings.frame_attempts;
        let result = with_retries("frames", attempts, settings.retry_pause(), move || {
            self.attempt(base, style)
        })
        .await;

        match result {
            Ok(frames) => {
                info!(%style, frames = frames.len(), "frame sequence validated");
                Ok(frames)
            }
            Err(last) => {
                error!(%style, attempts, reason = %last, "frame generation exhausted");
                Err(GenerationError::FrameGenerationFailed(format!(
                    "no valid {FRAME_COUNT}-frame sequence after {attempts} attempts: {last}"
                )))
            }
        }
    }

    async fn attempt(
        &self,
        base: &str,
        style: DiagramStyle,
    ) -> (String, Result<Vec<ValidatedMarkup>, AttemptError>) {
        let (model, completion) = self
            .prompter
            .ask(
                prompt::frame_system_prompt(style, FRAME_COUNT),
                prompt::frame_user_message(base),
                self.prompter.settings().frame_max_tokens,
            )
            .await;
        let outcome = match completion {
            Ok(raw) => self.validate(&raw, style).await,
            Err(e) => Err(e.into()),
        };
        (model, outcome)
    }

    async fn validate(
        &self,
        raw: &str,
        style: DiagramStyle,
    ) -> Result<Vec<ValidatedMarkup>, AttemptError> {
        let segments = parse::split_frames(raw);
        if segments.len() != FRAME_COUNT {
            return Err(AttemptError::FrameCount {
                expected: FRAME_COUNT,
                got: segments.len(),
            });
        }

        let mut frames = Vec::with_capacity(FRAME_COUNT);
        for (i, segment) in segments.iter().enumerate() {
            let markup = parse::ensure_header(segment, style);
            let image = self
                .validator
                .render(&markup, RenderContext::AnimationFrame)
                .await
                .map_err(|source| AttemptError::Frame {
                    index: i + 1,
                    source,
                })?;
            frames.push(ValidatedMarkup { markup, image });
        }
        Ok(frames)
    }
}
