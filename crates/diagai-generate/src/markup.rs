use tracing::{error, info};

use diagai_core::{DiagramStyle, GenerationError};

use crate::engine::Prompter;
use crate::render::{RenderContext, RenderValidator};
use crate::{parse, prompt, with_retries, AttemptError, ValidatedMarkup};

/// Prompt to validated Mermaid markup, retrying with a fresh model pick on
/// empty, malformed or unrenderable output.
#[derive(Clone)]
pub struct MarkupGenerator {
    prompter: Prompter,
    validator: RenderValidator,
}

impl MarkupGenerator {
    pub fn new(prompter: Prompter, validator: RenderValidator) -> Self {
        Self {
            prompter,
            validator,
        }
    }

    /// Markup for a static diagram. The completion itself must open with the
    /// style's declaration.
    pub async fn generate(
        &self,
        prompt: &str,
        style: DiagramStyle,
    ) -> Result<ValidatedMarkup, GenerationError> {
        self.run(prompt, style, false).await
    }

    /// Base markup for an animation. A missing declaration is repaired
    /// instead of rejected, since the frames re-declare it anyway.
    pub async fn generate_base(
        &self,
        prompt: &str,
        style: DiagramStyle,
    ) -> Result<ValidatedMarkup, GenerationError> {
        self.run(prompt, style, true).await
    }

    async fn run(
        &self,
        prompt: &str,
        style: DiagramStyle,
        repair_header: bool,
    ) -> Result<ValidatedMarkup, GenerationError> {
        let settings = self.prompter.settings();
        let attempts = settings.markup_attempts;
        let result = with_retries("markup", attempts, settings.retry_pause(), move || {
            self.attempt(prompt, style, repair_header)
        })
        .await;

        match result {
            Ok(validated) => {
                info!(%style, bytes = validated.image.len(), "markup validated");
                Ok(validated)
            }
            Err(last) => {
                error!(%style, attempts, reason = %last, "markup generation exhausted");
                Err(GenerationError::MarkupGenerationFailed(format!(
                    "no renderable markup after {attempts} attempts: {last}"
                )))
            }
        }
    }

    async fn attempt(
        &self,
        prompt: &str,
        style: DiagramStyle,
        repair_header: bool,
    ) -> (String, Result<ValidatedMarkup, AttemptError>) {
        let (model, completion) = self
            .prompter
            .ask(
                prompt::markup_system_prompt(style),
                prompt.to_string(),
                self.prompter.settings().max_tokens,
            )
            .await;
        let outcome = match completion {
            Ok(raw) => self.validate(&raw, style, repair_header).await,
            Err(e) => Err(e.into()),
        };
        (model, outcome)
    }

    async fn validate(
        &self,
        raw: &str,
        style: DiagramStyle,
        repair_header: bool,
    ) -> Result<ValidatedMarkup, AttemptError> {
        let mut markup = parse::clean(raw);
        if markup.is_empty() {
            return Err(AttemptError::Invalid("completion contained no markup".into()));
        }
        if repair_header {
            markup = parse::ensure_header(&markup, style);
        } else if !style.is_declared_by(&markup) {
            return Err(AttemptError::Invalid(format!(
                "markup does not open with a {style} declaration"
            )));
        }
        let image = self.validator.render(&markup, RenderContext::Static).await?;
        Ok(ValidatedMarkup { markup, image })
    }
}
