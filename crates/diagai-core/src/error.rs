use thiserror::Error;
use uuid::Uuid;

use crate::GenerationStatus;

/// Failures of the document stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("generation is already {0}")]
    Terminal(GenerationStatus),
    #[error("invalid transition {from} -> {to}")]
    Invalid {
        from: GenerationStatus,
        to: GenerationStatus,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything that can go wrong between intake and a terminal record.
///
/// Only exhaustion of a component's own retry budget produces
/// `MarkupGenerationFailed` / `FrameGenerationFailed`; single-attempt
/// failures, render failures included, stay inside the component that
/// retries them.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u32, available: u32 },
    #[error("markup generation failed: {0}")]
    MarkupGenerationFailed(String),
    #[error("frame generation failed: {0}")]
    FrameGenerationFailed(String),
    #[error("storage failed: {0}")]
    StorageFailed(String),
    #[error("prompt must not be empty")]
    EmptyPrompt,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("user {0} not found")]
    UserNotFound(Uuid),
    #[error("account {0} is not active")]
    AccountInactive(Uuid),
    #[error("project {0} not found")]
    ProjectNotFound(Uuid),
    #[error("project limit of {0} reached for this plan")]
    ProjectLimitReached(usize),
    #[error("generation {0} not found")]
    NotFound(Uuid),
    #[error("generation queue is closed")]
    QueueClosed,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
