pub mod config;
pub mod error;
pub mod ledger;
pub mod plans;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use config::{AiSettings, Config, RenderSettings, StorageSettings, WorkerSettings};
pub use error::{ConfigError, GenerationError, StoreError, TransitionError};
pub use ledger::CreditLedger;
pub use plans::Plan;
pub use store::{FileStore, GenerationStore, MemoryStore, ProjectStore, UserStore};

// --- Diagram kinds and styles ---

/// What the user is paying for: one rendered image or a looping animation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiagramKind {
    #[serde(alias = "image")]
    Static,
    #[serde(alias = "gif")]
    Animated,
}

impl DiagramKind {
    /// Credits charged at intake. Independent of how many retries the
    /// pipeline needs afterwards.
    pub fn price(self) -> u32 {
        match self {
            DiagramKind::Static => 1,
            DiagramKind::Animated => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiagramKind::Static => "static",
            DiagramKind::Animated => "animated",
        }
    }
}

impl FromStr for DiagramKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "static" | "image" => Ok(DiagramKind::Static),
            "animated" | "gif" => Ok(DiagramKind::Animated),
            other => Err(format!(
                "unknown diagram kind '{other}' (expected \"static\" or \"animated\")"
            )),
        }
    }
}

impl fmt::Display for DiagramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mermaid diagram family requested by the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiagramStyle {
    Flowchart,
    Sequence,
    Class,
    State,
    Er,
    Gantt,
    Pie,
    Mindmap,
}

impl DiagramStyle {
    pub const ALL: [DiagramStyle; 8] = [
        DiagramStyle::Flowchart,
        DiagramStyle::Sequence,
        DiagramStyle::Class,
        DiagramStyle::State,
        DiagramStyle::Er,
        DiagramStyle::Gantt,
        DiagramStyle::Pie,
        DiagramStyle::Mindmap,
    ];

    /// The declaration line every markup blob of this style starts with.
    pub fn header(self) -> &'static str {
        match self {
            DiagramStyle::Flowchart => "flowchart TD",
            DiagramStyle::Sequence => "sequenceDiagram",
            DiagramStyle::Class => "classDiagram",
            DiagramStyle::State => "stateDiagram-v2",
            DiagramStyle::Er => "erDiagram",
            DiagramStyle::Gantt => "gantt",
            DiagramStyle::Pie => "pie",
            DiagramStyle::Mindmap => "mindmap",
        }
    }

    /// Leading tokens accepted as a valid declaration for this style.
    pub fn declaration_tokens(self) -> &'static [&'static str] {
        match self {
            DiagramStyle::Flowchart => &["flowchart", "graph"],
            DiagramStyle::Sequence => &["sequenceDiagram"],
            DiagramStyle::Class => &["classDiagram", "classDiagram-v2"],
            DiagramStyle::State => &["stateDiagram-v2", "stateDiagram"],
            DiagramStyle::Er => &["erDiagram"],
            DiagramStyle::Gantt => &["gantt"],
            DiagramStyle::Pie => &["pie"],
            DiagramStyle::Mindmap => &["mindmap"],
        }
    }

    /// True if the first meaningful line of `markup` declares this style.
    /// `%%` directive and comment lines are skipped.
    pub fn is_declared_by(self, markup: &str) -> bool {
        let first = markup
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with("%%"))
            .and_then(|l| l.split_whitespace().next());
        match first {
            Some(token) => self.declaration_tokens().contains(&token),
            None => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiagramStyle::Flowchart => "flowchart",
            DiagramStyle::Sequence => "sequence",
            DiagramStyle::Class => "class",
            DiagramStyle::State => "state",
            DiagramStyle::Er => "er",
            DiagramStyle::Gantt => "gantt",
            DiagramStyle::Pie => "pie",
            DiagramStyle::Mindmap => "mindmap",
        }
    }

    /// Human wording used inside prompts.
    pub fn label(self) -> &'static str {
        match self {
            DiagramStyle::Flowchart => "flowchart",
            DiagramStyle::Sequence => "sequence diagram",
            DiagramStyle::Class => "class diagram",
            DiagramStyle::State => "state diagram",
            DiagramStyle::Er => "entity-relationship diagram",
            DiagramStyle::Gantt => "gantt chart",
            DiagramStyle::Pie => "pie chart",
            DiagramStyle::Mindmap => "mind map",
        }
    }
}

impl FromStr for DiagramStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        DiagramStyle::ALL
            .into_iter()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = DiagramStyle::ALL.iter().map(|s| s.as_str()).collect();
                format!("unknown diagram style '{wanted}' (expected one of: {})", names.join(", "))
            })
    }
}

impl fmt::Display for DiagramStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Generation lifecycle ---

/// Lifecycle of a generation request.
///
/// `queued -> processing -> generating -> {completed | failed}`. A record
/// that is still `processing` may also go straight to `failed` when its
/// background work never started (closed queue, service restart).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Queued,
    Processing,
    Generating,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }

    pub fn can_transition_to(self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Generating)
                | (Processing, Failed)
                | (Generating, Completed)
                | (Generating, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationStatus::Queued => "queued",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Generating => "generating",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller hands in to start a generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationInput {
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub prompt: String,
    pub kind: DiagramKind,
    pub style: DiagramStyle,
}

/// The durable record of one generation. Only the orchestrator writes
/// `status`, `result_location`, `markup` and `error`, and only through the
/// transition methods below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub prompt: String,
    pub kind: DiagramKind,
    pub style: DiagramStyle,
    credits_charged: u32,
    status: GenerationStatus,
    #[serde(default)]
    result_location: Option<String>,
    #[serde(default)]
    markup: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRequest {
    /// A fresh `queued` record priced for its kind.
    pub fn new(input: GenerationInput) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            project_id: input.project_id,
            credits_charged: input.kind.price(),
            prompt: input.prompt,
            kind: input.kind,
            style: input.style,
            status: GenerationStatus::Queued,
            result_location: None,
            markup: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn credits_charged(&self) -> u32 {
        self.credits_charged
    }

    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    pub fn result_location(&self) -> Option<&str> {
        self.result_location.as_deref()
    }

    pub fn markup(&self) -> &[String] {
        &self.markup
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn transition(&mut self, next: GenerationStatus) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Invalid {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// `generating -> completed`, recording where the artifact lives and the
    /// markup actually rendered into it.
    pub fn complete(&mut self, location: String, markup: Vec<String>) -> Result<(), TransitionError> {
        self.transition(GenerationStatus::Completed)?;
        self.result_location = Some(location);
        self.markup = markup;
        self.error = None;
        Ok(())
    }

    /// Move to `failed`. Any partial result is dropped.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(GenerationStatus::Failed)?;
        self.result_location = None;
        self.markup.clear();
        self.error = Some(error.into());
        Ok(())
    }
}

// --- Users and projects ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub plan: Plan,
    /// Balance. Mutated only through the store's reserve/release pair.
    pub credits: u32,
    pub account_status: AccountStatus,
    #[serde(default)]
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A new active account seeded with its plan's monthly allowance.
    pub fn new(email: impl Into<String>, name: Option<String>, plan: Plan) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            name,
            plan,
            credits: plan.credits_per_month(),
            account_status: AccountStatus::Active,
            is_admin: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_credits(mut self, credits: u32) -> Self {
        self.credits = credits;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(user_id: Uuid, name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            description: description.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
