//! The generation state machine.
//!
//! ```text
//! queued -> processing -> generating -> completed
//!                |              \
//!                +---------------+-> failed (full refund)
//! ```
//!
//! `submit` runs in the caller's request: it validates, reserves credits,
//! persists the record as `processing` and queues its id. `execute` runs on
//! a worker and drives the record to a terminal state. Every path into
//! `failed` after a successful reservation releases the full amount.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use diagai_core::{
    AccountStatus, CreditLedger, DiagramKind, GenerationError, GenerationInput,
    GenerationRequest, GenerationStatus, GenerationStore, ProjectStore, StoreError, UserStore,
};
use diagai_generate::{FrameSequencer, MarkupGenerator};

use crate::assets::AssetStore;
use crate::worker::GenerationQueue;

/// Error recorded on records cut off by a restart.
pub const INTERRUPTED: &str = "interrupted by service restart";

const READ_RETRY_PAUSE: Duration = Duration::from_millis(250);

/// The document stores the orchestrator reads and writes.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub projects: Arc<dyn ProjectStore>,
    pub generations: Arc<dyn GenerationStore>,
}

impl Stores {
    /// All three roles served by one store value.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: UserStore + ProjectStore + GenerationStore + 'static,
    {
        Self {
            users: store.clone(),
            projects: store.clone(),
            generations: store,
        }
    }
}

pub struct Orchestrator {
    stores: Stores,
    ledger: CreditLedger,
    markup: MarkupGenerator,
    frames: FrameSequencer,
    assets: Arc<dyn AssetStore>,
    queue: GenerationQueue,
    frame_ms: u32,
}

impl Orchestrator {
    pub fn new(
        stores: Stores,
        markup: MarkupGenerator,
        frames: FrameSequencer,
        assets: Arc<dyn AssetStore>,
        queue: GenerationQueue,
        frame_ms: u32,
    ) -> Self {
        Self {
            ledger: CreditLedger::new(stores.users.clone()),
            stores,
            markup,
            frames,
            assets,
            queue,
            frame_ms,
        }
    }

    /// Accept a generation. Returns the `processing` record once its credits
    /// are reserved and its id is queued.
    ///
    /// `InsufficientCredits` is returned before anything is persisted.
    pub async fn submit(&self, input: GenerationInput) -> Result<GenerationRequest, GenerationError> {
        if input.prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        let user = self
            .stores
            .users
            .get_user(input.user_id)
            .await?
            .ok_or(GenerationError::UserNotFound(input.user_id))?;
        if user.account_status != AccountStatus::Active {
            return Err(GenerationError::AccountInactive(user.id));
        }
        let owned = self
            .stores
            .projects
            .get_project(input.project_id)
            .await?
            .is_some_and(|p| p.user_id == user.id);
        if !owned {
            return Err(GenerationError::ProjectNotFound(input.project_id));
        }

        let mut record = GenerationRequest::new(input);
        let price = record.credits_charged();
        self.ledger.reserve(record.user_id, price).await?;

        // From here on every early exit hands the reservation back.
        if let Err(e) = self.persist_accepted(&mut record).await {
            self.refund(&record).await;
            return Err(e);
        }
        info!(
            generation_id = %record.id,
            user = %record.user_id,
            kind = %record.kind,
            style = %record.style,
            credits = price,
            "generation accepted"
        );

        if let Err(e) = self.queue.enqueue(record.id).await {
            warn!(generation_id = %record.id, "queue closed, failing generation");
            self.settle_failure(record, &e).await;
            return Err(e);
        }
        Ok(record)
    }

    async fn persist_accepted(&self, record: &mut GenerationRequest) -> Result<(), GenerationError> {
        record.transition(GenerationStatus::Processing)?;
        self.stores.generations.create(record).await?;
        Ok(())
    }

    /// Drive one accepted generation to a terminal state and return that
    /// state. Records that are terminal or not `processing` are left alone,
    /// and so is a record another worker claimed first.
    pub async fn execute(&self, id: Uuid) -> Result<GenerationStatus, GenerationError> {
        let mut record = self.load(id).await?;
        if record.status() != GenerationStatus::Processing {
            debug!(generation_id = %id, status = %record.status(), "not runnable, skipping");
            return Ok(record.status());
        }

        let accepted = record.clone();
        record.transition(GenerationStatus::Generating)?;
        match self
            .stores
            .generations
            .update(&record, GenerationStatus::Processing)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict(reason)) => {
                debug!(generation_id = %id, %reason, "claimed elsewhere, skipping");
                return Ok(self.stored_status(id, GenerationStatus::Generating).await);
            }
            Err(e) => {
                self.settle_failure(accepted, &GenerationError::from(e)).await;
                return Ok(GenerationStatus::Failed);
            }
        }
        info!(generation_id = %id, kind = %record.kind, "generation started");

        let (location, markup) = match self.produce(&record).await {
            Ok(output) => output,
            Err(e) => return Ok(self.settle_failure(record, &e).await),
        };

        let generating = record.clone();
        record.complete(location.clone(), markup)?;
        if let Err(e) = self
            .stores
            .generations
            .update(&record, GenerationStatus::Generating)
            .await
        {
            if let Err(cleanup) = self.assets.delete(&location).await {
                warn!(generation_id = %id, %location, error = %cleanup, "could not remove orphaned asset");
            }
            if let StoreError::Conflict(reason) = &e {
                warn!(generation_id = %id, %reason, "settled elsewhere, result discarded");
                return Ok(self.stored_status(id, GenerationStatus::Failed).await);
            }
            let e = GenerationError::StorageFailed(format!("could not record result: {e}"));
            return Ok(self.settle_failure(generating, &e).await);
        }
        info!(generation_id = %id, %location, "generation completed");
        Ok(GenerationStatus::Completed)
    }

    /// Read a queued record, trying once more after a short pause so a
    /// transient read error does not strand it until the next restart.
    async fn load(&self, id: Uuid) -> Result<GenerationRequest, GenerationError> {
        let first = match self.stores.generations.get(id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(generation_id = %id, error = %e, "could not read generation, retrying");
                tokio::time::sleep(READ_RETRY_PAUSE).await;
                self.stores.generations.get(id).await?
            }
        };
        first.ok_or(GenerationError::NotFound(id))
    }

    /// Status as stored now, for reporting after losing a race.
    async fn stored_status(&self, id: Uuid, fallback: GenerationStatus) -> GenerationStatus {
        match self.stores.generations.get(id).await {
            Ok(Some(record)) => record.status(),
            _ => fallback,
        }
    }

    /// The artifact location and the markup rendered into it.
    async fn produce(
        &self,
        record: &GenerationRequest,
    ) -> Result<(String, Vec<String>), GenerationError> {
        match record.kind {
            DiagramKind::Static => {
                let diagram = self.markup.generate(&record.prompt, record.style).await?;
                let location = self
                    .assets
                    .store_image(&diagram.image)
                    .await
                    .map_err(|e| GenerationError::StorageFailed(e.to_string()))?;
                Ok((location, vec![diagram.markup]))
            }
            DiagramKind::Animated => {
                let base = self
                    .markup
                    .generate_base(&record.prompt, record.style)
                    .await?;
                let frames = self.frames.sequence(&base.markup, record.style).await?;
                let (markup, images): (Vec<String>, Vec<Vec<u8>>) =
                    frames.into_iter().map(|f| (f.markup, f.image)).unzip();
                let location = self
                    .assets
                    .store_animation(&images, self.frame_ms)
                    .await
                    .map_err(|e| GenerationError::StorageFailed(e.to_string()))?;
                Ok((location, markup))
            }
        }
    }

    /// Record the failure and refund, returning the resulting status. The
    /// refund happens even when the failed status cannot be written, but not
    /// when the store reports the record was already settled elsewhere.
    async fn settle_failure(
        &self,
        mut record: GenerationRequest,
        cause: &GenerationError,
    ) -> GenerationStatus {
        let expected = record.status();
        let reason = cause.to_string();
        error!(generation_id = %record.id, error = %reason, "generation failed");
        if let Err(e) = record.fail(reason) {
            error!(generation_id = %record.id, error = %e, "could not mark failed");
            return record.status();
        }
        match self.stores.generations.update(&record, expected).await {
            Ok(()) => {}
            Err(StoreError::Conflict(reason)) => {
                warn!(generation_id = %record.id, %reason, "already settled, no refund");
                return self.stored_status(record.id, GenerationStatus::Failed).await;
            }
            Err(e) => error!(generation_id = %record.id, error = %e, "could not record failure"),
        }
        self.refund(&record).await;
        GenerationStatus::Failed
    }

    async fn refund(&self, record: &GenerationRequest) {
        if let Err(e) = self
            .ledger
            .release(record.user_id, record.credits_charged())
            .await
        {
            error!(
                generation_id = %record.id,
                user = %record.user_id,
                credits = record.credits_charged(),
                error = %e,
                "refund failed"
            );
        }
    }

    /// Fail and refund every record a previous process left `processing` or
    /// `generating`. Must run before workers start.
    pub async fn reconcile_interrupted(&self) -> Result<usize, GenerationError> {
        let stranded = self
            .stores
            .generations
            .list_by_status(&[GenerationStatus::Processing, GenerationStatus::Generating])
            .await?;
        let mut settled = 0;
        for mut record in stranded {
            let expected = record.status();
            if record.fail(INTERRUPTED).is_err() {
                continue;
            }
            if let Err(e) = self.stores.generations.update(&record, expected).await {
                error!(generation_id = %record.id, error = %e, "could not reconcile generation");
                continue;
            }
            self.refund(&record).await;
            settled += 1;
        }
        if settled > 0 {
            warn!(count = settled, "failed and refunded interrupted generations");
        }
        Ok(settled)
    }

    /// A record the user owns. Someone else's id reads as not found.
    pub async fn get_generation(
        &self,
        user_id: Uuid,
        id: Uuid,
    ) -> Result<GenerationRequest, GenerationError> {
        self.stores
            .generations
            .get(id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or(GenerationError::NotFound(id))
    }

    pub async fn list_generations(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<GenerationRequest>, GenerationError> {
        Ok(self
            .stores
            .generations
            .list_for_user(user_id, project_id)
            .await?)
    }
}
