#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

use diagai_core::{
    AiSettings, DiagramKind, DiagramStyle, GenerationInput, GenerationRequest, GenerationStatus,
    GenerationStore, MemoryStore, Plan, Project, ProjectStore, RenderSettings, StoreError, User,
    UserStore,
};
use diagai_generate::{
    CompletionRequest, FirstModel, FrameSequencer, MarkupGenerator, Prompter, RenderBackend,
    RenderError, RenderValidator, TextBackend, TextGenError, FRAME_DELIMITER,
};
use diagai_pipeline::{
    AssetError, AssetStore, GenerationQueue, LocalAssetStore, Orchestrator, Stores,
};

pub const MARKUP: &str = "flowchart TD\n    A[fa:fa-user Shopper] --> B[fa:fa-cog Checkout]";

pub fn frames(n: usize) -> String {
    (1..=n)
        .map(|i| format!("flowchart TD\n    S0 --> S{i}"))
        .collect::<Vec<_>>()
        .join(format!("\n{FRAME_DELIMITER}\n").as_str())
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([30, 144, 255, 255]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Answers markup prompts and frame prompts with fixed text, counting each.
pub struct FakeText {
    markup: String,
    frames: String,
    delay: Duration,
    pub markup_calls: AtomicUsize,
    pub frame_calls: AtomicUsize,
}

impl FakeText {
    pub fn new(markup: &str, frames: String) -> Arc<Self> {
        Self::slow(markup, frames, Duration::ZERO)
    }

    /// Like `new`, but every reply takes `delay`.
    pub fn slow(markup: &str, frames: String, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            markup: markup.to_string(),
            frames,
            delay,
            markup_calls: AtomicUsize::new(0),
            frame_calls: AtomicUsize::new(0),
        })
    }

    pub fn markup_calls(&self) -> usize {
        self.markup_calls.load(Ordering::SeqCst)
    }

    pub fn frame_calls(&self) -> usize {
        self.frame_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.markup_calls() + self.frame_calls()
    }
}

#[async_trait]
impl TextBackend for FakeText {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, TextGenError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if request.system.contains(FRAME_DELIMITER) {
            self.frame_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.frames.clone())
        } else {
            self.markup_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.markup.clone())
        }
    }
}

#[derive(Clone, Copy)]
pub enum RenderMode {
    Png,
    EmptyBody,
}

pub struct FakeRenderer {
    mode: RenderMode,
    pub calls: AtomicUsize,
}

impl FakeRenderer {
    pub fn new(mode: RenderMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RenderBackend for FakeRenderer {
    async fn render_markup(
        &self,
        _encoded: &str,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            // Scaled down so the GIF encoder stays quick.
            RenderMode::Png => Ok(png(width / 100, height / 100)),
            RenderMode::EmptyBody => Ok(Vec::new()),
        }
    }
}

/// Generation records whose first `failures` reads error out.
pub struct FlakyReads {
    inner: Arc<MemoryStore>,
    failures: AtomicUsize,
}

#[async_trait]
impl GenerationStore for FlakyReads {
    async fn create(&self, record: &GenerationRequest) -> Result<(), StoreError> {
        self.inner.create(record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<GenerationRequest>, StoreError> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Io(std::io::Error::other("read interrupted")));
        }
        self.inner.get(id).await
    }

    async fn update(
        &self,
        record: &GenerationRequest,
        expected: GenerationStatus,
    ) -> Result<(), StoreError> {
        self.inner.update(record, expected).await
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        self.inner.list_for_user(user_id, project_id).await
    }

    async fn list_by_status(
        &self,
        statuses: &[GenerationStatus],
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        self.inner.list_by_status(statuses).await
    }
}

/// Rejects every write.
pub struct BrokenAssets;

#[async_trait]
impl AssetStore for BrokenAssets {
    async fn store_image(&self, _: &[u8]) -> Result<String, AssetError> {
        Err(AssetError::Io(std::io::Error::other("disk full")))
    }

    async fn store_animation(&self, _: &[Vec<u8>], _: u32) -> Result<String, AssetError> {
        Err(AssetError::Io(std::io::Error::other("disk full")))
    }

    async fn delete(&self, _: &str) -> Result<(), AssetError> {
        Ok(())
    }
}

pub struct Harness {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryStore>,
    pub text: Arc<FakeText>,
    pub renderer: Arc<FakeRenderer>,
    pub assets_dir: TempDir,
    pub receiver: Option<mpsc::Receiver<Uuid>>,
    pub user: User,
    pub project: Project,
}

pub struct Setup {
    pub credits: u32,
    pub text: Arc<FakeText>,
    pub render: RenderMode,
    pub broken_assets: bool,
    pub failing_reads: usize,
}

impl Setup {
    pub fn new(credits: u32) -> Self {
        Self {
            credits,
            text: FakeText::new(MARKUP, frames(5)),
            render: RenderMode::Png,
            broken_assets: false,
            failing_reads: 0,
        }
    }

    pub fn text(mut self, text: Arc<FakeText>) -> Self {
        self.text = text;
        self
    }

    pub fn render(mut self, mode: RenderMode) -> Self {
        self.render = mode;
        self
    }

    pub fn broken_assets(mut self) -> Self {
        self.broken_assets = true;
        self
    }

    /// The next `count` generation reads fail.
    pub fn failing_reads(mut self, count: usize) -> Self {
        self.failing_reads = count;
        self
    }

    pub async fn build(self) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("owner@example.com", None, Plan::Pro).with_credits(self.credits);
        store.create_user(&user).await.unwrap();
        let project = Project::new(user.id, "Checkout", "");
        store.create_project(&project).await.unwrap();

        let settings = AiSettings {
            retry_pause_ms: 0,
            ..AiSettings::default()
        };
        let prompter = Prompter::new(self.text.clone(), Arc::new(FirstModel), settings);
        let renderer = FakeRenderer::new(self.render);
        let validator = RenderValidator::new(renderer.clone(), &RenderSettings::default());

        let assets_dir = TempDir::new().unwrap();
        let assets: Arc<dyn AssetStore> = if self.broken_assets {
            Arc::new(BrokenAssets)
        } else {
            Arc::new(LocalAssetStore::new(assets_dir.path()))
        };

        let (queue, receiver) = GenerationQueue::bounded(16);
        let mut stores = Stores::shared(store.clone());
        let flaky = Arc::new(FlakyReads {
            inner: store.clone(),
            failures: AtomicUsize::new(self.failing_reads),
        });
        stores.generations = flaky;
        let orchestrator = Orchestrator::new(
            stores,
            MarkupGenerator::new(prompter.clone(), validator.clone()),
            FrameSequencer::new(prompter, validator),
            assets,
            queue,
            1000,
        );

        Harness {
            orchestrator: Arc::new(orchestrator),
            store,
            text: self.text,
            renderer,
            assets_dir,
            receiver: Some(receiver),
            user,
            project,
        }
    }
}

impl Harness {
    pub fn input(&self, kind: DiagramKind) -> GenerationInput {
        GenerationInput {
            user_id: self.user.id,
            project_id: self.project.id,
            prompt: "a shopper checks out a basket".to_string(),
            kind,
            style: DiagramStyle::Flowchart,
        }
    }

    pub async fn balance(&self) -> u32 {
        self.store.balance(self.user.id).await.unwrap()
    }
}
