use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{check_expected, GenerationStore, ProjectStore, UserStore};
use crate::error::StoreError;
use crate::{GenerationRequest, GenerationStatus, Project, User};

/// JSON documents on disk, one file per entity:
///
/// ```text
/// <root>/users/<id>.json
/// <root>/projects/<id>.json
/// <root>/generations/<id>.json
/// ```
///
/// Every write goes to a dot-prefixed temp file first and is renamed into
/// place, so readers never observe a half-written document. Read-modify-write
/// sequences are serialised per user (credits) and per generation (status).
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    user_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    generation_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    registration: Mutex<()>,
}

const USERS: &str = "users";
const PROJECTS: &str = "projects";
const GENERATIONS: &str = "generations";

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [USERS, PROJECTS, GENERATIONS] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        Ok(Self {
            root,
            user_locks: DashMap::new(),
            generation_locks: DashMap::new(),
            registration: Mutex::new(()),
        })
    }

    fn path(&self, collection: &str, id: Uuid) -> PathBuf {
        self.root.join(collection).join(format!("{id}.json"))
    }

    fn lock_for(locks: &DashMap<Uuid, Arc<Mutex<()>>>, id: Uuid) -> Arc<Mutex<()>> {
        locks.entry(id).or_default().clone()
    }

    async fn read<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: Uuid,
    ) -> Result<Option<T>, StoreError> {
        match fs::read_to_string(self.path(collection, id)).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(
        &self,
        collection: &str,
        id: Uuid,
        doc: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(doc)?;
        let dir = self.root.join(collection);
        let tmp = dir.join(format!(".{id}.json.tmp"));
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, self.path(collection, id)).await?;
        Ok(())
    }

    /// Every parseable document in a collection. Unreadable files are
    /// logged and skipped so one corrupt record cannot hide the rest.
    async fn scan<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>, StoreError> {
        let mut entries = fs::read_dir(self.root.join(collection)).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let path = entry.path();
            let parsed = match fs::read_to_string(&path).await {
                Ok(raw) => serde_json::from_str::<T>(&raw).map_err(StoreError::from),
                Err(e) => Err(e.into()),
            };
            match parsed {
                Ok(doc) => out.push(doc),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable document"),
            }
        }
        Ok(out)
    }

    async fn require_user(&self, id: Uuid) -> Result<User, StoreError> {
        self.read(USERS, id)
            .await?
            .ok_or(StoreError::NotFound { entity: "user", id })
    }
}

#[async_trait]
impl UserStore for FileStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let _guard = self.registration.lock().await;
        let existing: Vec<User> = self.scan(USERS).await?;
        if existing
            .iter()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email))
        {
            return Err(StoreError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }
        self.write(USERS, user.id, user).await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        self.read(USERS, id).await
    }

    async fn balance(&self, id: Uuid) -> Result<u32, StoreError> {
        Ok(self.require_user(id).await?.credits)
    }

    async fn reserve_credits(&self, id: Uuid, amount: u32) -> Result<bool, StoreError> {
        let lock = Self::lock_for(&self.user_locks, id);
        let _guard = lock.lock().await;
        let mut user = self.require_user(id).await?;
        if user.credits < amount {
            return Ok(false);
        }
        user.credits -= amount;
        user.updated_at = chrono::Utc::now();
        self.write(USERS, id, &user).await?;
        Ok(true)
    }

    async fn release_credits(&self, id: Uuid, amount: u32) -> Result<(), StoreError> {
        let lock = Self::lock_for(&self.user_locks, id);
        let _guard = lock.lock().await;
        let mut user = self.require_user(id).await?;
        user.credits = user.credits.saturating_add(amount);
        user.updated_at = chrono::Utc::now();
        self.write(USERS, id, &user).await
    }
}

#[async_trait]
impl ProjectStore for FileStore {
    async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
        self.write(PROJECTS, project.id, project).await
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        self.read(PROJECTS, id).await
    }

    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>, StoreError> {
        let mut out: Vec<Project> = self
            .scan::<Project>(PROJECTS)
            .await?
            .into_iter()
            .filter(|p| p.user_id == user_id)
            .collect();
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }
}

#[async_trait]
impl GenerationStore for FileStore {
    async fn create(&self, record: &GenerationRequest) -> Result<(), StoreError> {
        let lock = Self::lock_for(&self.generation_locks, record.id);
        let _guard = lock.lock().await;
        if fs::try_exists(self.path(GENERATIONS, record.id)).await? {
            return Err(StoreError::Conflict(format!(
                "generation {} already exists",
                record.id
            )));
        }
        self.write(GENERATIONS, record.id, record).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<GenerationRequest>, StoreError> {
        self.read(GENERATIONS, id).await
    }

    async fn update(
        &self,
        record: &GenerationRequest,
        expected: GenerationStatus,
    ) -> Result<(), StoreError> {
        let lock = Self::lock_for(&self.generation_locks, record.id);
        let _guard = lock.lock().await;
        let existing: GenerationRequest =
            self.read(GENERATIONS, record.id)
                .await?
                .ok_or(StoreError::NotFound {
                    entity: "generation",
                    id: record.id,
                })?;
        check_expected(&existing, record, expected)?;
        self.write(GENERATIONS, record.id, record).await
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        let mut out: Vec<GenerationRequest> = self
            .scan::<GenerationRequest>(GENERATIONS)
            .await?
            .into_iter()
            .filter(|g| g.user_id == user_id && project_id.map_or(true, |p| g.project_id == p))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_by_status(
        &self,
        statuses: &[GenerationStatus],
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        Ok(self
            .scan::<GenerationRequest>(GENERATIONS)
            .await?
            .into_iter()
            .filter(|g| statuses.contains(&g.status()))
            .collect())
    }
}
