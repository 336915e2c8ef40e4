use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{check_expected, GenerationStore, ProjectStore, UserStore};
use crate::error::StoreError;
use crate::{GenerationRequest, GenerationStatus, Project, User};

/// In-process store. Used by tests and by embedders that bring their own
/// persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    projects: DashMap<Uuid, Project>,
    generations: DashMap<Uuid, GenerationRequest>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn user_missing(id: Uuid) -> StoreError {
    StoreError::NotFound { entity: "user", id }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        if self.users.iter().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(StoreError::Conflict(format!(
                "email {} is already registered",
                user.email
            )));
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn balance(&self, id: Uuid) -> Result<u32, StoreError> {
        self.users
            .get(&id)
            .map(|u| u.credits)
            .ok_or_else(|| user_missing(id))
    }

    async fn reserve_credits(&self, id: Uuid, amount: u32) -> Result<bool, StoreError> {
        // The shard write lock held by `get_mut` makes check-and-decrement atomic.
        let mut user = self.users.get_mut(&id).ok_or_else(|| user_missing(id))?;
        if user.credits < amount {
            return Ok(false);
        }
        user.credits -= amount;
        user.updated_at = chrono::Utc::now();
        Ok(true)
    }

    async fn release_credits(&self, id: Uuid, amount: u32) -> Result<(), StoreError> {
        let mut user = self.users.get_mut(&id).ok_or_else(|| user_missing(id))?;
        user.credits = user.credits.saturating_add(amount);
        user.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create_project(&self, project: &Project) -> Result<(), StoreError> {
        self.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.get(&id).map(|p| p.clone()))
    }

    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>, StoreError> {
        let mut out: Vec<Project> = self
            .projects
            .iter()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.clone())
            .collect();
        out.sort_by_key(|p| p.created_at);
        Ok(out)
    }
}

#[async_trait]
impl GenerationStore for MemoryStore {
    async fn create(&self, record: &GenerationRequest) -> Result<(), StoreError> {
        if self.generations.contains_key(&record.id) {
            return Err(StoreError::Conflict(format!(
                "generation {} already exists",
                record.id
            )));
        }
        self.generations.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<GenerationRequest>, StoreError> {
        Ok(self.generations.get(&id).map(|g| g.clone()))
    }

    async fn update(
        &self,
        record: &GenerationRequest,
        expected: GenerationStatus,
    ) -> Result<(), StoreError> {
        let mut existing = self
            .generations
            .get_mut(&record.id)
            .ok_or(StoreError::NotFound {
                entity: "generation",
                id: record.id,
            })?;
        check_expected(&existing, record, expected)?;
        *existing = record.clone();
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        let mut out: Vec<GenerationRequest> = self
            .generations
            .iter()
            .filter(|g| g.user_id == user_id && project_id.map_or(true, |p| g.project_id == p))
            .map(|g| g.clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn list_by_status(
        &self,
        statuses: &[GenerationStatus],
    ) -> Result<Vec<GenerationRequest>, StoreError> {
        Ok(self
            .generations
            .iter()
            .filter(|g| statuses.contains(&g.status()))
            .map(|g| g.clone())
            .collect())
    }
}
