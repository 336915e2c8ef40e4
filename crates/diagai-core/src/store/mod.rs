//! Document stores for users, projects and generation records.
//!
//! The credit operations on [`UserStore`] carry the atomicity the ledger
//! relies on: `reserve_credits` is a conditional decrement that never
//! leaves a balance below zero, `release_credits` an unconditional
//! increment.

mod file;
mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::{GenerationRequest, GenerationStatus, Project, User};

pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<(), StoreError>;
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn balance(&self, id: Uuid) -> Result<u32, StoreError>;
    /// Decrement by `amount` if the balance covers it. Returns `false`
    /// without touching the balance otherwise.
    async fn reserve_credits(&self, id: Uuid, amount: u32) -> Result<bool, StoreError>;
    async fn release_credits(&self, id: Uuid, amount: u32) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn create_project(&self, project: &Project) -> Result<(), StoreError>;
    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;
    /// Projects owned by `user_id`, oldest first.
    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>, StoreError>;
}

#[async_trait]
pub trait GenerationStore: Send + Sync {
    async fn create(&self, record: &GenerationRequest) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<GenerationRequest>, StoreError>;
    /// Compare-and-set: overwrite the stored record only while its status is
    /// still `expected`. Terminal records are never overwritten.
    async fn update(
        &self,
        record: &GenerationRequest,
        expected: GenerationStatus,
    ) -> Result<(), StoreError>;
    /// Newest first, optionally narrowed to one project.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
    ) -> Result<Vec<GenerationRequest>, StoreError>;
    async fn list_by_status(
        &self,
        statuses: &[GenerationStatus],
    ) -> Result<Vec<GenerationRequest>, StoreError>;
}

/// Shared guard for `GenerationStore::update` implementations.
pub(crate) fn check_expected(
    existing: &GenerationRequest,
    next: &GenerationRequest,
    expected: GenerationStatus,
) -> Result<(), StoreError> {
    let current = existing.status();
    if current.is_terminal() || current != expected {
        return Err(StoreError::Conflict(format!(
            "generation {} is {current}, expected {expected}; refusing to write {}",
            existing.id,
            next.status()
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod contract {
    //! Behaviour every store implementation must share.

    use super::*;
    use crate::{DiagramKind, DiagramStyle, GenerationInput, Plan};
    use std::sync::Arc;

    pub fn record(user_id: Uuid, project_id: Uuid) -> GenerationRequest {
        GenerationRequest::new(GenerationInput {
            user_id,
            project_id,
            prompt: "checkout flow".to_string(),
            kind: DiagramKind::Static,
            style: DiagramStyle::Flowchart,
        })
    }

    pub async fn credits<S: UserStore + 'static>(store: Arc<S>) {
        let user = User::new("a@example.com", None, Plan::Free).with_credits(5);
        store.create_user(&user).await.unwrap();

        assert!(store.reserve_credits(user.id, 3).await.unwrap());
        assert_eq!(store.balance(user.id).await.unwrap(), 2);
        assert!(!store.reserve_credits(user.id, 3).await.unwrap());
        assert_eq!(store.balance(user.id).await.unwrap(), 2);
        store.release_credits(user.id, 3).await.unwrap();
        assert_eq!(store.balance(user.id).await.unwrap(), 5);

        let missing = Uuid::new_v4();
        assert!(matches!(
            store.reserve_credits(missing, 1).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    pub async fn concurrent_reserves<S: UserStore + 'static>(store: Arc<S>) {
        let user = User::new("b@example.com", None, Plan::Free).with_credits(3);
        store.create_user(&user).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.reserve_credits(user.id, 3).await.unwrap()
            }));
        }
        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
        assert_eq!(store.balance(user.id).await.unwrap(), 0);
    }

    pub async fn generations<S: GenerationStore + 'static>(store: Arc<S>) {
        let user_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        let mut rec = record(user_id, project_id);
        rec.transition(GenerationStatus::Processing).unwrap();
        store.create(&rec).await.unwrap();

        let other = record(user_id, Uuid::new_v4());
        store.create(&other).await.unwrap();

        assert_eq!(store.get(rec.id).await.unwrap().as_ref(), Some(&rec));
        assert_eq!(store.list_for_user(user_id, None).await.unwrap().len(), 2);
        assert_eq!(
            store.list_for_user(user_id, Some(project_id)).await.unwrap().len(),
            1
        );
        let open = store
            .list_by_status(&[GenerationStatus::Processing])
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, rec.id);

        rec.fail("boom").unwrap();
        store
            .update(&rec, GenerationStatus::Processing)
            .await
            .unwrap();
        // Terminal records are settled once.
        for expected in [GenerationStatus::Processing, GenerationStatus::Failed] {
            assert!(matches!(
                store.update(&rec, expected).await,
                Err(StoreError::Conflict(_))
            ));
        }

        let mut fresh = record(user_id, project_id);
        fresh.id = rec.id;
        assert!(matches!(
            store.update(&fresh, GenerationStatus::Failed).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(
            store.get(rec.id).await.unwrap().unwrap().error(),
            Some("boom")
        );

        let unknown = record(user_id, project_id);
        assert!(matches!(
            store.update(&unknown, GenerationStatus::Queued).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    pub async fn stale_claims<S: GenerationStore + 'static>(store: Arc<S>) {
        let mut rec = record(Uuid::new_v4(), Uuid::new_v4());
        rec.transition(GenerationStatus::Processing).unwrap();
        store.create(&rec).await.unwrap();

        // Two workers holding the same `processing` copy.
        let mut first = rec.clone();
        let mut second = rec.clone();
        first.transition(GenerationStatus::Generating).unwrap();
        second.transition(GenerationStatus::Generating).unwrap();

        store
            .update(&first, GenerationStatus::Processing)
            .await
            .unwrap();
        assert!(matches!(
            store.update(&second, GenerationStatus::Processing).await,
            Err(StoreError::Conflict(_))
        ));

        second.fail("late").unwrap();
        assert!(matches!(
            store.update(&second, GenerationStatus::Processing).await,
            Err(StoreError::Conflict(_))
        ));
        first.complete("diagrams/a.png".into(), vec!["graph TD".into()]).unwrap();
        store
            .update(&first, GenerationStatus::Generating)
            .await
            .unwrap();
        assert_eq!(
            store.get(rec.id).await.unwrap().unwrap().status(),
            GenerationStatus::Completed
        );
    }

    pub async fn projects<S: ProjectStore + 'static>(store: Arc<S>) {
        let owner = Uuid::new_v4();
        let first = Project::new(owner, "Payments", "");
        let second = Project::new(owner, "Onboarding", "user signup");
        store.create_project(&first).await.unwrap();
        store.create_project(&second).await.unwrap();
        store
            .create_project(&Project::new(Uuid::new_v4(), "Elsewhere", ""))
            .await
            .unwrap();

        let listed = store.list_projects(owner).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.get_project(second.id).await.unwrap(), Some(second));
        assert_eq!(store.get_project(Uuid::new_v4()).await.unwrap(), None);
    }
}
