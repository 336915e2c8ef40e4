use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use diagai_core::{
    AccountStatus, GenerationError, Plan, Project, ProjectStore, User, UserStore,
};

/// Users and their projects.
#[derive(Clone)]
pub struct Accounts {
    users: Arc<dyn UserStore>,
    projects: Arc<dyn ProjectStore>,
}

impl Accounts {
    pub fn new(users: Arc<dyn UserStore>, projects: Arc<dyn ProjectStore>) -> Self {
        Self { users, projects }
    }

    /// A new active account holding its plan's monthly credits.
    pub async fn register_user(
        &self,
        email: &str,
        name: Option<String>,
        plan: Plan,
    ) -> Result<User, GenerationError> {
        let email = email.trim();
        let well_formed = match email.split_once('@') {
            Some((local, domain)) => !local.is_empty() && domain.contains('.'),
            None => false,
        };
        if !well_formed {
            return Err(GenerationError::InvalidInput(format!(
                "'{email}' is not an email address"
            )));
        }
        let name = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        let user = User::new(email, name, plan);
        self.users.create_user(&user).await?;
        info!(user = %user.id, plan = ?plan, credits = user.credits, "user registered");
        Ok(user)
    }

    pub async fn user(&self, user_id: Uuid) -> Result<User, GenerationError> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or(GenerationError::UserNotFound(user_id))
    }

    pub async fn balance(&self, user_id: Uuid) -> Result<u32, GenerationError> {
        Ok(self.user(user_id).await?.credits)
    }

    pub async fn create_project(
        &self,
        user_id: Uuid,
        name: &str,
        description: &str,
    ) -> Result<Project, GenerationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GenerationError::InvalidInput(
                "project name must not be empty".to_string(),
            ));
        }
        let user = self.user(user_id).await?;
        if user.account_status != AccountStatus::Active {
            return Err(GenerationError::AccountInactive(user_id));
        }
        if let Some(limit) = user.plan.max_projects() {
            if self.projects.list_projects(user_id).await?.len() >= limit {
                return Err(GenerationError::ProjectLimitReached(limit));
            }
        }
        let project = Project::new(user_id, name, description.trim());
        self.projects.create_project(&project).await?;
        info!(user = %user_id, project = %project.id, "project created");
        Ok(project)
    }

    pub async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>, GenerationError> {
        self.user(user_id).await?;
        Ok(self.projects.list_projects(user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagai_core::MemoryStore;

    fn accounts() -> Accounts {
        let store = Arc::new(MemoryStore::new());
        Accounts::new(store.clone(), store)
    }

    #[tokio::test]
    async fn registration_seeds_plan_credits() {
        let accounts = accounts();
        let user = accounts
            .register_user(" ada@example.com ", Some("  ".into()), Plan::Pro)
            .await
            .unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.name, None);
        assert_eq!(accounts.balance(user.id).await.unwrap(), 100);

        assert!(matches!(
            accounts.register_user("ada@example.com", None, Plan::Free).await,
            Err(GenerationError::Store(_))
        ));
        assert!(matches!(
            accounts.register_user("not-an-email", None, Plan::Free).await,
            Err(GenerationError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn free_plan_caps_projects_at_three() {
        let accounts = accounts();
        let user = accounts
            .register_user("cap@example.com", None, Plan::Free)
            .await
            .unwrap();
        for i in 0..3 {
            accounts
                .create_project(user.id, &format!("p{i}"), "")
                .await
                .unwrap();
        }
        assert!(matches!(
            accounts.create_project(user.id, "p3", "").await,
            Err(GenerationError::ProjectLimitReached(3))
        ));
        assert_eq!(accounts.list_projects(user.id).await.unwrap().len(), 3);
        assert!(matches!(
            accounts.create_project(user.id, "  ", "").await,
            Err(GenerationError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn unknown_user() {
        let accounts = accounts();
        let id = Uuid::new_v4();
        assert!(matches!(
            accounts.list_projects(id).await,
            Err(GenerationError::UserNotFound(u)) if u == id
        ));
    }
}
