use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    schemars, tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use diagai_core::{
    DiagramKind, DiagramStyle, GenerationError, GenerationInput, GenerationRequest, Plan, Project,
    User,
};
use diagai_pipeline::{public_url, Accounts, Orchestrator};

// --- Request types ---

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct RegisterUserRequest {
    /// Email address, unique per account
    email: String,
    /// Display name
    name: Option<String>,
    /// "free" (default), "pro" or "enterprise"
    plan: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct UserRequest {
    /// Id returned by register_user
    user_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct CreateProjectRequest {
    user_id: String,
    /// Project name
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GenerateDiagramRequest {
    user_id: String,
    /// Project the diagram belongs to. Must be owned by the user.
    project_id: String,
    /// Natural-language description of the diagram
    prompt: String,
    /// "static" (1 credit, PNG) or "animated" (3 credits, 5-frame GIF). "image" and "gif" are accepted too.
    kind: String,
    /// One of: flowchart, sequence, class, state, er, gantt, pie, mindmap
    style: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct GetGenerationRequest {
    user_id: String,
    /// Id returned by generate_diagram
    generation_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
struct ListGenerationsRequest {
    user_id: String,
    /// Only generations in this project
    project_id: Option<String>,
}

// --- Server ---

#[derive(Clone)]
pub struct DiagaiServer {
    accounts: Accounts,
    orchestrator: Arc<Orchestrator>,
    public_base_url: String,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl DiagaiServer {
    pub fn new(accounts: Accounts, orchestrator: Arc<Orchestrator>, public_base_url: String) -> Self {
        Self {
            accounts,
            orchestrator,
            public_base_url,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Create an account. New accounts start with their plan's monthly credits (free 10, pro 100, enterprise 1000). Returns the user with its id.")]
    async fn register_user(
        &self,
        Parameters(req): Parameters<RegisterUserRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let plan = match req.plan.as_deref() {
                Some(raw) => raw.parse::<Plan>().map_err(GenerationError::InvalidInput)?,
                None => Plan::default(),
            };
            let user = self.accounts.register_user(&req.email, req.name, plan).await?;
            Ok::<_, GenerationError>(user_view(&user))
        }
        .await;
        reply(result)
    }

    #[tool(description = "Current credit balance and plan of a user.")]
    async fn get_balance(
        &self,
        Parameters(req): Parameters<UserRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let user = self.accounts.user(parse_id("user_id", &req.user_id)?).await?;
            Ok::<_, GenerationError>(json!({
                "userId": user.id,
                "credits": user.credits,
                "plan": user.plan,
            }))
        }
        .await;
        reply(result)
    }

    #[tool(description = "Create a project to group generations under. Free accounts may hold 3 projects, pro 10, enterprise unlimited.")]
    async fn create_project(
        &self,
        Parameters(req): Parameters<CreateProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let user_id = parse_id("user_id", &req.user_id)?;
            let project = self
                .accounts
                .create_project(user_id, &req.name, req.description.as_deref().unwrap_or(""))
                .await?;
            Ok::<_, GenerationError>(project_view(&project))
        }
        .await;
        reply(result)
    }

    #[tool(description = "List a user's projects, oldest first.")]
    async fn list_projects(
        &self,
        Parameters(req): Parameters<UserRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let projects = self
                .accounts
                .list_projects(parse_id("user_id", &req.user_id)?)
                .await?;
            Ok::<_, GenerationError>(Value::Array(
                projects.iter().map(project_view).collect(),
            ))
        }
        .await;
        reply(result)
    }

    #[tool(description = "Start generating a diagram. Credits are charged up front (static 1, animated 3) and refunded in full if generation fails. Returns immediately with status \"processing\"; poll get_generation until the status is \"completed\" (resultUrl is set) or \"failed\" (error is set).")]
    async fn generate_diagram(
        &self,
        Parameters(req): Parameters<GenerateDiagramRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let input = GenerationInput {
                user_id: parse_id("user_id", &req.user_id)?,
                project_id: parse_id("project_id", &req.project_id)?,
                prompt: req.prompt,
                kind: req
                    .kind
                    .parse::<DiagramKind>()
                    .map_err(GenerationError::InvalidInput)?,
                style: req
                    .style
                    .parse::<DiagramStyle>()
                    .map_err(GenerationError::InvalidInput)?,
            };
            let record = self.orchestrator.submit(input).await?;
            Ok::<_, GenerationError>(generation_view(&record, &self.public_base_url))
        }
        .await;
        reply(result)
    }

    #[tool(description = "Status and result of one generation. Completed generations include resultUrl and the Mermaid markup used (one entry for static, five frames for animated).")]
    async fn get_generation(
        &self,
        Parameters(req): Parameters<GetGenerationRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let record = self
                .orchestrator
                .get_generation(
                    parse_id("user_id", &req.user_id)?,
                    parse_id("generation_id", &req.generation_id)?,
                )
                .await?;
            Ok::<_, GenerationError>(generation_view(&record, &self.public_base_url))
        }
        .await;
        reply(result)
    }

    #[tool(description = "A user's generations, newest first, optionally limited to one project.")]
    async fn list_generations(
        &self,
        Parameters(req): Parameters<ListGenerationsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let result = async {
            let user_id = parse_id("user_id", &req.user_id)?;
            let project_id = req
                .project_id
                .as_deref()
                .map(|raw| parse_id("project_id", raw))
                .transpose()?;
            let records = self
                .orchestrator
                .list_generations(user_id, project_id)
                .await?;
            Ok::<_, GenerationError>(Value::Array(
                records
                    .iter()
                    .map(|r| generation_view(r, &self.public_base_url))
                    .collect(),
            ))
        }
        .await;
        reply(result)
    }
}

#[tool_handler]
impl ServerHandler for DiagaiServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(INSTRUCTIONS.into()),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

const INSTRUCTIONS: &str = r#"DiagAI turns natural-language descriptions into Mermaid diagrams rendered as PNG images or looping GIF animations.

Workflow:
1. `register_user` once, then `create_project`.
2. `generate_diagram` with a prompt, a kind and a style. Credits are taken immediately: static costs 1, animated costs 3.
3. The call returns a generation in status "processing". Poll `get_generation` until it is "completed" or "failed".
4. A failed generation refunds its credits in full. Check `get_balance` before large batches."#;

// --- Helpers ---

fn reply(result: Result<Value, GenerationError>) -> Result<CallToolResult, McpError> {
    match result {
        Ok(value) => {
            let text = serde_json::to_string_pretty(&value)
                .unwrap_or_else(|e| format!("Serialization error: {e}"));
            Ok(CallToolResult::success(vec![Content::text(text)]))
        }
        Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
    }
}

fn parse_id(field: &str, raw: &str) -> Result<Uuid, GenerationError> {
    raw.trim()
        .parse::<Uuid>()
        .map_err(|_| GenerationError::InvalidInput(format!("{field} '{raw}' is not a valid id")))
}

fn user_view(user: &User) -> Value {
    json!({
        "id": user.id,
        "email": user.email,
        "name": user.name,
        "plan": user.plan,
        "credits": user.credits,
        "accountStatus": user.account_status,
        "createdAt": user.created_at,
    })
}

fn project_view(project: &Project) -> Value {
    json!({
        "id": project.id,
        "name": project.name,
        "description": project.description,
        "createdAt": project.created_at,
    })
}

fn generation_view(record: &GenerationRequest, base_url: &str) -> Value {
    json!({
        "id": record.id,
        "projectId": record.project_id,
        "prompt": record.prompt,
        "kind": record.kind,
        "style": record.style,
        "status": record.status(),
        "creditsCharged": record.credits_charged(),
        "resultLocation": record.result_location(),
        "resultUrl": record.result_location().map(|loc| public_url(base_url, loc)),
        "markup": record.markup(),
        "error": record.error(),
        "createdAt": record.created_at,
        "updatedAt": record.updated_at,
    })
}
