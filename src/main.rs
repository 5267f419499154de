//! Unified ruchi binary - MCP server over stdio
//!
//! Usage:
//!   ruchi serve      - Run as MCP server (stdio transport)
//!   ruchi env-help   - Print configuration environment variables

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{
        AnnotateAble, CallToolResult, Content, ErrorCode, Implementation,
        ListResourceTemplatesResult,
        PaginatedRequestParam, ProtocolVersion, RawResourceTemplate, ReadResourceRequestParam,
        ReadResourceResult, ResourceContents, ServerCapabilities, ServerInfo,
    },
    schemars,
    service::{RequestContext, RoleServer},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ruchi_memory::agent::ContextOptions;
use ruchi_memory::config::{print_env_help, Config};
use ruchi_memory::constants::{CONTEXT_MIN_CONFIDENCE, DEFAULT_MIN_CONFIDENCE};
use ruchi_memory::embedding::EmbeddingService;
use ruchi_memory::errors::MemoryError;
use ruchi_memory::llm::OpenAiCompatClient;
use ruchi_memory::registry::{AgentRegistry, LogFailureSink, PassiveLearner};
use ruchi_memory::situations::SituationStore;
use ruchi_memory::store::cache::InMemoryCache;
use ruchi_memory::store::graph::InMemoryGraphStore;
use ruchi_memory::store::vector::InMemoryVectorStore;

#[derive(Parser)]
#[command(name = "ruchi")]
#[command(about = "Ruchi Memory - preference memory MCP server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as MCP server (stdio transport)
    Serve {
        /// Tenant served by this process
        #[arg(long, env = "RUCHI_TENANT_ID")]
        tenant_id: Option<String>,
    },

    /// Print configuration environment variables
    EnvHelp,
}

// =============================================================================
// MCP TOOL PARAMETER TYPES
// =============================================================================

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct GetPreferencesParams {
    /// User whose preferences to list
    user_id: String,
    /// Restrict to one domain (e.g. "food")
    domain: Option<String>,
    /// Minimum confidence to include (default: 0.3)
    min_confidence: Option<f32>,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct RecordInteractionParams {
    /// User the preference belongs to
    user_id: String,
    /// Id of the preference being confirmed or rejected
    preference_id: String,
    /// true if the user accepted the suggestion, false if rejected
    accepted: bool,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct LearnPreferenceParams {
    /// User the message came from
    user_id: String,
    /// Free-text message to learn preferences from
    message: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct DeleteAllPreferencesParams {
    /// User whose preferences to delete
    user_id: String,
}

#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
struct GetContextParams {
    /// Query or current message to find relevant context for
    query: String,
    /// User to retrieve context for
    user_id: String,
    /// Trigger a background learning pass on the query (default: true)
    auto_learn: Option<bool>,
    /// Include linked preferences in the response (default: true)
    include_preferences: Option<bool>,
    /// Include similar situations in the response (default: true)
    include_situations: Option<bool>,
    /// Minimum confidence for included preferences (default: 0.5)
    min_confidence: Option<f32>,
}

// =============================================================================
// MCP SERVER
// =============================================================================

#[derive(Clone)]
struct RuchiMcpServer {
    registry: Arc<AgentRegistry>,
    learner: Arc<PassiveLearner>,
    tool_router: ToolRouter<Self>,
}

fn to_mcp_error(e: MemoryError) -> McpError {
    let code = match &e {
        MemoryError::InvalidInput { .. }
        | MemoryError::InvalidUserId(_)
        | MemoryError::InvalidPreferenceKey(_)
        | MemoryError::InvalidFactorName(_)
        | MemoryError::ConfidenceOutOfRange(_) => ErrorCode::INVALID_PARAMS,
        _ => ErrorCode::INTERNAL_ERROR,
    };
    McpError {
        code,
        message: Cow::from(format!("{}: {}", e.code(), e.message())),
        data: None,
    }
}

fn json_result(value: serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(value.to_string())])
}

#[tool_router]
impl RuchiMcpServer {
    fn new(registry: Arc<AgentRegistry>, learner: Arc<PassiveLearner>) -> Self {
        Self {
            registry,
            learner,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "List a user's learned preferences, optionally filtered by domain and minimum confidence, ordered by descending confidence."
    )]
    async fn get_preferences(
        &self,
        Parameters(params): Parameters<GetPreferencesParams>,
    ) -> Result<CallToolResult, McpError> {
        let agent = self
            .registry
            .get_or_create(&params.user_id)
            .map_err(to_mcp_error)?;

        let records = agent
            .get_preferences(
                params.domain.as_deref(),
                params.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
            )
            .await
            .map_err(to_mcp_error)?;

        Ok(json_result(json!({ "preferences": records })))
    }

    #[tool(
        description = "Record that the user accepted or rejected a suggested preference. Acceptance raises confidence, rejection lowers it; a preference rejected to zero is deleted."
    )]
    async fn record_interaction(
        &self,
        Parameters(params): Parameters<RecordInteractionParams>,
    ) -> Result<CallToolResult, McpError> {
        let agent = self
            .registry
            .get_or_create(&params.user_id)
            .map_err(to_mcp_error)?;

        let preference_id = Uuid::parse_str(&params.preference_id).map_err(|e| McpError {
            code: ErrorCode::INVALID_PARAMS,
            message: Cow::from(format!("invalid preference_id: {e}")),
            data: None,
        })?;

        let new_confidence = agent
            .record_interaction(preference_id, params.accepted)
            .await
            .map_err(to_mcp_error)?;

        let status = match new_confidence {
            Some(_) => "updated",
            None => "deleted",
        };
        Ok(json_result(json!({
            "status": status,
            "new_confidence": new_confidence,
        })))
    }

    #[tool(
        description = "Learn preferences from a free-text message. Extracted preferences are reconciled against stored ones; contradictions are reported for confirmation instead of silently overwriting."
    )]
    async fn learn_preference(
        &self,
        Parameters(params): Parameters<LearnPreferenceParams>,
    ) -> Result<CallToolResult, McpError> {
        let agent = self
            .registry
            .get_or_create(&params.user_id)
            .map_err(to_mcp_error)?;

        let outcome = agent.learn(&params.message).await.map_err(to_mcp_error)?;
        let total = agent
            .get_preferences(None, 0.0)
            .await
            .map_err(to_mcp_error)?
            .len();

        let mut response = match outcome.learned.len() {
            0 => "No new preferences learned".to_string(),
            n => format!(
                "Learned {n} preference(s): {}",
                outcome
                    .learned
                    .iter()
                    .map(|r| r.key.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        };
        if !outcome.conflicts.is_empty() {
            response.push_str(&format!(
                "; {} conflict(s) need confirmation",
                outcome.conflicts.len()
            ));
        }

        Ok(json_result(json!({
            "status": "ok",
            "response": response,
            "conflicts": outcome.conflicts,
            "total_preferences": total,
        })))
    }

    #[tool(description = "Delete every stored preference for a user.")]
    async fn delete_all_preferences(
        &self,
        Parameters(params): Parameters<DeleteAllPreferencesParams>,
    ) -> Result<CallToolResult, McpError> {
        let agent = self
            .registry
            .get_or_create(&params.user_id)
            .map_err(to_mcp_error)?;

        let count = agent.delete_all_preferences().await.map_err(to_mcp_error)?;
        Ok(json_result(json!({ "status": "deleted", "count": count })))
    }

    #[tool(
        description = "Retrieve context relevant to a query: similar past situations and the preferences linked to them. Optionally triggers a background learning pass on the query."
    )]
    async fn get_context(
        &self,
        Parameters(params): Parameters<GetContextParams>,
    ) -> Result<CallToolResult, McpError> {
        let agent = self
            .registry
            .get_or_create(&params.user_id)
            .map_err(to_mcp_error)?;

        let options = ContextOptions {
            include_preferences: params.include_preferences.unwrap_or(true),
            include_situations: params.include_situations.unwrap_or(true),
            min_confidence: params.min_confidence.unwrap_or(CONTEXT_MIN_CONFIDENCE),
        };

        let mut response = agent
            .get_context(&params.query, &options)
            .await
            .map_err(to_mcp_error)?;

        if params.auto_learn.unwrap_or(true) {
            self.learner.spawn(&params.user_id, &params.query);
            response.learned = true;
        }

        Ok(json_result(json!({
            "preferences": response.preferences,
            "situations": response.situations,
            "summary": response.summary,
            "learned": response.learned,
        })))
    }

    async fn render_preferences(&self, user_id: &str) -> Result<String, McpError> {
        let agent = self.registry.get_or_create(user_id).map_err(to_mcp_error)?;
        let records = agent
            .get_preferences(None, 0.0)
            .await
            .map_err(to_mcp_error)?;

        if records.is_empty() {
            return Ok(format!("No preferences stored for {user_id}\n"));
        }

        let mut out = format!("Preferences for {user_id}:\n");
        for record in records {
            out.push_str(&format!(
                "- {} [{}] {:.2}: {}\n",
                record.key,
                record.sentiment.as_str(),
                record.confidence,
                record.value
            ));
        }
        Ok(out)
    }

    async fn render_contexts(&self, user_id: &str) -> Result<String, McpError> {
        let agent = self.registry.get_or_create(user_id).map_err(to_mcp_error)?;
        let records = agent
            .get_preferences(None, 0.0)
            .await
            .map_err(to_mcp_error)?;

        let mut out = format!("Learned contexts for {user_id}:\n");
        let mut any = false;
        for record in records {
            let Some(id) = record.id else { continue };
            let situations = agent.situations_for(id).await.map_err(to_mcp_error)?;
            for situation in situations {
                any = true;
                out.push_str(&format!(
                    "- {}: {}\n",
                    record.key,
                    situation.factors.to_embedding_text()
                ));
            }
        }
        if !any {
            out.push_str("(none recorded)\n");
        }
        Ok(out)
    }
}

/// Parse `user://{user_id}/{section}` resource URIs
fn parse_user_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("user://")?;
    let (user_id, section) = rest.split_once('/')?;
    if user_id.is_empty() {
        return None;
    }
    Some((user_id, section))
}

#[tool_handler]
impl ServerHandler for RuchiMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Ruchi Memory - per-user preference memory. \
                 Use learn_preference to extract preferences from user messages. \
                 Use get_context to surface situation-relevant preferences. \
                 Use record_interaction to reinforce or weaken a preference \
                 after the user reacts to a suggestion."
                    .to_string(),
            ),
        }
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult {
            next_cursor: None,
            resource_templates: vec![
                RawResourceTemplate {
                    uri_template: "user://{user_id}/preferences".to_string(),
                    name: "User preferences".to_string(),
                    description: Some("Human-readable preference list for a user".to_string()),
                    mime_type: Some("text/plain".to_string()),
                }
                .no_annotation(),
                RawResourceTemplate {
                    uri_template: "user://{user_id}/contexts".to_string(),
                    name: "User contexts".to_string(),
                    description: Some(
                        "Situational contexts each preference was learned under".to_string(),
                    ),
                    mime_type: Some("text/plain".to_string()),
                }
                .no_annotation(),
            ],
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let Some((user_id, section)) = parse_user_uri(&request.uri) else {
            return Err(McpError {
                code: ErrorCode::INVALID_PARAMS,
                message: Cow::from(format!("unknown resource uri: {}", request.uri)),
                data: None,
            });
        };

        let text = match section {
            "preferences" => self.render_preferences(user_id).await?,
            "contexts" => self.render_contexts(user_id).await?,
            other => {
                return Err(McpError {
                    code: ErrorCode::INVALID_PARAMS,
                    message: Cow::from(format!("unknown resource section: {other}")),
                    data: None,
                })
            }
        };

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { tenant_id } => {
            // stdout carries the MCP stdio transport; logs go to stderr
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .with_writer(std::io::stderr)
                .init();

            let mut config = Config::from_env();
            if let Some(tenant_id) = tenant_id {
                config.tenant_id = tenant_id;
            }
            config.log();

            let llm = Arc::new(OpenAiCompatClient::new(&config));
            let graph = Arc::new(InMemoryGraphStore::new());
            let vector = Arc::new(InMemoryVectorStore::new());
            let cache = Arc::new(InMemoryCache::new());
            let situations = Arc::new(SituationStore::new(
                graph.clone(),
                vector,
                EmbeddingService::new(llm.clone(), config.embedding_dimension),
            ));

            let registry = Arc::new(AgentRegistry::new(
                config,
                llm,
                graph,
                cache,
                situations,
            ));
            let learner = Arc::new(PassiveLearner::new(registry.clone(), Arc::new(LogFailureSink)));

            let server = RuchiMcpServer::new(registry.clone(), learner);
            let service = server.serve(rmcp::transport::stdio()).await?;
            service.waiting().await?;

            registry.shutdown();
        }

        Commands::EnvHelp => print_env_help(),
    }

    Ok(())
}
