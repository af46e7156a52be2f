//! Vault embeddings MCP server implementation

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use vault_embeddings::{LoadedEmbedding, NoteOutcome, SessionHandle};

/// Parameters for vault_similar tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SimilarParams {
    /// Vault-relative note path (e.g., "Projects/Rust rewrite.md")
    #[schemars(description = "Vault-relative path of the note")]
    pub note: String,
    /// Maximum number of results (default: configured topK)
    #[schemars(description = "Maximum number of results (1-100, default: configured topK)")]
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Parameters for tools taking a single note
#[derive(Debug, Deserialize, JsonSchema)]
pub struct NoteParams {
    #[schemars(description = "Vault-relative path of the note")]
    pub note: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReindexParams {
    /// Clear every stored embedding first
    #[schemars(description = "Clear the index before reindexing")]
    #[serde(default)]
    pub rebuild: bool,
}

/// Embedding summary for JSON output
#[derive(Debug, Serialize)]
struct EmbeddingJson {
    path: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

fn internal(context: &str, err: impl std::fmt::Display) -> McpError {
    McpError::internal_error(format!("{context}: {err}"), None)
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let output =
        serde_json::to_string_pretty(value).map_err(|e| internal("JSON serialization failed", e))?;
    Ok(CallToolResult::success(vec![Content::text(output)]))
}

fn outcome_label(outcome: &NoteOutcome) -> (&'static str, Option<String>) {
    match outcome {
        NoteOutcome::Stored => ("stored", None),
        NoteOutcome::Unchanged => ("unchanged", None),
        NoteOutcome::Removed => ("removed", None),
        NoteOutcome::Cancelled => ("cancelled", None),
        NoteOutcome::Skipped { reason } => ("skipped", Some(reason.clone())),
        NoteOutcome::Failed { reason } => ("failed", Some(reason.clone())),
    }
}

/// Vault embeddings MCP service
#[derive(Clone)]
pub struct VaultService {
    session: Arc<SessionHandle>,
    tool_router: ToolRouter<Self>,
}

impl VaultService {
    pub fn new(session: Arc<SessionHandle>) -> Self {
        Self {
            session,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl VaultService {
    #[tool(description = "Find notes semantically similar to a given note. Returns vault paths with cosine similarity scores, best first.")]
    async fn vault_similar(
        &self,
        params: Parameters<SimilarParams>,
    ) -> Result<CallToolResult, McpError> {
        let results = self
            .session
            .find_similar(&params.0.note, params.0.limit)
            .await
            .map_err(|e| internal("Similarity query failed", e))?;
        json_result(&results)
    }

    #[tool(description = "Generate and store the embedding of one note, even if it is unchanged.")]
    async fn vault_embed_note(
        &self,
        params: Parameters<NoteParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .session
            .embed_note(&params.0.note)
            .await
            .map_err(|e| internal("Embedding failed", e))?;
        let (status, reason) = outcome_label(&outcome);
        json_result(&EmbeddingJson {
            path: params.0.note,
            status,
            model_id: None,
            dimensions: None,
            updated_at: None,
            reason,
        })
    }

    #[tool(description = "Show whether a note has a stored embedding and which model produced it.")]
    async fn vault_show_embedding(
        &self,
        params: Parameters<NoteParams>,
    ) -> Result<CallToolResult, McpError> {
        let loaded = self
            .session
            .load_embedding(&params.0.note)
            .await
            .map_err(|e| internal("Failed to load embedding", e))?;

        let summary = match loaded {
            LoadedEmbedding::Found(record) => EmbeddingJson {
                path: record.path,
                status: "current",
                model_id: Some(record.model_id),
                dimensions: Some(record.vector.len()),
                updated_at: Some(record.updated_at.to_rfc3339()),
                reason: None,
            },
            LoadedEmbedding::Stale(record, why) => EmbeddingJson {
                path: record.path,
                status: "stale",
                model_id: Some(record.model_id),
                dimensions: Some(record.vector.len()),
                updated_at: Some(record.updated_at.to_rfc3339()),
                reason: Some(why.to_string()),
            },
            LoadedEmbedding::Missing => EmbeddingJson {
                path: params.0.note,
                status: "missing",
                model_id: None,
                dimensions: None,
                updated_at: None,
                reason: None,
            },
        };
        json_result(&summary)
    }

    #[tool(description = "Reindex every note in the vault. Unchanged notes are skipped; deleted and excluded notes lose their embeddings.")]
    async fn vault_reindex(
        &self,
        params: Parameters<ReindexParams>,
    ) -> Result<CallToolResult, McpError> {
        let report = if params.0.rebuild {
            self.session.rebuild().await
        } else {
            self.session.reindex_all().await
        }
        .map_err(|e| internal("Reindex failed", e))?;
        json_result(&report)
    }

    #[tool(description = "Embedding index status: active model, record counts per model, current vs stale.")]
    async fn vault_index_status(&self) -> Result<CallToolResult, McpError> {
        let status = self
            .session
            .status()
            .await
            .map_err(|e| internal("Failed to read index status", e))?;
        json_result(&status)
    }
}

#[tool_handler]
impl ServerHandler for VaultService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Vault embeddings MCP server. Finds semantically similar notes in a markdown vault and manages the embedding index.".to_string()
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

/// Run the MCP server over stdio until the client disconnects
pub async fn run_mcp_server(session: SessionHandle) -> Result<()> {
    use tokio::io::{stdin, stdout};

    let session = Arc::new(session);
    let service = VaultService::new(session.clone());
    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;
    server.waiting().await?;

    if let Ok(session) = Arc::try_unwrap(session) {
        session.shutdown().await;
    }
    Ok(())
}
