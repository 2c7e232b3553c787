//! HTTP API server for parley gateway

pub mod conversations;
pub mod health;
pub mod models;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use crate::chat::{ChatService, ReplySettings};
use crate::context::{CompactionConfig, HistoryCompactor};
use crate::db::{ConversationRepo, DbPool, MessageRepo};
use crate::models::ModelCatalog;
use crate::providers::CompletionProvider;
use crate::{Error, Result};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub db: DbPool,
    pub conversations: ConversationRepo,
    pub messages: MessageRepo,
    pub chat: ChatService,
    pub catalog: Arc<ModelCatalog>,
    /// Models a conversation may be switched to
    pub allowed_models: Vec<String>,
}

/// JSON error body: `{"error": {"code", "message"}}`
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Handler error: status plus JSON body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(code: &str, message: &str) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
        },
    })
}

/// Map a domain error onto an HTTP status and error code
pub(crate) fn api_error(err: &Error) -> ApiError {
    let (status, code) = match err {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::Summarization(_) => (StatusCode::BAD_GATEWAY, "summarization_failed"),
        Error::Provider(_) | Error::Http(_) => (StatusCode::BAD_GATEWAY, "provider_error"),
        Error::UnknownModel(_) => (StatusCode::INTERNAL_SERVER_ERROR, "unknown_model"),
        Error::Database(_) | Error::Sqlite(_) => (StatusCode::INTERNAL_SERVER_ERROR, "db_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };

    if status.is_server_error() {
        tracing::error!(error = %err, code, "request failed");
    }

    (status, error_response(code, &err.to_string()))
}

/// Map a malformed or missing JSON body onto the error shape
pub(crate) fn json_rejection(rejection: &JsonRejection) -> ApiError {
    tracing::debug!(error = %rejection, "rejected request body");
    (
        rejection.status(),
        error_response("invalid_request", &rejection.body_text()),
    )
}

/// Configuration for building an API server
pub struct ApiServerBuilder {
    db: DbPool,
    provider: Arc<dyn CompletionProvider>,
    catalog: Arc<ModelCatalog>,
    port: u16,
    default_model: String,
    allowed_models: Vec<String>,
    compaction: CompactionConfig,
    reply: ReplySettings,
    static_dir: Option<PathBuf>,
}

impl ApiServerBuilder {
    /// Create a new API server builder
    #[must_use]
    pub fn new(
        db: DbPool,
        provider: Arc<dyn CompletionProvider>,
        catalog: Arc<ModelCatalog>,
        port: u16,
    ) -> Self {
        Self {
            db,
            provider,
            catalog,
            port,
            default_model: crate::config::DEFAULT_MODEL.to_string(),
            allowed_models: crate::config::DEFAULT_ALLOWED_MODELS
                .iter()
                .map(ToString::to_string)
                .collect(),
            compaction: CompactionConfig::default(),
            reply: ReplySettings::default(),
            static_dir: None,
        }
    }

    /// Set the model assigned to new conversations
    #[must_use]
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the models conversations may switch to
    #[must_use]
    pub fn allowed_models(mut self, models: Vec<String>) -> Self {
        self.allowed_models = models;
        self
    }

    /// Set the history compaction policy
    #[must_use]
    pub fn compaction(mut self, config: CompactionConfig) -> Self {
        self.compaction = config;
        self
    }

    /// Set reply completion parameters
    #[must_use]
    pub const fn reply(mut self, reply: ReplySettings) -> Self {
        self.reply = reply;
        self
    }

    /// Set the static files directory for serving the web UI
    #[must_use]
    pub fn static_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.static_dir = dir;
        self
    }

    /// Build the API server
    #[must_use]
    pub fn build(self) -> ApiServer {
        let conversations = ConversationRepo::new(self.db.clone(), self.default_model);
        let messages = MessageRepo::new(self.db.clone());
        let compactor = HistoryCompactor::new(self.compaction, self.provider.clone());
        let chat = ChatService::new(
            conversations.clone(),
            Arc::new(messages.clone()),
            self.provider,
            compactor,
            self.reply,
        );

        let state = Arc::new(ApiState {
            db: self.db,
            conversations,
            messages,
            chat,
            catalog: self.catalog,
            allowed_models: self.allowed_models,
        });

        ApiServer {
            state,
            port: self.port,
            static_dir: self.static_dir,
        }
    }
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
    static_dir: Option<PathBuf>,
}

impl ApiServer {
    /// Build the router with all routes
    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .nest(
                "/api/conversations",
                conversations::router(self.state.clone()),
            )
            .nest("/api/models", models::router(self.state.clone()))
            .merge(health::router())
            .merge(health::ready_router(self.state.clone()));

        // Serve static files if configured
        if let Some(static_dir) = &self.static_dir {
            let index_file = static_dir.join("index.html");
            let serve_dir =
                ServeDir::new(static_dir).not_found_service(ServeFile::new(&index_file));

            router = router.fallback_service(serve_dir);
            tracing::info!(path = %static_dir.display(), "serving static files");
        }

        // CORS layer for cross-origin requests from frontend
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
