//! HTTP Server
//!
//! Axum router for the JSON API, the streaming relay, the chat event stream
//! and the static pages.

mod auth;
mod chat;
pub mod error;
mod events;
pub mod extract;
mod message;
mod pages;

pub use chat::MAX_CONTENT_CHARS;
pub use error::{ApiError, ApiResult};
pub use extract::AuthUser;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::TokenSigner;
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::mailer::{LogMailer, Mailer};
use crate::relay::{HttpInferenceBackend, InFlightChats, InferenceBackend};
use crate::store::{SqliteStore, Store};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub backend: Arc<dyn InferenceBackend>,
    pub tokens: Arc<TokenSigner>,
    pub mailer: Arc<dyn Mailer>,
    pub events: EventBus,
    pub in_flight: InFlightChats,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn Store>,
        backend: Arc<dyn InferenceBackend>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let tokens = Arc::new(TokenSigner::from_secret(&config.session_secret));
        Self {
            config: Arc::new(config),
            store,
            backend,
            tokens,
            mailer,
            events: EventBus::default(),
            in_flight: InFlightChats::new(),
        }
    }

    /// Production wiring: SQLite store, HTTP backend, log mailer.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let store = SqliteStore::new(&config.database_path)
            .await
            .with_context(|| format!("opening database {}", config.database_path.display()))?;
        let backend = HttpInferenceBackend::new(config.backend_url.clone());
        Ok(Self::new(config, Arc::new(store), Arc::new(backend), Arc::new(LogMailer)))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(pages::index))
        .route("/terms", get(pages::terms))
        .route("/privacy", get(pages::privacy))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/forgot-password", post(auth::forgot_password))
        .route("/api/auth/reset-password", post(auth::reset_password))
        .route("/api/chat", post(chat::relay))
        .route("/api/chat/updatetitle", post(chat::update_title))
        .route("/api/chat/update", post(chat::update_chat))
        .route("/api/chat/list", get(chat::list_chats))
        .route("/api/message/list", get(message::list_messages))
        .route("/api/message/update", post(message::update_message))
        .route("/api/message/delete", post(message::delete_message))
        .route("/api/events", get(events::chat_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: AppConfig) -> Result<()> {
    let addr = config.bind_addr;
    let state = AppState::from_config(config).await?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Support chat listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}
