use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;

mod config;
pub mod error;
mod logging;
pub mod models;
mod routes;
pub mod services;

use services::llm_agent::{LanguageModel, OpenAiAgent};
use services::session::Session;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    logging::init_logging()?;

    // Load configuration
    let config = config::Config::from_env()?;

    // Build our application state
    let agent: Arc<dyn LanguageModel> =
        Arc::new(OpenAiAgent::new(&config.openai_key, config.model.clone()));
    let state = Arc::new(AppState::new(&config, agent));

    // Build our application with its routes
    let app = routes::router(state);

    // Run it
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// Application state
pub struct AppState {
    pub session: Session,
}

impl AppState {
    fn new(config: &config::Config, agent: Arc<dyn LanguageModel>) -> Self {
        Self {
            session: Session::new(agent, config.max_file_size),
        }
    }
}
