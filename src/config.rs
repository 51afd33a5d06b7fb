use anyhow::{Context, Result};
use dotenvy::dotenv;

// 10 MB
const DEFAULT_MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on a downloaded spreadsheet, in bytes.
    pub max_file_size: usize,
    pub openai_key: String,
    /// Chat-completion model used for plan generation and summaries.
    pub model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load .env file first
        dotenv().ok();

        let openai_key =
            std::env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;

        let model =
            std::env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let max_file_size = std::env::var("MAX_FILE_SIZE")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_MAX_FILE_SIZE);

        Ok(Config {
            max_file_size,
            openai_key,
            model,
        })
    }
}
