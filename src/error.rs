use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Rejected at the upload boundary, before any ingestion is attempted.
    #[error("unsupported file: {0}")]
    FileValidation(String),

    #[error("failed to fetch file: {0}")]
    Http(String),

    #[error("failed to parse spreadsheet: {0}")]
    Parse(String),

    #[error("sheet \"{requested}\" not found. Available sheets: {}", .available.join(", "))]
    SheetNotFound {
        requested: String,
        available: Vec<String>,
    },

    #[error("column \"{column}\" not found for {operation}")]
    ColumnNotFound {
        column: String,
        operation: &'static str,
    },

    /// Plan or response generator failed: network, empty reply, or output
    /// that does not contain a well-formed plan.
    #[error("language model error: {0}")]
    Generator(String),

    #[error("{0} already in progress")]
    Busy(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::InvalidInput(_) | AppError::Parse(_) => StatusCode::BAD_REQUEST,
            AppError::FileValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::SheetNotFound { .. } | AppError::ColumnNotFound { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::Generator(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Busy(_) => StatusCode::CONFLICT,
            AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_not_found_names_available_sheets() {
        let err = AppError::SheetNotFound {
            requested: "Revenue".to_string(),
            available: vec!["Sales".to_string(), "Costs".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("\"Revenue\""));
        assert!(text.contains("Sales"));
        assert!(text.contains("Costs"));
    }

    #[test]
    fn column_not_found_names_the_operation() {
        let err = AppError::ColumnNotFound {
            column: "Amount".to_string(),
            operation: "summation",
        };
        assert_eq!(err.to_string(), "column \"Amount\" not found for summation");
    }
}
