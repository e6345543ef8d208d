//! API request and response types

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use serde::Serialize;

use crate::errors::RiksRagError;
use crate::models::HistoryTurn;
use crate::models::RequestedMode;
use crate::models::Role;
use crate::models::Strategy;
use crate::rag::QueryRequest;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub collections: Vec<String>,
    pub model: String,
}

/// One history turn as sent by clients
#[derive(Debug, Deserialize)]
pub struct HistoryTurnBody {
    pub role: String,
    pub content: String,
}

/// Body of `POST /agent/query` and `POST /agent/query/stream`
#[derive(Debug, Deserialize)]
pub struct AgentQueryRequest {
    pub question: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryTurnBody>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

impl AgentQueryRequest {
    /// Validate and convert; a strategy header takes precedence over the body
    pub fn into_query(self, strategy_header: Option<&str>) -> Result<QueryRequest, RiksRagError> {
        let mode = match self.mode.as_deref() {
            Some(mode) => mode.parse::<RequestedMode>()?,
            None => RequestedMode::Auto,
        };

        let strategy = strategy_header
            .or(self.strategy.as_deref())
            .map(str::parse::<Strategy>)
            .transpose()?;

        let history = self
            .history
            .into_iter()
            .map(|turn| {
                let role = match turn.role.trim().to_lowercase().as_str() {
                    "user" => Role::User,
                    "assistant" => Role::Assistant,
                    other => {
                        return Err(RiksRagError::Validation(format!(
                            "Unknown history role: {other}"
                        )))
                    }
                };
                Ok(HistoryTurn {
                    role,
                    content: turn.content,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if self.k == Some(0) {
            return Err(RiksRagError::Validation("k must be at least 1".to_string()));
        }

        Ok(QueryRequest {
            question: self.question,
            mode,
            history,
            strategy,
            k: self.k,
        })
    }
}

/// Error body: `{ "error": "...", "code": "..." }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

/// Pipeline error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub RiksRagError);

impl From<RiksRagError> for ApiError {
    fn from(err: RiksRagError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.public_message(),
            code: self.0.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
