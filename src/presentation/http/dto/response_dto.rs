use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// Envelope for every JSON body the analysis API returns. Exactly one of
/// `data` and `error` is present.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    pub timestamp: String,
}

/// Machine-readable `code` (e.g. `CONTEXT_BUDGET_EXCEEDED`) plus a message
/// meant for the client UI.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: timestamp(),
        }
    }

    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
                details: None,
            }),
            timestamp: timestamp(),
        }
    }

    /// Attach extra context to an error response. No-op on success.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.details = Some(details.into());
        }
        self
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponseDto {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

impl HealthResponseDto {
    pub fn healthy() -> Self {
        Self {
            status: "healthy",
            service: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponseDto {
    pub message: String,
}

impl MessageResponseDto {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
