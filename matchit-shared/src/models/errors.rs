use serde::{Deserialize, Serialize};

/// Error body returned by the backend's table API.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// The main error message
    pub message: String,
    /// Optional additional details about the error
    #[serde(default)]
    pub details: Option<String>,
    /// Backend error code (e.g. `PGRST116`, `42501`)
    #[serde(default)]
    pub code: Option<String>,
    /// Optional remediation hint
    #[serde(default)]
    pub hint: Option<String>,
}

impl ErrorResponse {
    /// Creates a new error response with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Parses a response body, falling back to the raw text as the message
    /// when the body is not the structured error shape.
    #[must_use]
    pub fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self::new(body.trim()))
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(code) = &self.code {
            write!(f, "[{code}] ")?;
        }
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.message, details),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_new() {
        let error = ErrorResponse::new("Test error");
        assert_eq!(error.message, "Test error");
        assert_eq!(error.details, None);
    }

    #[test]
    fn test_from_body_with_details() {
        let body = r#"{"code":"23503","details":"Key (chat_id) is not present in table \"chats\".","hint":null,"message":"insert or update on table \"messages\" violates foreign key constraint"}"#;
        let error = ErrorResponse::from_body(body);

        assert_eq!(error.code.as_deref(), Some("23503"));
        assert_eq!(
            error.details.as_deref(),
            Some("Key (chat_id) is not present in table \"chats\".")
        );
    }

    #[test]
    fn test_from_structured_body() {
        let body = r#"{"code":"42501","details":null,"hint":null,"message":"new row violates row-level security policy for table \"messages\""}"#;
        let error = ErrorResponse::from_body(body);

        assert_eq!(error.code.as_deref(), Some("42501"));
        assert!(error.message.contains("row-level security"));
        assert_eq!(
            error.to_string(),
            "[42501] new row violates row-level security policy for table \"messages\""
        );
    }

    #[test]
    fn test_from_plain_text_body() {
        let error = ErrorResponse::from_body("  upstream timeout \n");
        assert_eq!(error.message, "upstream timeout");
        assert_eq!(error.code, None);
    }

    #[test]
    fn test_error_response_display() {
        let error_no_details = ErrorResponse::new("Simple error");
        assert_eq!(format!("{error_no_details}"), "Simple error");

        let error_with_details = ErrorResponse {
            details: Some("Additional info".to_string()),
            ..ErrorResponse::new("Main error")
        };
        assert_eq!(
            format!("{error_with_details}"),
            "Main error: Additional info"
        );
    }

    #[test]
    fn test_error_response_as_error() {
        let error = ErrorResponse::new("Error trait test");
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.to_string().contains("Error trait test"));
    }
}
