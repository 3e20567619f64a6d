use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupportError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("IMAP error: {message}")]
    ImapError { message: String },

    #[error("SMTP error: {message}")]
    SmtpError { message: String },

    #[error("Email authentication failed. Please check credentials.")]
    SmtpAuthError { message: String },

    #[error("Mail parsing error: {message}")]
    MailParseError { message: String },

    #[error("AI service error: {message}")]
    AiServiceError { message: String },

    #[error("AI response could not be parsed: {message}")]
    AiResponseError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid configuration value for {field} ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Configuration validation failed for {field}: {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Task failed: {message}")]
    TaskError { message: String },
}

/// 錯誤分類，用於日誌與結束碼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Mail,
    Ai,
    Configuration,
    Data,
    Workflow,
    System,
}

/// 錯誤嚴重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SupportError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ApiError(_) => ErrorCategory::Network,
            Self::ImapError { .. }
            | Self::SmtpError { .. }
            | Self::SmtpAuthError { .. }
            | Self::MailParseError { .. } => ErrorCategory::Mail,
            Self::AiServiceError { .. } | Self::AiResponseError { .. } => ErrorCategory::Ai,
            Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. } => ErrorCategory::Configuration,
            Self::SerializationError(_) | Self::CsvError(_) | Self::ValidationError { .. } => {
                ErrorCategory::Data
            }
            Self::NotFound { .. } | Self::InvalidState { .. } | Self::TaskError { .. } => {
                ErrorCategory::Workflow
            }
            Self::IoError(_) | Self::ZipError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound { .. } | Self::InvalidState { .. } | Self::ValidationError { .. } => {
                ErrorSeverity::Low
            }
            Self::ApiError(_)
            | Self::ImapError { .. }
            | Self::SmtpError { .. }
            | Self::AiServiceError { .. }
            | Self::TaskError { .. } => ErrorSeverity::Medium,
            Self::AiResponseError { .. }
            | Self::MailParseError { .. }
            | Self::SerializationError(_)
            | Self::CsvError(_)
            | Self::ZipError(_) => ErrorSeverity::High,
            Self::SmtpAuthError { .. }
            | Self::ConfigError { .. }
            | Self::MissingConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::ConfigValidationError { .. }
            | Self::IoError(_) => ErrorSeverity::Critical,
        }
    }

    /// 暫時性錯誤可交由任務佇列重試
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::ImapError { .. } | Self::SmtpError { .. } | Self::AiServiceError { .. } => true,
            Self::AiResponseError { .. } | Self::TaskError { .. } => true,
            _ => false,
        }
    }

    /// CLI 結束碼；使用者層級的錯誤也視為失敗
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => "Check network connectivity and the remote service status",
            ErrorCategory::Mail => match self {
                Self::SmtpAuthError { .. } => "Verify the SMTP username and password",
                Self::MailParseError { .. } => "Inspect the raw message; it will be skipped",
                _ => "Verify mailbox host, port and TLS settings, then retry",
            },
            ErrorCategory::Ai => "Verify the Anthropic API key and model name, then reprocess",
            ErrorCategory::Configuration => "Fix the configuration file and run again",
            ErrorCategory::Data => "Check the stored data and input values",
            ErrorCategory::Workflow => "Check the referenced ids and the current status",
            ErrorCategory::System => "Check file permissions and disk space",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::SmtpAuthError { .. } => {
                "Email authentication failed. Please check credentials.".to_string()
            }
            Self::NotFound { entity, id } => format!("{} {} was not found", entity, id),
            Self::InvalidState { message } | Self::ValidationError { message } => message.clone(),
            Self::MissingConfigError { field } => {
                format!("Missing required configuration value: {}", field)
            }
            Self::InvalidConfigValueError { field, reason, .. } => {
                format!("Invalid configuration for {}: {}", field, reason)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SupportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smtp_auth_message() {
        let err = SupportError::SmtpAuthError {
            message: "535 bad credentials".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Email authentication failed. Please check credentials."
        );
        assert_eq!(err.severity(), ErrorSeverity::Critical);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_is_not_retryable() {
        let err = SupportError::not_found("Email", 42);
        assert_eq!(err.to_string(), "Email not found: 42");
        assert_eq!(err.category(), ErrorCategory::Workflow);
        assert!(!err.is_retryable());
        assert_eq!(err.user_friendly_message(), "Email 42 was not found");
    }

    #[test]
    fn test_exit_codes_are_never_zero() {
        assert_eq!(SupportError::not_found("Email", 7).exit_code(), 2);
        assert_eq!(SupportError::validation("Reply is not approved").exit_code(), 2);
        assert_eq!(SupportError::invalid_state("Email is closed").exit_code(), 2);
        assert_eq!(
            SupportError::AiResponseError {
                message: "bad json".to_string()
            }
            .exit_code(),
            1
        );
        assert_eq!(
            SupportError::MissingConfigError {
                field: "smtp.host".to_string()
            }
            .exit_code(),
            3
        );
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = SupportError::ImapError {
            message: "connection reset".to_string(),
        };
        assert!(err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Medium);
    }
}
