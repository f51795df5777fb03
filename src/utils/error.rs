use thiserror::Error;

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    // 逾時的 Failed 訊息固定為 "timeout"
    #[error("timeout")]
    SourceTimeout { source_name: String, timeout_ms: u64 },

    #[error("{source_name} source failed: {message}")]
    SourceFailure { source_name: String, message: String },

    #[error("{source_name} source returned HTTP {status}: {body}")]
    SourceStatus {
        source_name: String,
        status: u16,
        body: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Geometry,
    Source,
    Network,
    Data,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl InsightError {
    pub fn invalid_geometry(reason: impl Into<String>) -> Self {
        InsightError::InvalidGeometry {
            reason: reason.into(),
        }
    }

    pub fn source_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        InsightError::SourceFailure {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            InsightError::InvalidGeometry { .. } => ErrorCategory::Geometry,
            InsightError::SourceTimeout { .. }
            | InsightError::SourceFailure { .. }
            | InsightError::SourceStatus { .. } => ErrorCategory::Source,
            InsightError::Http(_) => ErrorCategory::Network,
            InsightError::SerializationError(_) => ErrorCategory::Data,
            InsightError::ConfigError { .. }
            | InsightError::ConfigValidationError { .. }
            | InsightError::InvalidConfigValueError { .. }
            | InsightError::MissingConfigError { .. } => ErrorCategory::Configuration,
            InsightError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Source | ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Geometry | ErrorCategory::Data | ErrorCategory::Configuration => {
                ErrorSeverity::High
            }
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    /// 可重試的錯誤（來源暫時性失敗）
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            InsightError::SourceTimeout { .. } | InsightError::Http(_)
        ) || matches!(self, InsightError::SourceStatus { status, .. } if *status >= 500)
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            InsightError::InvalidGeometry { .. } => {
                "Provide at least 3 distinct [lon, lat] vertices with lon in [-180, 180] and lat in [-90, 90]".to_string()
            }
            InsightError::SourceTimeout { source_name, timeout_ms } => format!(
                "Increase sources.{}.timeout_seconds (currently {} ms) or check the service load",
                source_name, timeout_ms
            ),
            InsightError::SourceFailure { source_name, .. }
            | InsightError::SourceStatus { source_name, .. } => format!(
                "Check that the {} service is running and reachable",
                source_name
            ),
            InsightError::Http(_) => "Check network connectivity and endpoint URLs".to_string(),
            InsightError::IoError(_) => "Check file paths and permissions".to_string(),
            InsightError::SerializationError(_) => {
                "Check that the input is valid JSON in the expected shape".to_string()
            }
            InsightError::ConfigError { .. }
            | InsightError::ConfigValidationError { .. }
            | InsightError::InvalidConfigValueError { .. }
            | InsightError::MissingConfigError { .. } => {
                "Review the TOML configuration file against the documented sections".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            InsightError::InvalidGeometry { reason } => format!("Invalid polygon: {}", reason),
            InsightError::SourceTimeout { source_name, .. } => {
                format!("The {} service did not respond in time", source_name)
            }
            InsightError::MissingConfigError { field } => {
                format!("Missing required setting: {}", field)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InsightError>;
