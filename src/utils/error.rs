use thiserror::Error;

#[derive(Error, Debug)]
pub enum CepError {
    #[error("Address is missing required geography: {missing}")]
    InputIncomplete { missing: String },

    #[error("Provider {provider} failed transiently: {message}")]
    ProviderTransient { provider: String, message: String },

    #[error("Provider {provider} found no postal code")]
    ProviderNotFound { provider: String },

    #[error("Candidate {cep} rejected: {reason}")]
    ValidationRejected { cep: String, reason: String },

    #[error("Cache entry '{key}' is corrupt: {message}")]
    CacheCorrupt { key: String, message: String },

    #[error("Invalid address field '{field}': {reason}")]
    InvalidAddress { field: String, reason: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Provider,
    Validation,
    Cache,
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

impl CepError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CepError::InputIncomplete { .. } | CepError::InvalidAddress { .. } => {
                ErrorCategory::Input
            }
            CepError::ProviderTransient { .. }
            | CepError::ProviderNotFound { .. }
            | CepError::HttpError(_) => ErrorCategory::Provider,
            CepError::ValidationRejected { .. } => ErrorCategory::Validation,
            CepError::CacheCorrupt { .. } => ErrorCategory::Cache,
            CepError::ConfigError { .. }
            | CepError::MissingConfigError { .. }
            | CepError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            CepError::CsvError(_)
            | CepError::IoError(_)
            | CepError::SerializationError(_)
            | CepError::ProcessingError { .. } => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 流程控制訊號，單筆記錄層級
            CepError::ProviderNotFound { .. }
            | CepError::ValidationRejected { .. }
            | CepError::CacheCorrupt { .. } => ErrorSeverity::Low,
            CepError::ProviderTransient { .. } | CepError::HttpError(_) => ErrorSeverity::Medium,
            CepError::InputIncomplete { .. }
            | CepError::InvalidAddress { .. }
            | CepError::CsvError(_)
            | CepError::SerializationError(_)
            | CepError::ProcessingError { .. } => ErrorSeverity::High,
            CepError::IoError(_)
            | CepError::ConfigError { .. }
            | CepError::MissingConfigError { .. }
            | CepError::InvalidConfigValueError { .. } => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            CepError::InputIncomplete { .. } => {
                "Provide at least city and state (UF) for the record".to_string()
            }
            CepError::InvalidAddress { field, .. } => {
                format!("Fix the '{}' column in the input file", field)
            }
            CepError::ProviderTransient { provider, .. } => format!(
                "Check connectivity to {} or raise its timeout_seconds",
                provider
            ),
            CepError::HttpError(_) => {
                "Check network connectivity and provider endpoints".to_string()
            }
            CepError::ProviderNotFound { .. } | CepError::ValidationRejected { .. } => {
                "No action needed, the cascade continues with the next provider".to_string()
            }
            CepError::CacheCorrupt { .. } => {
                "The entry will be rewritten on the next successful lookup".to_string()
            }
            CepError::CsvError(_) => "Verify the input CSV header and delimiter".to_string(),
            CepError::IoError(_) => "Check file paths and permissions".to_string(),
            CepError::SerializationError(_) => {
                "Inspect the JSON file for syntax errors".to_string()
            }
            CepError::ConfigError { .. }
            | CepError::MissingConfigError { .. }
            | CepError::InvalidConfigValueError { .. } => {
                "Review the TOML configuration file".to_string()
            }
            CepError::ProcessingError { .. } => "Re-run with --verbose for details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Input => format!("Input problem: {}", self),
            ErrorCategory::System => format!("System problem: {}", self),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CepError>;
