// src/error.rs

use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Error category used as a stable code in log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Storage,
    Git,
    Generation,
    Config,
    Io,
    Task,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Storage => "STORAGE_ERROR",
            Self::Git => "GIT_ERROR",
            Self::Generation => "GENERATION_FAILED",
            Self::Config => "CONFIG_ERROR",
            Self::Io => "IO_ERROR",
            Self::Task => "TASK_ERROR",
        }
    }
}

#[derive(Debug, Error)]
pub enum HistorianError {
    #[error("repository {repository_id} not found")]
    NotFound { repository_id: i64 },

    #[error("storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("git error: {message}")]
    Git {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The text-generation call itself failed (transport, auth, quota).
    #[error("analysis failed: {message}")]
    Generation {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("io error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("background task error: {message}")]
    Task { message: String },
}

impl HistorianError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::Storage { .. } => ErrorCategory::Storage,
            Self::Git { .. } => ErrorCategory::Git,
            Self::Generation { .. } => ErrorCategory::Generation,
            Self::Config { .. } => ErrorCategory::Config,
            Self::Io { .. } => ErrorCategory::Io,
            Self::Task { .. } => ErrorCategory::Task,
        }
    }

    pub fn not_found(repository_id: i64) -> Self {
        Self::NotFound { repository_id }
    }

    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    pub fn git_with_source(message: impl Into<String>, source: git2::Error) -> Self {
        Self::Git {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
            source: None,
        }
    }

    pub fn generation_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Generation {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn io_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task {
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for HistorianError {
    fn from(e: rusqlite::Error) -> Self {
        Self::storage_with_source("sqlite operation failed", e)
    }
}

impl From<serde_json::Error> for HistorianError {
    fn from(e: serde_json::Error) -> Self {
        Self::storage_with_source("json encoding failed", e)
    }
}

pub type Result<T> = std::result::Result<T, HistorianError>;
