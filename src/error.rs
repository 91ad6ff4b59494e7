use thiserror::Error;

/// Fatal failure categories. The orchestrator only retries `Transport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    Transport,
    IdentityCollision,
    Config,
    Io,
    Format,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Transport failed for {source_name}: {message}")]
    Transport { source_name: String, message: String },

    #[error("Identity collision: {0}")]
    IdentityCollision(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required column '{column}' in {source_name}")]
    MissingColumn { source_name: String, column: String },

    #[error("Cannot expand {source_name}: {message}")]
    Expansion { source_name: String, message: String },

    #[error("Invalid geocode entry on line {line}: {message}")]
    GeocodeTable { line: usize, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    pub fn transport(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Transport {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn expansion(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Expansion {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FatalKind {
        match self {
            PipelineError::Transport { .. } => FatalKind::Transport,
            PipelineError::IdentityCollision(_) => FatalKind::IdentityCollision,
            PipelineError::Config(_) => FatalKind::Config,
            PipelineError::Io(_) => FatalKind::Io,
            PipelineError::MissingColumn { .. }
            | PipelineError::Expansion { .. }
            | PipelineError::GeocodeTable { .. }
            | PipelineError::Csv(_)
            | PipelineError::Json(_)
            | PipelineError::Toml(_) => FatalKind::Format,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == FatalKind::Transport
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        let source_name = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "http".to_string());
        PipelineError::transport(source_name, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
