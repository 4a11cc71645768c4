use plasmid_protocol::FailureKind;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorCode {
    Unavailable,
    Config,
    Http,
    Transient,
    ResponseParse,
    VocabularyViolation,
    Internal,
}

impl ProviderErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::Config => "CONFIG",
            Self::Http => "HTTP",
            Self::Transient => "TRANSIENT",
            Self::ResponseParse => "RESPONSE_PARSE",
            Self::VocabularyViolation => "VOCABULARY_VIOLATION",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single token provider. Never terminal on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("PROVIDER_{code}: [{provider}] {message}")]
pub struct ProviderError {
    pub provider: String,
    pub code: ProviderErrorCode,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: &str, code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Could not parse '{path}': {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("unknown model '{0}'")]
    UnknownModel(String),
    #[error("could not load model '{model}': {message}")]
    ModelLoad { model: String, message: String },
    #[error("invalid sampling configuration: {0}")]
    InvalidConfig(String),
    #[error("generation backend failed: {0}")]
    Backend(String),
    #[error("model returned no usable output")]
    EmptyOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidSequenceError {
    #[error("generated text does not start with the conditioning prefix")]
    PrefixMismatch,
    #[error("no nucleotides follow the conditioning prefix")]
    Empty,
    #[error("unexpected character {found:?} at position {position}")]
    InvalidCharacter { found: char, position: usize },
    #[error("unexpected token '{token}' at position {position}")]
    UnexpectedToken { token: String, position: usize },
}

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("annotation input: {0}")]
    Input(String),
    #[error("could not run annotator '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("annotator timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("annotator exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("annotator response: {0}")]
    Protocol(String),
    #[error("annotator panicked: {0}")]
    Panic(String),
}

/// Terminal pipeline failures. Annotation problems never reach this type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no token provider is configured; set one of {0}")]
    NoProviderConfigured(String),
    #[error("no token provider succeeded ({} tried)", .failures.len())]
    NoProviderAvailable { failures: Vec<ProviderError> },
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    InvalidSequence(#[from] InvalidSequenceError),
    #[error("cancelled by caller")]
    Cancelled,
    #[error("internal fault: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoProviderConfigured(_) | Self::NoProviderAvailable { .. } => {
                FailureKind::NoProviderAvailable
            }
            Self::Generation(_) => FailureKind::GenerationError,
            Self::InvalidSequence(_) => FailureKind::InvalidSequence,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// Wording for end users; details stay in the log and in `Display`.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoProviderConfigured(_) => {
                "No language-model provider is configured, so the request cannot be interpreted."
                    .to_string()
            }
            Self::NoProviderAvailable { .. } => {
                "Could not interpret your request: every language-model provider failed."
                    .to_string()
            }
            Self::Generation(_) => {
                "The sequence model could not produce a plasmid for these settings.".to_string()
            }
            Self::InvalidSequence(_) => {
                "The model output could not be decoded into a valid DNA sequence.".to_string()
            }
            Self::Cancelled => "Generation was cancelled.".to_string(),
            Self::Internal(_) => "An unexpected internal error stopped the pipeline.".to_string(),
        }
    }
}
