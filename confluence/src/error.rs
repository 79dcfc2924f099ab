use crate::model::{Family, FallbackReason};
use thiserror::Error;

/// Errors raised while loading or validating an [`EngineConfig`](crate::config::EngineConfig).
///
/// Configuration errors are fatal: scoring never starts with an invalid configuration.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("weight table {table} is missing an entry for: {key}")]
    MissingWeight { table: String, key: String },

    #[error("weight table {table} has an invalid weight for {key}: {value}")]
    InvalidWeight {
        table: String,
        key: String,
        value: String,
    },

    #[error("weight table {table} has no positive weight")]
    ZeroWeightTotal { table: String },

    #[error("invalid thresholds for {context}: buy {buy} must exceed sell {sell} within [0, 100]")]
    InvalidThresholds {
        context: String,
        buy: String,
        sell: String,
    },

    #[error("invalid regime confidence floor: {0} (expected [0, 1])")]
    InvalidConfidence(String),

    #[error("invalid divergence settings: {0}")]
    InvalidDivergence(String),

    #[error("invalid collection settings: {0}")]
    InvalidCollection(String),
}

impl ConfigError {
    pub(crate) fn invalid_weight(table: &str, key: impl ToString, value: f64) -> Self {
        Self::InvalidWeight {
            table: table.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Errors returned by a [`FamilyProvider`](crate::provider::FamilyProvider).
///
/// These never abort an analysis call: the family contributes the neutral score instead.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ProviderError {
    #[error("{family} provider timed out after {elapsed_ms}ms")]
    Timeout { family: Family, elapsed_ms: u64 },

    #[error("{family} provider has insufficient data: {required} required, {available} available")]
    InsufficientData {
        family: Family,
        required: usize,
        available: usize,
    },

    #[error("{family} provider returned malformed output: {message}")]
    Malformed { family: Family, message: String },

    #[error("{family} provider failed: {message}")]
    Internal { family: Family, message: String },
}

impl ProviderError {
    pub fn insufficient(family: Family, required: usize, available: usize) -> Self {
        Self::InsufficientData {
            family,
            required,
            available,
        }
    }

    pub fn internal(family: Family, message: impl Into<String>) -> Self {
        Self::Internal {
            family,
            message: message.into(),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            ProviderError::Timeout { family, .. }
            | ProviderError::InsufficientData { family, .. }
            | ProviderError::Malformed { family, .. }
            | ProviderError::Internal { family, .. } => *family,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }

    /// [`FallbackReason`] recorded in result metadata for this error.
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            ProviderError::Timeout { .. } => FallbackReason::Timeout,
            ProviderError::InsufficientData { .. } => FallbackReason::InsufficientData,
            ProviderError::Malformed { .. } | ProviderError::Internal { .. } => {
                FallbackReason::ProviderError
            }
        }
    }
}

/// Contract violations inside the scoring pipeline.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ScoringError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("illegal scoring phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}
