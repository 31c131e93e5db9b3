use std::time::Duration;

use thiserror::Error;

use crate::ProviderId;

/// Validation errors for domain types and analysis parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("invalid provider '{value}', expected one of coingecko, defillama, velo")]
    InvalidProvider { value: String },

    #[error("invalid analysis kind '{value}'")]
    InvalidAnalysisKind { value: String },

    #[error("entity id cannot be empty")]
    EmptyEntity,

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: String },

    #[error("parameter '{param}' must be greater than zero")]
    NonPositiveParam { param: &'static str },

    #[error("parameter '{param}' must be within {min}..={max}, got {value}")]
    ParamOutOfRange {
        param: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("benchmark asset id cannot be empty")]
    EmptyBenchmark,
}

/// Classified failure of one provider fetch.
///
/// Connectors classify, they never retry; the executor owns the retry
/// decision based on [`FetchError::is_transient`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("request to {provider} timed out after {elapsed:?}")]
    Timeout {
        provider: ProviderId,
        elapsed: Duration,
    },

    #[error("{provider} rate limited the request")]
    RateLimited {
        provider: ProviderId,
        retry_after: Option<Duration>,
    },

    #[error("circuit open for {0}")]
    CircuitOpen(ProviderId),

    #[error("{provider} rejected credentials: {detail}")]
    AuthError { provider: ProviderId, detail: String },

    #[error("{provider} returned a bad response (status {status}): {detail}")]
    BadResponse {
        provider: ProviderId,
        status: u16,
        detail: String,
    },

    #[error("deadline exceeded while fetching from {0}")]
    DeadlineExceeded(ProviderId),
}

impl FetchError {
    pub fn provider(&self) -> ProviderId {
        match self {
            Self::Timeout { provider, .. }
            | Self::RateLimited { provider, .. }
            | Self::AuthError { provider, .. }
            | Self::BadResponse { provider, .. } => *provider,
            Self::CircuitOpen(provider) | Self::DeadlineExceeded(provider) => *provider,
        }
    }

    /// Whether the executor may retry this failure.
    ///
    /// Timeouts, 429s, and 5xx-class responses are transient. Auth failures
    /// and permanent 4xx responses fail fast. `CircuitOpen` and
    /// `DeadlineExceeded` are terminal by construction.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::BadResponse { status, .. } => *status >= 500 || *status == 0,
            Self::AuthError { .. } | Self::CircuitOpen(_) | Self::DeadlineExceeded(_) => false,
        }
    }

    /// Whether this outcome counts against the provider's breaker window.
    ///
    /// Deadline expiry on the caller side says nothing about provider
    /// health, and `CircuitOpen` never reached the provider at all.
    pub fn counts_as_provider_failure(&self) -> bool {
        !matches!(self, Self::CircuitOpen(_) | Self::DeadlineExceeded(_))
    }
}

/// Caller-visible analysis errors.
///
/// Partial data never surfaces here: it resolves to a degraded
/// [`CompositeScore`](crate::CompositeScore) with an explicit confidence.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid parameters: {0}")]
    InvalidParams(ValidationError),

    #[error("no provider returned usable data")]
    NoData,
}

impl From<ValidationError> for CoreError {
    fn from(error: ValidationError) -> Self {
        Self::InvalidParams(error)
    }
}
