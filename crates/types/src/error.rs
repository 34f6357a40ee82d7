use thiserror::Error;

/// A configuration row that violates its invariants
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigRowError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("{0} must be greater than 0")]
    ZeroWindow(&'static str),

    #[error("{scope} cap {cap} is below its max {max}")]
    CapBelowMax {
        scope: &'static str,
        cap: u32,
        max: u32,
    },

    #[error("max_attempts must be at least 1")]
    ZeroMaxAttempts,

    #[error("invalid {field}: {value}")]
    InvalidNumber { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel: {0}")]
pub struct UnknownChannel(pub String);
