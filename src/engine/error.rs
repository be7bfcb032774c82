use std::fmt::Display;

/// Errors produced by session transitions and rule validation. Kept as a plain
/// enum so that callers holding an [anyhow::Error] can still downcast and react
/// to the specific case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A mutating session call collided with another one, or `start` found an
    /// entry already open.
    Conflict(String),
    /// A transition was attempted from a phase that doesn't permit it.
    InvalidState {
        attempted: &'static str,
        phase: &'static str,
    },
    /// A rule draft failed validation and was rejected before storage.
    MalformedRule(String),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Conflict(reason) => write!(f, "conflict: {reason}"),
            EngineError::InvalidState { attempted, phase } => {
                write!(f, "can't {attempted} while session is {phase}")
            }
            EngineError::MalformedRule(reason) => write!(f, "malformed rule: {reason}"),
        }
    }
}

impl std::error::Error for EngineError {}
