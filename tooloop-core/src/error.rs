use crate::replan::ReplanRequest;

/// Failure raised by a capability call.
///
/// Only `Replan` escapes the loop; every other variant becomes an `Error` result.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("replan requested: {}", .0.reason())]
    Replan(ReplanRequest),

    #[error("invalid input for {capability}: {reason}")]
    InvalidInput { capability: String, reason: String },

    #[error("capability {capability} failed: {message}")]
    ExecutionFailed { capability: String, message: String },
}

impl CapabilityError {
    pub fn failed(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            capability: capability.into(),
            message: message.into(),
        }
    }

    pub fn is_replan(&self) -> bool {
        matches!(self, Self::Replan(_))
    }
}

impl From<ReplanRequest> for CapabilityError {
    fn from(request: ReplanRequest) -> Self {
        Self::Replan(request)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid model response: {reason}")]
    InvalidResponse { reason: String },
}

#[derive(Debug, thiserror::Error)]
#[error("injection policy {policy} failed: {message}")]
pub struct PolicyError {
    pub policy: String,
    pub message: String,
}

impl PolicyError {
    pub fn new(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("final output is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("final output rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse loop config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid loop config: {0}")]
    Invalid(String),
}

/// Fatal failure of a loop run. Replan and exhaustion are outcomes, not errors.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("output decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("duplicate capability name in active set: {name}")]
    DuplicateCapability { name: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
