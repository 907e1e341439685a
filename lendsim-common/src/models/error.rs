use thiserror::Error;

/// Errors surfaced by a [`crate::traits::StateProvider`] read.
///
/// Variants:
/// - `NotFound`: the entity does not exist at the requested block (e.g. an unknown market id).
/// - `RequestFailed`: the underlying transport failed after its own retries were exhausted.
/// - `DecodeError`: the node answered but the response could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateReadError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl StateReadError {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound { entity, key: key.to_string() }
    }
}
