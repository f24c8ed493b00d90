/// Faults raised while dispatching a correlation group.
#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    #[error("group handler failed for {key}: {message}")]
    Handler { key: String, message: String },

    #[error("group handler panicked for {key}: {message}")]
    Panicked { key: String, message: String },

    #[error("no group handler registered")]
    MissingHandler,
}

impl CorrelatorError {
    /// Correlation key of the group that faulted, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            CorrelatorError::Handler { key, .. } | CorrelatorError::Panicked { key, .. } => {
                Some(key)
            }
            CorrelatorError::MissingHandler => None,
        }
    }
}
