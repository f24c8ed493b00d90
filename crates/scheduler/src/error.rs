use chanpost_core::TransportError;
use chanpost_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("an error while trying to post {id}: {source}")]
    Delivery {
        id: String,
        #[source]
        source: TransportError,
    },

    #[error("delivery of {0} produced no messages")]
    NothingDelivered(String),
}

impl SchedulerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SchedulerError::Store(e) if e.is_not_found())
    }
}
