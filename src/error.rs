/// Error taxonomy for the market-data plant.
///
/// Mirrors the categories a caller needs to act on differently: invalid
/// input never writes anything, adapter errors are either retried away or
/// surfaced, invariant violations are fatal, and a resolver-empty result is
/// just "nothing to read" rather than a bug.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("transient adapter error for venue={venue}: {message}")]
    Transient { venue: String, message: String },

    #[error("permanent adapter error for venue={venue}: {message}")]
    Permanent { venue: String, message: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

#[derive(Debug, Error)]
pub enum PlantError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("adapter exhausted after retries: {0}")]
    AdapterExhausted(String),

    #[error("adapter permanent error: {0}")]
    AdapterPermanent(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("resolver produced an empty window: {0}")]
    ResolverEmpty(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

impl From<AdapterError> for PlantError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Transient { venue, message } => {
                PlantError::AdapterExhausted(format!("venue={venue}: {message}"))
            }
            AdapterError::Permanent { venue, message } => {
                PlantError::AdapterPermanent(format!("venue={venue}: {message}"))
            }
        }
    }
}
