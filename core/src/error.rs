use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Subscriber '{name}' is already registered")]
    DuplicateSubscriber { name: String },

    #[error("Subscription {id} not found")]
    UnknownSubscription { id: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SimResult<T> = Result<T, SimError>;
