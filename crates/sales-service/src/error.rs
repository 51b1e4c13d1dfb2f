use thiserror::Error;

/// Reasons the service cannot start.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("service client: {0}")]
    Client(#[from] resilience::ClientError),

    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("inventory store: {0}")]
    Inventory(#[from] inventory::InventoryError),

    #[error("metrics exporter: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, StartupError>;
