use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown logical decoding output plugin: {0}")]
    UnknownPlugin(String),

    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Replication error: {message}")]
    Replication { message: String },

    #[error("Invalid message format: {message}")]
    InvalidMessage { message: String },

    #[error("Replication cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
