use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoderError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schema catalog unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Generator timed out: {0}")]
    GeneratorTimeout(String),

    #[error("Generator error: {0}")]
    Generator(String),

    #[error("Retry budget exhausted after {attempts} attempts: {detail}")]
    RetryBudgetExhausted {
        attempts: u32,
        sql: String,
        tables_used: Vec<String>,
        detail: String,
    },

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Memory store error: {0}")]
    Memory(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoderError>;
