use crate::domain::mapping::Namespace;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum MapperError {
    #[error("IO error: {0}")]
    #[diagnostic(code(g2p::io))]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    #[diagnostic(code(g2p::csv))]
    CsvError(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(g2p::serialization))]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    #[diagnostic(code(g2p::storage))]
    StorageError(String),

    #[error("HTTP client error: {0}")]
    #[diagnostic(code(g2p::http_client))]
    HttpClientError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    #[diagnostic(code(g2p::validation))]
    ValidationError(String),

    #[error("Unknown transaction {txn_id} in {namespace} namespace")]
    #[diagnostic(code(g2p::unknown_transaction))]
    UnknownTransaction { namespace: Namespace, txn_id: String },

    #[error(
        "{}: Max retries exhausted while waiting for {namespace} ({attempts} attempts)",
        .namespace.error_code()
    )]
    #[diagnostic(
        code(g2p::max_retries),
        help("the authority may still deliver a callback for this {namespace} later")
    )]
    MaxRetriesExhausted { namespace: Namespace, attempts: u32 },

    #[error("Completion callback '{name}' is not registered (transaction {txn_id})")]
    #[diagnostic(
        code(g2p::completion_not_registered),
        help("register the handler on the CompletionRegistry before building the IdMapper")
    )]
    CompletionNotRegistered { name: String, txn_id: String },

    #[error("Completion callback '{0}' is registered more than once")]
    #[diagnostic(code(g2p::duplicate_completion))]
    DuplicateCompletion(String),
}

pub type Result<T> = std::result::Result<T, MapperError>;

/// Failure of a single outbound call to the ID mapper authority.
///
/// These never leave the dispatcher: they are folded into reference status
/// transitions.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("read timeout waiting for the authority")]
    ReadTimeout,
    #[error("no authority endpoint configured for {0}")]
    NotConfigured(Namespace),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authority replied with HTTP {0}")]
    Status(u16),
    #[error("could not decode authority reply: {0}")]
    Decode(String),
}
