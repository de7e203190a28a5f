/// Application-level error shared by the command-line tools and the crypto crate.
#[derive(Debug, thiserror::Error)]
pub enum OlmdevError {
    #[error("not found")]
    NotFound,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}
