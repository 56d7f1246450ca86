/// Shared error type used across all mcprelay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("catalog: {0}")]
    Catalog(String),
}

pub type Result<T> = std::result::Result<T, Error>;
