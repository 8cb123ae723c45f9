//! Index error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("cannot index an empty vector")]
    EmptyVector,

    #[error("cannot index a zero-norm vector")]
    ZeroVector,

    #[error("bucket shape corrupted: {0}")]
    Shape(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
