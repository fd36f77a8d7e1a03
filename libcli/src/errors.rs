use std::path::PathBuf;

use graphbench_engine::EngineError;
use thiserror::Error;

/// Errors raised by the harness around the engine.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("could not read {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not decode image {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("index {index} is out of range for a table of {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
