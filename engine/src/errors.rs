use thiserror::Error;

use crate::graph::GraphState;
use crate::tensor::TensorKind;

/// Errors raised by the engine lifecycle operations.
///
/// Failures coming out of tract itself are kept as the `source` of the
/// lifecycle step that triggered them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    #[error("requested engine version {requested:?}, engine provides {supported}")]
    VersionMismatch { requested: String, supported: String },

    #[error("could not load model {name:?}")]
    ModelLoad {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("a model named {0:?} is already registered")]
    DuplicateName(String),

    #[error("no model named {0:?} is registered")]
    ModelNotFound(String),

    #[error("model {name:?} is still used by {graphs} graph(s)")]
    ModelInUse { name: String, graphs: usize },

    #[error("could not create graph {graph:?} for model {model:?}: {reason}")]
    GraphCreate { graph: String, model: String, reason: String },

    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    #[error("no {kind} tensor at node {node}, slot {slot}")]
    TensorNotFound { kind: TensorKind, node: usize, slot: usize },

    #[error("buffer holds {actual} bytes, shape {shape:?} needs {expected} bytes")]
    BufferSizeMismatch { shape: Vec<usize>, expected: usize, actual: usize },

    #[error("could not prepare graph {graph:?}")]
    Prepare {
        graph: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution of graph {graph:?} failed")]
    Execution {
        graph: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("shape query failed: {0}")]
    ShapeQuery(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{operation} is not allowed while graph {graph:?} is {state}")]
    InvalidState { graph: String, operation: &'static str, state: GraphState },
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub(crate) fn model_load(name: &str, reason: impl Into<String>) -> EngineError {
        let reason: String = reason.into();
        EngineError::ModelLoad { name: name.to_string(), source: anyhow::Error::msg(reason) }
    }
}
