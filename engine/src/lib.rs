//! Handle-based inference session lifecycle over the tract engine.
//!
//! The flow mirrors a classic C inference API, with typed handles instead of
//! raw pointers:
//!
//! ```text
//! Engine::init -> request_version -> load_model -> create_graph
//!   -> input_tensor -> set_tensor_shape -> set_tensor_buffer
//!   -> prepare -> run (xN) -> output_tensor / tensor_shape / tensor_buffer
//!   -> release_tensor -> postrun -> destroy -> remove_model -> release
//! ```
#[macro_use]
extern crate log;

pub mod engine;
pub mod errors;
pub mod graph;
pub mod model;
pub mod tensor;

pub use engine::{ENGINE_VERSION, Engine, ModelInfo, Version};
pub use errors::{EngineError, EngineResult};
pub use graph::{Graph, GraphId, GraphState};
pub use model::ModelFormat;
pub use tensor::{TensorHandle, TensorKind, element_count, f32_byte_len};

pub mod prelude {
    pub use crate::{
        Engine, EngineError, EngineResult, Graph, GraphState, ModelFormat, TensorHandle,
        TensorKind,
    };
}
