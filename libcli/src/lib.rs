//! Collaborators of the benchmark binary: image preprocessing, label tables,
//! top-k decoding and the timed execution loop.
#[macro_use]
extern crate log;

pub mod bench;
pub mod classify;
pub mod errors;
pub mod imaging;
pub mod labels;
pub mod time;

pub use bench::{BenchLimits, BenchReport, Execute, bench};
pub use classify::{Prediction, classify, top_k};
pub use errors::{HarnessError, HarnessResult};
pub use imaging::{ChannelOrder, InputTensor, PreprocessConfig, preprocess, preprocess_image};
pub use labels::LabelTable;
