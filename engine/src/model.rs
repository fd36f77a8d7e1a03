use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tract_onnx::prelude::*;

use crate::errors::{EngineError, EngineResult};

/// Model serialization formats the engine knows how to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModelFormat {
    Onnx,
    Nnef,
    #[cfg(feature = "tf")]
    Tensorflow,
}

impl ModelFormat {
    pub fn all() -> &'static [ModelFormat] {
        &[
            ModelFormat::Onnx,
            ModelFormat::Nnef,
            #[cfg(feature = "tf")]
            ModelFormat::Tensorflow,
        ]
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ModelFormat::Onnx => "onnx",
            ModelFormat::Nnef => "nnef",
            #[cfg(feature = "tf")]
            ModelFormat::Tensorflow => "tf",
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ModelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<ModelFormat, String> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(ModelFormat::Onnx),
            "nnef" => Ok(ModelFormat::Nnef),
            #[cfg(feature = "tf")]
            "tf" | "tensorflow" => Ok(ModelFormat::Tensorflow),
            _ => Err(format!(
                "unsupported model format {s:?} (known: {})",
                ModelFormat::all().iter().map(|f| f.tag()).collect::<Vec<_>>().join(", ")
            )),
        }
    }
}

/// A model as it comes out of its framework parser.
///
/// ONNX and TensorFlow produce inference models whose facts still need input
/// shapes; NNEF produces fully typed models.
pub(crate) enum ParsedModel {
    Inference(InferenceModel),
    Typed(TypedModel),
}

impl ParsedModel {
    fn parse(format: ModelFormat, topology: &Path) -> TractResult<ParsedModel> {
        Ok(match format {
            ModelFormat::Onnx => {
                ParsedModel::Inference(tract_onnx::onnx().model_for_path(topology)?)
            }
            ModelFormat::Nnef => ParsedModel::Typed(
                tract_nnef::nnef().with_tract_core().model_for_path(topology)?,
            ),
            #[cfg(feature = "tf")]
            ModelFormat::Tensorflow => {
                ParsedModel::Inference(tract_tensorflow::tensorflow().model_for_path(topology)?)
            }
        })
    }

    pub(crate) fn input_outlets(&self) -> &[OutletId] {
        match self {
            ParsedModel::Inference(m) => &m.inputs,
            ParsedModel::Typed(m) => &m.inputs,
        }
    }

    pub(crate) fn output_outlets(&self) -> &[OutletId] {
        match self {
            ParsedModel::Inference(m) => &m.outputs,
            ParsedModel::Typed(m) => &m.outputs,
        }
    }

    pub(crate) fn input_name(&self, ix: usize) -> Option<&str> {
        let outlet = self.input_outlets().get(ix)?;
        Some(match self {
            ParsedModel::Inference(m) => m.node(outlet.node).name.as_str(),
            ParsedModel::Typed(m) => m.node(outlet.node).name.as_str(),
        })
    }

    /// Input shape fixed by the model itself, when it is fully known.
    pub(crate) fn concrete_input_shape(&self, ix: usize) -> Option<Vec<usize>> {
        match self {
            ParsedModel::Typed(m) => {
                m.input_fact(ix).ok()?.shape.as_concrete().map(|dims| dims.to_vec())
            }
            ParsedModel::Inference(_) => None,
        }
    }

    /// Builds an optimized typed model for the given f32 input shapes.
    pub(crate) fn specialize(&self, input_shapes: &[Vec<usize>]) -> TractResult<TypedModel> {
        match self {
            ParsedModel::Inference(m) => {
                let mut model = m.clone();
                for (ix, shape) in input_shapes.iter().enumerate() {
                    model = model.with_input_fact(ix, f32::fact(shape.clone()).into())?;
                }
                model.into_optimized()
            }
            ParsedModel::Typed(m) => {
                let mut model = m.clone();
                for (ix, shape) in input_shapes.iter().enumerate() {
                    model = model.with_input_fact(ix, f32::fact(shape.clone()))?;
                }
                model.into_optimized()
            }
        }
    }
}

/// A model registered in the engine under a caller-chosen name.
pub(crate) struct RegisteredModel {
    pub(crate) name: String,
    pub(crate) format: ModelFormat,
    pub(crate) topology: PathBuf,
    pub(crate) model: ParsedModel,
}

impl RegisteredModel {
    pub(crate) fn load(
        name: &str,
        format: ModelFormat,
        topology: &Path,
        weights: Option<&Path>,
    ) -> EngineResult<RegisteredModel> {
        check_artifacts(name, topology, weights)?;
        let model = ParsedModel::parse(format, topology).map_err(|source| {
            EngineError::ModelLoad { name: name.to_string(), source }
        })?;
        if model.input_outlets().is_empty() || model.output_outlets().is_empty() {
            return Err(EngineError::model_load(name, "model declares no input or no output"));
        }
        Ok(RegisteredModel {
            name: name.to_string(),
            format,
            topology: topology.to_path_buf(),
            model,
        })
    }
}

/// Tract parsers resolve weights from the topology location, so an explicit
/// weights path must live next to the topology.
fn check_artifacts(name: &str, topology: &Path, weights: Option<&Path>) -> EngineResult<()> {
    if !topology.exists() {
        return Err(EngineError::model_load(name, format!("topology {topology:?} not found")));
    }
    let Some(weights) = weights else { return Ok(()) };
    if !weights.exists() {
        return Err(EngineError::model_load(name, format!("weights {weights:?} not found")));
    }
    let home = if topology.is_dir() { Some(topology) } else { topology.parent() };
    let home = home.map(absolute).transpose().map_err(|e| EngineError::ModelLoad {
        name: name.to_string(),
        source: e.into(),
    })?;
    let weights_abs = absolute(weights)
        .map_err(|e| EngineError::ModelLoad { name: name.to_string(), source: e.into() })?;
    match home {
        Some(home) if weights_abs.starts_with(&home) => Ok(()),
        _ => Err(EngineError::model_load(
            name,
            format!("weights {weights:?} must be located alongside topology {topology:?}"),
        )),
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    let path = if path.as_os_str().is_empty() { Path::new(".") } else { path };
    path.canonicalize()
}
