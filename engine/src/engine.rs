use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::{EngineError, EngineResult};
use crate::graph::{Graph, GraphId};
use crate::model::{ModelFormat, RegisteredModel};

/// Protocol version implemented by this engine.
pub const ENGINE_VERSION: Version = Version { major: 0, minor: 1 };

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    /// A request is satisfied by an engine with the same major version and at
    /// least the requested minor version.
    pub fn satisfies(&self, requested: &Version) -> bool {
        self.major == requested.major && self.minor >= requested.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Version, String> {
        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32, String> {
            parts
                .next()
                .ok_or_else(|| format!("incomplete version {s:?}"))?
                .parse::<u32>()
                .map_err(|e| format!("malformed version {s:?}: {e}"))
        };
        let version = Version { major: next()?, minor: next()? };
        if parts.next().is_some() {
            return Err(format!("malformed version {s:?}: expected MAJOR.MINOR"));
        }
        Ok(version)
    }
}

/// Summary of a registered model.
#[derive(Clone, Debug)]
pub struct ModelInfo {
    pub name: String,
    pub format: ModelFormat,
    pub topology: PathBuf,
    pub inputs: Vec<String>,
    pub output_count: usize,
    pub graphs: usize,
}

/// Graph ids are unique process-wide, so a handle never matches a graph of
/// another engine.
static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(0);

/// The engine context.
///
/// Owns the model registry. Created once with [`Engine::init`], released once
/// with [`Engine::release`] (or dropped). Graphs borrow the engine, so it
/// cannot go away while one of them is still alive.
pub struct Engine {
    version: Version,
    formats: Vec<ModelFormat>,
    registry: Mutex<HashMap<String, Arc<RegisteredModel>>>,
}

impl Engine {
    pub fn init() -> EngineResult<Engine> {
        let formats = ModelFormat::all().to_vec();
        if formats.is_empty() {
            return Err(EngineError::EngineInit("no model format compiled in".into()));
        }
        info!(
            "Engine {} ready (formats: {})",
            ENGINE_VERSION,
            formats.iter().map(|f| f.tag()).collect::<Vec<_>>().join(", ")
        );
        Ok(Engine {
            version: ENGINE_VERSION,
            formats,
            registry: Mutex::new(HashMap::new()),
        })
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn formats(&self) -> &[ModelFormat] {
        &self.formats
    }

    /// Checks the caller can speak to this engine. A mismatch is fatal for the
    /// caller; the engine itself is left untouched.
    pub fn request_version(&self, requested: &str) -> EngineResult<()> {
        let mismatch = || EngineError::VersionMismatch {
            requested: requested.to_string(),
            supported: self.version.to_string(),
        };
        let wanted = requested.parse::<Version>().map_err(|e| {
            debug!("{e}");
            mismatch()
        })?;
        if !self.version.satisfies(&wanted) {
            return Err(mismatch());
        }
        debug!("Version {wanted} accepted by engine {}", self.version);
        Ok(())
    }

    /// Registers the model artifacts under `name`.
    pub fn load_model(
        &self,
        name: &str,
        format: &str,
        topology: impl AsRef<Path>,
        weights: Option<&Path>,
    ) -> EngineResult<()> {
        if name.is_empty() {
            return Err(EngineError::InvalidArgument("model name must not be empty".into()));
        }
        if self.registry().contains_key(name) {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        let format = format.parse::<ModelFormat>().map_err(|e| EngineError::model_load(name, e))?;
        if !self.formats.contains(&format) {
            return Err(EngineError::model_load(name, format!("format {format} is disabled")));
        }
        let topology = topology.as_ref();
        info!("Loading {format} model {name:?} from {topology:?}");
        let model = RegisteredModel::load(name, format, topology, weights)?;

        // Parsing happens outside the lock, so look again before inserting.
        let mut registry = self.registry();
        if registry.contains_key(name) {
            return Err(EngineError::DuplicateName(name.to_string()));
        }
        registry.insert(name.to_string(), Arc::new(model));
        Ok(())
    }

    /// Unregisters a model. Every graph created from it must be destroyed
    /// first.
    pub fn remove_model(&self, name: &str) -> EngineResult<()> {
        let mut registry = self.registry();
        let model = registry.get(name).ok_or_else(|| EngineError::ModelNotFound(name.to_string()))?;
        let graphs = Arc::strong_count(model) - 1;
        if graphs > 0 {
            return Err(EngineError::ModelInUse { name: name.to_string(), graphs });
        }
        registry.remove(name);
        info!("Model {name:?} removed");
        Ok(())
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.registry().contains_key(name)
    }

    pub fn model_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn model_info(&self, name: &str) -> EngineResult<ModelInfo> {
        let registry = self.registry();
        let model = registry.get(name).ok_or_else(|| EngineError::ModelNotFound(name.to_string()))?;
        let inputs = (0..model.model.input_outlets().len())
            .map(|ix| model.model.input_name(ix).unwrap_or_default().to_string())
            .collect();
        Ok(ModelInfo {
            name: model.name.clone(),
            format: model.format,
            topology: model.topology.clone(),
            inputs,
            output_count: model.model.output_outlets().len(),
            graphs: Arc::strong_count(model) - 1,
        })
    }

    /// Instantiates an executable graph for a registered model.
    pub fn create_graph<'a>(
        &'a self,
        graph_name: &str,
        model_name: &str,
    ) -> EngineResult<Graph<'a>> {
        let model = self.registry().get(model_name).cloned().ok_or_else(|| {
            EngineError::GraphCreate {
                graph: graph_name.to_string(),
                model: model_name.to_string(),
                reason: "model is not registered".into(),
            }
        })?;
        let id = GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed));
        let graph = Graph::new(self, id, graph_name, model);
        info!("Graph {graph_name:?} ({id}) created from model {model_name:?}");
        Ok(graph)
    }

    /// Releases engine-wide state. Models still registered are dropped with a
    /// warning. Cannot fail.
    pub fn release(self) {
        self.drain();
        info!("Engine released");
    }

    fn drain(&self) {
        let mut registry = self.registry();
        for name in registry.keys() {
            warn!("Model {name:?} still registered at engine release");
        }
        registry.clear();
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<RegisteredModel>>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.drain();
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("version", &self.version)
            .field("models", &self.model_names())
            .finish()
    }
}
