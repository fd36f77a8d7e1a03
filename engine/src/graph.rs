use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tract_onnx::prelude::*;

use crate::engine::Engine;
use crate::errors::{EngineError, EngineResult};
use crate::model::RegisteredModel;
use crate::tensor::{TensorHandle, TensorKind, f32_byte_len, locate};

type PreparedState = TypedSimpleState<TypedModel, TypedRunnableModel<TypedModel>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub(crate) u64);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle position of a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphState {
    /// Created, some inputs still lack a bound buffer.
    Created,
    /// Every input has a declared shape and a bound buffer.
    Bound,
    /// Execution plan built, ready to run.
    Prepared,
    /// At least one run succeeded and its outputs are available.
    OutputReady,
    /// Execution resources released by postrun.
    Finished,
}

impl fmt::Display for GraphState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GraphState::Created => "created",
            GraphState::Bound => "bound",
            GraphState::Prepared => "prepared",
            GraphState::OutputReady => "output-ready",
            GraphState::Finished => "finished",
        };
        f.write_str(s)
    }
}

#[derive(Default)]
struct InputSlot<'a> {
    shape: Option<Vec<usize>>,
    buffer: Option<&'a [f32]>,
}

/// An executable instance of a registered model.
///
/// Input buffers are borrowed, not copied: a buffer bound with
/// [`Graph::set_tensor_buffer`] must outlive the graph, and stays frozen while
/// the graph holds it. Every run reads the buffer contents anew.
pub struct Graph<'a> {
    engine: &'a Engine,
    id: GraphId,
    name: String,
    model: Arc<RegisteredModel>,
    inputs: Vec<InputSlot<'a>>,
    outputs: Vec<TValue>,
    handles: HashMap<u64, TensorHandle>,
    next_handle: u64,
    state: GraphState,
    prepared: Option<PreparedState>,
    runs: usize,
}

impl<'a> Graph<'a> {
    pub(crate) fn new(
        engine: &'a Engine,
        id: GraphId,
        name: &str,
        model: Arc<RegisteredModel>,
    ) -> Graph<'a> {
        let inputs = (0..model.model.input_outlets().len()).map(|_| InputSlot::default()).collect();
        Graph {
            engine,
            id,
            name: name.to_string(),
            model,
            inputs,
            outputs: vec![],
            handles: HashMap::new(),
            next_handle: 0,
            state: GraphState::Created,
            prepared: None,
            runs: 0,
        }
    }

    pub fn id(&self) -> GraphId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_name(&self) -> &str {
        &self.model.name
    }

    pub fn engine(&self) -> &'a Engine {
        self.engine
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn input_count(&self) -> usize {
        self.model.model.input_outlets().len()
    }

    pub fn output_count(&self) -> usize {
        self.model.model.output_outlets().len()
    }

    /// Number of successful runs since creation.
    pub fn run_count(&self) -> usize {
        self.runs
    }

    /// Acquires a handle on an input slot. `(0, 0)` is the first graph input.
    pub fn input_tensor(&mut self, node: usize, slot: usize) -> EngineResult<TensorHandle> {
        self.acquire(TensorKind::Input, node, slot)
    }

    /// Acquires a handle on an output slot. `(0, 0)` is the first graph output.
    pub fn output_tensor(&mut self, node: usize, slot: usize) -> EngineResult<TensorHandle> {
        self.acquire(TensorKind::Output, node, slot)
    }

    fn acquire(
        &mut self,
        kind: TensorKind,
        node: usize,
        slot: usize,
    ) -> EngineResult<TensorHandle> {
        self.check_not_finished("tensor acquisition")?;
        let outlets = match kind {
            TensorKind::Input => self.model.model.input_outlets(),
            TensorKind::Output => self.model.model.output_outlets(),
        };
        let index =
            locate(outlets, node, slot).ok_or(EngineError::TensorNotFound { kind, node, slot })?;
        let handle = TensorHandle { graph: self.id, id: self.next_handle, kind, node, slot, index };
        self.next_handle += 1;
        self.handles.insert(handle.id, handle);
        debug!("Acquired {handle}");
        Ok(handle)
    }

    /// Releases a tensor handle. The handle is unusable afterwards.
    pub fn release_tensor(&mut self, handle: TensorHandle) -> EngineResult<()> {
        self.check(&handle)?;
        self.handles.remove(&handle.id);
        debug!("Released {handle}");
        Ok(())
    }

    fn check(&self, handle: &TensorHandle) -> EngineResult<()> {
        if handle.graph != self.id {
            return Err(EngineError::InvalidHandle(format!(
                "{handle} does not belong to graph {}",
                self.id
            )));
        }
        if self.handles.get(&handle.id) != Some(handle) {
            return Err(EngineError::InvalidHandle(format!("{handle} has been released")));
        }
        Ok(())
    }

    fn check_input(&self, handle: &TensorHandle, operation: &str) -> EngineResult<usize> {
        self.check(handle)?;
        if handle.kind != TensorKind::Input {
            return Err(EngineError::InvalidArgument(format!("{operation} needs an input tensor")));
        }
        Ok(handle.index)
    }

    fn slot(&self, ix: usize) -> EngineResult<&InputSlot<'a>> {
        self.inputs.get(ix).ok_or_else(|| no_such_input(self.id, ix))
    }

    fn slot_mut(&mut self, ix: usize) -> EngineResult<&mut InputSlot<'a>> {
        let id = self.id;
        self.inputs.get_mut(ix).ok_or_else(|| no_such_input(id, ix))
    }

    fn check_not_finished(&self, operation: &'static str) -> EngineResult<()> {
        if self.state == GraphState::Finished {
            return Err(self.invalid_state(operation));
        }
        Ok(())
    }

    fn invalid_state(&self, operation: &'static str) -> EngineError {
        EngineError::InvalidState { graph: self.name.clone(), operation, state: self.state }
    }

    /// Declares the dimensions of an input tensor.
    ///
    /// Shapes are frozen once the graph is prepared. Declaring a new shape on
    /// a bound input unbinds its buffer.
    pub fn set_tensor_shape(&mut self, handle: &TensorHandle, dims: &[usize]) -> EngineResult<()> {
        let ix = self.check_input(handle, "shape declaration")?;
        if !matches!(self.state, GraphState::Created | GraphState::Bound) {
            return Err(self.invalid_state("shape declaration"));
        }
        if dims.is_empty() || dims.contains(&0) {
            return Err(EngineError::InvalidArgument(format!(
                "shape {dims:?} must have a non-zero rank and non-zero dimensions"
            )));
        }
        let slot = self.slot_mut(ix)?;
        if slot.shape.as_deref() != Some(dims) {
            if slot.buffer.take().is_some() {
                debug!("Shape of {handle} changed, buffer unbound");
            }
            slot.shape = Some(dims.to_vec());
        }
        self.refresh_binding_state();
        Ok(())
    }

    /// Binds a caller-owned buffer to an input tensor.
    ///
    /// The buffer must hold exactly the element count of the declared shape.
    /// On failure the slot is left unbound.
    pub fn set_tensor_buffer(
        &mut self,
        handle: &TensorHandle,
        buffer: &'a [f32],
    ) -> EngineResult<()> {
        let ix = self.check_input(handle, "buffer binding")?;
        self.check_not_finished("buffer binding")?;
        let shape = self.slot(ix)?.shape.clone().ok_or_else(|| {
            EngineError::InvalidArgument(format!(
                "shape of {handle} must be declared before binding"
            ))
        })?;
        if let Some(expected) = self.model.model.concrete_input_shape(ix) {
            if expected != shape {
                self.unbind(ix);
                return Err(EngineError::InvalidArgument(format!(
                    "declared shape {shape:?} contradicts model input shape {expected:?}"
                )));
            }
        }
        let expected = f32_byte_len(&shape);
        let actual = std::mem::size_of_val(buffer);
        if actual != expected {
            self.unbind(ix);
            return Err(EngineError::BufferSizeMismatch { shape, expected, actual });
        }
        self.slot_mut(ix)?.buffer = Some(buffer);
        self.refresh_binding_state();
        debug!("Bound {actual} bytes to {handle}");
        Ok(())
    }

    /// Drops the binding of a slot after a failed bind. A prepared graph keeps
    /// its plan, but runs fail until a valid buffer is bound again.
    fn unbind(&mut self, ix: usize) {
        if let Some(slot) = self.inputs.get_mut(ix) {
            slot.buffer = None;
        }
        self.refresh_binding_state();
    }

    fn refresh_binding_state(&mut self) {
        if matches!(self.state, GraphState::Created | GraphState::Bound) {
            let all_bound = self.inputs.iter().all(|s| s.shape.is_some() && s.buffer.is_some());
            self.state = if all_bound { GraphState::Bound } else { GraphState::Created };
        }
    }

    /// One-time setup: fixes input facts, optimizes the model, and builds the
    /// execution plan and its state. Allowed once per graph: no transition
    /// leads back to `Bound` after it.
    pub fn prepare(&mut self) -> EngineResult<()> {
        if self.state != GraphState::Bound {
            return Err(self.invalid_state("prepare"));
        }
        let shapes: Vec<Vec<usize>> =
            self.inputs.iter().map(|s| s.shape.clone().unwrap_or_default()).collect();
        info!("Preparing graph {:?} for input shapes {shapes:?}", self.name);
        let prepared: PreparedState = self
            .model
            .model
            .specialize(&shapes)
            .and_then(|typed| typed.into_runnable())
            .and_then(SimpleState::new)
            .map_err(|source| EngineError::Prepare { graph: self.name.clone(), source })?;
        self.prepared = Some(prepared);
        self.state = GraphState::Prepared;
        Ok(())
    }

    /// Runs one forward pass over the currently bound buffers.
    ///
    /// A failed run discards the outputs of any previous run.
    pub fn run(&mut self) -> EngineResult<()> {
        if !matches!(self.state, GraphState::Prepared | GraphState::OutputReady) {
            return Err(self.invalid_state("run"));
        }
        let inputs = self
            .inputs
            .iter()
            .enumerate()
            .map(|(ix, slot)| match (&slot.shape, slot.buffer) {
                (Some(shape), Some(buffer)) => {
                    Ok(Tensor::from_shape::<f32>(shape, buffer)?.into_tvalue())
                }
                _ => anyhow::bail!("input #{ix} has no bound buffer"),
            })
            .collect::<TractResult<TVec<TValue>>>();
        let result = match (inputs, self.prepared.as_mut()) {
            (Ok(inputs), Some(state)) => state.run(inputs),
            (Err(e), _) => Err(e),
            (_, None) => Err(anyhow::anyhow!("graph has no execution state")),
        };
        match result {
            Ok(outputs) => {
                self.outputs = outputs.into_iter().collect();
                self.runs += 1;
                self.state = GraphState::OutputReady;
                trace!("Graph {:?} run #{} done", self.name, self.runs);
                Ok(())
            }
            Err(source) => {
                self.outputs.clear();
                self.state = GraphState::Prepared;
                Err(EngineError::Execution { graph: self.name.clone(), source })
            }
        }
    }

    fn output_value(&self, handle: &TensorHandle) -> EngineResult<&TValue> {
        if self.state != GraphState::OutputReady {
            return Err(EngineError::ShapeQuery(format!(
                "{handle} has no value: graph {:?} is {}",
                self.name, self.state
            )));
        }
        self.outputs.get(handle.index).ok_or_else(|| {
            EngineError::ShapeQuery(format!("{handle} missing from the last run outputs"))
        })
    }

    /// Shape of a tensor: the declared shape for an input, the last computed
    /// shape for an output.
    pub fn tensor_shape(&self, handle: &TensorHandle) -> EngineResult<Vec<usize>> {
        self.check(handle)?;
        match handle.kind {
            TensorKind::Input => self
                .slot(handle.index)?
                .shape
                .clone()
                .ok_or_else(|| EngineError::ShapeQuery(format!("{handle} has no declared shape"))),
            TensorKind::Output => Ok(self.output_value(handle)?.shape().to_vec()),
        }
    }

    /// Writes the tensor dimensions into `dims` and returns the rank.
    ///
    /// Fails without writing anything if `dims` is shorter than the rank.
    pub fn get_tensor_shape(
        &self,
        handle: &TensorHandle,
        dims: &mut [usize],
    ) -> EngineResult<usize> {
        let shape = self.tensor_shape(handle)?;
        if dims.len() < shape.len() {
            return Err(EngineError::ShapeQuery(format!(
                "dimension buffer holds {} entries, {handle} has rank {}",
                dims.len(),
                shape.len()
            )));
        }
        dims[..shape.len()].copy_from_slice(&shape);
        Ok(shape.len())
    }

    /// Size in bytes of the tensor buffer.
    pub fn tensor_buffer_size(&self, handle: &TensorHandle) -> EngineResult<usize> {
        self.check(handle)?;
        match handle.kind {
            TensorKind::Input => {
                self.slot(handle.index)?.buffer.map(std::mem::size_of_val).ok_or_else(|| {
                    EngineError::ShapeQuery(format!("{handle} has no bound buffer"))
                })
            }
            TensorKind::Output => {
                let value = self.output_value(handle)?;
                Ok(value.len() * value.datum_type().size_of())
            }
        }
    }

    /// Read-only view on the tensor data.
    pub fn tensor_buffer(&self, handle: &TensorHandle) -> EngineResult<&[f32]> {
        self.check(handle)?;
        match handle.kind {
            TensorKind::Input => self
                .slot(handle.index)?
                .buffer
                .ok_or_else(|| EngineError::ShapeQuery(format!("{handle} has no bound buffer"))),
            TensorKind::Output => {
                let value = self.output_value(handle)?;
                value.as_slice::<f32>().map_err(|e| {
                    EngineError::InvalidArgument(format!("{handle} is not an f32 tensor: {e}"))
                })
            }
        }
    }

    /// Releases execution resources: plan, state, outputs and input bindings.
    pub fn postrun(&mut self) -> EngineResult<()> {
        if !matches!(self.state, GraphState::Prepared | GraphState::OutputReady) {
            return Err(self.invalid_state("postrun"));
        }
        self.finish();
        info!("Graph {:?} post-run after {} run(s)", self.name, self.runs);
        Ok(())
    }

    fn finish(&mut self) {
        self.prepared = None;
        self.outputs.clear();
        for slot in &mut self.inputs {
            slot.buffer = None;
        }
        self.state = GraphState::Finished;
    }

    /// Destroys the graph, releasing whatever the caller left behind. Cannot
    /// fail: leftover handles and a missing postrun are only warned about.
    pub fn destroy(mut self) {
        self.teardown();
        info!("Graph {:?} ({}) destroyed", self.name, self.id);
    }

    fn teardown(&mut self) {
        if !self.handles.is_empty() {
            warn!(
                "Graph {:?} torn down with {} tensor handle(s) still held",
                self.name,
                self.handles.len()
            );
            self.handles.clear();
        }
        if matches!(self.state, GraphState::Prepared | GraphState::OutputReady) {
            warn!("Graph {:?} torn down without postrun", self.name);
        }
        self.finish();
    }
}

fn no_such_input(graph: GraphId, ix: usize) -> EngineError {
    EngineError::InvalidHandle(format!("graph {graph} has no input #{ix}"))
}

impl Drop for Graph<'_> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Graph<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("model", &self.model.name)
            .field("state", &self.state)
            .field("runs", &self.runs)
            .finish()
    }
}

