use std::fmt;

use tract_onnx::prelude::OutletId;

use crate::graph::GraphId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TensorKind {
    Input,
    Output,
}

impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorKind::Input => write!(f, "input"),
            TensorKind::Output => write!(f, "output"),
        }
    }
}

/// A reference to one input or output slot of a graph.
///
/// Handles are plain tokens: they own nothing, and every graph operation
/// checks them against its live handle table. A handle outlives neither its
/// release nor its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TensorHandle {
    pub(crate) graph: GraphId,
    pub(crate) id: u64,
    pub(crate) kind: TensorKind,
    pub(crate) node: usize,
    pub(crate) slot: usize,
    pub(crate) index: usize,
}

impl TensorHandle {
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn kind(&self) -> TensorKind {
        self.kind
    }

    pub fn node(&self) -> usize {
        self.node
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl fmt::Display for TensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} ({},{}) of graph {}",
            self.kind, self.id, self.node, self.slot, self.graph
        )
    }
}

/// Element count of a shape. A rank-0 shape holds one element.
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Size in bytes of an f32 buffer for `shape`.
pub fn f32_byte_len(shape: &[usize]) -> usize {
    element_count(shape) * std::mem::size_of::<f32>()
}

/// Finds the position of `(node_index, slot_index)` in a list of graph
/// outlets.
///
/// `node_index` counts distinct nodes in the order they first appear in
/// `outlets`; `slot_index` is the output slot of that node.
pub(crate) fn locate(outlets: &[OutletId], node_index: usize, slot_index: usize) -> Option<usize> {
    let mut nodes: Vec<usize> = vec![];
    for outlet in outlets {
        if !nodes.contains(&outlet.node) {
            nodes.push(outlet.node);
        }
    }
    let node = *nodes.get(node_index)?;
    outlets.iter().position(|o| o.node == node && o.slot == slot_index)
}
