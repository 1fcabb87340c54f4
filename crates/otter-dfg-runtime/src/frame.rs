//! Register file and frame geometry
//!
//! Every frame, compiled or interpreted, lives in one contiguous register
//! file. A caller writes the callee's header and arguments at its own
//! `register_count`, which becomes the callee's frame pointer.

use std::cell::Cell;

use otter_dfg_graph::{Graph, NodeOp};
use otter_dfg_jit::layout::{FrameLayout, THIS_SLOT};

/// Contiguous slot storage for all frames.
///
/// Slots are [`Cell`]s: compiled code writes them through raw pointers while
/// the runtime holds shared references.
pub struct RegisterFile {
    slots: Box<[Cell<u64>]>,
}

impl RegisterFile {
    /// Register file with `len` slots.
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| Cell::new(0)).collect(),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the file has no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Address of slot 0.
    pub fn base(&self) -> *mut u64 {
        self.slots.as_ptr() as *mut u64
    }

    /// Address one past the last slot.
    pub fn end_address(&self) -> usize {
        self.base() as usize + self.slots.len() * 8
    }

    /// Address of slot `index`.
    pub fn address_of(&self, index: usize) -> *mut u64 {
        self.base().wrapping_add(index)
    }

    /// Slot index of a frame pointer handed out by [`Self::address_of`].
    pub fn index_of(&self, address: usize) -> Option<usize> {
        let base = self.base() as usize;
        (address >= base && address < self.end_address() && (address - base) % 8 == 0)
            .then(|| (address - base) / 8)
    }

    /// Read a slot; out-of-range slots read as zero.
    #[inline]
    pub fn get(&self, index: usize) -> u64 {
        self.slots.get(index).map_or(0, Cell::get)
    }

    /// Write a slot; out-of-range writes are dropped.
    #[inline]
    pub fn set(&self, index: usize, value: u64) {
        if let Some(slot) = self.slots.get(index) {
            slot.set(value);
        }
    }
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile")
            .field("slots", &self.slots.len())
            .finish()
    }
}

/// Slots a graph's frame needs, including the outgoing area for its calls and
/// array literals.
pub fn frame_extent(graph: &Graph) -> u32 {
    let layout = FrameLayout::of(graph);
    let outgoing = graph
        .nodes
        .iter()
        .filter(|node| node.should_generate())
        .map(|node| match node.op {
            // callee, argc, then `this` and the arguments
            NodeOp::Call => THIS_SLOT - 1 + node.children.len() as u32,
            NodeOp::Construct => THIS_SLOT + node.children.len() as u32,
            NodeOp::NewArray(_) => node.children.len() as u32,
            _ => 0,
        })
        .max()
        .unwrap_or(0);
    layout.register_count() + outgoing
}
