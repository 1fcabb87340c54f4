//! Facts narrowed while a block is generated
//!
//! Starts from the graph's abstract-value table and records what each
//! emitted check proved, so later uses of the same value skip the check.

use otter_dfg_graph::{ArrayType, Graph, NodeIndex, SpeculatedType, StructureSet, UseKind};
use rustc_hash::FxHashSet;

/// What a typed use of a value requires at code generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckDecision {
    /// The type is proven; emit no check.
    NotNeeded,
    /// The type is possible but not proven; emit the minimal check.
    Needed,
    /// The type is impossible; the use always exits.
    Contradiction,
}

/// Decide whether a use of a value proven to be `proven` needs a check.
pub(crate) fn check_decision(proven: SpeculatedType, use_kind: UseKind) -> CheckDecision {
    if use_kind == UseKind::Untyped || use_kind.is_known() {
        return CheckDecision::NotNeeded;
    }
    let filter = use_kind.type_filter();
    if proven.is_empty() {
        return CheckDecision::Needed;
    }
    if proven.is_subset_of(filter) {
        CheckDecision::NotNeeded
    } else if !proven.intersects(filter) {
        CheckDecision::Contradiction
    } else {
        CheckDecision::Needed
    }
}

/// Per-node types and structures plus the arrays already checked in this block.
#[derive(Debug, Clone)]
pub(crate) struct AbstractState {
    types: Vec<SpeculatedType>,
    structures: Vec<Option<StructureSet>>,
    checked_arrays: FxHashSet<(NodeIndex, ArrayType)>,
}

impl AbstractState {
    pub fn new(graph: &Graph) -> Self {
        let count = graph.nodes.len();
        let mut types = Vec::with_capacity(count);
        let mut structures = Vec::with_capacity(count);
        for index in 0..count {
            let value = graph.abstract_value(NodeIndex(index as u32));
            types.push(value.ty);
            structures.push(value.structures);
        }
        Self {
            types,
            structures,
            checked_arrays: FxHashSet::default(),
        }
    }

    /// Forget facts that only hold along one block's straight-line code.
    pub fn begin_block(&mut self) {
        self.checked_arrays.clear();
    }

    pub fn proven(&self, node: NodeIndex) -> SpeculatedType {
        self.types[node.0 as usize]
    }

    /// Intersect the proven type with `ty`; a contradiction keeps `ty`.
    pub fn filter(&mut self, node: NodeIndex, ty: SpeculatedType) {
        let current = &mut self.types[node.0 as usize];
        let narrowed = *current & ty;
        *current = if narrowed.is_empty() { ty } else { narrowed };
    }

    pub fn structures(&self, node: NodeIndex) -> Option<&StructureSet> {
        self.structures[node.0 as usize].as_ref()
    }

    pub fn filter_structures(&mut self, node: NodeIndex, set: &StructureSet) {
        let slot = &mut self.structures[node.0 as usize];
        *slot = Some(match slot.take() {
            Some(current) => {
                let narrowed = current.intersection(set);
                if narrowed.is_empty() { set.clone() } else { narrowed }
            }
            None => set.clone(),
        });
    }

    pub fn is_array_checked(&self, node: NodeIndex, array_type: ArrayType) -> bool {
        self.checked_arrays.contains(&(node, array_type))
    }

    pub fn mark_array_checked(&mut self, node: NodeIndex, array_type: ArrayType) {
        self.checked_arrays.insert((node, array_type));
    }

    /// Drop structure and storage facts after code that can run arbitrary effects.
    pub fn clobber_heap(&mut self) {
        for slot in &mut self.structures {
            *slot = None;
        }
        self.checked_arrays.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_dfg_graph::{GraphBuilder, JsValue, StructureId};

    #[test]
    fn known_and_untyped_uses_never_check() {
        assert_eq!(
            check_decision(SpeculatedType::TOP, UseKind::Untyped),
            CheckDecision::NotNeeded
        );
        assert_eq!(
            check_decision(SpeculatedType::STRING, UseKind::KnownInt32),
            CheckDecision::NotNeeded
        );
    }

    #[test]
    fn proven_subset_skips_the_check() {
        assert_eq!(
            check_decision(SpeculatedType::INT32, UseKind::Number),
            CheckDecision::NotNeeded
        );
        assert_eq!(
            check_decision(SpeculatedType::ARRAY, UseKind::Object),
            CheckDecision::NotNeeded
        );
    }

    #[test]
    fn overlap_needs_a_check_and_disjoint_contradicts() {
        assert_eq!(
            check_decision(SpeculatedType::INT32 | SpeculatedType::STRING, UseKind::Int32),
            CheckDecision::Needed
        );
        assert_eq!(
            check_decision(SpeculatedType::STRING, UseKind::Int32),
            CheckDecision::Contradiction
        );
        assert_eq!(
            check_decision(SpeculatedType::DOUBLE_NAN, UseKind::RealNumber),
            CheckDecision::Contradiction
        );
        assert_eq!(
            check_decision(SpeculatedType::NONE, UseKind::Cell),
            CheckDecision::Needed
        );
    }

    #[test]
    fn filtering_narrows_and_clobbering_forgets_structures() {
        let mut builder = GraphBuilder::new("state");
        let value = builder.constant(JsValue::Int32(1));
        builder.ret(value);
        let graph = builder.build().expect("graph should build");

        let mut state = AbstractState::new(&graph);
        state.filter(value, SpeculatedType::NUMBER);
        assert!(state.proven(value).is_subset_of(SpeculatedType::NUMBER));

        let set = StructureSet::singleton(StructureId(7));
        state.filter_structures(value, &set);
        assert_eq!(state.structures(value), Some(&set));
        state.mark_array_checked(value, ArrayType::Contiguous);
        assert!(state.is_array_checked(value, ArrayType::Contiguous));

        state.clobber_heap();
        assert!(state.structures(value).is_none());
        assert!(!state.is_array_checked(value, ArrayType::Contiguous));
    }
}
