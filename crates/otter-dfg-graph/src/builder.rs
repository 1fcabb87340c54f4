//! Incremental graph construction
//!
//! Used by graph producers and by tests. Nodes are appended to the current
//! block; [`GraphBuilder::build`] computes reference counts, assigns virtual
//! registers and validates the result.

use smallvec::SmallVec;

use crate::error::Result;
use crate::graph::{AbstractValue, BasicBlock, Graph};
use crate::node::{Edge, Node, NodeOp};
use crate::operand::{BlockIndex, CodeOrigin, NodeIndex, Operand, VirtualRegister};
use crate::speculated_type::SpeculatedType;
use crate::structure_set::StructureSet;
use crate::value::JsValue;

/// Builder for [`Graph`].
#[derive(Debug)]
pub struct GraphBuilder {
    graph: Graph,
    current: BlockIndex,
    origin: CodeOrigin,
}

impl GraphBuilder {
    /// Start a graph with an empty entry block.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                name: name.into(),
                parameter_count: 0,
                local_count: 0,
                nodes: Vec::new(),
                blocks: vec![BasicBlock::default()],
                abstract_values: Vec::new(),
                virtual_register_count: 0,
            },
            current: BlockIndex(0),
            origin: CodeOrigin::default(),
        }
    }

    /// Set the declared parameter count (excluding `this`)
    pub fn parameters(mut self, count: u32) -> Self {
        self.graph.parameter_count = count;
        self
    }

    /// Set the local variable count
    pub fn locals(mut self, count: u32) -> Self {
        self.graph.local_count = count;
        self
    }

    /// Set the source position recorded on subsequent nodes.
    pub fn at(&mut self, bytecode_index: u32) -> &mut Self {
        self.origin = CodeOrigin { bytecode_index };
        self
    }

    /// Append a node with no particular prediction.
    pub fn add(&mut self, op: NodeOp, children: &[Edge]) -> NodeIndex {
        let prediction = match op {
            NodeOp::JsConstant(value) => value.speculated_type(),
            _ => SpeculatedType::TOP,
        };
        self.add_predicted(op, children, prediction)
    }

    /// Append a node with a profile prediction.
    pub fn add_predicted(
        &mut self,
        op: NodeOp,
        children: &[Edge],
        prediction: SpeculatedType,
    ) -> NodeIndex {
        let index = NodeIndex(self.graph.nodes.len() as u32);
        self.graph.nodes.push(Node {
            op,
            children: SmallVec::from_slice(children),
            prediction,
            ref_count: 0,
            virtual_register: None,
            origin: self.origin,
        });
        self.graph.abstract_values.push(AbstractValue::top());
        self.graph.blocks[self.current.index()].nodes.push(index);
        index
    }

    /// Override a node's prediction.
    pub fn predict(&mut self, node: NodeIndex, prediction: SpeculatedType) {
        self.graph.nodes[node.index()].prediction = prediction;
    }

    /// Record a proven type for a node.
    pub fn prove(&mut self, node: NodeIndex, ty: SpeculatedType) {
        self.graph.abstract_values[node.index()].ty = ty;
    }

    /// Record a proven structure set for a node.
    pub fn prove_structures(&mut self, node: NodeIndex, structures: StructureSet) {
        self.graph.abstract_values[node.index()].structures = Some(structures);
    }

    /// Compile-time constant; constants are proven to be their own type.
    pub fn constant(&mut self, value: JsValue) -> NodeIndex {
        let node = self.add(NodeOp::JsConstant(value), &[]);
        self.prove(node, value.speculated_type());
        node
    }

    /// Read a frame variable.
    pub fn get_local(&mut self, operand: Operand) -> NodeIndex {
        self.add(NodeOp::GetLocal(operand), &[])
    }

    /// Store a value to a frame variable.
    pub fn set_local(&mut self, operand: Operand, value: NodeIndex) -> NodeIndex {
        self.add(NodeOp::SetLocal(operand), &[Edge::untyped(value)])
    }

    /// Note that a frame variable now holds `value`.
    pub fn mov_hint(&mut self, operand: Operand, value: NodeIndex) -> NodeIndex {
        self.add(NodeOp::MovHint(operand), &[Edge::untyped(value)])
    }

    /// End the current block with a jump.
    pub fn jump(&mut self, target: BlockIndex) -> NodeIndex {
        self.add(NodeOp::Jump(target), &[])
    }

    /// End the current block with a two-way branch.
    pub fn branch(&mut self, condition: Edge, taken: BlockIndex, not_taken: BlockIndex) -> NodeIndex {
        self.add(NodeOp::Branch { taken, not_taken }, &[condition])
    }

    /// End the current block with a return.
    pub fn ret(&mut self, value: NodeIndex) -> NodeIndex {
        self.add(NodeOp::Return, &[Edge::untyped(value)])
    }

    /// Append an empty block; the current block is unchanged.
    pub fn new_block(&mut self) -> BlockIndex {
        self.graph.blocks.push(BasicBlock::default());
        BlockIndex(self.graph.blocks.len() as u32 - 1)
    }

    /// Make `block` the block new nodes go to.
    pub fn switch_to_block(&mut self, block: BlockIndex) {
        self.current = block;
    }

    /// Block new nodes go to.
    pub fn current_block(&self) -> BlockIndex {
        self.current
    }

    /// Finish the graph: count references, assign virtual registers, validate.
    pub fn build(mut self) -> Result<Graph> {
        let graph = &mut self.graph;

        for node in &mut graph.nodes {
            node.ref_count = 0;
        }
        // Node results are block-local, so walking each block backwards sees
        // every use of a node before the node itself. Uses by dead nodes do
        // not count.
        for block in &graph.blocks {
            for &index in block.nodes.iter().rev() {
                let Some(node) = graph.nodes.get(index.index()) else {
                    continue;
                };
                if !node.should_generate() {
                    continue;
                }
                let children: SmallVec<[NodeIndex; 3]> =
                    node.children.iter().map(|edge| edge.node).collect();
                for child in children {
                    if let Some(used) = graph.nodes.get_mut(child.index()) {
                        used.ref_count += 1;
                    }
                }
            }
        }

        let mut next = 0u32;
        for node in &mut graph.nodes {
            node.virtual_register = if node.has_result() {
                next += 1;
                Some(VirtualRegister(next - 1))
            } else {
                None
            };
        }
        graph.virtual_register_count = next;

        graph.validate()?;
        Ok(self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ArithMode;

    #[test]
    fn ref_counts_and_registers() {
        let mut b = GraphBuilder::new("square").parameters(1);
        let x = b.get_local(Operand::Argument(1));
        let sq = b.add(
            NodeOp::ArithMul(ArithMode::CheckOverflowAndNegativeZero),
            &[Edge::int32(x), Edge::int32(x)],
        );
        let ret = b.ret(sq);
        let graph = b.build().expect("build should succeed");

        assert_eq!(graph.node(x).ref_count, 2);
        assert_eq!(graph.node(sq).ref_count, 1);
        assert_eq!(graph.node(x).virtual_register, Some(VirtualRegister(0)));
        assert_eq!(graph.node(sq).virtual_register, Some(VirtualRegister(1)));
        assert_eq!(graph.node(ret).virtual_register, None);
    }

    #[test]
    fn uses_by_dead_nodes_are_not_counted() {
        let mut b = GraphBuilder::new("dead");
        let x = b.constant(JsValue::Int32(2));
        let unused = b.add(NodeOp::ArithAdd(ArithMode::CheckOverflow), &[Edge::int32(x), Edge::int32(x)]);
        b.ret(x);
        let graph = b.build().expect("build should succeed");

        assert_eq!(graph.node(unused).ref_count, 0);
        assert!(!graph.node(unused).should_generate());
        assert_eq!(graph.node(x).ref_count, 1);
    }

    #[test]
    fn origins_are_recorded() {
        let mut b = GraphBuilder::new("origin");
        b.at(7);
        let v = b.constant(JsValue::Int32(3));
        b.ret(v);
        let graph = b.build().expect("build should succeed");
        assert_eq!(graph.node(v).origin.bytecode_index, 7);
        assert_eq!(graph.abstract_value(v).ty, SpeculatedType::INT32);
    }
}
