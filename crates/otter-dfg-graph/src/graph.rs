//! The data-flow graph of one function

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeOp};
use crate::node::Arity;
use crate::operand::{BlockIndex, NodeIndex, Operand};
use crate::speculated_type::SpeculatedType;
use crate::structure_set::StructureSet;

/// Facts proven upstream about a node's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractValue {
    /// Proven type set.
    pub ty: SpeculatedType,
    /// Proven structure set, for cells.
    pub structures: Option<StructureSet>,
}

impl AbstractValue {
    /// Nothing is proven.
    pub fn top() -> Self {
        Self {
            ty: SpeculatedType::TOP,
            structures: None,
        }
    }

    /// Only the type is proven.
    pub fn of_type(ty: SpeculatedType) -> Self {
        Self {
            ty,
            structures: None,
        }
    }
}

impl Default for AbstractValue {
    fn default() -> Self {
        Self::top()
    }
}

/// A straight-line sequence of nodes ending in a terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Nodes in execution order.
    pub nodes: Vec<NodeIndex>,
}

/// Whole-function graph handed to the code generator.
///
/// Block 0 is the entry. Node results are block-local; values flow between
/// blocks through [`NodeOp::SetLocal`] and [`NodeOp::GetLocal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Function name, for diagnostics and symbol names.
    pub name: String,
    /// Declared parameters, excluding `this`.
    pub parameter_count: u32,
    /// Local variable slots.
    pub local_count: u32,
    /// Node table.
    pub nodes: Vec<Node>,
    /// Basic blocks; block 0 is the entry.
    pub blocks: Vec<BasicBlock>,
    /// Proven facts, indexed like `nodes`.
    pub abstract_values: Vec<AbstractValue>,
    /// Number of virtual registers assigned to node results.
    pub virtual_register_count: u32,
}

impl Graph {
    /// Node by index.
    #[inline]
    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index.index()]
    }

    /// Block by index.
    #[inline]
    pub fn block(&self, index: BlockIndex) -> &BasicBlock {
        &self.blocks[index.index()]
    }

    /// Proven facts about a node; nodes without an entry have none.
    pub fn abstract_value(&self, index: NodeIndex) -> AbstractValue {
        self.abstract_values
            .get(index.index())
            .cloned()
            .unwrap_or_default()
    }

    /// Iterate block indices in order.
    pub fn block_indices(&self) -> impl Iterator<Item = BlockIndex> {
        (0..self.blocks.len() as u32).map(BlockIndex)
    }

    /// Whether an operand lies inside the declared frame.
    pub fn operand_in_range(&self, operand: Operand) -> bool {
        match operand {
            Operand::Argument(i) => i <= self.parameter_count,
            Operand::Local(i) => i < self.local_count,
        }
    }

    /// Check the structural rules the code generator relies on.
    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut scheduled = FxHashSet::default();
        for block_index in self.block_indices() {
            let block = self.block(block_index);
            let mut available = FxHashSet::default();

            let Some(&last) = block.nodes.last() else {
                return Err(GraphError::MissingTerminal(block_index));
            };

            for &index in &block.nodes {
                let node = self
                    .nodes
                    .get(index.index())
                    .ok_or(GraphError::UnknownNode(index))?;
                if !scheduled.insert(index) {
                    return Err(GraphError::ScheduledTwice(index));
                }

                self.validate_arity(index, node)?;

                for edge in &node.children {
                    let child = self
                        .nodes
                        .get(edge.node.index())
                        .ok_or(GraphError::UnknownNode(edge.node))?;
                    if !child.has_result() {
                        return Err(GraphError::ChildHasNoResult {
                            node: index,
                            child: edge.node,
                        });
                    }
                    if !available.contains(&edge.node) {
                        return Err(GraphError::ChildNotAvailable {
                            node: index,
                            child: edge.node,
                            block: block_index,
                        });
                    }
                }

                match node.op {
                    NodeOp::GetLocal(operand)
                    | NodeOp::SetLocal(operand)
                    | NodeOp::MovHint(operand)
                        if !self.operand_in_range(operand) =>
                    {
                        return Err(GraphError::OperandOutOfRange(operand.to_string()));
                    }
                    _ => {}
                }

                if node.op.is_terminal() && index != last {
                    return Err(GraphError::TerminalNotLast {
                        node: index,
                        block: block_index,
                    });
                }
                for successor in node.op.successors() {
                    if successor.index() >= self.blocks.len() {
                        return Err(GraphError::UnknownBlock(successor));
                    }
                }

                available.insert(index);
            }

            if !self.node(last).op.is_terminal() {
                return Err(GraphError::MissingTerminal(block_index));
            }
        }

        Ok(())
    }

    fn validate_arity(&self, index: NodeIndex, node: &Node) -> Result<()> {
        let found = node.children.len();
        let (ok, expected) = match node.op.arity() {
            Arity::Fixed(n) => (found == n, n),
            Arity::AtLeast(n) => (found >= n, n),
        };
        if ok {
            Ok(())
        } else {
            Err(GraphError::Arity {
                node: index,
                op: node.op.name(),
                expected,
                found,
            })
        }
    }

    /// Serialize to JSON, for dumps and fixtures.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::node::{ArithMode, Edge};
    use crate::value::JsValue;

    #[test]
    fn validates_straight_line_graph() {
        let mut b = GraphBuilder::new("add").parameters(2);
        let x = b.get_local(Operand::Argument(1));
        let y = b.get_local(Operand::Argument(2));
        let sum = b.add(
            NodeOp::ArithAdd(ArithMode::CheckOverflow),
            &[Edge::int32(x), Edge::int32(y)],
        );
        b.ret(sum);
        let graph = b.build().expect("build should succeed");
        assert_eq!(graph.virtual_register_count, 3);
        assert_eq!(graph.node(x).ref_count, 1);
    }

    #[test]
    fn rejects_cross_block_use() {
        let mut b = GraphBuilder::new("cross");
        let next = b.new_block();
        let one = b.constant(JsValue::Int32(1));
        b.jump(next);
        b.switch_to_block(next);
        b.ret(one);
        let err = b.build().expect_err("cross-block use should be rejected");
        assert!(matches!(err, GraphError::ChildNotAvailable { .. }));
    }

    #[test]
    fn rejects_missing_terminal() {
        let mut b = GraphBuilder::new("open");
        b.constant(JsValue::Undefined);
        let err = b.build().expect_err("open block should be rejected");
        assert_eq!(err, GraphError::MissingTerminal(BlockIndex(0)));
    }

    #[test]
    fn rejects_out_of_range_local() {
        let mut b = GraphBuilder::new("locals").locals(1);
        let v = b.constant(JsValue::Null);
        b.set_local(Operand::Local(3), v);
        b.ret(v);
        let err = b.build().expect_err("out-of-range local should be rejected");
        assert_eq!(err, GraphError::OperandOutOfRange("loc3".into()));
    }

    #[test]
    fn json_dump_roundtrips() {
        let mut b = GraphBuilder::new("json");
        let v = b.constant(JsValue::Double(1.5));
        b.ret(v);
        let graph = b.build().expect("build should succeed");
        let json = graph.to_json().expect("serialize should succeed");
        assert!(json.contains("JsConstant"));
        let back = Graph::from_json(&json).expect("deserialize should succeed");
        assert_eq!(back, graph);
    }
}
