//! Baseline tier: a graph walker over the same frames compiled code uses
//!
//! Every node with a result writes its boxed value to its virtual register
//! slot, and locals live in their operand slots, so an OSR exit can hand a
//! compiled frame to [`Vm::resume`] at the exiting node without translation.
//! Speculation checks are no-ops here: the baseline tier is the generic
//! semantics the checks guard.

use tracing::trace;

use otter_dfg_graph::{ArithMode, BlockIndex, Edge, Graph, JsValue, NodeIndex, NodeOp, Operand};
use otter_dfg_jit::layout::{
    ARGUMENT_COUNT_SLOT, CALLEE_SLOT, FrameLayout, IndexingShape, THIS_SLOT,
};
use otter_dfg_jit::{CallType, ValueRepresentation};

use crate::error::{VmError, VmResult};
use crate::operations::{Relation, js_max, js_min, to_int32};
use crate::vm::Vm;

enum Step {
    Next,
    Jump(BlockIndex),
    Return(JsValue),
}

#[derive(Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Int32 result of an exact integer computation, or the double it denotes.
fn exact(result: i64, negative_zero: bool, mode: ArithMode) -> JsValue {
    if negative_zero && result == 0 {
        return if mode.checks_negative_zero() {
            JsValue::Double(-0.0)
        } else {
            JsValue::Int32(0)
        };
    }
    match i32::try_from(result) {
        Ok(value) => JsValue::Int32(value),
        Err(_) => JsValue::Double(result as f64),
    }
}

/// Int32 arithmetic as compiled code does it for int32 uses.
fn int32_arith(op: Arith, a: i32, b: i32, mode: ArithMode) -> JsValue {
    if !mode.checks_overflow() {
        let value = match op {
            Arith::Add => a.wrapping_add(b),
            Arith::Sub => a.wrapping_sub(b),
            Arith::Mul => a.wrapping_mul(b),
            Arith::Div if b == 0 => 0,
            Arith::Div => a.wrapping_div(b),
            Arith::Mod if b == 0 => 0,
            Arith::Mod => a.wrapping_rem(b),
        };
        return JsValue::Int32(value);
    }
    let (x, y) = (i64::from(a), i64::from(b));
    match op {
        Arith::Add => exact(x + y, false, mode),
        Arith::Sub => exact(x - y, false, mode),
        Arith::Mul => exact(x * y, a < 0 || b < 0, mode),
        Arith::Div if b == 0 || x % y != 0 => JsValue::number(x as f64 / y as f64),
        Arith::Div => exact(x / y, a == 0 && b < 0, mode),
        Arith::Mod if b == 0 => JsValue::Double(f64::NAN),
        Arith::Mod => exact(x % y, a < 0, mode),
    }
}

fn double_arith(op: Arith, a: f64, b: f64) -> f64 {
    match op {
        Arith::Add => a + b,
        Arith::Sub => a - b,
        Arith::Mul => a * b,
        Arith::Div => a / b,
        Arith::Mod => a % b,
    }
}

impl<R: ValueRepresentation> Vm<R> {
    /// Run `graph` on the frame at `fp` from its entry.
    pub(crate) fn interpret(&mut self, graph: &Graph, fp: usize) -> VmResult<JsValue> {
        let layout = FrameLayout::of(graph);
        let argument_count = self.register_file.get(fp + ARGUMENT_COUNT_SLOT as usize) as u32;
        for i in argument_count.max(1)..=graph.parameter_count {
            let slot = fp + layout.operand_slot(Operand::Argument(i)) as usize;
            self.set_slot_value(slot, JsValue::Undefined);
        }
        for i in 0..graph.local_count {
            let slot = fp + layout.operand_slot(Operand::Local(i)) as usize;
            self.set_slot_value(slot, JsValue::Undefined);
        }
        self.resume(graph, fp, BlockIndex(0), 0)
    }

    /// Continue `graph` at node `position` of `block`.
    pub(crate) fn resume(
        &mut self,
        graph: &Graph,
        fp: usize,
        mut block: BlockIndex,
        mut position: usize,
    ) -> VmResult<JsValue> {
        if position != 0 {
            trace!(function = %graph.name, block = block.0, position, "resuming in baseline tier");
        }
        let layout = FrameLayout::of(graph);
        loop {
            let index = *graph
                .block(block)
                .nodes
                .get(position)
                .ok_or_else(|| VmError::internal(format!("block {} has no terminal", block.0)))?;
            position += 1;
            if !graph.node(index).should_generate() {
                continue;
            }
            match self.execute(graph, &layout, fp, index)? {
                Step::Next => {}
                Step::Jump(target) => {
                    block = target;
                    position = 0;
                }
                Step::Return(value) => return Ok(value),
            }
        }
    }

    /// Current value of `node` in the frame at `fp`.
    pub(crate) fn node_value(&self, graph: &Graph, layout: &FrameLayout, fp: usize, node: NodeIndex) -> JsValue {
        let node = graph.node(node);
        if let Some(value) = node.constant() {
            return value;
        }
        match node.virtual_register {
            Some(vreg) => self.slot_value(fp + layout.vreg_slot(vreg) as usize),
            None => JsValue::Undefined,
        }
    }

    fn execute(&mut self, graph: &Graph, layout: &FrameLayout, fp: usize, index: NodeIndex) -> VmResult<Step> {
        let node = graph.node(index);
        let value = |vm: &Self, edge: Edge| vm.node_value(graph, layout, fp, edge.node);
        let operand_slot = |operand: Operand| fp + layout.operand_slot(operand) as usize;

        let result = match &node.op {
            NodeOp::JsConstant(constant) => *constant,
            NodeOp::GetLocal(operand) => self.slot_value(operand_slot(*operand)),
            NodeOp::SetLocal(operand) | NodeOp::MovHint(operand) => {
                let v = value(self, node.child1());
                self.set_slot_value(operand_slot(*operand), v);
                return Ok(Step::Next);
            }
            NodeOp::Phantom
            | NodeOp::CheckStructure(_)
            | NodeOp::StructureTransitionWatchpoint(_)
            | NodeOp::CheckArray(_)
            | NodeOp::CheckFunction(_)
            | NodeOp::ForceOsrExit
            | NodeOp::GlobalVarWatchpoint(_) => return Ok(Step::Next),

            NodeOp::ValueToInt32 => {
                let v = value(self, node.child1());
                JsValue::Int32(to_int32(self.to_number(v)))
            }
            NodeOp::UInt32ToNumber(_) => {
                let v = value(self, node.child1());
                JsValue::number(to_int32(self.to_number(v)) as u32 as f64)
            }
            NodeOp::ArithAdd(mode) => self.arith(node.child1(), node.child2(), Arith::Add, *mode, value),
            NodeOp::ArithSub(mode) => self.arith(node.child1(), node.child2(), Arith::Sub, *mode, value),
            NodeOp::ArithMul(mode) => self.arith(node.child1(), node.child2(), Arith::Mul, *mode, value),
            NodeOp::ArithDiv(mode) => self.arith(node.child1(), node.child2(), Arith::Div, *mode, value),
            NodeOp::ArithMod(mode) => self.arith(node.child1(), node.child2(), Arith::Mod, *mode, value),
            NodeOp::ArithNegate(mode) => match value(self, node.child1()) {
                JsValue::Int32(a) if node.child1().use_kind.is_int32() && !mode.checks_overflow() => {
                    JsValue::Int32(a.wrapping_neg())
                }
                JsValue::Int32(a) if node.child1().use_kind.is_int32() => {
                    exact(-i64::from(a), a == 0, *mode)
                }
                v => JsValue::number(-self.to_number(v)),
            },
            NodeOp::ArithAbs(mode) => match value(self, node.child1()) {
                JsValue::Int32(a) if node.child1().use_kind.is_int32() && !mode.checks_overflow() => {
                    JsValue::Int32(a.wrapping_abs())
                }
                JsValue::Int32(a) if node.child1().use_kind.is_int32() => exact(i64::from(a).abs(), false, *mode),
                v => JsValue::number(self.to_number(v).abs()),
            },
            NodeOp::ArithMin | NodeOp::ArithMax => {
                let is_max = matches!(node.op, NodeOp::ArithMax);
                match (value(self, node.child1()), value(self, node.child2())) {
                    (JsValue::Int32(a), JsValue::Int32(b)) => JsValue::Int32(if is_max { a.max(b) } else { a.min(b) }),
                    (a, b) => {
                        let (a, b) = (self.to_number(a), self.to_number(b));
                        JsValue::number(if is_max { js_max(a, b) } else { js_min(a, b) })
                    }
                }
            }
            NodeOp::ArithSqrt => {
                let v = value(self, node.child1());
                JsValue::Double(self.to_number(v).sqrt())
            }
            NodeOp::ValueAdd => {
                let (a, b) = (value(self, node.child1()), value(self, node.child2()));
                self.add(a, b)?
            }
            NodeOp::BitAnd
            | NodeOp::BitOr
            | NodeOp::BitXor
            | NodeOp::BitLShift
            | NodeOp::BitRShift
            | NodeOp::BitURShift => {
                let a = value(self, node.child1());
                let b = value(self, node.child2());
                let (x, y) = (to_int32(self.to_number(a)), to_int32(self.to_number(b)));
                let shift = (y as u32) & 31;
                match node.op {
                    NodeOp::BitAnd => JsValue::Int32(x & y),
                    NodeOp::BitOr => JsValue::Int32(x | y),
                    NodeOp::BitXor => JsValue::Int32(x ^ y),
                    NodeOp::BitLShift => JsValue::Int32(x.wrapping_shl(shift)),
                    NodeOp::BitRShift => JsValue::Int32(x >> shift),
                    // the uint32 view is taken by a following UInt32ToNumber
                    _ => JsValue::Int32(((x as u32) >> shift) as i32),
                }
            }
            NodeOp::CompareLess
            | NodeOp::CompareLessEq
            | NodeOp::CompareGreater
            | NodeOp::CompareGreaterEq
            | NodeOp::CompareEq
            | NodeOp::CompareStrictEq => {
                let (a, b) = (value(self, node.child1()), value(self, node.child2()));
                JsValue::Boolean(match node.op {
                    NodeOp::CompareLess => self.compare(Relation::Less, a, b),
                    NodeOp::CompareLessEq => self.compare(Relation::LessEq, a, b),
                    NodeOp::CompareGreater => self.compare(Relation::Greater, a, b),
                    NodeOp::CompareGreaterEq => self.compare(Relation::GreaterEq, a, b),
                    NodeOp::CompareEq => self.loose_equals(a, b),
                    _ => self.strict_equals(a, b),
                })
            }
            NodeOp::LogicalNot => {
                let v = value(self, node.child1());
                JsValue::Boolean(!self.to_boolean(v))
            }

            NodeOp::GetButterfly => JsValue::Undefined,
            NodeOp::GetByOffset { identifier, .. } => {
                let base = value(self, node.child2());
                self.get_property(base, *identifier)?
            }
            NodeOp::PutByOffset { identifier, .. } => {
                let (base, v) = (value(self, node.child2()), value(self, node.child3()));
                let address = base
                    .as_cell()
                    .ok_or_else(|| VmError::type_error("cannot store a property on a primitive"))?;
                self.put_property_direct(address, *identifier, v)?;
                return Ok(Step::Next);
            }
            NodeOp::GetById(name) => {
                let base = value(self, node.child1());
                self.get_property(base, *name)?
            }
            NodeOp::PutById(name) => {
                let (base, v) = (value(self, node.child1()), value(self, node.child2()));
                self.put_property(base, *name, v)?;
                return Ok(Step::Next);
            }
            NodeOp::PutByIdDirect(name) => {
                let (base, v) = (value(self, node.child1()), value(self, node.child2()));
                let address = base.as_cell().filter(|_| self.is_object(base)).ok_or_else(|| {
                    VmError::type_error(format!("cannot define a property on {}", self.type_name(base)))
                })?;
                self.put_property_direct(address, *name, v)?;
                return Ok(Step::Next);
            }
            NodeOp::GetByVal(_) => {
                let (base, key) = (value(self, node.child1()), value(self, node.child2()));
                self.get_by_value(base, key)?
            }
            NodeOp::PutByVal(_) => {
                let base = value(self, node.child1());
                let key = value(self, node.child2());
                let v = value(self, node.child3());
                self.put_by_value(base, key, v)?;
                return Ok(Step::Next);
            }
            NodeOp::GetArrayLength(_) => {
                let base = value(self, node.child1());
                match self.array_length(base) {
                    Some(length) => JsValue::number(length as f64),
                    None => self.get_property(base, self.names.length)?,
                }
            }
            NodeOp::StringCharCodeAt => {
                let (base, index) = (value(self, node.child1()), value(self, node.child2()));
                let unit = base
                    .as_cell()
                    .filter(|_| self.is_string(base))
                    .zip(index.as_number().filter(|i| *i >= 0.0 && i.fract() == 0.0))
                    .and_then(|(address, i)| self.char_code_at(address, u32::try_from(i as u64).ok()?));
                match unit {
                    Some(unit) => JsValue::Int32(i32::from(unit)),
                    None => JsValue::Double(f64::NAN),
                }
            }
            NodeOp::GetGlobalVar(global) => self.global(*global).unwrap_or(JsValue::Undefined),
            NodeOp::PutGlobalVar(global) => {
                let v = value(self, node.child1());
                self.set_global(*global, v)?;
                return Ok(Step::Next);
            }

            NodeOp::NewObject(structure) => JsValue::Cell(self.new_object_with_structure(*structure)?),
            NodeOp::NewArray(array_type) => {
                let elements: Vec<JsValue> = node.children.iter().map(|edge| value(self, *edge)).collect();
                let shape = IndexingShape::for_array_type(*array_type).unwrap_or(IndexingShape::None);
                JsValue::Cell(self.new_array_with_shape(shape, &elements)?)
            }
            NodeOp::CreateThis => {
                let callee = self.slot_value(fp + CALLEE_SLOT as usize);
                let this = self.create_this(callee)?;
                self.set_slot_value(operand_slot(Operand::Argument(0)), this);
                this
            }
            NodeOp::CreateArguments => self.create_arguments(fp)?,
            NodeOp::Call | NodeOp::Construct => {
                let callee_fp = fp + layout.register_count() as usize;
                let call_type = if matches!(node.op, NodeOp::Call) {
                    CallType::Call
                } else {
                    CallType::Construct
                };
                let first = match call_type {
                    CallType::Call => callee_fp + THIS_SLOT as usize,
                    CallType::Construct => {
                        self.set_slot_value(callee_fp + THIS_SLOT as usize, JsValue::Empty);
                        callee_fp + THIS_SLOT as usize + 1
                    }
                };
                let callee = value(self, node.child1());
                self.set_slot_value(callee_fp + CALLEE_SLOT as usize, callee);
                let rest = &node.children[1..];
                for (i, edge) in rest.iter().enumerate() {
                    let v = value(self, *edge);
                    self.set_slot_value(first + i, v);
                }
                let argument_count = (first - (callee_fp + THIS_SLOT as usize)) + rest.len();
                self.register_file
                    .set(callee_fp + ARGUMENT_COUNT_SLOT as usize, argument_count as u64);
                let result = self.call_frame(callee_fp, call_type)?;
                match call_type {
                    CallType::Call => result,
                    CallType::Construct => self.construct_result(callee_fp, result),
                }
            }

            NodeOp::Jump(target) => return Ok(Step::Jump(*target)),
            NodeOp::Branch { taken, not_taken } => {
                let condition = value(self, node.child1());
                let target = if self.to_boolean(condition) { taken } else { not_taken };
                return Ok(Step::Jump(*target));
            }
            NodeOp::Return => return Ok(Step::Return(value(self, node.child1()))),
        };

        if let Some(vreg) = node.virtual_register {
            self.set_slot_value(fp + layout.vreg_slot(vreg) as usize, result);
        }
        Ok(Step::Next)
    }

    fn arith(
        &self,
        a: Edge,
        b: Edge,
        op: Arith,
        mode: ArithMode,
        value: impl Fn(&Self, Edge) -> JsValue,
    ) -> JsValue {
        match (value(self, a), value(self, b)) {
            (JsValue::Int32(x), JsValue::Int32(y)) if a.use_kind.is_int32() && b.use_kind.is_int32() => {
                int32_arith(op, x, y, mode)
            }
            (x, y) => JsValue::number(double_arith(op, self.to_number(x), self.to_number(y))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_arith_follows_the_mode() {
        assert_eq!(
            int32_arith(Arith::Add, i32::MAX, 1, ArithMode::Unchecked),
            JsValue::Int32(i32::MIN)
        );
        assert_eq!(
            int32_arith(Arith::Add, i32::MAX, 1, ArithMode::CheckOverflow),
            JsValue::Double(2147483648.0)
        );
        assert_eq!(
            int32_arith(Arith::Mul, 0, -3, ArithMode::CheckOverflow),
            JsValue::Int32(0)
        );
        assert!(matches!(
            int32_arith(Arith::Mul, 0, -3, ArithMode::CheckOverflowAndNegativeZero),
            JsValue::Double(d) if d == 0.0 && d.is_sign_negative()
        ));
        assert_eq!(
            int32_arith(Arith::Div, 7, 2, ArithMode::CheckOverflow),
            JsValue::Double(3.5)
        );
        assert_eq!(int32_arith(Arith::Div, 7, 0, ArithMode::Unchecked), JsValue::Int32(0));
        assert!(matches!(
            int32_arith(Arith::Mod, 7, 0, ArithMode::CheckOverflow),
            JsValue::Double(d) if d.is_nan()
        ));
        assert_eq!(int32_arith(Arith::Mod, -7, 2, ArithMode::CheckOverflow), JsValue::Int32(-1));
    }
}
