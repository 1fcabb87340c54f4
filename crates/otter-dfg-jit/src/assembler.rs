//! Thin macro-assembler over a Cranelift `FunctionBuilder`
//!
//! Code is emitted as one linear stream: a conditional branch produces a
//! [`Jump`] whose target is bound later with [`MacroAssembler::link`], and
//! execution falls through into a fresh block. Machine registers are
//! Cranelift variables, so a value's register survives across branches and
//! calls without explicit moves.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{
    AbiParam, Block, FuncRef, InstBuilder, MemFlags, SigRef, Signature, TrapCode, Value, types,
};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, Variable};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::layout::{FrameLayout, context};
use crate::registers::{FPR_COUNT, Fpr, GPR_COUNT, Gpr};

/// Trap raised by code that is unreachable by construction.
pub const UNREACHABLE_TRAP: u8 = 1;

/// A pending branch; must be linked exactly once.
#[must_use = "an unlinked jump traps at run time"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jump(Block);

/// A code position jumps can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(Block);

impl Label {
    /// The Cranelift block starting at this label.
    pub fn block(self) -> Block {
        self.0
    }
}

/// Several jumps bound to the same target.
#[derive(Debug, Clone, Default)]
pub struct JumpList(SmallVec<[Jump; 2]>);

impl JumpList {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a jump.
    pub fn push(&mut self, jump: Jump) {
        self.0.push(jump);
    }

    /// Move every jump of `other` into this list.
    pub fn append(&mut self, other: JumpList) {
        self.0.extend(other.0);
    }

    /// Whether no jump was added.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Link every jump to `label`.
    pub fn link(self, asm: &mut MacroAssembler<'_>, label: Label) {
        for jump in self.0 {
            asm.link(jump, label);
        }
    }

    /// Link every jump to the current position.
    pub fn link_here(self, asm: &mut MacroAssembler<'_>) {
        let label = asm.label();
        self.link(asm, label);
    }
}

impl From<Jump> for JumpList {
    fn from(jump: Jump) -> Self {
        let mut list = Self::new();
        list.push(jump);
        list
    }
}

/// Emission state for one compiled function.
pub struct MacroAssembler<'a> {
    /// Underlying Cranelift builder.
    pub builder: FunctionBuilder<'a>,
    call_conv: CallConv,
    gprs: [Variable; GPR_COUNT],
    fprs: [Variable; FPR_COUNT],
    ctx: Value,
    fp: Value,
    heap_base: Value,
    filled: bool,
    jumps: Vec<Block>,
    links: FxHashMap<Block, Block>,
    exception_block: Block,
}

impl<'a> MacroAssembler<'a> {
    /// Start emitting a `(ctx, fp) -> word` function.
    pub fn new(mut builder: FunctionBuilder<'a>, call_conv: CallConv) -> Self {
        let gprs = std::array::from_fn(|_| builder.declare_var(types::I64));
        let fprs = std::array::from_fn(|_| builder.declare_var(types::F64));

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        let params = builder.block_params(entry);
        let (ctx, fp) = (params[0], params[1]);
        let heap_base = builder
            .ins()
            .load(types::I64, MemFlags::trusted(), ctx, context::HEAP_BASE);
        let exception_block = builder.create_block();

        Self {
            builder,
            call_conv,
            gprs,
            fprs,
            ctx,
            fp,
            heap_base,
            filled: false,
            jumps: Vec::new(),
            links: FxHashMap::default(),
            exception_block,
        }
    }

    /// Signature of compiled functions: `(ctx, fp) -> word`.
    pub fn function_signature(call_conv: CallConv) -> Signature {
        let mut signature = Signature::new(call_conv);
        signature.params.push(AbiParam::new(types::I64));
        signature.params.push(AbiParam::new(types::I64));
        signature.returns.push(AbiParam::new(types::I64));
        signature
    }

    /// Execution context pointer.
    pub fn ctx(&self) -> Value {
        self.ctx
    }

    /// Frame pointer.
    pub fn fp(&self) -> Value {
        self.fp
    }

    /// Heap arena base, loaded once at entry.
    pub fn heap_base(&self) -> Value {
        self.heap_base
    }

    /// Calling convention of the target.
    pub fn call_conv(&self) -> CallConv {
        self.call_conv
    }

    // -- registers ------------------------------------------------------------

    /// Current contents of a general-purpose register.
    pub fn gpr(&mut self, gpr: Gpr) -> Value {
        self.builder.use_var(self.gprs[gpr.0 as usize])
    }

    /// Write a general-purpose register.
    pub fn set_gpr(&mut self, gpr: Gpr, value: Value) {
        self.builder.def_var(self.gprs[gpr.0 as usize], value);
    }

    /// Current contents of a floating-point register.
    pub fn fpr(&mut self, fpr: Fpr) -> Value {
        self.builder.use_var(self.fprs[fpr.0 as usize])
    }

    /// Write a floating-point register.
    pub fn set_fpr(&mut self, fpr: Fpr, value: Value) {
        self.builder.def_var(self.fprs[fpr.0 as usize], value);
    }

    // -- constants and memory -------------------------------------------------

    /// 64-bit integer constant.
    pub fn iconst(&mut self, value: i64) -> Value {
        self.builder.ins().iconst(types::I64, value)
    }

    /// Double constant.
    pub fn f64const(&mut self, value: f64) -> Value {
        self.builder.ins().f64const(value)
    }

    /// Load a 64-bit word.
    pub fn load_i64(&mut self, base: Value, offset: i32) -> Value {
        self.builder
            .ins()
            .load(types::I64, MemFlags::trusted(), base, offset)
    }

    /// Store a 64-bit word.
    pub fn store_i64(&mut self, value: Value, base: Value, offset: i32) {
        self.builder
            .ins()
            .store(MemFlags::trusted(), value, base, offset);
    }

    /// Load a zero-extended `u32`.
    pub fn load_u32(&mut self, base: Value, offset: i32) -> Value {
        self.builder
            .ins()
            .uload32(MemFlags::trusted(), base, offset)
    }

    /// Store the low 32 bits of an `I64`.
    pub fn store_u32(&mut self, value: Value, base: Value, offset: i32) {
        self.builder
            .ins()
            .istore32(MemFlags::trusted(), value, base, offset);
    }

    /// Load a zero-extended byte.
    pub fn load_u8(&mut self, base: Value, offset: i32) -> Value {
        self.builder
            .ins()
            .uload8(types::I64, MemFlags::trusted(), base, offset)
    }

    /// Store the low byte of an `I64`.
    pub fn store_u8(&mut self, value: Value, base: Value, offset: i32) {
        self.builder
            .ins()
            .istore8(MemFlags::trusted(), value, base, offset);
    }

    /// Load a double.
    pub fn load_f64(&mut self, base: Value, offset: i32) -> Value {
        self.builder
            .ins()
            .load(types::F64, MemFlags::trusted(), base, offset)
    }

    /// Store a double.
    pub fn store_f64(&mut self, value: Value, base: Value, offset: i32) {
        self.builder
            .ins()
            .store(MemFlags::trusted(), value, base, offset);
    }

    /// Word from the execution context.
    pub fn load_context(&mut self, offset: i32) -> Value {
        self.load_i64(self.ctx, offset)
    }

    /// Address of a frame slot.
    pub fn slot_address(&mut self, slot: u32) -> Value {
        self.builder
            .ins()
            .iadd_imm(self.fp, i64::from(FrameLayout::slot_offset(slot)))
    }

    /// Load a frame slot.
    pub fn load_slot(&mut self, slot: u32) -> Value {
        self.load_i64(self.fp, FrameLayout::slot_offset(slot))
    }

    /// Store a frame slot.
    pub fn store_slot(&mut self, value: Value, slot: u32) {
        self.store_i64(value, self.fp, FrameLayout::slot_offset(slot));
    }

    /// `base + index * scale + offset` for a zero-extended 32-bit index.
    pub fn indexed_address(&mut self, base: Value, index: Value, scale: u8, offset: i32) -> Value {
        let index = self.builder.ins().band_imm(index, 0xFFFF_FFFF);
        let scaled = match scale {
            1 => index,
            _ => self.builder.ins().imul_imm(index, i64::from(scale)),
        };
        let address = self.builder.ins().iadd(base, scaled);
        if offset == 0 {
            address
        } else {
            self.builder.ins().iadd_imm(address, i64::from(offset))
        }
    }

    // -- control flow ---------------------------------------------------------

    fn new_jump(&mut self) -> Block {
        let block = self.builder.create_block();
        self.jumps.push(block);
        block
    }

    fn enter(&mut self, block: Block) {
        self.builder.switch_to_block(block);
        self.filled = false;
    }

    /// Branch when `condition` is non-zero; otherwise fall through.
    pub fn branch(&mut self, condition: Value) -> Jump {
        let taken = self.new_jump();
        let next = self.builder.create_block();
        self.builder.ins().brif(condition, taken, &[], next, &[]);
        self.enter(next);
        Jump(taken)
    }

    /// Branch when `condition` is zero; otherwise fall through.
    pub fn branch_not(&mut self, condition: Value) -> Jump {
        let taken = self.new_jump();
        let next = self.builder.create_block();
        self.builder.ins().brif(condition, next, &[], taken, &[]);
        self.enter(next);
        Jump(taken)
    }

    /// Branch on an integer comparison.
    pub fn branch_icmp(&mut self, cc: IntCC, a: Value, b: Value) -> Jump {
        let condition = self.builder.ins().icmp(cc, a, b);
        self.branch(condition)
    }

    /// Branch on an integer comparison with an immediate.
    pub fn branch_icmp_imm(&mut self, cc: IntCC, a: Value, imm: i64) -> Jump {
        let condition = self.builder.ins().icmp_imm(cc, a, imm);
        self.branch(condition)
    }

    /// Branch on a float comparison.
    pub fn branch_fcmp(&mut self, cc: FloatCC, a: Value, b: Value) -> Jump {
        let condition = self.builder.ins().fcmp(cc, a, b);
        self.branch(condition)
    }

    /// Unconditional jump; following code is unreachable until a label.
    pub fn jump(&mut self) -> Jump {
        let taken = self.new_jump();
        self.builder.ins().jump(taken, &[]);
        self.filled = true;
        let dead = self.builder.create_block();
        self.enter(dead);
        Jump(taken)
    }

    /// Unconditional jump to an existing label.
    pub fn jump_to(&mut self, label: Label) {
        let jump = self.jump();
        self.link(jump, label);
    }

    /// Bind a label at the current position, falling through into it.
    pub fn label(&mut self) -> Label {
        let block = self.builder.create_block();
        if !self.filled {
            self.builder.ins().jump(block, &[]);
        }
        self.enter(block);
        Label(block)
    }

    /// A label for code emitted later with [`MacroAssembler::bind`].
    pub fn forward_label(&mut self) -> Label {
        Label(self.builder.create_block())
    }

    /// Continue emission at a forward label. Falls through into it.
    pub fn bind(&mut self, label: Label) {
        if !self.filled {
            self.builder.ins().jump(label.0, &[]);
        }
        self.enter(label.0);
    }

    /// Start emitting at an unreachable position (out-of-line code).
    pub fn begin_out_of_line(&mut self) -> Label {
        self.terminate_unreachable();
        let block = self.builder.create_block();
        self.enter(block);
        Label(block)
    }

    /// Bind `jump` to `label`.
    pub fn link(&mut self, jump: Jump, label: Label) {
        self.links.insert(jump.0, label.0);
    }

    /// Bind `jump` to the current position.
    pub fn link_here(&mut self, jump: Jump) {
        let label = self.label();
        self.link(jump, label);
    }

    /// Bind `jump` to the shared exception exit.
    pub fn link_exception(&mut self, jump: Jump) {
        self.links.insert(jump.0, self.exception_block);
    }

    /// Whether the current block already ends in a terminator.
    pub fn is_filled(&self) -> bool {
        self.filled
    }

    /// End the current block with a trap if control could fall off its end.
    pub fn terminate_unreachable(&mut self) {
        if !self.filled {
            self.builder
                .ins()
                .trap(TrapCode::unwrap_user(UNREACHABLE_TRAP));
            self.filled = true;
        }
    }

    /// Return a word.
    pub fn ret(&mut self, value: Value) {
        self.builder.ins().return_(&[value]);
        self.filled = true;
    }

    // -- calls ----------------------------------------------------------------

    /// Call an imported helper; returns its single result.
    pub fn call(&mut self, func: FuncRef, args: &[Value]) -> Value {
        let inst = self.builder.ins().call(func, args);
        self.builder.inst_results(inst)[0]
    }

    /// Import a signature for indirect calls.
    pub fn import_signature(&mut self, signature: Signature) -> SigRef {
        self.builder.import_signature(signature)
    }

    /// Call through a code pointer; returns its single result.
    pub fn call_indirect(&mut self, signature: SigRef, callee: Value, args: &[Value]) -> Value {
        let inst = self.builder.ins().call_indirect(signature, callee, args);
        self.builder.inst_results(inst)[0]
    }

    /// Branch to the exception exit when a helper left an exception pending.
    pub fn exception_check(&mut self) {
        let pending = self.load_context(context::EXCEPTION_PENDING);
        let jump = self.branch_icmp_imm(IntCC::NotEqual, pending, 0);
        self.link_exception(jump);
    }

    // -- finalization ---------------------------------------------------------

    /// Emit the exception exit and bind every pending jump, then finish the function.
    ///
    /// Jumps that were never linked become traps.
    pub fn finalize(mut self, exception_result: u64) {
        self.terminate_unreachable();

        self.enter(self.exception_block);
        let result = self.iconst(exception_result as i64);
        self.ret(result);

        for block in std::mem::take(&mut self.jumps) {
            self.enter(block);
            match self.links.get(&block).copied() {
                Some(target) => {
                    self.builder.ins().jump(target, &[]);
                    self.filled = true;
                }
                None => self.terminate_unreachable(),
            }
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
    }
}
