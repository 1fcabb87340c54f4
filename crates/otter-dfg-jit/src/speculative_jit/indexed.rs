//! Indexed access: arrays, strings, arguments objects and typed arrays
//!
//! Every register a handler needs is allocated before its first branch into
//! a slow path or around a store, so eviction spills execute on all paths.

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value, types};
use otter_dfg_graph::{
    ArrayMode, ArrayType, Edge, Node, TypedArrayDescriptor, TypedArrayKind, UseKind,
};

use super::SpeculativeJit;
use super::slow_path::{SlowPathArg, SlowPathResult};
use crate::assembler::{Jump, JumpList};
use crate::config::SlowPutHoleWrites;
use crate::encoding::ValueRepresentation;
use crate::error::Result;
use crate::generation_info::DataFormat;
use crate::layout::{arguments, array_storage, butterfly, cell, context, object, string, typed_array};
use crate::osr_exit::ExitKind;
use crate::platform::Platform;
use crate::registers::{Gpr, JsRegs};
use crate::runtime_helpers::HelperKind;
use crate::watchpoint::WatchedFact;

/// An element value in the representation its storage wants.
#[derive(Clone, Copy)]
enum Element<B> {
    /// Sign-extended int32 in an `I64`.
    Int32(Value),
    Double(Value),
    Boxed(B),
}

impl<R: ValueRepresentation, P: Platform> SpeculativeJit<'_, '_, R, P> {
    fn index_operand(&mut self, edge: Edge) -> Result<Value> {
        let edge = if edge.use_kind.is_int32() {
            edge
        } else {
            Edge::int32(edge.node)
        };
        let gpr = self.fill_speculate_int32(edge)?;
        Ok(self.asm.gpr(gpr))
    }

    fn cell_word(&mut self, pointer: Value) -> Value {
        let boxed = R::box_cell(&mut self.asm, pointer);
        R::to_word(&mut self.asm, boxed)
    }

    fn set_element(&mut self, regs: JsRegs, element: Element<R::Boxed>) {
        let boxed = match element {
            Element::Int32(value) => {
                let narrow = self.asm.builder.ins().ireduce(types::I32, value);
                R::box_int32(&mut self.asm, narrow)
            }
            Element::Double(value) => R::box_double(&mut self.asm, value),
            Element::Boxed(boxed) => boxed,
        };
        R::regs_set(&mut self.asm, regs, boxed);
    }

    fn store_element(&mut self, address: Value, element: Element<R::Boxed>) {
        match element {
            Element::Int32(value) => {
                let narrow = self.asm.builder.ins().ireduce(types::I32, value);
                let boxed = R::box_int32(&mut self.asm, narrow);
                R::store(&mut self.asm, boxed, address, 0);
            }
            Element::Double(value) => self.asm.store_f64(value, address, 0),
            Element::Boxed(boxed) => R::store(&mut self.asm, boxed, address, 0),
        }
    }

    /// Taken when the cell is some object's prototype.
    fn prototype_check(&mut self, base: Value) -> Jump {
        let flags = self.asm.load_u8(base, cell::FLAGS);
        let bit = self
            .asm
            .builder
            .ins()
            .band_imm(flags, i64::from(cell::FLAG_PROTOTYPE));
        self.asm.branch_icmp_imm(IntCC::NotEqual, bit, 0)
    }

    fn check_arguments_not_overridden(&mut self, base: Value) {
        let overridden = self.asm.load_u8(base, arguments::OVERRIDDEN);
        let jump = self.asm.branch_icmp_imm(IntCC::NotEqual, overridden, 0);
        self.speculation_check(ExitKind::BadIndexingType, jump);
    }

    fn bounds_failure(&mut self, jump: Jump, slow: &mut JumpList, mode: ArrayMode, kind: ExitKind) {
        if mode.is_out_of_bounds() {
            slow.push(jump);
        } else {
            self.speculation_check(kind, jump);
        }
    }

    /// Load the UTF-16 unit at `index` into `character`.
    fn load_character(&mut self, string_cell: Value, index: Value, character: Gpr) {
        let flags = self.asm.load_u32(string_cell, string::FLAGS);
        let characters = self.asm.load_i64(string_cell, string::CHARACTERS);
        let eight_bit = self
            .asm
            .builder
            .ins()
            .band_imm(flags, i64::from(string::FLAG_8BIT));
        let wide = self.asm.branch_icmp_imm(IntCC::Equal, eight_bit, 0);
        let address = self.asm.indexed_address(characters, index, 1, 0);
        let narrow = self
            .asm
            .builder
            .ins()
            .uload8(types::I64, MemFlags::trusted(), address, 0);
        self.asm.set_gpr(character, narrow);
        let done = self.asm.jump();

        self.asm.link_here(wide);
        let address = self.asm.indexed_address(characters, index, 2, 0);
        let unit = self
            .asm
            .builder
            .ins()
            .uload16(types::I64, MemFlags::trusted(), address, 0);
        self.asm.set_gpr(character, unit);
        self.asm.link_here(done);
    }

    // -- reads ----------------------------------------------------------------

    pub(super) fn compile_get_by_val(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        match mode.array_type {
            ArrayType::Generic => self.get_by_val_generic(node),
            ArrayType::Int32
            | ArrayType::Double
            | ArrayType::Contiguous
            | ArrayType::ArrayStorage
            | ArrayType::SlowPutArrayStorage => self.get_by_val_butterfly(node, mode),
            ArrayType::String => self.get_by_val_string(node, mode),
            ArrayType::Arguments => self.get_by_val_arguments(node, mode),
            _ => self.get_by_val_typed_array(node, mode),
        }
    }

    fn get_by_val_generic(&mut self, node: &Node) -> Result<()> {
        let base = self.boxed_word(node.child1())?;
        let index = self.boxed_word(node.child2())?;
        let ctx = self.asm.ctx();
        let word = self.call_operation(HelperKind::GetByVal, &[ctx, base, index])?;
        self.js_word_result(word, DataFormat::Js)
    }

    fn get_by_val_butterfly(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let holes_are_undefined = mode.is_sane_chain()
            && !mode.is_array_storage()
            && self.config.use_watchpoints
            && self.oracle.is_array_chain_sane();
        let unboxed_double = mode.array_type == ArrayType::Double
            && mode.is_in_bounds()
            && !holes_are_undefined;
        let regs = if unboxed_double {
            None
        } else {
            Some(self.allocate_js_regs()?)
        };
        if holes_are_undefined {
            self.watch(WatchedFact::SaneArrayChain);
        }

        let base = self.asm.gpr(base_gpr);
        let base_word = self.cell_word(base);
        let storage = self.asm.load_i64(base, object::BUTTERFLY);
        // Slots between the public length and the capacity are holes, so only
        // indices past the capacity are out of bounds.
        let capacity = self.asm.load_u32(storage, butterfly::VECTOR_LENGTH);
        let address = if mode.is_array_storage() {
            self.asm
                .indexed_address(storage, index, 8, array_storage::VECTOR)
        } else {
            self.asm.indexed_address(storage, index, 8, 0)
        };

        let mut slow = JumpList::new();
        let out_of_bounds = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, capacity);
        self.bounds_failure(out_of_bounds, &mut slow, mode, ExitKind::OutOfBounds);

        let Some(regs) = regs else {
            let value = self.asm.load_f64(address, 0);
            let hole = self.asm.branch_fcmp(FloatCC::Unordered, value, value);
            self.speculation_check(ExitKind::LoadFromHole, hole);
            return self.double_result(value);
        };

        // Double storage marks holes with NaN; stores never write one.
        let (is_hole, element) = if mode.array_type == ArrayType::Double {
            let value = self.asm.load_f64(address, 0);
            let hole = self
                .asm
                .builder
                .ins()
                .fcmp(FloatCC::Unordered, value, value);
            (hole, Element::Double(value))
        } else {
            let boxed = R::load(&mut self.asm, address, 0);
            (R::is_empty(&mut self.asm, boxed), Element::Boxed(boxed))
        };
        let hole = self.asm.branch(is_hole);
        if holes_are_undefined {
            self.set_element(regs, element);
            let done = self.asm.jump();
            self.asm.link_here(hole);
            let undefined = R::constant(&mut self.asm, R::UNDEFINED);
            R::regs_set(&mut self.asm, regs, undefined);
            self.asm.link_here(done);
        } else {
            self.bounds_failure(hole, &mut slow, mode, ExitKind::LoadFromHole);
            self.set_element(regs, element);
        }

        self.add_slow_path(
            slow,
            HelperKind::GetByVal,
            &[
                SlowPathArg::Context,
                SlowPathArg::Word(base_word),
                SlowPathArg::BoxedInt32(index),
            ],
            SlowPathResult::Js(regs),
        )?;
        let format = match mode.array_type {
            ArrayType::Int32 if mode.is_in_bounds() && !holes_are_undefined => {
                DataFormat::JsInteger
            }
            _ => DataFormat::Js,
        };
        self.js_result(regs, format)
    }

    fn get_by_val_string(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let regs = self.allocate_js_regs()?;
        let zero = self.asm.iconst(0);
        let character = self.temporary_gpr(zero)?;

        let base = self.asm.gpr(base_gpr);
        let base_word = self.cell_word(base);
        let length = self.asm.load_u32(base, string::LENGTH);
        let mut slow = JumpList::new();
        let out_of_bounds = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, length);
        self.bounds_failure(out_of_bounds, &mut slow, mode, ExitKind::OutOfBounds);

        self.load_character(base, index, character);
        let unit = self.asm.gpr(character);
        // Only Latin-1 units have preallocated single-character strings.
        slow.push(
            self.asm
                .branch_icmp_imm(IntCC::UnsignedGreaterThanOrEqual, unit, 0x100),
        );
        let table = self.asm.load_context(context::SINGLE_CHARACTER_STRINGS);
        let entry = self.asm.indexed_address(table, unit, 8, 0);
        let pointer = self.asm.load_i64(entry, 0);
        let boxed = R::box_cell(&mut self.asm, pointer);
        R::regs_set(&mut self.asm, regs, boxed);

        self.add_slow_path(
            slow,
            HelperKind::GetByVal,
            &[
                SlowPathArg::Context,
                SlowPathArg::Word(base_word),
                SlowPathArg::BoxedInt32(index),
            ],
            SlowPathResult::Js(regs),
        )?;
        let format = if mode.is_out_of_bounds() {
            DataFormat::Js
        } else {
            DataFormat::JsCell
        };
        self.js_result(regs, format)
    }

    fn get_by_val_arguments(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let regs = self.allocate_js_regs()?;

        let base = self.asm.gpr(base_gpr);
        let base_word = self.cell_word(base);
        self.check_arguments_not_overridden(base);
        let length = self.asm.load_u32(base, arguments::LENGTH);
        let mut slow = JumpList::new();
        let out_of_bounds = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, length);
        self.bounds_failure(out_of_bounds, &mut slow, mode, ExitKind::OutOfBounds);

        let registers = self.asm.load_i64(base, arguments::REGISTERS);
        let address = self.asm.indexed_address(registers, index, 8, 0);
        let value = R::load(&mut self.asm, address, 0);
        R::regs_set(&mut self.asm, regs, value);

        self.add_slow_path(
            slow,
            HelperKind::GetByVal,
            &[
                SlowPathArg::Context,
                SlowPathArg::Word(base_word),
                SlowPathArg::BoxedInt32(index),
            ],
            SlowPathResult::Js(regs),
        )?;
        self.js_result(regs, DataFormat::Js)
    }

    fn load_typed_element(&mut self, address: Value, descriptor: TypedArrayDescriptor) -> Element<R::Boxed> {
        let flags = MemFlags::trusted();
        match (descriptor.kind, descriptor.element_size) {
            (TypedArrayKind::Float, 4) => {
                let single = self
                    .asm
                    .builder
                    .ins()
                    .load(types::F32, flags, address, 0);
                Element::Double(self.asm.builder.ins().fpromote(types::F64, single))
            }
            (TypedArrayKind::Float, _) => Element::Double(self.asm.load_f64(address, 0)),
            (TypedArrayKind::Signed, 1) => {
                Element::Int32(self.asm.builder.ins().sload8(types::I64, flags, address, 0))
            }
            (TypedArrayKind::Signed, 2) => {
                Element::Int32(self.asm.builder.ins().sload16(types::I64, flags, address, 0))
            }
            (TypedArrayKind::Signed, _) => {
                Element::Int32(self.asm.builder.ins().sload32(flags, address, 0))
            }
            (TypedArrayKind::Unsigned, 1) => Element::Int32(self.asm.load_u8(address, 0)),
            (TypedArrayKind::Unsigned, 2) => {
                Element::Int32(self.asm.builder.ins().uload16(types::I64, flags, address, 0))
            }
            (TypedArrayKind::Unsigned, _) => Element::Int32(self.asm.load_u32(address, 0)),
        }
    }

    fn get_by_val_typed_array(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        let descriptor = mode
            .typed_array_descriptor()
            .ok_or_else(|| self.unsupported(node, "array type has no element layout"))?;
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let is_uint32 = descriptor.kind == TypedArrayKind::Unsigned && descriptor.element_size == 4;
        let regs = if mode.is_out_of_bounds() {
            Some(self.allocate_js_regs()?)
        } else {
            None
        };

        let base = self.asm.gpr(base_gpr);
        let length = self.asm.load_u32(base, typed_array::LENGTH);
        let out_of_bounds = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, length);
        if regs.is_none() {
            self.speculation_check(ExitKind::OutOfBounds, out_of_bounds);
        }
        let vector = self.asm.load_i64(base, typed_array::VECTOR);
        let address = self
            .asm
            .indexed_address(vector, index, descriptor.element_size, 0);
        let element = self.load_typed_element(address, descriptor);

        if let Some(regs) = regs {
            // Out-of-bounds reads are `undefined`; uint32 boxes as a double so it never wraps.
            let element = match element {
                Element::Int32(value) if is_uint32 => {
                    Element::Double(self.asm.builder.ins().fcvt_from_uint(types::F64, value))
                }
                other => other,
            };
            self.set_element(regs, element);
            let done = self.asm.jump();
            self.asm.link_here(out_of_bounds);
            let undefined = R::constant(&mut self.asm, R::UNDEFINED);
            R::regs_set(&mut self.asm, regs, undefined);
            self.asm.link_here(done);
            return self.js_result(regs, DataFormat::Js);
        }

        match element {
            Element::Int32(value) if is_uint32 => {
                let prediction = self.graph.node(self.current_node).prediction;
                if prediction.is_int32() {
                    let overflow = self.asm.branch_icmp_imm(
                        IntCC::UnsignedGreaterThan,
                        value,
                        i64::from(i32::MAX),
                    );
                    self.speculation_check(ExitKind::Overflow, overflow);
                    self.int32_result(value)
                } else {
                    let double = self.asm.builder.ins().fcvt_from_uint(types::F64, value);
                    self.double_result(double)
                }
            }
            Element::Int32(value) => self.int32_result(value),
            Element::Double(value) => self.double_result(value),
            Element::Boxed(boxed) => self.js_boxed_result(boxed, DataFormat::Js),
        }
    }

    pub(super) fn compile_get_array_length(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        if mode.array_type == ArrayType::Generic {
            return Err(self.unsupported(node, "length of an unspecialised base"));
        }
        let base_gpr = self.array_base(node.child1(), mode)?;
        let base = self.asm.gpr(base_gpr);
        let length = match mode.array_type {
            ArrayType::String => {
                let length = self.asm.load_u32(base, string::LENGTH);
                return self.int32_result(length);
            }
            ArrayType::Arguments => {
                self.check_arguments_not_overridden(base);
                self.asm.load_u32(base, arguments::LENGTH)
            }
            _ if mode.uses_butterfly() => {
                let storage = self.asm.load_i64(base, object::BUTTERFLY);
                self.asm.load_u32(storage, butterfly::PUBLIC_LENGTH)
            }
            _ => self.asm.load_u32(base, typed_array::LENGTH),
        };
        let too_long = self.asm.branch_icmp_imm(
            IntCC::UnsignedGreaterThan,
            length,
            i64::from(i32::MAX),
        );
        self.speculation_check(ExitKind::Uncountable, too_long);
        self.int32_result(length)
    }

    pub(super) fn compile_string_char_code_at(&mut self, node: &Node) -> Result<()> {
        let mode = ArrayMode::new(ArrayType::String);
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let zero = self.asm.iconst(0);
        let character = self.temporary_gpr(zero)?;

        let base = self.asm.gpr(base_gpr);
        let length = self.asm.load_u32(base, string::LENGTH);
        let out_of_bounds = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, length);
        self.speculation_check(ExitKind::OutOfBounds, out_of_bounds);
        self.load_character(base, index, character);
        self.gpr_result(character, DataFormat::Integer)
    }

    // -- writes ---------------------------------------------------------------

    pub(super) fn compile_put_by_val(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        match mode.array_type {
            ArrayType::Generic | ArrayType::String | ArrayType::Arguments => {
                self.put_by_val_generic(node)
            }
            ArrayType::Int32 | ArrayType::Double | ArrayType::Contiguous => {
                self.put_by_val_butterfly(node, mode)
            }
            ArrayType::ArrayStorage | ArrayType::SlowPutArrayStorage => {
                self.put_by_val_array_storage(node, mode)
            }
            _ => self.put_by_val_typed_array(node, mode),
        }
    }

    fn put_by_val_generic(&mut self, node: &Node) -> Result<()> {
        let base = self.boxed_word(node.child1())?;
        let index = self.boxed_word(node.child2())?;
        let value = self.boxed_word(node.child3())?;
        let ctx = self.asm.ctx();
        self.call_operation(HelperKind::PutByVal, &[ctx, base, index, value])?;
        Ok(())
    }

    /// Fill the stored value in the representation the storage shape wants.
    fn element_value(
        &mut self,
        edge: Edge,
        array_type: ArrayType,
    ) -> Result<(Element<R::Boxed>, SlowPathArg)> {
        Ok(match array_type {
            ArrayType::Int32 => {
                let edge = if edge.use_kind.is_int32() {
                    edge
                } else {
                    Edge::int32(edge.node)
                };
                let gpr = self.fill_speculate_int32(edge)?;
                let value = self.asm.gpr(gpr);
                (Element::Int32(value), SlowPathArg::BoxedInt32(value))
            }
            ArrayType::Double => {
                let fpr = self.fill_speculate_double(Edge::new(edge.node, UseKind::RealNumber))?;
                let value = self.asm.fpr(fpr);
                (Element::Double(value), SlowPathArg::BoxedDouble(value))
            }
            _ => {
                let boxed = self.boxed_value(edge)?;
                let word = R::to_word(&mut self.asm, boxed);
                (Element::Boxed(boxed), SlowPathArg::Word(word))
            }
        })
    }

    fn put_slow_paths(
        &mut self,
        generic: JumpList,
        beyond: JumpList,
        base_word: Value,
        index: Value,
        value: SlowPathArg,
    ) -> Result<()> {
        let args = [
            SlowPathArg::Context,
            SlowPathArg::Word(base_word),
            SlowPathArg::BoxedInt32(index),
            value,
        ];
        self.add_slow_path(generic, HelperKind::PutByVal, &args, SlowPathResult::None)?;
        self.add_slow_path(
            beyond,
            HelperKind::PutByValBeyondArrayBounds,
            &args,
            SlowPathResult::None,
        )
    }

    fn put_by_val_butterfly(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let value_edge = node.child3();
        let (element, value_arg) = self.element_value(value_edge, mode.array_type)?;

        let base = self.asm.gpr(base_gpr);
        let base_word = self.cell_word(base);
        let storage = self.asm.load_i64(base, object::BUTTERFLY);
        let length = self.asm.load_u32(storage, butterfly::PUBLIC_LENGTH);
        let address = self.asm.indexed_address(storage, index, 8, 0);
        let past_length = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, length);

        let mut generic = JumpList::new();
        let mut beyond = JumpList::new();
        if mode.may_store_to_hole() {
            self.store_element(address, element);
            let done = self.asm.jump();

            // Append within capacity; prototypes go generic so chain sanity is re-evaluated.
            self.asm.link_here(past_length);
            generic.push(self.prototype_check(base));
            let capacity = self.asm.load_u32(storage, butterfly::VECTOR_LENGTH);
            let over_capacity = self
                .asm
                .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, capacity);
            self.bounds_failure(over_capacity, &mut beyond, mode, ExitKind::OutOfBounds);
            let new_length = self.asm.builder.ins().iadd_imm(index, 1);
            self.asm.store_u32(new_length, storage, butterfly::PUBLIC_LENGTH);
            self.store_element(address, element);
            self.asm.link_here(done);
        } else {
            self.speculation_check(ExitKind::StoreToHoleOrOutOfBounds, past_length);
            self.store_element(address, element);
        }
        self.put_slow_paths(generic, beyond, base_word, index, value_arg)?;

        if let Element::Boxed(boxed) = element {
            self.write_barrier(base, boxed, value_edge.node);
        }
        Ok(())
    }

    fn put_by_val_array_storage(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let value_edge = node.child3();
        let (element, value_arg) = self.element_value(value_edge, ArrayType::Contiguous)?;

        let base = self.asm.gpr(base_gpr);
        let base_word = self.cell_word(base);
        let storage = self.asm.load_i64(base, object::BUTTERFLY);
        let mut generic = JumpList::new();
        let mut beyond = JumpList::new();

        let capacity = self.asm.load_u32(storage, butterfly::VECTOR_LENGTH);
        let over_capacity = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, capacity);
        let exit_kind = if mode.may_store_to_hole() {
            ExitKind::OutOfBounds
        } else {
            ExitKind::StoreToHoleOrOutOfBounds
        };
        self.bounds_failure(over_capacity, &mut beyond, mode, exit_kind);

        let address = self
            .asm
            .indexed_address(storage, index, 8, array_storage::VECTOR);
        let existing = R::load(&mut self.asm, address, 0);
        let is_hole = R::is_empty(&mut self.asm, existing);
        let hole = self.asm.branch(is_hole);
        self.store_element(address, element);

        if !mode.may_store_to_hole() {
            self.speculation_check(ExitKind::StoreToHole, hole);
        } else {
            let done = self.asm.jump();
            self.asm.link_here(hole);
            if mode.is_slow_put() && self.config.slow_put_hole_writes == SlowPutHoleWrites::SlowPath {
                generic.push(self.asm.jump());
            } else {
                generic.push(self.prototype_check(base));
                let count = self
                    .asm
                    .load_u32(storage, array_storage::NUM_VALUES_IN_VECTOR);
                let count = self.asm.builder.ins().iadd_imm(count, 1);
                self.asm
                    .store_u32(count, storage, array_storage::NUM_VALUES_IN_VECTOR);
                let length = self.asm.load_u32(storage, butterfly::PUBLIC_LENGTH);
                let grows = self.asm.builder.ins().icmp(
                    IntCC::UnsignedGreaterThanOrEqual,
                    index,
                    length,
                );
                let next = self.asm.builder.ins().iadd_imm(index, 1);
                let new_length = self.asm.builder.ins().select(grows, next, length);
                self.asm
                    .store_u32(new_length, storage, butterfly::PUBLIC_LENGTH);
                self.store_element(address, element);
            }
            self.asm.link_here(done);
        }
        self.put_slow_paths(generic, beyond, base_word, index, value_arg)?;

        if let Element::Boxed(boxed) = element {
            self.write_barrier(base, boxed, value_edge.node);
        }
        Ok(())
    }

    /// Clamp a sign-extended integer into `0..=255`.
    fn clamp_to_byte(&mut self, value: Value) -> Value {
        let zero = self.asm.iconst(0);
        let max = self.asm.iconst(255);
        let floor = self.asm.builder.ins().smax(value, zero);
        self.asm.builder.ins().smin(floor, max)
    }

    /// Integer to store into an integer typed array.
    fn typed_integer_value(&mut self, edge: Edge, descriptor: TypedArrayDescriptor) -> Result<Value> {
        if edge.use_kind.is_int32() {
            let gpr = self.fill_speculate_int32(edge)?;
            let value = self.asm.gpr(gpr);
            return Ok(if descriptor.clamped {
                self.clamp_to_byte(value)
            } else {
                value
            });
        }
        let edge = if edge.use_kind.is_double() {
            edge
        } else {
            Edge::number(edge.node)
        };
        let fpr = self.fill_speculate_double(edge)?;
        let double = self.asm.fpr(fpr);
        if !descriptor.clamped {
            let result = self.allocate_gpr()?;
            self.truncate_to_int32(double, result)?;
            return Ok(self.asm.gpr(result));
        }
        if P::HAS_FLOAT_ROUNDING {
            // Round half to even; NaN saturates to zero.
            let rounded = self.asm.builder.ins().nearest(double);
            let integer = self.asm.builder.ins().fcvt_to_sint_sat(types::I64, rounded);
            return Ok(self.clamp_to_byte(integer));
        }
        let ctx = self.asm.ctx();
        let bits = self
            .asm
            .builder
            .ins()
            .bitcast(types::I64, MemFlags::new(), double);
        self.call_operation(HelperKind::ClampDoubleToByte, &[ctx, bits])
    }

    fn put_by_val_typed_array(&mut self, node: &Node, mode: ArrayMode) -> Result<()> {
        let descriptor = mode
            .typed_array_descriptor()
            .ok_or_else(|| self.unsupported(node, "array type has no element layout"))?;
        let base_gpr = self.array_base(node.child1(), mode)?;
        let index = self.index_operand(node.child2())?;
        let value_edge = node.child3();
        let base = self.asm.gpr(base_gpr);

        // Convert first: a conversion may call out, and must not sit between the bounds branch and its merge.
        let value = if descriptor.kind == TypedArrayKind::Float {
            let double = if value_edge.use_kind.is_int32() {
                let gpr = self.fill_speculate_int32(value_edge)?;
                let integer = self.asm.gpr(gpr);
                self.asm.builder.ins().fcvt_from_sint(types::F64, integer)
            } else {
                let edge = if value_edge.use_kind.is_double() {
                    value_edge
                } else {
                    Edge::number(value_edge.node)
                };
                let fpr = self.fill_speculate_double(edge)?;
                self.asm.fpr(fpr)
            };
            if descriptor.element_size == 4 {
                self.asm.builder.ins().fdemote(types::F32, double)
            } else {
                double
            }
        } else {
            self.typed_integer_value(value_edge, descriptor)?
        };

        let length = self.asm.load_u32(base, typed_array::LENGTH);
        let out_of_bounds = self
            .asm
            .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, index, length);
        let mut skip = JumpList::new();
        if mode.is_out_of_bounds() || mode.may_store_to_hole() {
            // Out-of-bounds typed array writes are dropped.
            skip.push(out_of_bounds);
        } else {
            self.speculation_check(ExitKind::OutOfBounds, out_of_bounds);
        }
        let vector = self.asm.load_i64(base, typed_array::VECTOR);
        let address = self
            .asm
            .indexed_address(vector, index, descriptor.element_size, 0);
        let flags = MemFlags::trusted();
        match (descriptor.kind, descriptor.element_size) {
            (TypedArrayKind::Float, _) => {
                self.asm.builder.ins().store(flags, value, address, 0);
            }
            (_, 1) => self.asm.store_u8(value, address, 0),
            (_, 2) => {
                self.asm.builder.ins().istore16(flags, value, address, 0);
            }
            _ => self.asm.store_u32(value, address, 0),
        }
        skip.link_here(&mut self.asm);
        Ok(())
    }
}
