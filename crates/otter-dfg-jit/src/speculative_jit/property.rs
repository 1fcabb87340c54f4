//! Named property access, globals and allocation
//!
//! A cached access reads its expected structure, storage kind and byte
//! offset from the site's [`PropertyCacheEntry`]. A fresh entry holds
//! structure 0, which no cell carries, so the first execution always takes
//! the slow path and repatches the entry.

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{InstBuilder, MemFlags, Value};
use otter_dfg_graph::{
    ArrayType, Edge, Identifier, Node, NodeIndex, PropertyOffset, SpeculatedType, StructureId,
};

use super::SpeculativeJit;
use super::slow_path::{SlowPathArg, SlowPathResult};
use crate::assembler::JumpList;
use crate::encoding::ValueRepresentation;
use crate::error::{JitError, Result};
use crate::generation_info::DataFormat;
use crate::inline_cache::{AccessKind, InlineCacheRecord, PropertyCacheEntry, entry_offsets};
use crate::layout::{
    CALLEE_SLOT, CARD_SHIFT, GLOBAL_WATCHED, IndexingShape, PropertyStorage, SLOT_SIZE,
    THIS_SLOT, cell, context, object, property_location,
};
use crate::platform::Platform;
use crate::runtime_helpers::HelperKind;

/// Base of a named access: the cell pointer and the boxed word for the helper.
struct AccessBase {
    cell: Value,
    word: Value,
}

impl<R: ValueRepresentation, P: Platform> SpeculativeJit<'_, '_, R, P> {
    fn cache_entry(&self, node: &Node) -> Result<(u32, usize)> {
        let index = self
            .resources
            .plan
            .cache_index(self.current_node)
            .ok_or(JitError::UnsupportedNode {
                node: self.current_node,
                op: node.op.name(),
                reason: "access site was not numbered",
            })?;
        let entry: &PropertyCacheEntry = &self.resources.cache_entries[index as usize];
        Ok((index, entry as *const PropertyCacheEntry as usize))
    }

    /// Bit mask of general-purpose registers owned by live values.
    fn live_gpr_mask(&self) -> u32 {
        self.gprs
            .owned()
            .fold(0, |mask, (gpr, _)| mask | (1 << gpr.0))
    }

    /// Cell operand of a named access; non-cells join `slow`.
    fn access_base(&mut self, edge: Edge, slow: &mut JumpList) -> Result<AccessBase> {
        if edge.use_kind.is_cell() {
            let gpr = self.fill_speculate_cell(edge)?;
            let cell = self.asm.gpr(gpr);
            let boxed = R::box_cell(&mut self.asm, cell);
            let word = R::to_word(&mut self.asm, boxed);
            return Ok(AccessBase { cell, word });
        }
        self.speculate(edge)?;
        let regs = self.fill_js_value(edge.node)?;
        let boxed = R::regs_get(&mut self.asm, regs);
        let word = R::to_word(&mut self.asm, boxed);
        let is_cell = R::is_cell(&mut self.asm, boxed);
        slow.push(self.asm.branch_not(is_cell));
        let cell = R::unbox_cell(&mut self.asm, boxed);
        Ok(AccessBase { cell, word })
    }

    /// The one structure comparison of a cache site, then the slot address.
    fn cached_slot_address(&mut self, cell: Value, entry: Value, slow: &mut JumpList) -> Value {
        let expected = self.asm.load_u32(entry, entry_offsets::STRUCTURE_ID);
        let actual = self.asm.load_u32(cell, cell::STRUCTURE_ID);
        slow.push(self.asm.branch_icmp(IntCC::NotEqual, actual, expected));

        let kind = self.asm.load_u32(entry, entry_offsets::STORAGE_KIND);
        let offset = self
            .asm
            .builder
            .ins()
            .sload32(MemFlags::trusted(), entry, entry_offsets::BYTE_OFFSET);
        let butterfly = self.asm.load_i64(cell, object::BUTTERFLY);
        let base = self.asm.builder.ins().select(kind, butterfly, cell);
        self.asm.builder.ins().iadd(base, offset)
    }

    pub(super) fn compile_get_by_id(&mut self, node: &Node, identifier: Identifier) -> Result<()> {
        let (entry_index, entry_address) = self.cache_entry(node)?;
        // Registers are taken before the first branch so an eviction spill runs on every path.
        let regs = self.allocate_js_regs()?;
        let mut slow = JumpList::new();
        let base = self.access_base(node.child1(), &mut slow)?;
        let entry = self.asm.iconst(entry_address as i64);
        let address = self.cached_slot_address(base.cell, entry, &mut slow);

        let value = R::load(&mut self.asm, address, 0);
        R::regs_set(&mut self.asm, regs, value);

        let live_registers = self.live_gpr_mask();
        let slow_path = self.slow_paths.len() as u32;
        self.add_slow_path(
            slow,
            HelperKind::GetById,
            &[
                SlowPathArg::Context,
                SlowPathArg::Word(base.word),
                SlowPathArg::Imm(entry_address as i64),
            ],
            SlowPathResult::Js(regs),
        )?;
        self.inline_caches.push(InlineCacheRecord {
            node: self.current_node,
            kind: AccessKind::Get,
            identifier,
            entry_index,
            patch_address: entry_address,
            live_registers,
            registers_flushed: self.slow_path_is_flushed(slow_path),
            slow_path,
        });
        self.state.clobber_heap();
        self.js_result(regs, DataFormat::Js)
    }

    pub(super) fn compile_put_by_id(
        &mut self,
        node: &Node,
        identifier: Identifier,
        kind: AccessKind,
    ) -> Result<()> {
        let (entry_index, entry_address) = self.cache_entry(node)?;
        let value_edge = node.child2();
        let value = self.boxed_value(value_edge)?;
        let value_word = R::to_word(&mut self.asm, value);
        let mut slow = JumpList::new();
        let base = self.access_base(node.child1(), &mut slow)?;
        let entry = self.asm.iconst(entry_address as i64);
        let address = self.cached_slot_address(base.cell, entry, &mut slow);

        self.asm.store_i64(value_word, address, 0);
        let actual = self.asm.load_u32(base.cell, cell::STRUCTURE_ID);
        let transition = self.asm.load_u32(entry, entry_offsets::NEW_STRUCTURE_ID);
        let structure = self.asm.builder.ins().select(transition, transition, actual);
        self.asm.store_u32(structure, base.cell, cell::STRUCTURE_ID);
        self.write_barrier(base.cell, value, value_edge.node);

        let helper = match kind {
            AccessKind::PutDirect => HelperKind::PutByIdDirect,
            _ => HelperKind::PutById,
        };
        let live_registers = self.live_gpr_mask();
        let slow_path = self.slow_paths.len() as u32;
        self.add_slow_path(
            slow,
            helper,
            &[
                SlowPathArg::Context,
                SlowPathArg::Word(base.word),
                SlowPathArg::Word(value_word),
                SlowPathArg::Imm(entry_address as i64),
            ],
            SlowPathResult::None,
        )?;
        self.inline_caches.push(InlineCacheRecord {
            node: self.current_node,
            kind,
            identifier,
            entry_index,
            patch_address: entry_address,
            live_registers,
            registers_flushed: self.slow_path_is_flushed(slow_path),
            slow_path,
        });
        self.state.clobber_heap();
        Ok(())
    }

    /// Mark the owner's card when a cell is stored into it.
    pub(super) fn write_barrier(&mut self, owner: Value, value: R::Boxed, value_node: NodeIndex) {
        let proven = self.state.proven(value_node);
        if !proven.is_empty() && !proven.intersects(SpeculatedType::CELL) {
            return;
        }
        let mut skip = JumpList::new();
        let is_cell = R::is_cell(&mut self.asm, value);
        skip.push(self.asm.branch_not(is_cell));
        let heap_base = self.asm.heap_base();
        let relative = self.asm.builder.ins().isub(owner, heap_base);
        let card = self.asm.builder.ins().ushr_imm(relative, CARD_SHIFT);
        let card_count = self.asm.load_context(context::CARD_COUNT);
        skip.push(
            self.asm
                .branch_icmp(IntCC::UnsignedGreaterThanOrEqual, card, card_count),
        );
        let table = self.asm.load_context(context::CARD_TABLE);
        let address = self.asm.builder.ins().iadd(table, card);
        let dirty = self.asm.iconst(1);
        self.asm.store_u8(dirty, address, 0);
        skip.link_here(&mut self.asm);
    }

    // -- direct storage -------------------------------------------------------

    pub(super) fn compile_get_butterfly(&mut self, node: &Node) -> Result<()> {
        let gpr = self.fill_speculate_cell(node.child1())?;
        let cell = self.asm.gpr(gpr);
        let butterfly = self.asm.load_i64(cell, object::BUTTERFLY);
        self.storage_result(butterfly)
    }

    fn property_base(&mut self, node: &Node, storage: PropertyStorage) -> Result<Value> {
        let gpr = match storage {
            PropertyStorage::Inline => self.fill_speculate_cell(node.child2())?,
            PropertyStorage::OutOfLine => self.fill_storage(node.child1().node)?,
        };
        Ok(self.asm.gpr(gpr))
    }

    pub(super) fn compile_get_by_offset(&mut self, node: &Node, offset: PropertyOffset) -> Result<()> {
        let (storage, byte_offset) = property_location(offset);
        let base = self.property_base(node, storage)?;
        let value = R::load(&mut self.asm, base, byte_offset);
        let format = self.js_format_for(self.current_node);
        self.js_boxed_result(value, format)
    }

    pub(super) fn compile_put_by_offset(&mut self, node: &Node, offset: PropertyOffset) -> Result<()> {
        let (storage, byte_offset) = property_location(offset);
        let value_edge = node.child3();
        let value = self.boxed_value(value_edge)?;
        let base = self.property_base(node, storage)?;
        let owner = match storage {
            PropertyStorage::Inline => base,
            PropertyStorage::OutOfLine => {
                let gpr = self.fill_speculate_cell(node.child2())?;
                self.asm.gpr(gpr)
            }
        };
        R::store(&mut self.asm, value, base, byte_offset);
        self.write_barrier(owner, value, value_edge.node);
        Ok(())
    }

    // -- globals --------------------------------------------------------------

    pub(super) fn compile_get_global_var(&mut self, index: u32) -> Result<()> {
        let globals = self.asm.load_context(context::GLOBALS);
        let word = self.asm.load_i64(globals, index as i32 * SLOT_SIZE);
        let format = self.js_format_for(self.current_node);
        self.js_word_result(word, format)
    }

    pub(super) fn compile_put_global_var(&mut self, node: &Node, index: u32) -> Result<()> {
        let word = self.boxed_word(node.child1())?;
        let globals = self.asm.load_context(context::GLOBALS);
        self.asm.store_i64(word, globals, index as i32 * SLOT_SIZE);

        // A watched global must invalidate the units that assumed it constant.
        let states = self.asm.load_context(context::GLOBAL_WATCH_STATES);
        let state = self.asm.load_u8(states, index as i32);
        let watched = self
            .asm
            .branch_icmp_imm(IntCC::Equal, state, i64::from(GLOBAL_WATCHED));
        self.add_slow_path(
            watched.into(),
            HelperKind::NotifyGlobalWrite,
            &[SlowPathArg::Context, SlowPathArg::Imm(i64::from(index))],
            SlowPathResult::None,
        )
    }

    // -- allocation -----------------------------------------------------------

    pub(super) fn compile_new_object(&mut self, structure: StructureId) -> Result<()> {
        let ctx = self.asm.ctx();
        let structure = self.asm.iconst(i64::from(structure.0));
        let word = self.call_operation(HelperKind::NewObject, &[ctx, structure])?;
        self.js_word_result(word, DataFormat::JsCell)
    }

    /// Box an operand straight into an outgoing slot, freeing its registers for the next one.
    pub(super) fn store_outgoing(&mut self, edge: Edge, slot: u32) -> Result<()> {
        self.speculate(edge)?;
        let regs = self.fill_js_value(edge.node)?;
        let boxed = R::regs_get(&mut self.asm, regs);
        let word = R::to_word(&mut self.asm, boxed);
        self.asm.store_slot(word, slot);
        for gpr in regs.gprs() {
            self.gprs.unlock(gpr);
        }
        Ok(())
    }

    pub(super) fn compile_new_array(&mut self, node: &Node, array_type: ArrayType) -> Result<()> {
        let first = self.layout.register_count();
        for (i, edge) in node.children.iter().enumerate() {
            self.store_outgoing(*edge, first + i as u32)?;
        }
        let shape = IndexingShape::for_array_type(array_type).unwrap_or(IndexingShape::Contiguous);
        let ctx = self.asm.ctx();
        let shape = self.asm.iconst(shape as i64);
        let values = self.asm.slot_address(first);
        let count = self.asm.iconst(node.children.len() as i64);
        let word = self.call_operation(HelperKind::NewArray, &[ctx, shape, values, count])?;
        self.js_word_result(word, DataFormat::JsCell)
    }

    pub(super) fn compile_create_this(&mut self) -> Result<()> {
        let ctx = self.asm.ctx();
        let callee = self.asm.load_slot(CALLEE_SLOT);
        let word = self.call_operation(HelperKind::CreateThis, &[ctx, callee])?;
        self.asm.store_slot(word, THIS_SLOT);
        self.js_word_result(word, DataFormat::JsCell)
    }

    pub(super) fn compile_create_arguments(&mut self) -> Result<()> {
        self.flush_local_sources()?;
        let ctx = self.asm.ctx();
        let fp = self.asm.fp();
        let word = self.call_operation(HelperKind::CreateArguments, &[ctx, fp])?;
        self.js_word_result(word, DataFormat::JsCell)
    }
}
