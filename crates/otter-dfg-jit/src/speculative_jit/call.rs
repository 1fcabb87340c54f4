//! Calls and constructs
//!
//! The caller builds the callee frame in its outgoing slots:
//!
//! ```text
//! fp + register_count: [callee][argc][this][arg1..argN]
//! ```
//!
//! With direct linking enabled, the site compares the callee against its
//! [`CallLinkInfo`](crate::call_link::CallLinkInfo) and calls the cached code
//! directly on a match; otherwise `LinkCall` performs the call and may link.

use cranelift_codegen::ir::condcodes::IntCC;
use otter_dfg_graph::Node;

use super::SpeculativeJit;
use crate::assembler::{JumpList, MacroAssembler};
use crate::call_link::{CallSiteRecord, CallType, link_offsets};
use crate::encoding::ValueRepresentation;
use crate::error::{JitError, Result};
use crate::generation_info::DataFormat;
use crate::layout::{ARGUMENT_COUNT_SLOT, CALLEE_SLOT, CellType, THIS_SLOT, cell};
use crate::platform::Platform;
use crate::runtime_helpers::HelperKind;

impl<R: ValueRepresentation, P: Platform> SpeculativeJit<'_, '_, R, P> {
    pub(super) fn compile_call(&mut self, node: &Node, call_type: CallType) -> Result<()> {
        let link_index = self
            .resources
            .plan
            .call_index(self.current_node)
            .ok_or(JitError::UnsupportedNode {
                node: self.current_node,
                op: node.op.name(),
                reason: "call site was not numbered",
            })?;
        let link = &self.resources.call_links[link_index as usize];
        let link_address = link as *const _ as usize;
        let argument_count = link.argument_count();
        let link_call = self.helpers.require(HelperKind::LinkCall, self.current_node)?;

        let frame = self.layout.register_count();
        self.store_outgoing(node.child1(), frame + CALLEE_SLOT)?;
        let count = self.asm.iconst(i64::from(argument_count));
        self.asm.store_slot(count, frame + ARGUMENT_COUNT_SLOT);
        let first_argument = match call_type {
            CallType::Call => frame + THIS_SLOT,
            CallType::Construct => {
                // The callee's CreateThis fills this slot.
                let empty = self.asm.iconst(R::EMPTY as i64);
                self.asm.store_slot(empty, frame + THIS_SLOT);
                frame + THIS_SLOT + 1
            }
        };
        for (i, edge) in node.children.iter().skip(1).enumerate() {
            self.store_outgoing(*edge, first_argument + i as u32)?;
        }

        self.flush_registers();
        let regs = self.allocate_js_regs()?;
        let ctx = self.asm.ctx();
        let callee_fp = self.asm.slot_address(frame);
        let link_cell = self.asm.iconst(link_address as i64);

        let mut unlinked = JumpList::new();
        if self.config.link_direct_calls {
            let callee = self.asm.load_slot(frame + CALLEE_SLOT);
            let expected = self.asm.load_i64(link_cell, link_offsets::CALLEE);
            unlinked.push(self.asm.branch_icmp_imm(IntCC::Equal, expected, 0));
            unlinked.push(self.asm.branch_icmp(IntCC::NotEqual, callee, expected));

            let signature = match self.call_signature {
                Some(signature) => signature,
                None => {
                    let call_conv = self.asm.call_conv();
                    let signature = self
                        .asm
                        .import_signature(MacroAssembler::function_signature(call_conv));
                    self.call_signature = Some(signature);
                    signature
                }
            };
            let target = self.asm.load_i64(link_cell, link_offsets::TARGET);
            let word = self.asm.call_indirect(signature, target, &[ctx, callee_fp]);
            let boxed = R::from_word(&mut self.asm, word);
            R::regs_set(&mut self.asm, regs, boxed);
            let done = self.asm.jump();

            unlinked.link_here(&mut self.asm);
            let word = self.asm.call(link_call, &[ctx, callee_fp, link_cell]);
            let boxed = R::from_word(&mut self.asm, word);
            R::regs_set(&mut self.asm, regs, boxed);
            self.asm.link_here(done);
        } else {
            let word = self.asm.call(link_call, &[ctx, callee_fp, link_cell]);
            let boxed = R::from_word(&mut self.asm, word);
            R::regs_set(&mut self.asm, regs, boxed);
        }
        self.asm.exception_check();

        if call_type == CallType::Construct {
            // A constructor returning a non-object yields the allocated receiver.
            let result = R::regs_get(&mut self.asm, regs);
            let mut use_receiver = JumpList::new();
            let is_cell = R::is_cell(&mut self.asm, result);
            use_receiver.push(self.asm.branch_not(is_cell));
            let pointer = R::unbox_cell(&mut self.asm, result);
            let ty = self.asm.load_u8(pointer, cell::TYPE);
            use_receiver.push(
                self.asm
                    .branch_icmp_imm(IntCC::Equal, ty, CellType::String as i64),
            );
            let done = self.asm.jump();
            use_receiver.link_here(&mut self.asm);
            let receiver = self.asm.load_slot(frame + THIS_SLOT);
            let boxed = R::from_word(&mut self.asm, receiver);
            R::regs_set(&mut self.asm, regs, boxed);
            self.asm.link_here(done);
        }

        self.call_sites.push(CallSiteRecord {
            node: self.current_node,
            call_type,
            link_index,
            patch_address: link_address,
            argument_count,
        });
        self.state.clobber_heap();
        self.js_result(regs, DataFormat::Js)
    }
}
