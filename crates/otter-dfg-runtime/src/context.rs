//! Execution context shared with emitted code
//!
//! Compiled units receive a pointer to [`JitContext`] as their first argument
//! and read it at the fixed offsets of `otter_dfg_jit::layout::context`.

use std::mem::offset_of;

use otter_dfg_jit::layout::context;

/// Per-VM state read by emitted code.
#[repr(C)]
#[derive(Debug, Default)]
pub struct JitContext {
    /// Arena base; split-encoded cells are offsets from it.
    pub heap_base: u64,
    /// First card-table byte.
    pub card_table: u64,
    /// Number of cards.
    pub card_count: u64,
    /// Highest frame address a unit may use.
    pub stack_limit: u64,
    /// Nonzero while an exception is propagating.
    pub exception_pending: u64,
    /// Boxed exception value.
    pub exception_value: u64,
    /// Table of 256 single-character string cells.
    pub single_character_strings: u64,
    /// Global variable slots, boxed.
    pub globals: u64,
    /// One watch-state byte per global.
    pub global_watch_states: u64,
    /// Owning VM, for helpers.
    pub vm: u64,
}

const _: () = {
    assert!(offset_of!(JitContext, heap_base) == context::HEAP_BASE as usize);
    assert!(offset_of!(JitContext, card_table) == context::CARD_TABLE as usize);
    assert!(offset_of!(JitContext, card_count) == context::CARD_COUNT as usize);
    assert!(offset_of!(JitContext, stack_limit) == context::STACK_LIMIT as usize);
    assert!(offset_of!(JitContext, exception_pending) == context::EXCEPTION_PENDING as usize);
    assert!(offset_of!(JitContext, exception_value) == context::EXCEPTION_VALUE as usize);
    assert!(
        offset_of!(JitContext, single_character_strings)
            == context::SINGLE_CHARACTER_STRINGS as usize
    );
    assert!(offset_of!(JitContext, globals) == context::GLOBALS as usize);
    assert!(offset_of!(JitContext, global_watch_states) == context::GLOBAL_WATCH_STATES as usize);
    assert!(offset_of!(JitContext, vm) == context::VM as usize);
    assert!(std::mem::size_of::<JitContext>() == context::SIZE);
};

impl JitContext {
    /// Raw pointer handed to compiled code.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self as *mut Self as *mut u8
    }

    /// Whether an exception is propagating.
    pub fn has_exception(&self) -> bool {
        self.exception_pending != 0
    }

    /// Flag an exception with its boxed value.
    pub fn raise(&mut self, value: u64) {
        self.exception_pending = 1;
        self.exception_value = value;
    }

    /// Clear the exception flag, returning the boxed value.
    pub fn take_exception(&mut self) -> Option<u64> {
        if self.exception_pending == 0 {
            return None;
        }
        self.exception_pending = 0;
        Some(std::mem::take(&mut self.exception_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_flag() {
        let mut ctx = JitContext::default();
        assert!(!ctx.has_exception());
        ctx.raise(42);
        assert!(ctx.has_exception());
        assert_eq!(ctx.take_exception(), Some(42));
        assert_eq!(ctx.take_exception(), None);
    }
}
