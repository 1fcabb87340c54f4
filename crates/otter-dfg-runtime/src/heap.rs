//! Heap arena and card table
//!
//! Every cell, butterfly and out-of-cell vector is bump-allocated from one
//! fixed region, so a cell is also addressable as a 32-bit offset from the
//! arena base (the tag/payload encoding relies on this). Nothing is ever
//! freed; the arena is released when the VM is dropped.
//!
//! The card table has one byte per [`CARD_SIZE`] bytes of arena. Emitted
//! code and the runtime both mark the owner's card when they store a cell
//! into it.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

use otter_dfg_jit::layout::CARD_SHIFT;

use crate::error::{VmError, VmResult};

/// Size of a card in bytes.
pub const CARD_SIZE: usize = 1 << CARD_SHIFT;

/// Card state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    /// No cell was stored into the card
    Clean = 0,
    /// A cell may have been stored into the card
    Dirty = 1,
}

/// Arena alignment; also keeps the first cell away from address zero.
const ARENA_ALIGN: usize = 4096;

/// Bytes skipped at the arena start so no cell sits at offset 0.
const RESERVED_PREFIX: usize = 16;

/// Card table for tracking stores of cells into cells
pub struct CardTable {
    cards: Box<[u8]>,
}

impl CardTable {
    fn new(arena_size: usize) -> Self {
        Self {
            cards: vec![CardState::Clean as u8; arena_size.div_ceil(CARD_SIZE)].into_boxed_slice(),
        }
    }

    /// Address of the first card byte, for the execution context.
    pub fn base_address(&self) -> usize {
        self.cards.as_ptr() as usize
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the table has no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Number of dirty cards
    pub fn dirty_count(&self) -> usize {
        self.cards
            .iter()
            .filter(|state| **state == CardState::Dirty as u8)
            .count()
    }

    /// Clear all cards
    pub fn clear(&mut self) {
        self.cards.fill(CardState::Clean as u8);
    }
}

/// Bump-allocated arena holding every cell.
pub struct Heap {
    base: NonNull<u8>,
    size: usize,
    top: usize,
    cards: CardTable,
}

impl Heap {
    /// Reserve an arena of `size` bytes.
    pub fn new(size: usize) -> VmResult<Self> {
        let size = size.clamp(ARENA_ALIGN, u32::MAX as usize);
        let layout = Layout::from_size_align(size, ARENA_ALIGN)
            .map_err(|_| VmError::OutOfMemory { requested: size })?;
        // SAFETY: the layout has a non-zero size.
        let base = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or(VmError::OutOfMemory { requested: size })?;
        Ok(Self {
            base,
            size,
            top: RESERVED_PREFIX,
            cards: CardTable::new(size),
        })
    }

    /// Arena base address.
    pub fn base(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Arena size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Bytes handed out so far.
    pub fn used(&self) -> usize {
        self.top
    }

    /// Whether `address` lies inside the arena.
    pub fn contains(&self, address: usize) -> bool {
        address >= self.base() && address < self.base() + self.size
    }

    /// Allocate zeroed, 8-byte aligned memory.
    pub fn allocate(&mut self, size: usize) -> VmResult<usize> {
        let aligned = (size.max(8) + 7) & !7;
        if self.top + aligned > self.size {
            return Err(VmError::OutOfMemory { requested: size });
        }
        let address = self.base() + self.top;
        self.top += aligned;
        Ok(address)
    }

    /// The card table.
    pub fn cards(&self) -> &CardTable {
        &self.cards
    }

    /// Mutable card table.
    pub fn cards_mut(&mut self) -> &mut CardTable {
        &mut self.cards
    }

    /// Mark the card holding `owner` dirty.
    pub fn write_barrier(&mut self, owner: usize) {
        if self.contains(owner) {
            let card = (owner - self.base()) >> CARD_SHIFT;
            if let Some(state) = self.cards.cards.get_mut(card) {
                *state = CardState::Dirty as u8;
            }
        }
    }

    /// Whether the card holding `address` is dirty.
    pub fn is_card_dirty(&self, address: usize) -> bool {
        self.contains(address)
            && self.cards.cards[(address - self.base()) >> CARD_SHIFT] == CardState::Dirty as u8
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.size, ARENA_ALIGN) {
            // SAFETY: `base` was allocated with this layout in `new`.
            unsafe { dealloc(self.base.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("base", &format_args!("{:#x}", self.base()))
            .field("size", &self.size)
            .field("used", &self.top)
            .field("dirty_cards", &self.cards.dirty_count())
            .finish()
    }
}

// -- raw memory access ---------------------------------------------------------

/// Read a `u8` at `address + offset`.
///
/// # Safety
///
/// The address must be readable.
#[inline]
pub unsafe fn read_u8(address: usize, offset: i32) -> u8 {
    unsafe { ((address as isize + offset as isize) as *const u8).read() }
}

/// Write a `u8` at `address + offset`.
///
/// # Safety
///
/// The address must be writable.
#[inline]
pub unsafe fn write_u8(address: usize, offset: i32, value: u8) {
    unsafe { ((address as isize + offset as isize) as *mut u8).write(value) }
}

/// Read a `u16` at `address + offset`.
///
/// # Safety
///
/// The address must be readable and 2-byte aligned.
#[inline]
pub unsafe fn read_u16(address: usize, offset: i32) -> u16 {
    unsafe { ((address as isize + offset as isize) as *const u16).read() }
}

/// Read a `u32` at `address + offset`.
///
/// # Safety
///
/// The address must be readable and 4-byte aligned.
#[inline]
pub unsafe fn read_u32(address: usize, offset: i32) -> u32 {
    unsafe { ((address as isize + offset as isize) as *const u32).read() }
}

/// Write a `u32` at `address + offset`.
///
/// # Safety
///
/// The address must be writable and 4-byte aligned.
#[inline]
pub unsafe fn write_u32(address: usize, offset: i32, value: u32) {
    unsafe { ((address as isize + offset as isize) as *mut u32).write(value) }
}

/// Read a `u64` at `address + offset`.
///
/// # Safety
///
/// The address must be readable and 8-byte aligned.
#[inline]
pub unsafe fn read_u64(address: usize, offset: i32) -> u64 {
    unsafe { ((address as isize + offset as isize) as *const u64).read() }
}

/// Write a `u64` at `address + offset`.
///
/// # Safety
///
/// The address must be writable and 8-byte aligned.
#[inline]
pub unsafe fn write_u64(address: usize, offset: i32, value: u64) {
    unsafe { ((address as isize + offset as isize) as *mut u64).write(value) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_is_aligned_and_disjoint() {
        let mut heap = Heap::new(1 << 16).expect("heap should be created");
        let a = heap.allocate(3).expect("allocation should succeed");
        let b = heap.allocate(24).expect("allocation should succeed");
        assert_eq!(a % 8, 0);
        assert_eq!(b - a, 8);
        assert!(heap.contains(a) && heap.contains(b));
        assert!(a > heap.base());
    }

    #[test]
    fn exhaustion_reports_out_of_memory() {
        let mut heap = Heap::new(ARENA_ALIGN).expect("heap should be created");
        let err = heap
            .allocate(ARENA_ALIGN)
            .expect_err("oversized allocation should fail");
        assert!(matches!(err, VmError::OutOfMemory { .. }));
    }

    #[test]
    fn write_barrier_marks_cards() {
        let mut heap = Heap::new(1 << 16).expect("heap should be created");
        let cell = heap.allocate(48).expect("allocation should succeed");
        assert!(!heap.is_card_dirty(cell));
        heap.write_barrier(cell);
        assert!(heap.is_card_dirty(cell));
        assert_eq!(heap.cards().dirty_count(), 1);
        heap.write_barrier(0x10);
        assert_eq!(heap.cards().dirty_count(), 1);
        heap.cards_mut().clear();
        assert_eq!(heap.cards().dirty_count(), 0);
    }
}
