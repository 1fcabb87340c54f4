//! Machine register model and register banks
//!
//! Registers are Cranelift variables: the generator decides which value owns
//! which register and when it is spilled, Cranelift maps the variables onto
//! physical registers.

use std::fmt;

use otter_dfg_graph::VirtualRegister;

/// General-purpose register count available to the generator.
pub const GPR_COUNT: usize = 12;
/// Floating-point register count available to the generator.
pub const FPR_COUNT: usize = 8;

/// A general-purpose register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gpr(pub u8);

/// A floating-point register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fpr(pub u8);

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl fmt::Display for Fpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Register identifiers a [`RegisterBank`] can manage.
pub trait RegisterId: Copy + Eq + fmt::Debug {
    /// Bank index.
    fn index(self) -> usize;
    /// Register at a bank index.
    fn from_index(index: usize) -> Self;
}

impl RegisterId for Gpr {
    fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(index as u8)
    }
}

impl RegisterId for Fpr {
    fn index(self) -> usize {
        self.0 as usize
    }

    fn from_index(index: usize) -> Self {
        Self(index as u8)
    }
}

/// Registers holding a boxed value: one register, or a tag/payload pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsRegs {
    /// The whole word, or the payload half.
    pub payload: Gpr,
    /// The tag half, for the split encoding.
    pub tag: Option<Gpr>,
}

impl JsRegs {
    /// Single-register boxed value.
    pub const fn single(gpr: Gpr) -> Self {
        Self {
            payload: gpr,
            tag: None,
        }
    }

    /// Tag/payload pair.
    pub const fn pair(tag: Gpr, payload: Gpr) -> Self {
        Self {
            payload,
            tag: Some(tag),
        }
    }

    /// Every register involved.
    pub fn gprs(self) -> impl Iterator<Item = Gpr> {
        std::iter::once(self.payload).chain(self.tag)
    }
}

// ---------------------------------------------------------------------------
// Spill order
// ---------------------------------------------------------------------------

/// Cost of evicting a register's value; the cheapest unlocked register is spilled first.
pub type SpillOrder = u32;

/// No value (free register).
pub const SPILL_ORDER_NONE: SpillOrder = 0;
/// Rematerializable constant.
pub const SPILL_ORDER_CONSTANT: SpillOrder = 1;
/// Already has a valid spill slot.
pub const SPILL_ORDER_SPILLED: SpillOrder = 2;
/// Boxed value.
pub const SPILL_ORDER_JS: SpillOrder = 4;
/// Cell pointer.
pub const SPILL_ORDER_CELL: SpillOrder = 4;
/// Storage pointer.
pub const SPILL_ORDER_STORAGE: SpillOrder = 5;
/// Unboxed int32.
pub const SPILL_ORDER_INTEGER: SpillOrder = 5;
/// Unboxed boolean.
pub const SPILL_ORDER_BOOLEAN: SpillOrder = 5;
/// Unboxed double.
pub const SPILL_ORDER_DOUBLE: SpillOrder = 6;

// ---------------------------------------------------------------------------
// RegisterBank
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
struct BankEntry {
    owner: Option<VirtualRegister>,
    lock_count: u32,
    spill_order: SpillOrder,
}

/// Outcome of [`RegisterBank::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation<Reg> {
    /// The register, now locked.
    pub reg: Reg,
    /// Value that owned the register and must be spilled by the caller.
    pub spill: Option<VirtualRegister>,
}

/// Ownership and locking state of one register class.
///
/// A register is owned by at most one virtual register. Locked registers are
/// never handed out or evicted.
#[derive(Debug, Clone)]
pub struct RegisterBank<Reg, const N: usize> {
    entries: [BankEntry; N],
    _reg: std::marker::PhantomData<Reg>,
}

impl<Reg: RegisterId, const N: usize> Default for RegisterBank<Reg, N> {
    fn default() -> Self {
        Self {
            entries: [BankEntry::default(); N],
            _reg: std::marker::PhantomData,
        }
    }
}

impl<Reg: RegisterId, const N: usize> RegisterBank<Reg, N> {
    /// Empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// A free, unlocked register, locked for the caller.
    pub fn try_allocate(&mut self) -> Option<Reg> {
        let index = self
            .entries
            .iter()
            .position(|e| e.owner.is_none() && e.lock_count == 0)?;
        self.entries[index].lock_count = 1;
        Some(Reg::from_index(index))
    }

    /// Lock and return a register, evicting the cheapest unlocked owner if none is free.
    ///
    /// Returns `None` only when every register is locked.
    pub fn allocate(&mut self) -> Option<Allocation<Reg>> {
        if let Some(reg) = self.try_allocate() {
            return Some(Allocation { reg, spill: None });
        }
        let (index, entry) = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.lock_count == 0)
            .min_by_key(|(_, e)| e.spill_order)?;
        let spill = entry.owner;
        self.entries[index] = BankEntry {
            owner: None,
            lock_count: 1,
            spill_order: SPILL_ORDER_NONE,
        };
        Some(Allocation {
            reg: Reg::from_index(index),
            spill,
        })
    }

    /// Record `vreg` as the owner of `reg`.
    pub fn retain(&mut self, reg: Reg, vreg: VirtualRegister, spill_order: SpillOrder) {
        let entry = &mut self.entries[reg.index()];
        entry.owner = Some(vreg);
        entry.spill_order = spill_order;
    }

    /// Drop ownership; the lock count is unchanged.
    pub fn release(&mut self, reg: Reg) {
        let entry = &mut self.entries[reg.index()];
        entry.owner = None;
        entry.spill_order = SPILL_ORDER_NONE;
    }

    /// Increment the lock count.
    pub fn lock(&mut self, reg: Reg) {
        self.entries[reg.index()].lock_count += 1;
    }

    /// Decrement the lock count.
    pub fn unlock(&mut self, reg: Reg) {
        let entry = &mut self.entries[reg.index()];
        entry.lock_count = entry.lock_count.saturating_sub(1);
    }

    /// Clear every lock.
    pub fn unlock_all(&mut self) {
        for entry in &mut self.entries {
            entry.lock_count = 0;
        }
    }

    /// Whether the register is locked.
    pub fn is_locked(&self, reg: Reg) -> bool {
        self.entries[reg.index()].lock_count > 0
    }

    /// Owner of the register.
    pub fn owner(&self, reg: Reg) -> Option<VirtualRegister> {
        self.entries[reg.index()].owner
    }

    /// Registers with an owner, in bank order.
    pub fn owned(&self) -> impl Iterator<Item = (Reg, VirtualRegister)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.owner.map(|vreg| (Reg::from_index(i), vreg)))
    }

    /// Update the spill order of an owned register.
    pub fn set_spill_order(&mut self, reg: Reg, spill_order: SpillOrder) {
        self.entries[reg.index()].spill_order = spill_order;
    }

    /// Forget every owner and lock.
    pub fn reset(&mut self) {
        self.entries = [BankEntry::default(); N];
    }

    /// Number of registers neither owned nor locked.
    pub fn free_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.owner.is_none() && e.lock_count == 0)
            .count()
    }
}

/// Bank of general-purpose registers.
pub type GprBank = RegisterBank<Gpr, GPR_COUNT>;
/// Bank of floating-point registers.
pub type FprBank = RegisterBank<Fpr, FPR_COUNT>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_prefers_free_registers() {
        let mut bank = RegisterBank::<Gpr, 2>::new();
        let a = bank.allocate().expect("allocation should succeed");
        assert_eq!(a.spill, None);
        bank.retain(a.reg, VirtualRegister(0), SPILL_ORDER_INTEGER);
        bank.unlock(a.reg);

        let b = bank.allocate().expect("allocation should succeed");
        assert_ne!(a.reg, b.reg);
        assert_eq!(b.spill, None);
    }

    #[test]
    fn allocate_evicts_cheapest_unlocked() {
        let mut bank = RegisterBank::<Gpr, 3>::new();
        for (i, order) in [SPILL_ORDER_DOUBLE, SPILL_ORDER_CONSTANT, SPILL_ORDER_JS]
            .into_iter()
            .enumerate()
        {
            let alloc = bank.allocate().expect("allocation should succeed");
            bank.retain(alloc.reg, VirtualRegister(i as u32), order);
            bank.unlock(alloc.reg);
        }

        let alloc = bank.allocate().expect("allocation should succeed");
        assert_eq!(alloc.reg, Gpr(1));
        assert_eq!(alloc.spill, Some(VirtualRegister(1)));
        assert!(bank.is_locked(Gpr(1)));
        assert_eq!(bank.owner(Gpr(1)), None);
    }

    #[test]
    fn locked_registers_are_never_evicted() {
        let mut bank = RegisterBank::<Gpr, 2>::new();
        let a = bank.allocate().expect("allocation should succeed");
        let b = bank.allocate().expect("allocation should succeed");
        bank.retain(a.reg, VirtualRegister(0), SPILL_ORDER_CONSTANT);
        bank.retain(b.reg, VirtualRegister(1), SPILL_ORDER_CONSTANT);
        assert!(bank.allocate().is_none());

        bank.unlock(b.reg);
        let c = bank.allocate().expect("allocation should succeed");
        assert_eq!(c.reg, b.reg);
        assert_eq!(c.spill, Some(VirtualRegister(1)));
    }

    #[test]
    fn reset_clears_everything() {
        let mut bank = GprBank::new();
        let a = bank.allocate().expect("allocation should succeed");
        bank.retain(a.reg, VirtualRegister(3), SPILL_ORDER_JS);
        bank.reset();
        assert_eq!(bank.free_count(), GPR_COUNT);
        assert_eq!(bank.owned().count(), 0);
    }
}
