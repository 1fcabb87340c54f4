//! Property inline caches
//!
//! Each `GetById`/`PutById`/`PutByIdDirect` site owns one
//! [`PropertyCacheEntry`] in runtime-visible memory. The emitted fast path
//! compares the base's structure id against the entry once and then
//! loads or stores at the entry's storage kind and byte offset. The slow
//! helper performs the generic access and repatches the entry.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use otter_dfg_graph::{Identifier, NodeIndex, StructureId};

use crate::layout::PropertyStorage;

/// Misses after which a cache stops being repatched.
pub const MEGAMORPHIC_MISS_LIMIT: u32 = 8;

/// Byte offsets of [`PropertyCacheEntry`] fields, read by emitted code.
pub mod entry_offsets {
    /// Expected structure id.
    pub const STRUCTURE_ID: i32 = 0;
    /// Structure after a cached transition, or 0.
    pub const NEW_STRUCTURE_ID: i32 = 4;
    /// 0 inline, 1 out-of-line.
    pub const STORAGE_KIND: i32 = 8;
    /// Byte offset from the storage base.
    pub const BYTE_OFFSET: i32 = 12;
}

/// What a cache site does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AccessKind {
    /// Named read.
    Get = 0,
    /// Named write honouring setters and read-only properties up the chain.
    Put = 1,
    /// Named definition on the base object itself.
    PutDirect = 2,
}

impl AccessKind {
    /// Decode a stored kind.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Get),
            1 => Some(Self::Put),
            2 => Some(Self::PutDirect),
            _ => None,
        }
    }

    /// Whether the site writes.
    pub fn is_put(self) -> bool {
        !matches!(self, Self::Get)
    }
}

/// Patchable state of one cache site.
///
/// Structure id 0 never matches a real object, so a fresh entry always takes
/// the slow path.
#[derive(Debug)]
#[repr(C)]
pub struct PropertyCacheEntry {
    structure_id: AtomicU32,
    new_structure_id: AtomicU32,
    storage_kind: AtomicU32,
    byte_offset: AtomicI32,
    identifier: u32,
    kind: u32,
    miss_count: AtomicU32,
}

const _: () = {
    assert!(std::mem::offset_of!(PropertyCacheEntry, structure_id) == entry_offsets::STRUCTURE_ID as usize);
    assert!(std::mem::offset_of!(PropertyCacheEntry, new_structure_id) == entry_offsets::NEW_STRUCTURE_ID as usize);
    assert!(std::mem::offset_of!(PropertyCacheEntry, storage_kind) == entry_offsets::STORAGE_KIND as usize);
    assert!(std::mem::offset_of!(PropertyCacheEntry, byte_offset) == entry_offsets::BYTE_OFFSET as usize);
};

/// A resolved cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedAccess {
    /// Structure the fast path accepts.
    pub structure: StructureId,
    /// Structure stored by a cached transition.
    pub new_structure: Option<StructureId>,
    /// Where the slot lives.
    pub storage: PropertyStorage,
    /// Byte offset from the storage base.
    pub byte_offset: i32,
}

impl PropertyCacheEntry {
    /// Unresolved entry for a site.
    pub fn new(identifier: Identifier, kind: AccessKind) -> Self {
        Self {
            structure_id: AtomicU32::new(StructureId::NONE.0),
            new_structure_id: AtomicU32::new(0),
            storage_kind: AtomicU32::new(0),
            byte_offset: AtomicI32::new(0),
            identifier: identifier.0,
            kind: kind as u32,
            miss_count: AtomicU32::new(0),
        }
    }

    /// Property name of the site.
    pub fn identifier(&self) -> Identifier {
        Identifier(self.identifier)
    }

    /// Access kind of the site.
    pub fn kind(&self) -> AccessKind {
        AccessKind::from_u32(self.kind).unwrap_or(AccessKind::Get)
    }

    /// Current cached state, if any.
    pub fn cached(&self) -> Option<CachedAccess> {
        let structure = self.structure_id.load(Ordering::Acquire);
        if structure == StructureId::NONE.0 {
            return None;
        }
        let new_structure = self.new_structure_id.load(Ordering::Relaxed);
        Some(CachedAccess {
            structure: StructureId(structure),
            new_structure: (new_structure != 0).then_some(StructureId(new_structure)),
            storage: if self.storage_kind.load(Ordering::Relaxed) == 0 {
                PropertyStorage::Inline
            } else {
                PropertyStorage::OutOfLine
            },
            byte_offset: self.byte_offset.load(Ordering::Relaxed),
        })
    }

    /// Install a cached state.
    ///
    /// The structure id is published last so the fast path never pairs a new
    /// structure with a stale offset.
    pub fn repatch(&self, access: CachedAccess) {
        self.structure_id.store(StructureId::NONE.0, Ordering::Release);
        self.new_structure_id
            .store(access.new_structure.map_or(0, |s| s.0), Ordering::Relaxed);
        self.storage_kind.store(
            match access.storage {
                PropertyStorage::Inline => 0,
                PropertyStorage::OutOfLine => 1,
            },
            Ordering::Relaxed,
        );
        self.byte_offset.store(access.byte_offset, Ordering::Relaxed);
        self.structure_id.store(access.structure.0, Ordering::Release);
    }

    /// Count a slow-path miss; returns `true` once the site is megamorphic.
    pub fn record_miss(&self) -> bool {
        self.miss_count.fetch_add(1, Ordering::Relaxed) + 1 >= MEGAMORPHIC_MISS_LIMIT
    }

    /// Whether the site stopped being repatched.
    pub fn is_megamorphic(&self) -> bool {
        self.miss_count.load(Ordering::Relaxed) >= MEGAMORPHIC_MISS_LIMIT
    }

    /// Drop the cached state and stop repatching.
    pub fn make_megamorphic(&self) {
        self.structure_id.store(StructureId::NONE.0, Ordering::Release);
        self.miss_count
            .store(MEGAMORPHIC_MISS_LIMIT, Ordering::Relaxed);
    }

    /// Slow-path misses so far.
    pub fn miss_count(&self) -> u32 {
        self.miss_count.load(Ordering::Relaxed)
    }
}

/// One entry of the inline-cache table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineCacheRecord {
    /// Property access node.
    pub node: NodeIndex,
    /// Access kind.
    pub kind: AccessKind,
    /// Property name.
    pub identifier: Identifier,
    /// Index of the site's entry in the unit's cache cells.
    pub entry_index: u32,
    /// Address of the patchable entry.
    pub patch_address: usize,
    /// General-purpose registers holding live values at the access, as a bit mask.
    pub live_registers: u32,
    /// Whether live registers were already flushed to the frame at the access.
    pub registers_flushed: bool,
    /// Index of the site's slow path in emission order.
    pub slow_path: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_are_unresolved() {
        let entry = PropertyCacheEntry::new(Identifier(3), AccessKind::Put);
        assert!(entry.cached().is_none());
        assert_eq!(entry.kind(), AccessKind::Put);
        assert_eq!(entry.identifier(), Identifier(3));
    }

    #[test]
    fn repatch_publishes_state() {
        let entry = PropertyCacheEntry::new(Identifier(0), AccessKind::PutDirect);
        let access = CachedAccess {
            structure: StructureId(7),
            new_structure: Some(StructureId(8)),
            storage: PropertyStorage::OutOfLine,
            byte_offset: -24,
        };
        entry.repatch(access);
        assert_eq!(entry.cached(), Some(access));
    }

    #[test]
    fn misses_turn_megamorphic() {
        let entry = PropertyCacheEntry::new(Identifier(0), AccessKind::Get);
        for _ in 1..MEGAMORPHIC_MISS_LIMIT {
            assert!(!entry.record_miss());
        }
        assert!(entry.record_miss());
        assert!(entry.is_megamorphic());
    }
}
