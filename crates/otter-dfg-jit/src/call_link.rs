//! Call-site link cells
//!
//! A call site compares the callee word against [`CallLinkInfo`]'s expected
//! callee and, on a match, calls the cached code pointer directly. Otherwise
//! it calls the `LinkCall` helper, which performs the call and links the
//! cell when the callee has compiled code.

use std::sync::atomic::{AtomicU64, Ordering};

use otter_dfg_graph::NodeIndex;

/// Byte offsets of [`CallLinkInfo`] fields, read by emitted code.
pub mod link_offsets {
    /// Expected callee word.
    pub const CALLEE: i32 = 0;
    /// Code pointer of the linked target.
    pub const TARGET: i32 = 8;
}

/// Linkage type of a call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CallType {
    /// Plain call.
    Call = 0,
    /// Constructor call.
    Construct = 1,
}

impl CallType {
    /// Decode a stored call type.
    pub fn from_u32(value: u32) -> Self {
        if value == 1 { Self::Construct } else { Self::Call }
    }
}

/// Patchable state of one call site.
#[derive(Debug)]
#[repr(C)]
pub struct CallLinkInfo {
    callee: AtomicU64,
    target: AtomicU64,
    call_type: u32,
    argument_count: u32,
}

const _: () = {
    assert!(std::mem::offset_of!(CallLinkInfo, callee) == link_offsets::CALLEE as usize);
    assert!(std::mem::offset_of!(CallLinkInfo, target) == link_offsets::TARGET as usize);
};

impl CallLinkInfo {
    /// Unlinked cell. `argument_count` includes `this`.
    pub fn new(call_type: CallType, argument_count: u32) -> Self {
        Self {
            callee: AtomicU64::new(0),
            target: AtomicU64::new(0),
            call_type: call_type as u32,
            argument_count,
        }
    }

    /// Linkage type.
    pub fn call_type(&self) -> CallType {
        CallType::from_u32(self.call_type)
    }

    /// Argument count including `this`.
    pub fn argument_count(&self) -> u32 {
        self.argument_count
    }

    /// Linked callee word and code pointer.
    pub fn linked(&self) -> Option<(u64, usize)> {
        let callee = self.callee.load(Ordering::Acquire);
        (callee != 0).then(|| (callee, self.target.load(Ordering::Relaxed) as usize))
    }

    /// Link the site to a callee's compiled code.
    pub fn link(&self, callee: u64, target: usize) {
        self.callee.store(0, Ordering::Release);
        self.target.store(target as u64, Ordering::Relaxed);
        self.callee.store(callee, Ordering::Release);
    }

    /// Return the site to the slow path.
    pub fn unlink(&self) {
        self.callee.store(0, Ordering::Release);
        self.target.store(0, Ordering::Relaxed);
    }

    /// Whether the site currently targets `code`.
    pub fn targets(&self, code: usize) -> bool {
        self.linked().is_some_and(|(_, target)| target == code)
    }
}

/// One entry of the call-site table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteRecord {
    /// Call node.
    pub node: NodeIndex,
    /// Linkage type.
    pub call_type: CallType,
    /// Index of the site's cell in the unit's link cells.
    pub link_index: u32,
    /// Address of the patchable cell.
    pub patch_address: usize,
    /// Argument count including `this`.
    pub argument_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_and_unlink() {
        let info = CallLinkInfo::new(CallType::Construct, 3);
        assert!(info.linked().is_none());
        info.link(0xdead_0000, 0x4000);
        assert_eq!(info.linked(), Some((0xdead_0000, 0x4000)));
        assert!(info.targets(0x4000));
        info.unlink();
        assert!(info.linked().is_none());
        assert_eq!(info.call_type(), CallType::Construct);
        assert_eq!(info.argument_count(), 3);
    }
}
