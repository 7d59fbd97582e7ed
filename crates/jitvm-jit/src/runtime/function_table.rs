//! Function table, PLT, and direct-call patching.
//!
//! Direct calls are emitted as 5-byte relative calls (`E8 rel32`). Until
//! the callee is compiled, the call site is parked as a pending patch;
//! once the callee's entry address is published, every pending site has
//! its 4-byte displacement (at offset +1 from the call opcode) rewritten
//! in place.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

const PLT_INITIAL_SLOTS: usize = 256;

/// A call site awaiting the callee's entry address: the absolute address
/// of the call opcode's first byte.
#[derive(Debug, Clone, Copy)]
pub struct PatchSite {
    pub call_site: usize,
}

enum FunctionEntry {
    Unresolved(Vec<PatchSite>),
    Resolved(usize),
}

/// Writes `target − (call_site + 5)` as a little-endian i32 at
/// `call_site + 1`. The five bytes are the `E8` opcode plus its 4-byte
/// displacement; `rel32` is measured from the end of the instruction.
///
/// Shared by direct-call patch sites and helper-call relocations: both
/// are `E8 rel32` call sites with the same patch layout.
///
/// # Safety
/// `call_site` must point at a live `E8` call opcode within writable,
/// currently-executing code whose surrounding 4 bytes are word-aligned.
pub unsafe fn patch_relative_call(call_site: usize, target: usize) {
    let rel = target as i64 - (call_site as i64 + 5);
    let bytes = (rel as i32).to_le_bytes();
    let dst = (call_site + 1) as *mut u8;
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, 4);
}

/// Maps function indices to entry addresses, recording pending patch
/// sites for callers that emitted before the callee was compiled.
pub struct FunctionTable {
    entries: RwLock<FxHashMap<u32, FunctionEntry>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn address_of(&self, func_index: u32) -> Option<usize> {
        match self.entries.read().get(&func_index) {
            Some(FunctionEntry::Resolved(addr)) => Some(*addr),
            _ => None,
        }
    }

    /// Registers a call site for `func_index`. If the callee is already
    /// resolved, patches it immediately (unsafe, see [`patch_relative_call`]);
    /// otherwise parks it until [`Self::publish`] resolves the function.
    pub fn register_patch_site(&self, func_index: u32, call_site: usize) {
        let resolved = match self.entries.read().get(&func_index) {
            Some(FunctionEntry::Resolved(addr)) => Some(*addr),
            _ => None,
        };
        if let Some(addr) = resolved {
            unsafe { patch_relative_call(call_site, addr) };
            return;
        }

        let mut entries = self.entries.write();
        match entries.entry(func_index).or_insert_with(|| FunctionEntry::Unresolved(Vec::new())) {
            FunctionEntry::Unresolved(sites) => sites.push(PatchSite { call_site }),
            FunctionEntry::Resolved(addr) => {
                let addr = *addr;
                drop(entries);
                unsafe { patch_relative_call(call_site, addr) };
            }
        }
    }

    /// Publishes `func_index`'s entry address and drains every pending
    /// patch site registered against it. Release-ordered with respect to
    /// `address_of`: once this returns, a reader observing the new
    /// mapping also observes the patched call sites.
    pub fn publish(&self, func_index: u32, address: usize) {
        let mut entries = self.entries.write();
        let previous = entries.insert(func_index, FunctionEntry::Resolved(address));
        drop(entries);

        if let Some(FunctionEntry::Unresolved(sites)) = previous {
            for site in sites {
                unsafe { patch_relative_call(site.call_site, address) };
            }
        }
    }

    pub fn is_resolved(&self, func_index: u32) -> bool {
        matches!(self.entries.read().get(&func_index), Some(FunctionEntry::Resolved(_)))
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// PLT-style indirection table for cross-arena or far calls: callers emit
/// an indirect call through a stable slot index; the driver overwrites
/// the slot's target as compilation completes.
pub struct Plt {
    slots: RwLock<Vec<AtomicUsize>>,
}

impl Plt {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(PLT_INITIAL_SLOTS);
        slots.resize_with(PLT_INITIAL_SLOTS, || AtomicUsize::new(0));
        Self {
            slots: RwLock::new(slots),
        }
    }

    /// Reserves a fresh slot, growing the table (amortized doubling, via
    /// the backing `Vec`'s own growth policy) if it is exhausted.
    pub fn alloc_slot(&self) -> usize {
        let mut slots = self.slots.write();
        slots.push(AtomicUsize::new(0));
        slots.len() - 1
    }

    pub fn write(&self, slot: usize, address: usize) {
        self.slots.read()[slot].store(address, Ordering::Release);
    }

    pub fn read(&self, slot: usize) -> usize {
        self.slots.read()[slot].load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }
}

impl Default for Plt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_then_address_of_round_trips() {
        let table = FunctionTable::new();
        assert!(table.address_of(3).is_none());
        table.publish(3, 0xDEAD_BEEF);
        assert_eq!(table.address_of(3), Some(0xDEAD_BEEF));
        assert!(table.is_resolved(3));
    }

    #[test]
    fn patches_pending_site_buffer_on_publish() {
        // Use a plain byte buffer as a stand-in for executable memory: the
        // patch site only needs to be a writable 5-byte region, it never
        // executes in this test.
        let mut buf = vec![0xE8u8, 0, 0, 0, 0];
        let call_site = buf.as_mut_ptr() as usize;

        let table = FunctionTable::new();
        table.register_patch_site(7, call_site);
        assert!(!table.is_resolved(7));

        let target = call_site + 100;
        table.publish(7, target);

        let rel = i32::from_le_bytes(buf[1..5].try_into().unwrap());
        assert_eq!(rel, target as i64 as i32 - (call_site as i64 as i32 + 5));
    }

    #[test]
    fn plt_starts_with_256_slots_and_grows() {
        let plt = Plt::new();
        assert_eq!(plt.capacity(), PLT_INITIAL_SLOTS);
        let slot = plt.alloc_slot();
        assert_eq!(slot, PLT_INITIAL_SLOTS);
        plt.write(slot, 42);
        assert_eq!(plt.read(slot), 42);
    }
}
