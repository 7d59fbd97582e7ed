//! Executable code cache: append-only arenas of RWX memory, bump-pointer
//! allocated, holding installed [`CompiledCode`] bytes indexed by
//! function index.

use std::sync::Mutex;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::emitter::CompiledCode;
use crate::error::{JitError, JitResult};
use crate::runtime::page::{page_align, ExecPage, PageAllocator, DEFAULT_ARENA_SIZE, PAGE_SIZE};

const ALIGN: usize = 16;

fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// One executable arena and its bump offset.
struct Arena {
    page: Box<dyn ExecPage>,
    used: usize,
}

impl Arena {
    fn remaining(&self) -> usize {
        self.page.len() - self.used
    }
}

/// An installed function's entry, addressed as an absolute pointer plus
/// its size for bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct InstalledEntry {
    pub entry_ptr: usize,
    pub code_ptr: usize,
    pub code_len: usize,
}

/// Thread-safe cache of JIT-compiled function code, backed by one or more
/// executable arenas. Installation is serialized through a mutex;
/// previously-installed entries remain lock-free to read once published.
pub struct CodeCache {
    allocator: Box<dyn PageAllocator>,
    arenas: Mutex<Vec<Arena>>,
    entries: RwLock<FxHashMap<u32, InstalledEntry>>,
}

impl CodeCache {
    pub fn new(allocator: Box<dyn PageAllocator>) -> Self {
        Self {
            allocator,
            arenas: Mutex::new(Vec::new()),
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    /// Copies `code.code` into the cache's bump arena, growing it if
    /// necessary, and records the installed entry under `func_index`.
    /// Returns the absolute address of the function's entry point.
    pub fn install(&self, func_index: u32, code: &CompiledCode) -> JitResult<InstalledEntry> {
        let len = code.code.len();
        let mut arenas = self.arenas.lock().map_err(|_| {
            JitError::Poisoned("code cache arena lock poisoned".into())
        })?;

        let needs_new_arena = arenas
            .last()
            .map(|a| a.remaining() < align_up(len, ALIGN))
            .unwrap_or(true);
        if needs_new_arena {
            let size = DEFAULT_ARENA_SIZE.max(len + PAGE_SIZE);
            let page = self.allocator.allocate(page_align(size))?;
            arenas.push(Arena { page, used: 0 });
        }

        let arena = arenas.last_mut().expect("arena just ensured present");
        let base = arena.page.as_mut_ptr() as usize;
        let offset = arena.used;
        // SAFETY: `offset + len` is within the page's allocated length,
        // checked by `needs_new_arena` above.
        unsafe {
            std::ptr::copy_nonoverlapping(code.code.as_ptr(), arena.page.as_mut_ptr().add(offset), len);
        }
        arena.used = align_up(offset + len, ALIGN);

        let entry = InstalledEntry {
            entry_ptr: base + offset + code.entry_offset,
            code_ptr: base + offset,
            code_len: len,
        };
        self.entries.write().insert(func_index, entry);
        Ok(entry)
    }

    pub fn get(&self, func_index: u32) -> Option<InstalledEntry> {
        self.entries.read().get(&func_index).copied()
    }

    pub fn contains(&self, func_index: u32) -> bool {
        self.entries.read().contains_key(&func_index)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn arena_count(&self) -> usize {
        self.arenas.lock().map(|a| a.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{CompiledCode, Relocation};
    use crate::runtime::page::FakeAllocator;

    fn code_of(len: usize) -> CompiledCode {
        CompiledCode {
            code: vec![0xC3; len],
            entry_offset: 0,
            relocations: Vec::<Relocation>::new(),
        }
    }

    #[test]
    fn install_then_get_round_trips() {
        let cache = CodeCache::new(Box::new(FakeAllocator));
        let entry = cache.install(0, &code_of(32)).unwrap();
        assert!(entry.entry_ptr != 0);
        assert!(cache.contains(0));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn second_install_reuses_arena_when_it_fits() {
        let cache = CodeCache::new(Box::new(FakeAllocator));
        cache.install(0, &code_of(32)).unwrap();
        cache.install(1, &code_of(32)).unwrap();
        assert_eq!(cache.arena_count(), 1);
    }

    #[test]
    fn oversized_install_grows_a_new_arena() {
        let cache = CodeCache::new(Box::new(FakeAllocator));
        cache.install(0, &code_of(32)).unwrap();
        cache.install(1, &code_of(DEFAULT_ARENA_SIZE * 2)).unwrap();
        assert_eq!(cache.arena_count(), 2);
    }

    #[test]
    fn bump_offsets_are_sixteen_byte_aligned() {
        let cache = CodeCache::new(Box::new(FakeAllocator));
        let first = cache.install(0, &code_of(3)).unwrap();
        let second = cache.install(1, &code_of(3)).unwrap();
        assert_eq!((second.code_ptr - first.code_ptr) % ALIGN, 0);
    }
}
