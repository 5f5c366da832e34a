//! The pool arena inside linear memory. Every structure (allocator
//! header, block headers, pools, buffered-slab records, the per-thread
//! pool stack) lives in guest memory and is addressed by u32 offsets, so
//! guest and host observe the same state. `u32::MAX` is the null offset.
//!
//! Blocks are power-of-two multiples of the 4 KiB boundary, kept in
//! size-indexed free lists with a catch-all sink at index 0. Pools chain
//! blocks in a ring ordered by remaining space; allocations below the
//! 256-byte threshold bump-allocate, larger ones go through the
//! buffered-slab lists.

use crate::runtime::MemoryData;
use crate::types::PAGE_SIZE;

pub(crate) const BOUNDARY_INDEX: u32 = 12;
pub(crate) const BOUNDARY_SIZE: u32 = 1 << BOUNDARY_INDEX;
pub(crate) const MIN_ALLOC: u32 = 2 * BOUNDARY_SIZE;
pub(crate) const MAX_INDEX: u32 = 20;
pub(crate) const BLOCK_THRESHOLD: u32 = 256;

pub(crate) const NULL: u32 = u32::MAX;

pub(crate) fn align(size: u32, boundary: u32) -> u32 {
    size.wrapping_add(boundary - 1) & !(boundary - 1)
}

pub(crate) fn align_default(size: u32) -> u32 {
    align(size, 16)
}

// Allocator header: last, origin, free lists.
const A_LAST: u32 = 0;
const A_ORIGIN: u32 = 4;
const A_BUF: u32 = 8;
pub(crate) const ALLOCATOR_SIZE: u32 = 96; // align_default(8 + 4 * MAX_INDEX)

// Block header.
const N_NEXT: u32 = 0;
const N_REF: u32 = 4;
const N_INDEX: u32 = 8;
const N_FREE_INDEX: u32 = 12;
const N_FIRST_AVAIL: u32 = 16;
const N_ENDP: u32 = 20;
pub(crate) const NODE_SIZE: u32 = 32; // align_default(24)

// Pool record.
const P_PARENT: u32 = 0;
const P_CHILD: u32 = 4;
const P_SIBLING: u32 = 8;
const P_REF: u32 = 12;
const P_CLEANUPS: u32 = 16;
const P_FREE_CLEANUPS: u32 = 20;
const P_PRE_CLEANUPS: u32 = 24;
const P_ACTIVE: u32 = 28;
const P_SELF: u32 = 32;
const P_SELF_FIRST_AVAIL: u32 = 36;
const P_BUFFERED: u32 = 40;
const P_FREE_BUFFERED: u32 = 44;
pub(crate) const POOL_SIZE: u32 = 48;

// Buffered-slab record.
const MA_SIZE: u32 = 0;
const MA_NEXT: u32 = 4;
const MA_ADDRESS: u32 = 8;
const MEMADDR_SIZE: u32 = 12;

// Per-thread context and its pool-stack nodes.
const TC_ROOT: u32 = 0;
const TC_STACK: u32 = 4;
const TC_UNUSED: u32 = 8;
pub(crate) const THREAD_CTX_SIZE: u32 = 12;

const PC_POOL: u32 = 0;
const PC_NEXT: u32 = 4;
const POOL_CTX_SIZE: u32 = 8;

/// Why a pool operation could not complete. `Grow` asks the caller to
/// grow the memory (under the thread barrier) and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolFault {
    Grow(u32),
    Bad,
}

pub(crate) type PoolResult<T> = Result<T, PoolFault>;

/// A view over one linear memory with the arena header at `mem.ctx`.
pub(crate) struct Arena<'m> {
    pub mem: &'m mut MemoryData,
}

impl<'m> Arena<'m> {
    pub fn new(mem: &'m mut MemoryData) -> Arena<'m> {
        Arena { mem }
    }

    fn base(&self) -> u32 {
        self.mem.ctx
    }

    fn get(&self, at: u32) -> PoolResult<u32> {
        let at = at as usize;
        let bytes = self.mem.data.get(at..at + 4).ok_or(PoolFault::Bad)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn put(&mut self, at: u32, value: u32) -> PoolResult<()> {
        let at = at as usize;
        let bytes = self.mem.data.get_mut(at..at + 4).ok_or(PoolFault::Bad)?;
        bytes.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn bytes_mut(&mut self, at: u32, len: u32) -> PoolResult<&mut [u8]> {
        let at = at as usize;
        self.mem.data.get_mut(at..at + len as usize).ok_or(PoolFault::Bad)
    }

    pub fn bytes(&self, at: u32, len: u32) -> PoolResult<&[u8]> {
        let at = at as usize;
        self.mem.data.get(at..at + len as usize).ok_or(PoolFault::Bad)
    }

    /// Lay down a fresh allocator header at `base` (16-aligned).
    pub fn init(mem: &'m mut MemoryData, base: u32) -> PoolResult<Arena<'m>> {
        mem.ctx = base;
        let mut arena = Arena { mem };
        arena.put(base + A_LAST, 0)?;
        arena.put(base + A_ORIGIN, align_default(base) + ALLOCATOR_SIZE)?;
        for i in 0..MAX_INDEX {
            arena.put(base + A_BUF + 4 * i, NULL)?;
        }
        Ok(arena)
    }

    // -- block allocator ---------------------------------------------------

    fn node_free_space(&self, node: u32) -> PoolResult<u32> {
        Ok(self.get(node + N_ENDP)?.wrapping_sub(self.get(node + N_FIRST_AVAIL)?))
    }

    /// Ring insert after `point`.
    fn node_insert(&mut self, node: u32, point: u32) -> PoolResult<()> {
        let pref = self.get(point + N_REF)?;
        self.put(node + N_REF, pref)?;
        self.put(pref, node)?;
        self.put(node + N_NEXT, point)?;
        self.put(point + N_REF, node + N_NEXT)
    }

    fn node_remove(&mut self, node: u32) -> PoolResult<()> {
        let refp = self.get(node + N_REF)?;
        let next = self.get(node + N_NEXT)?;
        self.put(refp, next)?;
        self.put(next + N_REF, refp)
    }

    /// Take a block of at least `in_size` usable bytes: free lists first,
    /// then the oversize sink, then the bump frontier.
    pub fn alloc_node(&mut self, in_size: u32) -> PoolResult<u32> {
        let base = self.base();
        let size = align(in_size.checked_add(NODE_SIZE).ok_or(PoolFault::Bad)?, BOUNDARY_SIZE);
        if size < in_size {
            return Err(PoolFault::Bad);
        }
        let size = size.max(MIN_ALLOC);
        let index = (size >> BOUNDARY_INDEX) - 1;

        let last = self.get(base + A_LAST)?;
        if index <= last {
            let mut i = index;
            while i <= last {
                let head = self.get(base + A_BUF + 4 * i)?;
                if head != NULL {
                    let next = self.get(head + N_NEXT)?;
                    self.put(base + A_BUF + 4 * i, next)?;
                    if next == NULL && i >= last {
                        let mut max = i;
                        while max > 0 && self.get(base + A_BUF + 4 * max)? == NULL {
                            max -= 1;
                        }
                        self.put(base + A_LAST, max)?;
                    }
                    self.put(head + N_NEXT, NULL)?;
                    self.put(head + N_FIRST_AVAIL, head + NODE_SIZE)?;
                    return Ok(head);
                }
                i += 1;
            }
        } else {
            // Walk the sink for an oversize block that fits.
            let mut refp = base + A_BUF;
            let mut node = self.get(refp)?;
            while node != NULL && index > self.get(node + N_INDEX)? {
                refp = node + N_NEXT;
                node = self.get(refp)?;
            }
            if node != NULL {
                let next = self.get(node + N_NEXT)?;
                self.put(refp, next)?;
                self.put(node + N_NEXT, NULL)?;
                self.put(node + N_FIRST_AVAIL, node + NODE_SIZE)?;
                return Ok(node);
            }
        }

        // Bump the frontier; ask for more pages if it overruns.
        let origin = self.get(base + A_ORIGIN)?;
        let end = origin as u64 + size as u64;
        if end > self.mem.size() as u64 {
            return Err(PoolFault::Grow(size / PAGE_SIZE + 1));
        }
        self.put(base + A_ORIGIN, origin + size)?;
        let node = origin;
        self.put(node + N_NEXT, NULL)?;
        self.put(node + N_REF, NULL)?;
        self.put(node + N_INDEX, index)?;
        self.put(node + N_FREE_INDEX, 0)?;
        self.put(node + N_FIRST_AVAIL, node + NODE_SIZE)?;
        self.put(node + N_ENDP, node + size)?;
        Ok(node)
    }

    /// Return a NULL-terminated chain of blocks to their size classes.
    pub fn free_node(&mut self, first: u32) -> PoolResult<()> {
        let base = self.base();
        let mut max_index = self.get(base + A_LAST)?;
        let mut node = first;
        while node != NULL {
            let next = self.get(node + N_NEXT)?;
            let index = self.get(node + N_INDEX)?;
            if index < MAX_INDEX {
                let head = self.get(base + A_BUF + 4 * index)?;
                if head == NULL && index > max_index {
                    max_index = index;
                }
                self.put(node + N_NEXT, head)?;
                self.put(base + A_BUF + 4 * index, node)?;
            } else {
                let head = self.get(base + A_BUF)?;
                self.put(node + N_NEXT, head)?;
                self.put(base + A_BUF, node)?;
            }
            node = next;
        }
        self.put(base + A_LAST, max_index)
    }

    // -- pools -------------------------------------------------------------

    fn pool_init(&mut self, node: u32) -> PoolResult<u32> {
        self.put(node + N_NEXT, node)?;
        self.put(node + N_REF, node + N_NEXT)?;
        let pool = self.get(node + N_FIRST_AVAIL)?;
        for field in
            [P_PARENT, P_CHILD, P_SIBLING, P_REF, P_CLEANUPS, P_FREE_CLEANUPS, P_PRE_CLEANUPS]
        {
            self.put(pool + field, NULL)?;
        }
        self.put(pool + P_ACTIVE, node)?;
        self.put(pool + P_SELF, node)?;
        self.put(pool + P_BUFFERED, NULL)?;
        self.put(pool + P_FREE_BUFFERED, NULL)?;
        let first_avail = align_default(pool + POOL_SIZE);
        self.put(pool + P_SELF_FIRST_AVAIL, first_avail)?;
        self.put(node + N_FIRST_AVAIL, first_avail)?;
        Ok(pool)
    }

    /// A pool with no parent.
    pub fn pool_create(&mut self, init_alloc: u32) -> PoolResult<u32> {
        let want = init_alloc.max(MIN_ALLOC);
        let node = self.alloc_node(want - NODE_SIZE)?;
        self.pool_init(node)
    }

    /// A child pool, linked into the parent's child list.
    pub fn pool_make_child(&mut self, parent: u32) -> PoolResult<u32> {
        let node = self.alloc_node(MIN_ALLOC - NODE_SIZE)?;
        let pool = self.pool_init(node)?;
        self.put(pool + P_PARENT, parent)?;
        let sibling = self.get(parent + P_CHILD)?;
        self.put(pool + P_SIBLING, sibling)?;
        if sibling != NULL {
            self.put(sibling + P_REF, pool + P_SIBLING)?;
        }
        self.put(parent + P_CHILD, pool)?;
        self.put(pool + P_REF, parent + P_CHILD)?;
        Ok(pool)
    }

    /// Bump-allocate from the pool's active block, pulling in (or
    /// allocating) another block when it runs dry. Blocks stay ring-sorted
    /// by remaining space.
    pub fn pool_palloc(&mut self, pool: u32, in_size: u32) -> PoolResult<u32> {
        let size = align_default(in_size);
        if size < in_size {
            return Err(PoolFault::Bad);
        }
        let active = self.get(pool + P_ACTIVE)?;
        let first_avail = self.get(active + N_FIRST_AVAIL)?;
        let endp = self.get(active + N_ENDP)?;
        if size <= endp.wrapping_sub(first_avail) {
            self.put(active + N_FIRST_AVAIL, first_avail + size)?;
            return Ok(first_avail);
        }

        let mut node = self.get(active + N_NEXT)?;
        if node != NULL && node != active && size <= self.node_free_space(node)? {
            self.node_remove(node)?;
        } else {
            node = self.alloc_node(size)?;
        }
        self.put(node + N_FREE_INDEX, 0)?;
        let mem = self.get(node + N_FIRST_AVAIL)?;
        self.put(node + N_FIRST_AVAIL, mem + size)?;
        self.node_insert(node, active)?;
        self.put(pool + P_ACTIVE, node)?;

        let free_index =
            (align(endp.wrapping_sub(first_avail) + 1, BOUNDARY_SIZE) - BOUNDARY_SIZE)
                >> BOUNDARY_INDEX;
        self.put(active + N_FREE_INDEX, free_index)?;
        let next = self.get(active + N_NEXT)?;
        if free_index >= self.get(next + N_FREE_INDEX)? {
            return Ok(mem);
        }
        let mut n = next;
        loop {
            n = self.get(n + N_NEXT)?;
            if free_index >= self.get(n + N_FREE_INDEX)? {
                break;
            }
        }
        self.node_remove(active)?;
        self.node_insert(active, n)?;
        Ok(mem)
    }

    /// Search the buffered slabs for one of size >= wanted and <= 2x
    /// wanted; fall back to a fresh bump allocation.
    fn pool_alloc_buf(&mut self, pool: u32, size: &mut u32) -> PoolResult<u32> {
        let want = *size;
        let mut lastp = pool + P_BUFFERED;
        let mut addr = self.get(lastp)?;
        while addr != NULL {
            let slab_size = self.get(addr + MA_SIZE)?;
            if slab_size > want * 2 {
                break;
            }
            if slab_size >= want {
                self.put(lastp, self.get(addr + MA_NEXT)?)?;
                let free = self.get(pool + P_FREE_BUFFERED)?;
                self.put(addr + MA_NEXT, free)?;
                self.put(pool + P_FREE_BUFFERED, addr)?;
                *size = slab_size;
                return self.get(addr + MA_ADDRESS);
            }
            lastp = addr + MA_NEXT;
            addr = self.get(addr + MA_NEXT)?;
        }
        self.pool_palloc(pool, want)
    }

    /// Record a returned slab in the size-sorted buffered list.
    fn pool_free_buf(&mut self, pool: u32, ptr: u32, size: u32) -> PoolResult<()> {
        let free = self.get(pool + P_FREE_BUFFERED)?;
        let record = if free != NULL {
            self.put(pool + P_FREE_BUFFERED, self.get(free + MA_NEXT)?)?;
            free
        } else {
            self.pool_palloc(pool, MEMADDR_SIZE)?
        };
        self.put(record + MA_SIZE, size)?;
        self.put(record + MA_ADDRESS, ptr)?;

        let mut lastp = pool + P_BUFFERED;
        let mut cur = self.get(lastp)?;
        while cur != NULL && self.get(cur + MA_SIZE)? < size {
            lastp = cur + MA_NEXT;
            cur = self.get(cur + MA_NEXT)?;
        }
        self.put(record + MA_NEXT, cur)?;
        self.put(lastp, record)
    }

    pub fn pool_alloc(&mut self, pool: u32, size: &mut u32) -> PoolResult<u32> {
        if *size >= BLOCK_THRESHOLD {
            self.pool_alloc_buf(pool, size)
        } else {
            self.pool_palloc(pool, *size)
        }
    }

    pub fn pool_free(&mut self, pool: u32, ptr: u32, size: u32) -> PoolResult<()> {
        if size >= BLOCK_THRESHOLD {
            self.pool_free_buf(pool, ptr, size)
        } else {
            Ok(())
        }
    }

    /// Reset: destroy child pools, free every block but the pool's own,
    /// empty the buffered lists. Cleanup chains run first (nothing
    /// registers them through the guest interface, so they are simply
    /// emptied).
    pub fn pool_clear(&mut self, pool: u32) -> PoolResult<()> {
        self.put(pool + P_PRE_CLEANUPS, NULL)?;
        loop {
            let child = self.get(pool + P_CHILD)?;
            if child == NULL {
                break;
            }
            self.pool_destroy(child)?;
        }
        self.put(pool + P_CLEANUPS, NULL)?;
        self.put(pool + P_FREE_CLEANUPS, NULL)?;

        let own = self.get(pool + P_SELF)?;
        self.put(pool + P_ACTIVE, own)?;
        self.put(own + N_FIRST_AVAIL, self.get(pool + P_SELF_FIRST_AVAIL)?)?;
        self.put(pool + P_BUFFERED, NULL)?;
        self.put(pool + P_FREE_BUFFERED, NULL)?;

        if self.get(own + N_NEXT)? == own {
            return Ok(());
        }
        // Break the ring into a chain and free everything after self.
        let refp = self.get(own + N_REF)?;
        self.put(refp, NULL)?;
        let rest = self.get(own + N_NEXT)?;
        if rest != NULL {
            self.free_node(rest)?;
        }
        self.put(own + N_NEXT, own)?;
        self.put(own + N_REF, own + N_NEXT)
    }

    /// Clear plus unlink from the parent and free the pool's own block.
    pub fn pool_destroy(&mut self, pool: u32) -> PoolResult<()> {
        self.put(pool + P_PRE_CLEANUPS, NULL)?;
        loop {
            let child = self.get(pool + P_CHILD)?;
            if child == NULL {
                break;
            }
            self.pool_destroy(child)?;
        }
        self.put(pool + P_CLEANUPS, NULL)?;

        let parent = self.get(pool + P_PARENT)?;
        if parent != NULL {
            let sibling = self.get(pool + P_SIBLING)?;
            let refp = self.get(pool + P_REF)?;
            self.put(refp, sibling)?;
            if sibling != NULL {
                self.put(sibling + P_REF, refp)?;
            }
        }

        let own = self.get(pool + P_SELF)?;
        let refp = self.get(own + N_REF)?;
        self.put(refp, NULL)?;
        self.free_node(own)
    }

    // -- per-thread context ------------------------------------------------

    /// Create the thread-context record inside `pool` and push the pool
    /// as the initial stack entry.
    pub fn ctx_create(&mut self, pool: u32) -> PoolResult<u32> {
        let ctx = self.pool_palloc(pool, THREAD_CTX_SIZE)?;
        self.put(ctx + TC_ROOT, pool)?;
        self.put(ctx + TC_STACK, NULL)?;
        self.put(ctx + TC_UNUSED, NULL)?;
        self.ctx_push(ctx, pool)?;
        Ok(ctx)
    }

    pub fn ctx_push(&mut self, ctx: u32, pool: u32) -> PoolResult<()> {
        let unused = self.get(ctx + TC_UNUSED)?;
        let node = if unused != NULL {
            self.put(ctx + TC_UNUSED, self.get(unused + PC_NEXT)?)?;
            unused
        } else {
            let root = self.get(ctx + TC_ROOT)?;
            self.pool_palloc(root, POOL_CTX_SIZE)?
        };
        self.put(node + PC_POOL, pool)?;
        self.put(node + PC_NEXT, self.get(ctx + TC_STACK)?)?;
        self.put(ctx + TC_STACK, node)
    }

    pub fn ctx_pop(&mut self, ctx: u32) -> PoolResult<()> {
        let top = self.get(ctx + TC_STACK)?;
        if top == NULL {
            return Err(PoolFault::Bad);
        }
        self.put(ctx + TC_STACK, self.get(top + PC_NEXT)?)?;
        self.put(top + PC_NEXT, self.get(ctx + TC_UNUSED)?)?;
        self.put(ctx + TC_UNUSED, top)
    }

    pub fn ctx_top(&self, ctx: u32) -> PoolResult<u32> {
        let top = self.get(ctx + TC_STACK)?;
        if top == NULL {
            return Err(PoolFault::Bad);
        }
        self.get(top + PC_POOL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Limits;

    fn test_memory(pages: u32) -> MemoryData {
        let mut mem = MemoryData::new(Limits::new(pages, None));
        mem.resize(pages * PAGE_SIZE);
        mem
    }

    #[test]
    fn bump_then_reuse() {
        let mut mem = test_memory(4);
        let mut arena = Arena::init(&mut mem, 64).unwrap();
        let a = arena.alloc_node(100).unwrap();
        let b = arena.alloc_node(100).unwrap();
        assert_ne!(a, b);
        assert_eq!(arena.node_free_space(a).unwrap(), MIN_ALLOC - NODE_SIZE);
        arena.free_node(a).unwrap();
        let c = arena.alloc_node(100).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn pool_allocations_do_not_overlap() {
        let mut mem = test_memory(8);
        let mut arena = Arena::init(&mut mem, 0).unwrap();
        let pool = arena.pool_create(MIN_ALLOC).unwrap();
        let mut seen: Vec<(u32, u32)> = Vec::new();
        for size in [8u32, 24, 64, 128, 200, 512, 4000] {
            let ptr = arena.pool_palloc(pool, size).unwrap();
            let aligned = align_default(size);
            for &(start, len) in &seen {
                assert!(ptr + aligned <= start || ptr >= start + len, "overlap at {ptr:#x}");
            }
            seen.push((ptr, aligned));
        }
    }

    #[test]
    fn clear_resets_the_bump_point() {
        let mut mem = test_memory(8);
        let mut arena = Arena::init(&mut mem, 0).unwrap();
        let pool = arena.pool_create(MIN_ALLOC).unwrap();
        let first = arena.pool_palloc(pool, 64).unwrap();
        let _ = arena.pool_palloc(pool, 6000).unwrap();
        arena.pool_clear(pool).unwrap();
        let again = arena.pool_palloc(pool, 64).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn child_pools_unlink_on_destroy() {
        let mut mem = test_memory(16);
        let mut arena = Arena::init(&mut mem, 0).unwrap();
        let root = arena.pool_create(MIN_ALLOC).unwrap();
        let a = arena.pool_make_child(root).unwrap();
        let b = arena.pool_make_child(root).unwrap();
        arena.pool_destroy(a).unwrap();
        // b is still linked and usable.
        let ptr = arena.pool_palloc(b, 32).unwrap();
        assert_ne!(ptr, 0);
        arena.pool_destroy(root).unwrap();
    }

    #[test]
    fn buffered_slabs_are_reused() {
        let mut mem = test_memory(8);
        let mut arena = Arena::init(&mut mem, 0).unwrap();
        let pool = arena.pool_create(MIN_ALLOC).unwrap();
        let mut size = 512u32;
        let first = arena.pool_alloc(pool, &mut size).unwrap();
        arena.pool_free(pool, first, size).unwrap();
        let mut size2 = 300u32;
        let second = arena.pool_alloc(pool, &mut size2).unwrap();
        assert_eq!(first, second);
        assert_eq!(size2, 512);
    }

    #[test]
    fn exhaustion_requests_growth() {
        let mut mem = test_memory(1);
        let mut arena = Arena::init(&mut mem, 0).unwrap();
        let mut taken = 0u32;
        loop {
            match arena.alloc_node(MIN_ALLOC - NODE_SIZE) {
                Ok(_) => taken += 1,
                Err(PoolFault::Grow(pages)) => {
                    assert!(pages >= 1);
                    break;
                }
                Err(PoolFault::Bad) => panic!("unexpected fault"),
            }
        }
        assert!(taken > 0);
    }

    #[test]
    fn ctx_stack_push_pop() {
        let mut mem = test_memory(8);
        let mut arena = Arena::init(&mut mem, 0).unwrap();
        let root = arena.pool_create(MIN_ALLOC).unwrap();
        let ctx = arena.ctx_create(root).unwrap();
        assert_eq!(arena.ctx_top(ctx).unwrap(), root);
        let child = arena.pool_make_child(root).unwrap();
        arena.ctx_push(ctx, child).unwrap();
        assert_eq!(arena.ctx_top(ctx).unwrap(), child);
        arena.ctx_pop(ctx).unwrap();
        assert_eq!(arena.ctx_top(ctx).unwrap(), root);
    }
}
