//! The segment table: owns every live segment, allocates, recycles, and
//! resizes them (§4.2).
//!
//! Segments are addressed by index rather than by pointer — reuse of a slot
//! across an unmap/map cycle can never dangle, because the identifier always
//! refers back into the same owning `Vec` (spec.md §9, "Pointer-heavy segment
//! table"). `Vec`'s own amortized-doubling growth satisfies the "amortized
//! O(1) per map" requirement without hand-tracked capacity fields.

use tracing::trace;

use crate::consts::{vm_debug_assert, CODE_SEGMENT, FREE_POOL_INITIAL_CAPACITY, SEGMENT_TABLE_INITIAL_CAPACITY};
use crate::error::VmFatalError;
use crate::word::Word;

/// A 32-bit segment identifier. Stable across unmap/remap cycles of the same
/// slot (the slot's storage may be reused, but the identifier value is not
/// reassigned until a later `map` call picks it back up from the free pool).
pub type SegmentId = u32;

#[derive(Debug)]
struct Segment {
    words: Vec<Word>,
}

impl Segment {
    /// Zero-initialized segment of `size` words, failing if the host can't
    /// grow to that capacity (§7's "fails only on host allocation failure").
    fn try_zeroed(size: usize) -> Result<Self, VmFatalError> {
        let mut words = Vec::new();
        words
            .try_reserve_exact(size)
            .map_err(|_| VmFatalError::SegmentAllocation { requested_words: size })?;
        words.resize(size, 0);
        Ok(Self { words })
    }

    /// Resizes to exactly `size` words, retaining (and re-zeroing) existing
    /// backing storage when it's already large enough, matching the "grown
    /// but never shrunk" storage-reuse rule (§3).
    fn try_reset_to(&mut self, size: usize) -> Result<(), VmFatalError> {
        if self.words.len() < size {
            self.words
                .try_reserve_exact(size - self.words.len())
                .map_err(|_| VmFatalError::SegmentAllocation { requested_words: size })?;
            self.words.resize(size, 0);
        } else {
            self.words.truncate(size);
        }
        self.words.iter_mut().for_each(|w| *w = 0);
        Ok(())
    }
}

/// Owns every live segment. Segment 0 is always live and is the code
/// segment; the program counter indexes into it.
///
/// `slots_base` is the first field and the struct is `#[repr(C)]` so it
/// sits at a fixed, predictable offset from a `SegmentTable` reference:
/// the JIT's Seg-Load/Seg-Store emitters read it directly off the VM
/// context pointer with a single displacement-free load, the first of the
/// "two pointer indirections" spec.md §4.4 describes (segment-table
/// pointer, then the indexed segment base). `slots` is never read by Rust
/// code — it exists purely so that indirection has somewhere to point —
/// and is kept in lockstep with `segments` by [`Self::sync_slot`], called
/// after every mutation that could move a segment's backing storage.
/// `SegmentTable` is deliberately not `Clone`: a shallow copy would alias
/// `slots`' raw pointers against the original's `Vec<Word>` storage.
#[repr(C)]
#[derive(Debug)]
pub struct SegmentTable {
    slots_base: *mut *mut Word,
    slots: Vec<*mut Word>,
    segments: Vec<Option<Segment>>,
    free: Vec<SegmentId>,
}

impl SegmentTable {
    /// Creates a table whose segment 0 holds `code`, exactly the contents of
    /// the loaded program image.
    pub fn new(code: Vec<Word>) -> Self {
        let mut segments = Vec::with_capacity(SEGMENT_TABLE_INITIAL_CAPACITY);
        segments.push(Some(Segment { words: code }));

        let mut table = Self {
            slots_base: std::ptr::null_mut(),
            slots: Vec::with_capacity(SEGMENT_TABLE_INITIAL_CAPACITY),
            segments,
            free: Vec::with_capacity(FREE_POOL_INITIAL_CAPACITY),
        };
        table.sync_slot(CODE_SEGMENT);
        table
    }

    /// Refreshes `slots[id]` (and `slots_base`, in case pushing reallocated
    /// `slots`) from `segments[id]`'s current backing pointer. Must be
    /// called after any mutation that creates, moves, or clears a segment's
    /// storage — `map`, `unmap`, and `load` all do.
    fn sync_slot(&mut self, id: SegmentId) {
        let ptr = match &mut self.segments[id as usize] {
            Some(segment) => segment.words.as_mut_ptr(),
            None => std::ptr::null_mut(),
        };

        let idx = id as usize;
        match self.slots.get_mut(idx) {
            Some(slot) => *slot = ptr,
            None => {
                debug_assert_eq!(idx, self.slots.len(), "segment ids are assigned densely");
                self.slots.push(ptr);
            }
        }
        self.slots_base = self.slots.as_mut_ptr();
    }

    /// Maps a fresh, zero-initialized segment of `size` words and returns its
    /// identifier. Pulls from the free pool (LIFO) first; on a miss, issues a
    /// new identifier equal to the current high-water mark.
    ///
    /// # Errors
    ///
    /// Returns [`VmFatalError::SegmentAllocation`] only if the host refuses
    /// to grow the segment's backing storage (§4.2, §7); never fails on
    /// account of VM-level state such as a bad `size`.
    pub fn map(&mut self, size: usize) -> Result<SegmentId, VmFatalError> {
        if let Some(id) = self.free.pop() {
            let slot = self.segments[id as usize]
                .get_or_insert_with(|| Segment { words: Vec::new() });
            slot.try_reset_to(size)?;
            self.sync_slot(id);
            trace!(id, size, "recycled segment");
            Ok(id)
        } else {
            let id = self.segments.len() as SegmentId;
            let segment = Segment::try_zeroed(size)?;
            self.segments.push(Some(segment));
            self.sync_slot(id);
            trace!(id, size, "mapped fresh segment");
            Ok(id)
        }
    }

    /// Returns `id` to the free pool.
    ///
    /// # Panics
    ///
    /// Panics if `id` is segment 0 or is not currently live, and either
    /// ordinary debug assertions or the `debug-assertions-extra` feature are
    /// enabled; both are programmer errors in the host program (§3, §4.2).
    /// Otherwise (a release build without the feature) this is undefined
    /// behavior per spec, matching §7's "undefined in release" classification.
    pub fn unmap(&mut self, id: SegmentId) {
        vm_debug_assert!(id != CODE_SEGMENT, "unmapping segment 0 is undefined behavior");
        vm_debug_assert!(
            self.segments
                .get(id as usize)
                .map(|s| s.is_some())
                .unwrap_or(false),
            "unmap of a non-live segment {id}",
        );

        if let Some(slot) = self.segments.get_mut(id as usize) {
            *slot = None;
        }
        self.sync_slot(id);
        self.free.push(id);
        trace!(id, "unmapped segment");
    }

    /// Copies segment `id` wholesale into segment 0, resizing segment 0's
    /// backing store as needed. A no-op when `id == 0` (pure jump, per
    /// §4.1's Load-Program semantics — the caller is responsible for the PC
    /// assignment).
    pub fn load(&mut self, id: SegmentId) {
        if id == CODE_SEGMENT {
            return;
        }

        let source = self.segments[id as usize]
            .as_ref()
            .expect("load from unmapped segment")
            .words
            .clone();

        trace!(id, len = source.len(), "loading segment into segment 0");
        self.segments[CODE_SEGMENT as usize] = Some(Segment { words: source });
        self.sync_slot(CODE_SEGMENT);
    }

    /// Reads word `offset` of segment `id`. The VM semantic layer does not
    /// require bounds checking (the program is trusted, §4.2); this still
    /// panics on an out-of-range offset because Rust has no other way to
    /// read past a `Vec`'s end.
    pub fn read(&self, id: SegmentId, offset: usize) -> Word {
        self.segment(id).words[offset]
    }

    /// Writes `value` to word `offset` of segment `id`.
    pub fn write(&mut self, id: SegmentId, offset: usize, value: Word) {
        self.segment_mut(id).words[offset] = value;
    }

    /// The current contents of segment 0, i.e. the code that drives the
    /// program counter.
    pub fn code(&self) -> &[Word] {
        &self.segment(CODE_SEGMENT).words
    }

    /// Number of words currently held by segment `id`.
    pub fn len(&self, id: SegmentId) -> usize {
        self.segment(id).words.len()
    }

    fn segment(&self, id: SegmentId) -> &Segment {
        self.segments[id as usize]
            .as_ref()
            .expect("access to unmapped segment")
    }

    fn segment_mut(&mut self, id: SegmentId) -> &mut Segment {
        self.segments[id as usize]
            .as_mut()
            .expect("access to unmapped segment")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_returns_zeroed_segment() {
        let mut table = SegmentTable::new(vec![]);
        let id = table.map(4).unwrap();
        for i in 0..4 {
            assert_eq!(table.read(id, i), 0);
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut table = SegmentTable::new(vec![]);
        let id = table.map(1).unwrap();
        table.write(id, 0, 0xCAFE);
        assert_eq!(table.read(id, 0), 0xCAFE);
    }

    #[test]
    fn unmap_then_map_recycles_lifo() {
        let mut table = SegmentTable::new(vec![]);
        let a = table.map(1).unwrap();
        let b = table.map(1).unwrap();
        table.unmap(a);
        let c = table.map(1).unwrap();
        // The most recently freed identifier is the one reused.
        assert_eq!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn recycled_storage_is_rezeroed() {
        let mut table = SegmentTable::new(vec![]);
        let a = table.map(4).unwrap();
        table.write(a, 0, 0xFFFF_FFFF);
        table.unmap(a);

        let b = table.map(2).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.read(b, 0), 0);
        assert_eq!(table.len(b), 2);
    }

    #[test]
    fn load_replaces_segment_zero() {
        let mut table = SegmentTable::new(vec![1, 2, 3]);
        let id = table.map(2).unwrap();
        table.write(id, 0, 10);
        table.write(id, 1, 20);

        table.load(id);

        assert_eq!(table.code(), &[10, 20]);
    }

    #[test]
    fn load_of_zero_is_a_no_op() {
        let mut table = SegmentTable::new(vec![1, 2, 3]);
        table.load(CODE_SEGMENT);
        assert_eq!(table.code(), &[1, 2, 3]);
    }

    #[test]
    #[should_panic]
    fn unmap_of_zero_is_rejected_in_debug() {
        let mut table = SegmentTable::new(vec![]);
        table.unmap(CODE_SEGMENT);
    }
}
