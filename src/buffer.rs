//! # Working buffer
//!
//! One contiguous arena of integer slots, allocated once for the largest working set and
//! rewritten in place for every trial. A trial links the slots `0, stride, 2*stride, ..`
//! below `csize` into a single closed chain: each slot holds the index of the next one and
//! the last holds 0. Walking the chain is a pointer chase, every load address depends on the
//! previous load, so the prefetchers can't run ahead of it.
use crate::error::SweepError;
use crate::stopwatch::opaque;
use std::ops::Range;

/// Native integer slot holding the index of the next slot in the chain
pub type Slot = u32;

pub struct WorkingBuffer {
    slots: Vec<Slot>,
}

impl WorkingBuffer {
    /// Reserve and zero `elements` slots, failing instead of aborting when memory is short
    pub fn allocate(elements: usize) -> Result<Self, SweepError> {
        let bytes = elements.saturating_mul(std::mem::size_of::<Slot>());
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(elements)
            .map_err(|_| SweepError::Allocation { bytes })?;
        // touch every page now so first-use faults don't land in the smallest trials
        slots.resize(elements, 0);
        Ok(WorkingBuffer { slots })
    }

    /// Capacity in elements
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Virtual address span of the slots
    pub fn address_range(&self) -> Range<usize> {
        let span = self.slots.as_ptr_range();
        span.start as usize..span.end as usize
    }

    /// Link the slots of `[0, csize)` spaced `stride` apart into a closed chain through 0.
    ///
    /// Slots not on the chain, and everything at or above `csize`, keep whatever a previous
    /// trial left there; the returned [`Cycle`] only ever reads inside `[0, csize)`.
    pub fn build_cycle(&mut self, csize: usize, stride: usize) -> Cycle<'_> {
        assert!(stride > 0 && stride <= csize / 2, "stride {} out of range for {}", stride, csize);
        assert!(csize <= self.slots.len(), "working set {} exceeds buffer {}", csize, self.slots.len());

        let chain = &mut self.slots[..csize];
        let mut idx = 0;
        while idx < csize {
            chain[idx] = (idx + stride) as Slot;
            idx += stride;
        }
        chain[idx - stride] = 0;

        Cycle {
            slots: &self.slots[..csize],
            stride,
        }
    }
}

/// A constructed chain over the first `csize` slots of a [`WorkingBuffer`]
pub struct Cycle<'a> {
    slots: &'a [Slot],
    stride: usize,
}

impl Cycle<'_> {
    /// Working-set size, in elements
    pub fn csize(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots on the chain
    pub fn chain_len(&self) -> usize {
        self.slots.len() / self.stride
    }

    /// Index stored after `idx`
    pub fn next_index(&self, idx: usize) -> usize {
        self.slots[idx] as usize
    }

    /// Walk the whole chain from slot 0 back to slot 0, `stride` times over, so every
    /// repetition performs `csize` dependent loads. Returns the final index (always 0).
    #[inline(never)]
    pub fn traverse(&self) -> usize {
        self.chase(|| {})
    }

    /// The traversal loop nest, calling `on_load` after every load
    #[inline(always)]
    fn chase<F: FnMut()>(&self, mut on_load: F) -> usize {
        let ptr = self.slots.as_ptr();
        let mut next = 0usize;
        for _ in 0..self.stride {
            next = opaque(0);
            loop {
                // every stored value was written by `build_cycle` and is below `csize`
                next = unsafe { *ptr.add(next) } as usize;
                on_load();
                if next == 0 {
                    break;
                }
            }
        }
        next
    }
}
