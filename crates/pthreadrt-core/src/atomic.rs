//! Word-sized atomic primitives.
//!
//! Thin, sequentially consistent helpers over `std::sync::atomic` in the
//! shapes the runtime's lock-free counters and flag words are written
//! against. Bit operations index into a slice of words, low bit first.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};

const WORD_BITS: usize = usize::BITS as usize;

/// Stores `new` if the cell holds `current`. Returns the previous value.
pub fn compare_and_swap(cell: &AtomicIsize, current: isize, new: isize) -> isize {
    match cell.compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(prev) | Err(prev) => prev,
    }
}

/// Stores `value` and returns the previous value.
pub fn exchange(cell: &AtomicIsize, value: isize) -> isize {
    cell.swap(value, Ordering::SeqCst)
}

/// Adds `delta` and returns the previous value.
pub fn exchange_add(cell: &AtomicIsize, delta: isize) -> isize {
    cell.fetch_add(delta, Ordering::SeqCst)
}

/// Adds `delta` and returns the new value.
pub fn add(cell: &AtomicIsize, delta: isize) -> isize {
    cell.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta)
}

fn locate(bit: usize, words: &[AtomicUsize]) -> Option<(&AtomicUsize, usize)> {
    words
        .get(bit / WORD_BITS)
        .map(|word| (word, 1usize << (bit % WORD_BITS)))
}

/// Sets `bit` and returns whether it was already set. Out-of-range bits
/// report set.
pub fn test_and_set_bit(bit: usize, words: &[AtomicUsize]) -> bool {
    match locate(bit, words) {
        Some((word, mask)) => word.fetch_or(mask, Ordering::SeqCst) & mask != 0,
        None => true,
    }
}

/// Clears `bit` and returns whether it was set.
pub fn test_and_clear_bit(bit: usize, words: &[AtomicUsize]) -> bool {
    match locate(bit, words) {
        Some((word, mask)) => word.fetch_and(!mask, Ordering::SeqCst) & mask != 0,
        None => false,
    }
}

pub fn test_bit(bit: usize, words: &[AtomicUsize]) -> bool {
    locate(bit, words).is_some_and(|(word, mask)| word.load(Ordering::SeqCst) & mask != 0)
}
