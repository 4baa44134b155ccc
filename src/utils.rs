//! Alignment arithmetic shared by the block and region code.

use std::mem;

/// Machine word size. Every block size is a multiple of it, so every header
/// written inside a region stays naturally aligned.
pub(crate) const WORD_SIZE: usize = mem::size_of::<usize>();

/// Rounds `value` up to the next multiple of `alignment`, which must be a
/// power of two. Block sizes are rounded to [`WORD_SIZE`], region lengths to
/// the page size.
pub fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// [`align`] for sizes coming straight from callers: `None` when rounding up
/// would wrap around.
pub fn checked_align(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}
