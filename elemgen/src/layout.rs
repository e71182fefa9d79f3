//! Row-major strides and the strided walk used by the non-vectorized broadcast paths.
//!
//! Generated code performs the same walk at run time through the `NoconIter` helpers in
//! `codegen/partials/runtime.c`; [StridedIter] is its model on the Rust side.

use smallvec::SmallVec;

use crate::tensorspec::MAX_RANK;

pub type Strides = SmallVec<[u64; MAX_RANK]>;

/// Returns the row-major strides of a contiguous buffer with the given extents.
pub fn row_major_strides(dims: &[u32]) -> Strides {
    let mut strides: Strides = SmallVec::from_elem(0, dims.len());
    let mut acc = 1u64;
    for (stride, &dim) in strides.iter_mut().zip(dims).rev() {
        *stride = acc;
        acc *= u64::from(dim);
    }
    strides
}

/// Returns strides which walk a row-major buffer of extents `dims` as though it had extents
/// `out_dims`.
///
/// `dims` is right-aligned against `out_dims`. Missing leading axes, and axes of size one which
/// are broadcast, get a stride of zero.
pub fn broadcast_strides(dims: &[u32], out_dims: &[u32]) -> Strides {
    assert!(
        dims.len() <= out_dims.len(),
        "cannot broadcast rank {} to rank {}",
        dims.len(),
        out_dims.len()
    );
    let offset = out_dims.len() - dims.len();
    let source_strides = row_major_strides(dims);
    (0..out_dims.len())
        .map(|i| {
            if i < offset || dims[i - offset] == 1 {
                0
            } else {
                debug_assert_eq!(dims[i - offset], out_dims[i]);
                source_strides[i - offset]
            }
        })
        .collect()
}

/// Walks a broadcast operand in the row-major order of the output, tracking the flat offset into
/// the operand's buffer.
#[derive(Debug, Clone)]
pub struct StridedIter {
    dims: SmallVec<[u32; MAX_RANK]>,
    strides: Strides,
    counters: SmallVec<[u32; MAX_RANK]>,
    offset: u64,
}

impl StridedIter {
    /// Creates an iterator over an operand of extents `dims` broadcast to `out_dims`.
    pub fn new(dims: &[u32], out_dims: &[u32]) -> Self {
        StridedIter {
            dims: SmallVec::from_slice(out_dims),
            strides: broadcast_strides(dims, out_dims),
            counters: SmallVec::from_elem(0, out_dims.len()),
            offset: 0,
        }
    }

    /// The flat buffer offset of the current position.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Steps to the next output position.
    ///
    /// Increments the innermost counter and carries into outer axes. Broadcast axes are still
    /// counted, but their zero stride leaves the offset unchanged. After the last position the
    /// walk wraps back to offset zero.
    pub fn advance(&mut self) {
        for axis in (0..self.dims.len()).rev() {
            self.counters[axis] += 1;
            self.offset += self.strides[axis];
            if self.counters[axis] < self.dims[axis] {
                return;
            }
            self.offset -= self.strides[axis] * u64::from(self.counters[axis]);
            self.counters[axis] = 0;
        }
    }

    /// Returns the offsets of every output position, in row-major output order.
    pub fn offsets(mut self) -> impl Iterator<Item = u64> {
        let total = self.dims.iter().map(|&d| u64::from(d)).product::<u64>();
        (0..total).map(move |_| {
            let current = self.offset;
            self.advance();
            current
        })
    }
}
