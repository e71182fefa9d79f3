//! Per-pattern C loop skeletons.
//!
//! Each skeleton is a kernel body with `${...}` placeholders for the element types, vector
//! primitives, operand expressions and the operator's unrolled statements. The operand bound to
//! `${source0}` is always the full-size one; the broadcast side, if any, is `${source1}`.

use std::fmt;

use crate::bcast::BcastPattern;

/// Returns the skeleton implementing `pattern`.
pub fn skeleton(pattern: BcastPattern) -> &'static str {
    match pattern {
        BcastPattern::VecVec => include_str!("skeletons/vec_vec.c"),
        BcastPattern::VecScalar => include_str!("skeletons/vec_scalar.c"),
        BcastPattern::VecBcast101 => include_str!("skeletons/vec_bcast101.c"),
        BcastPattern::VecBcast101xX => include_str!("skeletons/vec_bcast101xx.c"),
        BcastPattern::VecBcast111C => include_str!("skeletons/vec_bcast111c.c"),
        BcastPattern::VecBcast110 => include_str!("skeletons/vec_bcast110.c"),
        BcastPattern::VecBv => include_str!("skeletons/vec_bv.c"),
        BcastPattern::Naive => include_str!("skeletons/naive.c"),
        BcastPattern::DynamicType => include_str!("skeletons/dynamic.c"),
    }
}

/// How the vectorized skeletons split a run of `nr_elem` contiguous elements.
///
/// The main loop consumes two vectors per iteration, a secondary loop one vector, and a scalar
/// loop whatever is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSchedule {
    pub width: u64,
    pub double_tiles: u64,
    pub single_tiles: u64,
    pub remainder: u64,
}

impl LoopSchedule {
    pub fn new(nr_elem: u64, width: u32) -> Self {
        let width = u64::from(width);
        assert!(width > 0, "vector width must be positive");
        let double_tiles = nr_elem / (2 * width);
        let rest = nr_elem - double_tiles * 2 * width;
        LoopSchedule {
            width,
            double_tiles,
            single_tiles: rest / width,
            remainder: rest % width,
        }
    }

    /// The number of elements handled by all three loops together.
    pub fn covered(&self) -> u64 {
        self.double_tiles * 2 * self.width + self.single_tiles * self.width + self.remainder
    }
}

impl fmt::Display for LoopSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} x {} + {} x {} + {} scalar",
            self.double_tiles,
            2 * self.width,
            self.single_tiles,
            self.width,
            self.remainder
        )
    }
}
