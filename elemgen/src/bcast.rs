//! Classifies how two operand shapes broadcast against the output, and decides operand order.

use log::debug;
use std::fmt::{self, Display};

use crate::tensorspec::TensorSpec;

/// The canonical broadcast relationships. Each has exactly one code skeleton.
///
/// Mirrored relationships (e.g., a scalar on the left versus the right) share a pattern and are
/// distinguished by [Bcast::broadcast_first].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BcastPattern {
    /// Both operands have the output's shape.
    VecVec,
    /// One operand is a single element.
    VecScalar,
    /// NCHW with a per-channel operand of shape `[1, C, 1, 1]`.
    VecBcast101,
    /// NCHWx with a per-channel operand of shape `[1, C, 1, 1, V]`, where `V` is the vector width.
    VecBcast101xX,
    /// The broadcast operand varies only along the last axis: `[1, ..., 1, C]`.
    VecBcast111C,
    /// The broadcast operand varies per leading row and is constant along the trailing axes.
    VecBcast110,
    /// The broadcast operand is size-one on leading axes and full on a trailing run of axes.
    VecBv,
    /// Any other static broadcast. Walked element-by-element with strided offsets.
    Naive,
    /// Some extent is unknown until run time.
    DynamicType,
}

/// The result of classifying an operand pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bcast {
    pub pattern: BcastPattern,
    /// `true` if operand 0 (rather than operand 1) is the broadcast side of a pattern which has
    /// one, such as `SCALAR_VEC` or `BCAST101_VEC`.
    pub broadcast_first: bool,
}

/// The run-time branches of the [BcastPattern::DynamicType] skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicBranch {
    Elementwise,
    ScalarBroadcast,
    ChannelBroadcast,
    Strided,
}

type Rule = fn(small: &[u32], out: &[u32], simd_width: u32) -> bool;

/// Rules for patterns with a designated broadcast side, in precedence order.
const SIDED_RULES: [(BcastPattern, Rule); 6] = [
    (BcastPattern::VecScalar, is_scalar),
    (BcastPattern::VecBcast101, is_bcast101),
    (BcastPattern::VecBcast101xX, is_bcast101xx),
    (BcastPattern::VecBcast111C, is_bcast111c),
    (BcastPattern::VecBcast110, is_bcast110),
    (BcastPattern::VecBv, is_bv),
];

impl BcastPattern {
    /// Returns `true` if one operand of this pattern is the broadcast side.
    pub fn is_sided(&self) -> bool {
        !matches!(
            self,
            BcastPattern::VecVec | BcastPattern::Naive | BcastPattern::DynamicType
        )
    }

    /// The output rank the pattern's skeleton requires, if it requires one.
    pub fn required_rank(&self) -> Option<usize> {
        match self {
            BcastPattern::VecBcast101 => Some(4),
            BcastPattern::VecBcast101xX => Some(5),
            _ => None,
        }
    }

    fn rule(&self) -> Option<Rule> {
        SIDED_RULES
            .iter()
            .find(|(p, _)| p == self)
            .map(|(_, rule)| *rule)
    }
}

impl Bcast {
    pub fn new(pattern: BcastPattern, broadcast_first: bool) -> Self {
        debug_assert!(pattern.is_sided() || !broadcast_first);
        Bcast {
            pattern,
            broadcast_first,
        }
    }

    /// Returns `true` if the pattern's shape preconditions hold for the given operands.
    ///
    /// [BcastPattern::DynamicType] applies to everything, since its skeleton decides at run time.
    /// [BcastPattern::Naive] applies to every static operand pair.
    pub fn applies_to(&self, in0: &TensorSpec, in1: &TensorSpec, out: &TensorSpec) -> bool {
        if self.pattern == BcastPattern::DynamicType {
            return true;
        }
        let Some((s0, s1, o)) = aligned_static(in0, in1, out) else {
            return false;
        };
        let width = out.dtype.simd_width();
        match self.pattern {
            BcastPattern::VecVec => s0 == o && s1 == o,
            BcastPattern::Naive | BcastPattern::DynamicType => true,
            pattern => {
                let Some(rule) = pattern.rule() else {
                    return false;
                };
                let (big, small) = if self.broadcast_first {
                    (&s1, &s0)
                } else {
                    (&s0, &s1)
                };
                *big == o && rule(small, &o, width)
            }
        }
    }

    /// The [DynamicBranch] which computes the same result as this static pattern.
    ///
    /// Returns `None` for [BcastPattern::DynamicType] itself.
    pub fn dynamic_equivalent(&self) -> Option<DynamicBranch> {
        match self.pattern {
            BcastPattern::VecVec => Some(DynamicBranch::Elementwise),
            BcastPattern::VecScalar => Some(DynamicBranch::ScalarBroadcast),
            BcastPattern::VecBcast111C => Some(DynamicBranch::ChannelBroadcast),
            BcastPattern::VecBcast101
            | BcastPattern::VecBcast101xX
            | BcastPattern::VecBcast110
            | BcastPattern::VecBv
            | BcastPattern::Naive => Some(DynamicBranch::Strided),
            BcastPattern::DynamicType => None,
        }
    }
}

impl Display for Bcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (vec_first, vec_second) = match self.pattern {
            BcastPattern::VecVec => return f.write_str("VEC_VEC"),
            BcastPattern::Naive => return f.write_str("NAIVE"),
            BcastPattern::DynamicType => return f.write_str("DYNAMIC_TYPE"),
            BcastPattern::VecScalar => ("VEC_SCALAR", "SCALAR_VEC"),
            BcastPattern::VecBcast101 => ("VEC_BCAST101", "BCAST101_VEC"),
            BcastPattern::VecBcast101xX => ("VEC_BCAST101xX", "BCAST101xX_VEC"),
            BcastPattern::VecBcast111C => ("VEC_BCAST111C", "BCAST111C_VEC"),
            BcastPattern::VecBcast110 => ("VEC_BCAST110", "BCAST110_VEC"),
            BcastPattern::VecBv => ("VEC_BV", "BV_VEC"),
        };
        f.write_str(if self.broadcast_first {
            vec_second
        } else {
            vec_first
        })
    }
}

impl DynamicBranch {
    /// Selects a branch from concrete run-time extents, exactly as the generated
    /// [BcastPattern::DynamicType] code does.
    ///
    /// Shapes are the operands' own (unaligned) extents.
    pub fn select(dims0: &[u32], dims1: &[u32], out_dims: &[u32]) -> DynamicBranch {
        let volume = |dims: &[u32]| dims.iter().map(|&d| u64::from(d)).product::<u64>();
        let last = |dims: &[u32]| dims.last().map_or(1, |&d| u64::from(d));
        let nr_elem = volume(out_dims);
        let (nr_elem_in0, nr_elem_in1) = (volume(dims0), volume(dims1));
        let (last0, last1) = (last(dims0), last(dims1));
        if nr_elem == nr_elem_in0 && nr_elem_in0 == nr_elem_in1 {
            DynamicBranch::Elementwise
        } else if nr_elem_in0 == 1 || nr_elem_in1 == 1 {
            DynamicBranch::ScalarBroadcast
        } else if last0 == last1
            && ((nr_elem_in0 == last0 && nr_elem_in1 == nr_elem)
                || (nr_elem_in1 == last1 && nr_elem_in0 == nr_elem))
        {
            DynamicBranch::ChannelBroadcast
        } else {
            DynamicBranch::Strided
        }
    }
}

/// Maps a pair of operand shapes to the most specific [Bcast] whose skeleton is correct for them.
///
/// Inputs are right-aligned to the output's rank. The first matching rule wins: dynamic extents,
/// identical shapes, a scalar, `[1, C, 1, 1]`, `[1, C, 1, 1, V]`, `[1, ..., 1, C]`, a leading
/// run, a trailing run, and finally [BcastPattern::Naive]. When both operands could be the
/// broadcast side, operand 1 is preferred.
pub fn classify(in0: &TensorSpec, in1: &TensorSpec, out: &TensorSpec) -> Bcast {
    let bcast = classify_inner(in0, in1, out);
    debug!("Classified {in0} and {in1} (output {out}) as {bcast}");
    bcast
}

fn classify_inner(in0: &TensorSpec, in1: &TensorSpec, out: &TensorSpec) -> Bcast {
    let Some((s0, s1, o)) = aligned_static(in0, in1, out) else {
        return Bcast::new(BcastPattern::DynamicType, false);
    };
    if s0 == o && s1 == o {
        return Bcast::new(BcastPattern::VecVec, false);
    }
    let width = out.dtype.simd_width();
    for (pattern, rule) in SIDED_RULES {
        if s0 == o && rule(&s1, &o, width) {
            return Bcast::new(pattern, false);
        }
        if s1 == o && rule(&s0, &o, width) {
            return Bcast::new(pattern, true);
        }
    }
    Bcast::new(BcastPattern::Naive, false)
}

/// Decides whether the operands should be swapped before instantiating a skeleton.
///
/// Skeletons expect the larger operand first. Returns `false` whenever either shape is dynamic;
/// the dynamic skeleton orders its operands at run time.
pub fn should_reverse(in0: &TensorSpec, in1: &TensorSpec) -> bool {
    if in0.is_dynamic() || in1.is_dynamic() {
        return false;
    }
    in0.volume() < in1.volume()
}

type Aligned = smallvec::SmallVec<[u32; crate::tensorspec::MAX_RANK]>;

fn aligned_static(
    in0: &TensorSpec,
    in1: &TensorSpec,
    out: &TensorSpec,
) -> Option<(Aligned, Aligned, Aligned)> {
    let rank = out.rank().max(in0.rank()).max(in1.rank());
    Some((
        in0.aligned_to(rank)?,
        in1.aligned_to(rank)?,
        out.aligned_to(rank)?,
    ))
}

fn volume(dims: &[u32]) -> u64 {
    dims.iter().map(|&d| u64::from(d)).product()
}

fn is_scalar(small: &[u32], _out: &[u32], _simd_width: u32) -> bool {
    volume(small) == 1
}

fn is_bcast101(small: &[u32], out: &[u32], _simd_width: u32) -> bool {
    out.len() == 4 && small == [1, out[1], 1, 1]
}

fn is_bcast101xx(small: &[u32], out: &[u32], simd_width: u32) -> bool {
    out.len() == 5 && out[4] == simd_width && small == [1, out[1], 1, 1, out[4]]
}

fn is_bcast111c(small: &[u32], out: &[u32], _simd_width: u32) -> bool {
    let Some((&c, leading)) = small.split_last() else {
        return false;
    };
    c == out[out.len() - 1] && leading.iter().all(|&d| d == 1)
}

/// Equal to `out` on a non-empty leading prefix and all ones after it.
fn is_bcast110(small: &[u32], out: &[u32], _simd_width: u32) -> bool {
    match small.iter().rposition(|&d| d != 1) {
        Some(last_varying) => small[..=last_varying] == out[..=last_varying],
        None => false,
    }
}

/// All ones on a leading prefix and equal to `out` on the trailing run after it.
fn is_bv(small: &[u32], out: &[u32], _simd_width: u32) -> bool {
    match small.iter().position(|&d| d != 1) {
        Some(first_varying) => small[first_varying..] == out[first_varying..],
        None => false,
    }
}
