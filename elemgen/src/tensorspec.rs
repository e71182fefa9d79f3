use itertools::Itertools;
use smallvec::SmallVec;

use std::fmt::{self, Display};
use std::str::FromStr;

use crate::common::Dtype;

/// The largest rank a kernel operand may have.
pub const MAX_RANK: usize = 5;

/// One extent of a [Shape].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(u32),
    /// An extent which is only known when the kernel runs.
    Dynamic,
}

pub type Shape = SmallVec<[Dim; MAX_RANK]>;

/// Describes one operand (or the output) of a binary kernel.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct TensorSpec {
    pub shape: Shape,
    pub dtype: Dtype,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ShapeParseError {
    #[error("Shape is empty")]
    Empty,
    #[error("Invalid extent {0:?}; expected a non-negative integer or '?'")]
    InvalidExtent(String),
    #[error("Rank {0} exceeds the maximum supported rank")]
    RankTooLarge(usize),
}

impl Dim {
    pub fn get(&self) -> Option<u32> {
        match self {
            Dim::Static(v) => Some(*v),
            Dim::Dynamic => None,
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dim::Dynamic)
    }
}

impl From<u32> for Dim {
    fn from(value: u32) -> Self {
        Dim::Static(value)
    }
}

impl Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(v) => write!(f, "{v}"),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

impl TensorSpec {
    pub fn new(shape: Shape, dtype: Dtype) -> Self {
        TensorSpec { shape, dtype }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_dynamic(&self) -> bool {
        self.shape.iter().any(Dim::is_dynamic)
    }

    /// Returns the number of elements, or `None` if any extent is dynamic.
    pub fn volume(&self) -> Option<u64> {
        self.shape
            .iter()
            .map(|d| d.get().map(u64::from))
            .product::<Option<u64>>()
    }

    /// Returns the static extents right-aligned to `rank` by prepending size-one dimensions.
    ///
    /// Returns `None` if any extent is dynamic. Panics if `rank` is smaller than the receiver's
    /// rank.
    pub fn aligned_to(&self, rank: usize) -> Option<SmallVec<[u32; MAX_RANK]>> {
        assert!(
            rank >= self.rank(),
            "cannot align rank-{} shape to rank {rank}",
            self.rank()
        );
        let mut aligned = SmallVec::with_capacity(rank);
        aligned.extend((0..rank - self.rank()).map(|_| 1));
        for d in &self.shape {
            aligned.push(d.get()?);
        }
        Some(aligned)
    }

    /// The static extents, or `None` if any extent is dynamic.
    pub fn static_dims(&self) -> Option<SmallVec<[u32; MAX_RANK]>> {
        self.aligned_to(self.rank())
    }
}

impl Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.dtype, self.shape.iter().join("x"))
    }
}

/// Parses a shape such as `2x3x?x4` (or `2,3,?,4`), where `?` marks a dynamic extent.
pub fn parse_shape(s: &str) -> Result<Shape, ShapeParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ShapeParseError::Empty);
    }
    let shape = s
        .split(|c| c == 'x' || c == ',')
        .map(|part| {
            let part = part.trim();
            if part == "?" {
                Ok(Dim::Dynamic)
            } else {
                u32::from_str(part)
                    .map(Dim::Static)
                    .map_err(|_| ShapeParseError::InvalidExtent(part.to_string()))
            }
        })
        .collect::<Result<Shape, _>>()?;
    if shape.len() > MAX_RANK {
        return Err(ShapeParseError::RankTooLarge(shape.len()));
    }
    Ok(shape)
}

/// Computes the numpy-style broadcast of two shapes.
///
/// Returns `None` if the static extents are incompatible. A dynamic extent broadcast against a
/// static extent other than one stays dynamic, since it can only be resolved at run time.
pub fn broadcast_shapes(lhs: &[Dim], rhs: &[Dim]) -> Option<Shape> {
    let rank = lhs.len().max(rhs.len());
    let at = |shape: &[Dim], i: usize| -> Dim {
        let offset = rank - shape.len();
        if i < offset {
            Dim::Static(1)
        } else {
            shape[i - offset]
        }
    };
    (0..rank)
        .map(|i| match (at(lhs, i), at(rhs, i)) {
            (Dim::Static(1), d) | (d, Dim::Static(1)) => Some(d),
            (Dim::Static(a), Dim::Static(b)) if a == b => Some(Dim::Static(a)),
            (Dim::Static(_), Dim::Static(_)) => None,
            (Dim::Dynamic, _) | (_, Dim::Dynamic) => Some(Dim::Dynamic),
        })
        .collect()
}

#[macro_export]
macro_rules! shape {
    (@dim ?) => { $crate::tensorspec::Dim::Dynamic };
    (@dim $dim:tt) => { $crate::tensorspec::Dim::Static($dim) };
    ($($dim:tt),*) => {{
        // Bind to a variable with an explicit type to help out type inference.
        let sv: $crate::tensorspec::Shape = $crate::smallvec::smallvec![ $( $crate::shape!(@dim $dim) ),* ];
        sv
    }};
}
