use std::fmt::Display;

use strum::EnumIter;

/// Element types the generated kernels can compute in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum Dtype {
    #[cfg_attr(feature = "clap", value(name = "f32", alias = "float32"))]
    Float32,
    #[cfg_attr(feature = "clap", value(name = "f16", alias = "float16"))]
    Float16,
}

/// The binary elementwise operators.
///
/// This is a closed set; every place that needs per-operator behavior matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    #[cfg_attr(feature = "clap", value(name = "true_div", alias = "true-div"))]
    TrueDiv,
    Max,
    Min,
    /// `max(a + b, 0)`
    #[cfg_attr(feature = "clap", value(name = "fuse_add_relu", alias = "fuse-add-relu"))]
    FuseAddRelu,
}

impl Dtype {
    /// The bytes required to represent a value of this Dtype.
    pub fn size(&self) -> u8 {
        match self {
            Dtype::Float32 => 4,
            Dtype::Float16 => 2,
        }
    }

    /// The number of values held by one 128-bit vector register.
    pub fn simd_width(&self) -> u32 {
        16 / u32::from(self.size())
    }
}

impl Display for Dtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dtype::Float32 => write!(f, "f32"),
            Dtype::Float16 => write!(f, "f16"),
        }
    }
}

impl BinaryOp {
    /// Returns `true` if swapping the operands never changes the result.
    pub fn is_commutative(&self) -> bool {
        match self {
            BinaryOp::Add
            | BinaryOp::Mul
            | BinaryOp::Max
            | BinaryOp::Min
            | BinaryOp::FuseAddRelu => true,
            BinaryOp::Sub | BinaryOp::TrueDiv => false,
        }
    }

    /// The element types an operator is defined for.
    pub fn supports(&self, dtype: Dtype) -> bool {
        match (self, dtype) {
            (_, Dtype::Float32 | Dtype::Float16) => true,
        }
    }

    /// The upper-case name used in kernel symbols.
    pub fn symbol_name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::Sub => "SUB",
            BinaryOp::Mul => "MUL",
            BinaryOp::TrueDiv => "TRUE_DIV",
            BinaryOp::Max => "MAX",
            BinaryOp::Min => "MIN",
            BinaryOp::FuseAddRelu => "FUSE_ADD_RELU",
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::TrueDiv => "true_div",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::FuseAddRelu => "fuse_add_relu",
        };
        f.write_str(s)
    }
}
