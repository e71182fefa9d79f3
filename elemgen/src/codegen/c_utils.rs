use std::fmt;

use crate::{common::Dtype, utils::indent};

/// A 128-bit GI vector type and the names of the primitives which operate on it.
#[derive(Debug, Hash, Eq, PartialEq)]
pub struct VecType {
    pub dtype: Dtype,
    pub value_cnt: u8,
    pub name: &'static str,
    /// Suffix of the type-specific GI primitives, as in `GiLoadFloat32`.
    pub gi_suffix: &'static str,
}

pub const VEC_TYPES: [VecType; 2] = [
    VecType {
        dtype: Dtype::Float32,
        value_cnt: 4,
        name: "GI_FLOAT32_t",
        gi_suffix: "Float32",
    },
    VecType {
        dtype: Dtype::Float16,
        value_cnt: 8,
        name: "GI_FLOAT16_t",
        gi_suffix: "Float16",
    },
];

/// A heap buffer declared by the generated `main` harness.
#[derive(Debug, Clone)]
pub struct CBuffer {
    pub name: String,
    pub size: u64,
    pub dtype: Dtype,
}

impl VecType {
    /// Returns the name of the GI primitive `stem` for this type, e.g., `GiAddFloat16`.
    pub fn gi_fn(&self, stem: &str) -> String {
        format!("Gi{stem}{}", self.gi_suffix)
    }
}

impl CBuffer {
    pub fn emit<W: fmt::Write>(&self, w: &mut W, depth: usize) -> fmt::Result {
        let CBuffer { name, size, dtype } = self;
        writeln!(
            w,
            "{}{} *__restrict__ {name};",
            indent(depth),
            c_type(*dtype)
        )?;
        // posix_memalign rejects a zero-byte request on some platforms.
        writeln!(
            w,
            "{}posix_memalign((void **)&{name}, 128, ({size} > 0 ? {size} : 1) * sizeof({}));",
            indent(depth),
            c_type(*dtype)
        )
    }

    pub fn emit_free<W: fmt::Write>(&self, w: &mut W, depth: usize) -> fmt::Result {
        writeln!(w, "{}free({});", indent(depth), self.name)
    }
}

/// Returns the [VecType] holding values of `dtype`.
pub fn vec_type(dtype: Dtype) -> &'static VecType {
    match dtype {
        Dtype::Float32 => &VEC_TYPES[0],
        Dtype::Float16 => &VEC_TYPES[1],
    }
}

pub fn c_type(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::Float32 => "float",
        Dtype::Float16 => "gi_float16_t",
    }
}

/// The literal for zero in `dtype`'s scalar type.
pub fn zero_literal(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::Float32 => "0.f",
        Dtype::Float16 => "0.0",
    }
}

pub fn printf_fmt(dtype: Dtype) -> &'static str {
    match dtype {
        Dtype::Float32 | Dtype::Float16 => "%.10f",
    }
}
