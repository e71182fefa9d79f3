use std::fmt;

use itertools::Itertools;

use super::c_utils::{c_type, printf_fmt, CBuffer};
use super::{BinaryKernel, CodegenError};
use crate::tensorspec::{Dim, TensorSpec};
use crate::utils::indent;

/// Concrete extents for one invocation of a kernel.
///
/// Statically shaped kernels have exactly one; kernels with dynamic extents need them supplied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeShapes {
    pub inputs: [Vec<u32>; 2],
    pub output: Vec<u32>,
}

impl RuntimeShapes {
    /// Returns the kernel's static shapes, or `None` if any extent is dynamic.
    pub fn from_static(kernel: &BinaryKernel) -> Option<Self> {
        let [in0, in1] = kernel.inputs();
        Some(RuntimeShapes {
            inputs: [in0.static_dims()?.to_vec(), in1.static_dims()?.to_vec()],
            output: kernel.output().static_dims()?.to_vec(),
        })
    }

    /// Resolves the output extents for concrete input extents.
    ///
    /// Each input must have its [TensorSpec]'s rank and agree with every static extent in it. The
    /// output is the broadcast of the inputs at the output's rank.
    pub fn resolve(
        kernel: &BinaryKernel,
        in0: &[u32],
        in1: &[u32],
    ) -> Result<Self, CodegenError> {
        let [spec0, spec1] = kernel.inputs();
        check_matches(spec0, in0)?;
        check_matches(spec1, in1)?;
        let out_spec = kernel.output();
        let rank = out_spec.rank();
        let at = |dims: &[u32], i: usize| -> u32 {
            let offset = rank - dims.len();
            if i < offset {
                1
            } else {
                dims[i - offset]
            }
        };
        let output = (0..rank)
            .map(|i| match (at(in0, i), at(in1, i)) {
                (1, d) | (d, 1) => Ok(d),
                (a, b) if a == b => Ok(a),
                (a, b) => Err(CodegenError::MalformedShape(format!(
                    "extents {a} and {b} on axis {i} do not broadcast"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        check_matches(out_spec, &output)?;
        Ok(RuntimeShapes {
            inputs: [in0.to_vec(), in1.to_vec()],
            output,
        })
    }

    pub fn output_volume(&self) -> u64 {
        volume(&self.output)
    }

    /// Emits a `main` which loads both inputs from the raw files named by `argv[1]` and `argv[2]`,
    /// runs the kernel, and prints the output shape followed by one value per line.
    pub fn emit_main<W: fmt::Write>(&self, kernel: &BinaryKernel, out: &mut W) -> fmt::Result {
        let dtype = kernel.output().dtype;
        let ctype = c_type(dtype);
        let buffers = [
            ("in0", &self.inputs[0]),
            ("in1", &self.inputs[1]),
            ("out0", &self.output),
        ]
        .map(|(name, dims)| {
            (
                CBuffer {
                    name: name.to_string(),
                    size: volume(dims),
                    dtype,
                },
                dims,
            )
        });

        writeln!(out, "int main(int argc, char **argv) {{")?;
        writeln!(out, "{}if (argc != 3) {{", indent(1))?;
        writeln!(
            out,
            "{}fprintf(stderr, \"usage: %s IN0 IN1\\n\", argv[0]);",
            indent(2)
        )?;
        writeln!(out, "{}return 1;", indent(2))?;
        writeln!(out, "{}}}", indent(1))?;
        for (buffer, _) in &buffers {
            buffer.emit(out, 1)?;
        }
        for (idx, (buffer, _)) in buffers.iter().take(2).enumerate() {
            writeln!(
                out,
                "{}if (load_raw(argv[{}], {}, {} * sizeof({ctype}))) return 1;",
                indent(1),
                idx + 1,
                buffer.name,
                buffer.size
            )?;
        }
        for (idx, (buffer, dims)) in buffers.iter().enumerate() {
            let init = if dims.is_empty() {
                "0".to_string()
            } else {
                dims.iter().join(", ")
            };
            writeln!(out, "{}size_t dims{idx}[MAX_DIM] = {{{init}}};", indent(1))?;
            writeln!(out, "{}Tensor t{idx};", indent(1))?;
            writeln!(out, "{}t{idx}.ptr = {};", indent(1), buffer.name)?;
            writeln!(
                out,
                "{}init_contiguous_layout(&t{idx}.layout, {}, dims{idx});",
                indent(1),
                dims.len()
            )?;
        }
        writeln!(out, "{}Tensor *inputs[2] = {{&t0, &t1}};", indent(1))?;
        writeln!(out, "{}Tensor *outputs[1] = {{&t2}};", indent(1))?;
        writeln!(
            out,
            "{}int status = {}(inputs, 2, outputs, 1);",
            indent(1),
            kernel.kernel_name()
        )?;
        writeln!(
            out,
            "{}printf(\"{}\\n\");",
            indent(1),
            self.output.iter().join("x")
        )?;
        writeln!(
            out,
            "{}for (size_t i = 0; i < {}; i++) {{",
            indent(1),
            self.output_volume()
        )?;
        writeln!(
            out,
            "{}printf(\"{}\\n\", (double)out0[i]);",
            indent(2),
            printf_fmt(dtype)
        )?;
        writeln!(out, "{}}}", indent(1))?;
        for (buffer, _) in &buffers {
            buffer.emit_free(out, 1)?;
        }
        writeln!(out, "{}return status;", indent(1))?;
        writeln!(out, "}}")
    }
}

fn check_matches(spec: &TensorSpec, dims: &[u32]) -> Result<(), CodegenError> {
    if spec.rank() != dims.len() {
        return Err(CodegenError::MalformedShape(format!(
            "{spec} has rank {} but the run-time shape has rank {}",
            spec.rank(),
            dims.len()
        )));
    }
    for (dim, &actual) in spec.shape.iter().zip(dims) {
        if let Dim::Static(expected) = dim {
            if *expected != actual {
                return Err(CodegenError::MalformedShape(format!(
                    "run-time extent {actual} contradicts static extent {expected} of {spec}"
                )));
            }
        }
    }
    Ok(())
}

fn volume(dims: &[u32]) -> u64 {
    dims.iter().map(|&d| u64::from(d)).product()
}
