//! Extends [crate::codegen::BuiltArtifact] with methods to check correctness of generated kernels.

use crate::{
    codegen::BuiltArtifact,
    common::{BinaryOp, Dtype},
};
use half::f16;
use ndarray::prelude::*;
use ndarray::{Dimension, Zip};
use num_traits::Float;
use rand::Rng;
use std::{
    io::{self, BufWriter, Write},
    process::{Command, ExitStatus},
    str::FromStr,
};
use tempfile::NamedTempFile;

const F32_TOLERANCE: f32 = 1e-5;
const F16_TOLERANCE: f32 = 2e-3;

#[derive(Clone, Debug, PartialEq)]
pub enum DynArray<D: Dimension> {
    Float32(Array<f32, D>),
    Float16(Array<f16, D>),
}

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Generated code exited with {0}")]
    Failed(ExitStatus),
    #[error("Malformed output: {0}")]
    MalformedOutput(String),
    #[error("Cannot broadcast {from:?} to {to:?}")]
    ShapeMismatch { from: Vec<usize>, to: Vec<usize> },
    #[error("Operands have different dtypes")]
    DtypeMismatch,
}

impl BuiltArtifact {
    /// Runs the kernel on random inputs and compares the result with [BinaryOp::execute].
    pub fn check_correctness<R: Rng>(&self, op: BinaryOp, rng: &mut R) -> Result<bool, RunError> {
        let shapes = self.shapes();
        let dtype = self.output_dtype();
        let lhs = random_input(dtype, &shapes.inputs[0], false, op, rng);
        let rhs = random_input(dtype, &shapes.inputs[1], true, op, rng);
        let out_shape = to_usize(&shapes.output);
        let expected = op.execute(&lhs, &rhs, &out_shape)?;
        let actual = self.run_with_input_data(&lhs, &rhs)?;
        let passed = actual.shape() == expected.shape()
            && actual.approx_eq(&expected, tolerance(dtype));
        if passed {
            log::debug!("Artifact passed correctness check");
        } else {
            log::debug!("Artifact failed correctness check:\nexpected {expected:?}\ngot {actual:?}");
        }
        Ok(passed)
    }

    /// Run the binary with provided input data and return the output.
    ///
    /// Input data should be in row-major layout. Output data will also be row-major.
    pub fn run_with_input_data(
        &self,
        lhs: &DynArray<IxDyn>,
        rhs: &DynArray<IxDyn>,
    ) -> Result<DynArray<IxDyn>, RunError> {
        // Write tensor data to temporary files. These will be loaded by the generated harness.
        let mut files = Vec::with_capacity(2);
        for arg in [lhs, rhs] {
            let mut buffered_writer = BufWriter::new(NamedTempFile::new()?);
            write_inputs(arg, &mut buffered_writer)?;
            files.push(buffered_writer.into_inner().map_err(|e| e.into_error())?);
        }

        let mut cmd = Command::new(&self.binary_path);
        cmd.args(files.iter().map(|f| f.path()));
        log::debug!("Running {:?}", cmd);
        let output = cmd.output()?;
        if !output.status.success() {
            log::debug!("stderr: {}", String::from_utf8_lossy(&output.stderr));
            return Err(RunError::Failed(output.status));
        }
        read_output(self.output_dtype(), &output.stdout)
    }
}

impl BinaryOp {
    /// Computes the operator on two numpy-broadcast operands with `ndarray`.
    pub fn execute(
        &self,
        lhs: &DynArray<IxDyn>,
        rhs: &DynArray<IxDyn>,
        out_shape: &[usize],
    ) -> Result<DynArray<IxDyn>, RunError> {
        match (lhs, rhs) {
            (DynArray::Float32(a), DynArray::Float32(b)) => {
                Ok(DynArray::Float32(self.execute_typed(a, b, out_shape)?))
            }
            (DynArray::Float16(a), DynArray::Float16(b)) => {
                Ok(DynArray::Float16(self.execute_typed(a, b, out_shape)?))
            }
            _ => Err(RunError::DtypeMismatch),
        }
    }

    fn execute_typed<T: Float>(
        &self,
        lhs: &ArrayD<T>,
        rhs: &ArrayD<T>,
        out_shape: &[usize],
    ) -> Result<ArrayD<T>, RunError> {
        let (a, b) = (
            broadcast_to(lhs, out_shape)?,
            broadcast_to(rhs, out_shape)?,
        );
        Ok(Zip::from(&a)
            .and(&b)
            .map_collect(|&x, &y| self.apply_scalar(x, y)))
    }

    pub fn apply_scalar<T: Float>(&self, a: T, b: T) -> T {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::TrueDiv => a / b,
            BinaryOp::Max => a.max(b),
            BinaryOp::Min => a.min(b),
            BinaryOp::FuseAddRelu => (a + b).max(T::zero()),
        }
    }
}

fn broadcast_to<'a, T>(
    array: &'a ArrayD<T>,
    out_shape: &[usize],
) -> Result<ArrayViewD<'a, T>, RunError> {
    array
        .broadcast(out_shape)
        .ok_or_else(|| RunError::ShapeMismatch {
            from: array.shape().to_vec(),
            to: out_shape.to_vec(),
        })
}

impl<D: Dimension> DynArray<D> {
    pub fn shape(&self) -> &[usize] {
        match self {
            DynArray::Float32(a) => a.shape(),
            DynArray::Float16(a) => a.shape(),
        }
    }

    /// Compares element-wise with a tolerance relative to the larger magnitude, floored at one.
    ///
    /// NaNs compare equal to NaNs and infinities to infinities of the same sign.
    pub fn approx_eq(&self, other: &Self, tol: f32) -> bool {
        match (self, other) {
            (DynArray::Float32(a), DynArray::Float32(b)) => {
                a.shape() == b.shape() && Zip::from(a).and(b).all(|&x, &y| close(x, y, tol))
            }
            (DynArray::Float16(a), DynArray::Float16(b)) => {
                a.shape() == b.shape()
                    && Zip::from(a)
                        .and(b)
                        .all(|&x, &y| close(x.to_f32(), y.to_f32(), tol))
            }
            _ => false,
        }
    }
}

pub fn tolerance(dtype: Dtype) -> f32 {
    match dtype {
        Dtype::Float32 => F32_TOLERANCE,
        Dtype::Float16 => F16_TOLERANCE,
    }
}

fn close(x: f32, y: f32, tol: f32) -> bool {
    if x.is_nan() || y.is_nan() {
        return x.is_nan() && y.is_nan();
    }
    if x.is_infinite() || y.is_infinite() {
        return x == y;
    }
    (x - y).abs() <= tol * x.abs().max(y.abs()).max(1.0)
}

/// Fills an operand of `shape` with values in `[-10, 10]`.
///
/// Divisors are kept at least `0.5` away from zero.
pub fn random_input<R: Rng>(
    dtype: Dtype,
    shape: &[u32],
    is_rhs: bool,
    op: BinaryOp,
    rng: &mut R,
) -> DynArray<IxDyn> {
    let avoid_zero = is_rhs && op == BinaryOp::TrueDiv;
    let shape = to_usize(shape);
    let values = ArrayD::from_shape_simple_fn(IxDyn(&shape), || {
        if avoid_zero {
            let magnitude = rng.gen_range(0.5f32..10.0);
            if rng.gen_bool(0.5) {
                magnitude
            } else {
                -magnitude
            }
        } else {
            rng.gen_range(-10.0f32..=10.0)
        }
    });
    match dtype {
        Dtype::Float32 => DynArray::Float32(values),
        Dtype::Float16 => DynArray::Float16(values.mapv(f16::from_f32)),
    }
}

fn to_usize(dims: &[u32]) -> Vec<usize> {
    dims.iter().map(|&d| d as usize).collect()
}

fn write_inputs(input: &DynArray<IxDyn>, writer: &mut BufWriter<NamedTempFile>) -> io::Result<()> {
    match input {
        DynArray::Float32(a) => {
            for value in a.iter() {
                writer.write_all(value.to_le_bytes().as_ref())?;
            }
        }
        DynArray::Float16(a) => {
            for value in a.iter() {
                writer.write_all(value.to_le_bytes().as_ref())?;
            }
        }
    }
    writer.flush()
}

fn read_output(dtype: Dtype, source: &[u8]) -> Result<DynArray<IxDyn>, RunError> {
    // The first line is the shape. The remainder of the lines are the flattened values.
    let stdout = String::from_utf8_lossy(source);
    let mut lines = stdout.lines();
    let first_line = lines
        .next()
        .ok_or_else(|| RunError::MalformedOutput("stdout is empty".to_string()))?
        .trim();
    let shape = if first_line.is_empty() {
        vec![]
    } else {
        first_line
            .split('x')
            .map(|s| {
                usize::from_str(s)
                    .map_err(|_| RunError::MalformedOutput(format!("bad shape line {first_line:?}")))
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    let values = lines
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            f32::from_str(line)
                .map_err(|_| RunError::MalformedOutput(format!("bad value {line:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let array = ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|e| RunError::MalformedOutput(e.to_string()))?;
    Ok(match dtype {
        Dtype::Float32 => DynArray::Float32(array),
        Dtype::Float16 => DynArray::Float16(array.mapv(f16::from_f32)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_execute_broadcasts_like_numpy() {
        let lhs = DynArray::Float32(array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn());
        let rhs = DynArray::Float32(array![10.0f32].into_dyn());
        let out = BinaryOp::Sub.execute(&rhs, &lhs, &[2, 3]).unwrap();
        assert_eq!(
            out,
            DynArray::Float32(array![[9.0f32, 8.0, 7.0], [6.0, 5.0, 4.0]].into_dyn())
        );
    }

    #[test]
    fn test_execute_rejects_incompatible_shapes() {
        let lhs = DynArray::Float32(ArrayD::zeros(IxDyn(&[2, 3])));
        let rhs = DynArray::Float32(ArrayD::zeros(IxDyn(&[4])));
        assert!(matches!(
            BinaryOp::Add.execute(&lhs, &rhs, &[2, 3]),
            Err(RunError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_fuse_add_relu_clamps() {
        assert_eq!(BinaryOp::FuseAddRelu.apply_scalar(-3.0f32, 1.0), 0.0);
        assert_eq!(BinaryOp::FuseAddRelu.apply_scalar(3.0f32, 1.0), 4.0);
        assert_eq!(
            BinaryOp::Max.apply_scalar(f16::from_f32(1.5), f16::from_f32(-2.0)),
            f16::from_f32(1.5)
        );
    }

    #[test]
    fn test_read_output() {
        let out = read_output(Dtype::Float32, b"2x2\n1.0000000000\n2.5\n-3.0\n4.0\n").unwrap();
        assert_eq!(
            out,
            DynArray::Float32(array![[1.0f32, 2.5], [-3.0, 4.0]].into_dyn())
        );
    }

    #[test]
    fn test_read_output_rejects_short_output() {
        assert!(matches!(
            read_output(Dtype::Float32, b"2x2\n1.0\n"),
            Err(RunError::MalformedOutput(_))
        ));
        assert!(matches!(
            read_output(Dtype::Float32, b""),
            Err(RunError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_approx_eq() {
        let a = DynArray::Float32(array![1.0f32, f32::NAN, 1000.0].into_dyn());
        let b = DynArray::Float32(array![1.000001f32, f32::NAN, 1000.005].into_dyn());
        assert!(a.approx_eq(&b, F32_TOLERANCE));
        let c = DynArray::Float32(array![1.1f32, f32::NAN, 1000.0].into_dyn());
        assert!(!a.approx_eq(&c, F32_TOLERANCE));
    }

    proptest! {
        #[test]
        fn test_random_divisors_avoid_zero(seed in any::<u64>(), dtype in any::<Dtype>()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let input = random_input(dtype, &[4, 8], true, BinaryOp::TrueDiv, &mut rng);
            prop_assert_eq!(input.shape(), &[4, 8]);
            let ok = match input {
                DynArray::Float32(a) => a.iter().all(|v| v.abs() >= 0.5),
                DynArray::Float16(a) => a.iter().all(|v| v.to_f32().abs() >= 0.49),
            };
            prop_assert!(ok);
        }
    }
}
