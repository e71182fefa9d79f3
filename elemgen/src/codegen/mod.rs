pub mod c_utils;
mod clang;
mod harness;
mod header;
pub mod ops;
pub mod skeletons;
pub mod template;

use crate::bcast::{classify, should_reverse, Bcast, BcastPattern};
use crate::codegen::c_utils::{c_type, vec_type};
use crate::codegen::clang::{clang_path, cli_flags};
use crate::codegen::header::HeaderEmitter;
use crate::common::{BinaryOp, Dtype};
use crate::tensorspec::{TensorSpec, MAX_RANK};
use crate::utils::{indent, write_indented, LinePrefixWrite, ToWriteFmt};

use anyhow::{anyhow, bail, Result};
use log::{debug, info};
use std::fmt::{self, Write as _};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

pub use self::harness::RuntimeShapes;
pub use self::ops::OpEmitter;
pub use self::skeletons::{skeleton, LoopSchedule};
pub use self::template::{StringTemplateArgs, TemplateError};

#[derive(thiserror::Error, Debug)]
pub enum CodegenError {
    #[error("{bcast} cannot implement {in0} and {in1} with output {out}")]
    UnsupportedPattern {
        bcast: Bcast,
        in0: TensorSpec,
        in1: TensorSpec,
        out: TensorSpec,
    },
    #[error("{op} is not defined for {dtype}")]
    UnsupportedDtype { op: BinaryOp, dtype: Dtype },
    #[error("Malformed shape: {0}")]
    MalformedShape(String),
    #[error("Operands are {in0} and {in1} but the output is {out}")]
    DtypeMismatch { in0: Dtype, in1: Dtype, out: Dtype },
    #[error("Malformed fragment arguments: {0}")]
    MalformedArgs(String),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Fmt(#[from] fmt::Error),
}

/// C expressions for a tensor's data pointer and its `Layout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorExprs {
    pub ptr: String,
    pub layout: String,
}

/// The C expressions a kernel body reads its operands and output through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArgs {
    pub inputs: [TensorExprs; 2],
    pub output: TensorExprs,
}

/// A binary elementwise kernel for one operator, dtype and pair of operand shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryKernel {
    op: BinaryOp,
    inputs: [TensorSpec; 2],
    output: TensorSpec,
    bcast: Bcast,
    reverse: bool,
}

impl TensorExprs {
    pub fn new(ptr: impl Into<String>, layout: impl Into<String>) -> Self {
        TensorExprs {
            ptr: ptr.into(),
            layout: layout.into(),
        }
    }
}

impl Default for KernelArgs {
    fn default() -> Self {
        KernelArgs {
            inputs: [
                TensorExprs::new("inputs[0]->ptr", "inputs[0]->layout"),
                TensorExprs::new("inputs[1]->ptr", "inputs[1]->layout"),
            ],
            output: TensorExprs::new("outputs[0]->ptr", "outputs[0]->layout"),
        }
    }
}

impl BinaryKernel {
    /// Classifies the operands and prepares a kernel for the most specific applicable pattern.
    pub fn new(
        op: BinaryOp,
        in0: TensorSpec,
        in1: TensorSpec,
        out: TensorSpec,
    ) -> Result<Self, CodegenError> {
        validate(op, &in0, &in1, &out)?;
        let bcast = classify(&in0, &in1, &out);
        Ok(Self::new_unchecked(op, in0, in1, out, bcast))
    }

    /// Prepares a kernel using a caller-chosen [Bcast].
    ///
    /// Fails with [CodegenError::UnsupportedPattern] if the pattern's skeleton would be incorrect
    /// for these operands.
    pub fn with_bcast(
        op: BinaryOp,
        in0: TensorSpec,
        in1: TensorSpec,
        out: TensorSpec,
        bcast: Bcast,
    ) -> Result<Self, CodegenError> {
        validate(op, &in0, &in1, &out)?;
        if !bcast.applies_to(&in0, &in1, &out) {
            return Err(CodegenError::UnsupportedPattern {
                bcast,
                in0,
                in1,
                out,
            });
        }
        Ok(Self::new_unchecked(op, in0, in1, out, bcast))
    }

    fn new_unchecked(
        op: BinaryOp,
        in0: TensorSpec,
        in1: TensorSpec,
        out: TensorSpec,
        bcast: Bcast,
    ) -> Self {
        let reverse = effective_reverse(&in0, &in1, bcast);
        BinaryKernel {
            op,
            inputs: [in0, in1],
            output: out,
            bcast,
            reverse,
        }
    }

    pub fn op(&self) -> BinaryOp {
        self.op
    }

    pub fn inputs(&self) -> &[TensorSpec; 2] {
        &self.inputs
    }

    pub fn output(&self) -> &TensorSpec {
        &self.output
    }

    pub fn bcast(&self) -> Bcast {
        self.bcast
    }

    /// Whether the skeleton receives operand 1 as `source0` and operand 0 as `source1`.
    pub fn reverse(&self) -> bool {
        self.reverse
    }

    pub fn dtype(&self) -> Dtype {
        self.output.dtype
    }

    pub fn kernel_name(&self) -> String {
        format!(
            "GI_kernel_elementwise_{}_{}_{}",
            self.op.symbol_name(),
            self.dtype(),
            self.bcast
        )
    }

    /// Renders the kernel body: the pattern's skeleton with this kernel's types, primitives and
    /// operator fragments substituted.
    pub fn gen_code_body(&self, args: &KernelArgs) -> Result<String, CodegenError> {
        let dtype = self.dtype();
        let vt = vec_type(dtype);
        let emitter = OpEmitter::new(self.op, dtype, self.reverse);
        let (src0, src1) = if self.reverse {
            (&args.inputs[1], &args.inputs[0])
        } else {
            (&args.inputs[0], &args.inputs[1])
        };
        let template_args = StringTemplateArgs::new()
            .add("simd_width", dtype.simd_width())
            .add("dtype_specifier", c_type(dtype))
            .add("simd_dtype_specifier", vt.name)
            .add("load_vec", vt.gi_fn("Load"))
            .add("broad_cast", vt.gi_fn("Broadcast"))
            .add("source0", &src0.ptr)
            .add("source1", &src1.ptr)
            .add("source0_layout", &src0.layout)
            .add("source1_layout", &src1.layout)
            .add("dst", &args.output.ptr)
            .add("dst_layout", &args.output.layout)
            .add_fn("kernel_init", move |a| emitter.init(a))
            .add_fn("kernel_simd_unroll", move |a| emitter.simd_unroll(a))
            .add_fn("kernel_naive_unroll", move |a| emitter.naive_unroll(a));
        Ok(template_args.render(skeleton(self.bcast.pattern))?)
    }

    /// The number of groups and the per-group [LoopSchedule] of a statically shaped kernel.
    ///
    /// Returns `None` for patterns which do not run the vector loops over a fixed run, and for
    /// dynamic shapes.
    pub fn loop_schedule(&self) -> Option<(u64, LoopSchedule)> {
        let out = self.output.static_dims()?;
        let product = |dims: &[u32]| dims.iter().map(|&d| u64::from(d)).product::<u64>();
        let small_side = if self.bcast.broadcast_first { 0 } else { 1 };
        let small = || self.inputs[small_side].aligned_to(out.len());
        let (groups, run) = match self.bcast.pattern {
            BcastPattern::VecVec | BcastPattern::VecScalar => (1, product(&out)),
            BcastPattern::VecBcast101 | BcastPattern::VecBcast101xX => {
                (product(&out[..2]), product(&out[2..]))
            }
            BcastPattern::VecBcast111C => {
                let (last, leading) = out.split_last()?;
                (product(leading), u64::from(*last))
            }
            BcastPattern::VecBcast110 => {
                let small = small()?;
                let split = small.iter().rposition(|&d| d != 1).map_or(0, |i| i + 1);
                (product(&out[..split]), product(&out[split..]))
            }
            BcastPattern::VecBv => {
                let small = small()?;
                let mut groups = 1u64;
                let mut run = 1u64;
                for (&s, &o) in small.iter().zip(&out) {
                    if s == 1 {
                        groups *= u64::from(o);
                    } else {
                        run *= u64::from(o);
                    }
                }
                (groups, run)
            }
            BcastPattern::Naive | BcastPattern::DynamicType => return None,
        };
        Some((groups, LoopSchedule::new(run, self.dtype().simd_width())))
    }

    /// Emits the kernel function, preceded by a comment describing it.
    pub fn emit_kernel<W: fmt::Write>(
        &self,
        args: &KernelArgs,
        out: &mut W,
    ) -> Result<(), CodegenError> {
        let body = self.gen_code_body(args)?;
        self.emit_comment(out)?;
        writeln!(
            out,
            "int {}(Tensor **inputs, int nr_input, Tensor **outputs, int nr_output) {{",
            self.kernel_name()
        )?;
        writeln!(out, "{}(void)inputs;", indent(1))?;
        writeln!(out, "{}(void)outputs;", indent(1))?;
        writeln!(out, "{}(void)nr_input;", indent(1))?;
        writeln!(out, "{}(void)nr_output;", indent(1))?;
        write_indented(out, &body, 1)?;
        writeln!(out, "{}return 0;", indent(1))?;
        writeln!(out, "}}")?;
        Ok(())
    }

    fn emit_comment<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        let mut w = LinePrefixWrite::new(out, "// ");
        writeln!(w, "{}", self.kernel_name())?;
        writeln!(w, "in0: {}", self.inputs[0])?;
        writeln!(w, "in1: {}", self.inputs[1])?;
        writeln!(w, "out: {}", self.output)?;
        writeln!(w, "bcast: {}, reversed: {}", self.bcast, self.reverse)?;
        if let Some((groups, schedule)) = self.loop_schedule() {
            writeln!(w, "schedule: {groups} x ({schedule})")?;
        }
        Ok(())
    }

    /// Emits a complete translation unit: the header, the kernel, and optionally a `main`
    /// harness for the given run-time shapes.
    pub fn emit_standalone<W: fmt::Write>(
        &self,
        harness: Option<&RuntimeShapes>,
        out: &mut W,
    ) -> Result<(), CodegenError> {
        HeaderEmitter {
            emit_harness_helpers: harness.is_some(),
        }
        .emit(out)?;
        self.emit_kernel(&KernelArgs::default(), out)?;
        if let Some(shapes) = harness {
            out.write_char('\n')?;
            shapes.emit_main(self, out)?;
        }
        Ok(())
    }

    /// Compiles the kernel and a `main` harness for `shapes` with the compiler named by `CLANG`.
    pub fn build(&self, shapes: &RuntimeShapes) -> Result<BuiltArtifact> {
        let dir = tempfile::tempdir()?;
        let source_path = dir.path().join("main.c");
        let binary_path = dir.path().join("a.out");

        let source_file = std::fs::File::create(&source_path)?;
        self.emit_standalone(Some(shapes), &mut ToWriteFmt(source_file))?;

        let compiler = clang_path().ok_or_else(|| anyhow!("CLANG environment variable not set"))?;
        info!("Compiling {} with {compiler}", self.kernel_name());
        let clang_proc = Command::new(compiler)
            .args(cli_flags())
            .arg(binary_path.to_string_lossy().to_string())
            .arg(source_path.to_string_lossy().to_string())
            .output()?;

        if !clang_proc.status.success() {
            bail!(
                "Clang exited with {}\n{}",
                clang_proc.status,
                String::from_utf8_lossy(&clang_proc.stderr).into_owned()
            );
        } else {
            // We still want to see warnings.
            io::stderr().write_all(&clang_proc.stderr)?;
        }

        Ok(BuiltArtifact {
            binary_path,
            _dir: dir,
            output_dtype: self.dtype(),
            shapes: shapes.clone(),
        })
    }
}

/// A compiled kernel and harness. The binary is deleted when this is dropped.
pub struct BuiltArtifact {
    pub(crate) binary_path: PathBuf,
    _dir: TempDir,
    output_dtype: Dtype,
    shapes: RuntimeShapes,
}

impl BuiltArtifact {
    pub fn output_dtype(&self) -> Dtype {
        self.output_dtype
    }

    pub fn shapes(&self) -> &RuntimeShapes {
        &self.shapes
    }

    /// Runs the binary on raw little-endian input files.
    pub fn run(&self, in0: &Path, in1: &Path) -> Result<Output> {
        let output = Command::new(&self.binary_path).arg(in0).arg(in1).output()?;
        if !output.status.success() {
            io::stderr().write_all(&output.stderr)?;
            bail!("Failed to run the generated code: {}", output.status);
        }
        Ok(output)
    }
}

fn validate(
    op: BinaryOp,
    in0: &TensorSpec,
    in1: &TensorSpec,
    out: &TensorSpec,
) -> Result<(), CodegenError> {
    if in0.dtype != out.dtype || in1.dtype != out.dtype {
        return Err(CodegenError::DtypeMismatch {
            in0: in0.dtype,
            in1: in1.dtype,
            out: out.dtype,
        });
    }
    if !op.supports(out.dtype) {
        return Err(CodegenError::UnsupportedDtype {
            op,
            dtype: out.dtype,
        });
    }
    if out.rank() > MAX_RANK {
        return Err(CodegenError::MalformedShape(format!(
            "{out} exceeds rank {MAX_RANK}"
        )));
    }
    for input in [in0, in1] {
        if input.rank() > out.rank() {
            return Err(CodegenError::MalformedShape(format!(
                "input {input} has a higher rank than output {out}"
            )));
        }
    }
    Ok(())
}

/// Chooses operand order for a skeleton.
///
/// Sided skeletons need the broadcast operand as `source1`, which [should_reverse] agrees with
/// unless the output is empty. The dynamic skeleton keeps the original order.
fn effective_reverse(in0: &TensorSpec, in1: &TensorSpec, bcast: Bcast) -> bool {
    let by_volume = should_reverse(in0, in1);
    let reverse = if bcast.pattern == BcastPattern::DynamicType {
        false
    } else if bcast.pattern.is_sided() {
        if by_volume != bcast.broadcast_first {
            debug!(
                "Volume order of {in0} and {in1} disagrees with {bcast}; \
                 following the broadcast side"
            );
        }
        bcast.broadcast_first
    } else {
        by_volume
    };
    debug!("Operands of {bcast} kernel reversed: {reverse}");
    reverse
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape;
    use crate::tensorspec::{broadcast_shapes, Dim, Shape};
    use proptest::prelude::*;
    use strum::IntoEnumIterator;

    fn f32_spec(shape: Shape) -> TensorSpec {
        TensorSpec::new(shape, Dtype::Float32)
    }

    fn kernel(op: BinaryOp, dtype: Dtype, s0: Shape, s1: Shape) -> BinaryKernel {
        let out = broadcast_shapes(&s0, &s1).unwrap();
        BinaryKernel::new(
            op,
            TensorSpec::new(s0, dtype),
            TensorSpec::new(s1, dtype),
            TensorSpec::new(out, dtype),
        )
        .unwrap()
    }

    fn canonical_shape_pairs() -> Vec<(Shape, Shape)> {
        vec![
            (shape![1000], shape![1000]),
            (shape![2, 3, 4], shape![1]),
            (shape![1], shape![37]),
            (shape![2, 8, 5, 5], shape![1, 8, 1, 1]),
            (shape![1, 8, 1, 1], shape![2, 8, 5, 5]),
            (shape![2, 3, 5, 5, 4], shape![1, 3, 1, 1, 4]),
            (shape![6, 7, 16], shape![16]),
            (shape![6, 7, 16], shape![6, 7, 1]),
            (shape![2, 3, 4, 5], shape![4, 5]),
            (shape![2, 3, 4], shape![1, 3, 1]),
            (shape![2, ?], shape![1]),
        ]
    }

    #[test]
    fn test_kernel_name() {
        let k = kernel(BinaryOp::TrueDiv, Dtype::Float16, shape![1], shape![8, 8]);
        assert_eq!(k.kernel_name(), "GI_kernel_elementwise_TRUE_DIV_f16_SCALAR_VEC");
    }

    #[test]
    fn test_every_pattern_renders_completely() {
        for (s0, s1) in canonical_shape_pairs() {
            for op in BinaryOp::iter() {
                for dtype in Dtype::iter() {
                    let k = kernel(op, dtype, s0.clone(), s1.clone());
                    let body = k.gen_code_body(&KernelArgs::default()).unwrap();
                    assert!(!body.contains("${"), "{}: {body}", k.kernel_name());
                    assert!(!body.contains("kernel_"), "{}: {body}", k.kernel_name());
                }
            }
        }
    }

    #[test]
    fn test_vec_vec_add_f32_body() {
        let k = kernel(BinaryOp::Add, Dtype::Float32, shape![1000], shape![1000]);
        assert_eq!(k.bcast(), Bcast::new(BcastPattern::VecVec, false));
        assert!(!k.reverse());
        let body = k.gen_code_body(&KernelArgs::default()).unwrap();
        assert!(body.contains("size_t SIMD_WIDTH = 4;"));
        assert!(body.contains("const float *src0 = inputs[0]->ptr;"));
        assert!(body.contains("GiStoreFloat32((dst) + 4 * 1, GiAddFloat32(vsrc0_1, vsrc1_1));"));
        assert_eq!(body.matches("GiStoreFloat32(").count(), 3);
        assert!(body.contains("(dst)[0] = (src0)[0] + (src1)[0];"));

        let (groups, schedule) = k.loop_schedule().unwrap();
        assert_eq!(groups, 1);
        assert_eq!(
            (schedule.double_tiles, schedule.single_tiles, schedule.remainder),
            (125, 0, 0)
        );
    }

    #[test]
    fn test_unrolled_statements_are_indented_at_loop_depth() {
        let k = kernel(BinaryOp::FuseAddRelu, Dtype::Float32, shape![1000], shape![1000]);
        let mut out = String::new();
        k.emit_kernel(&KernelArgs::default(), &mut out).unwrap();
        assert!(out.contains(
            "vsrc1_1 = GiLoadFloat32(src1 + SIMD_WIDTH);\n      \
             GI_FLOAT32_t vtmp_0 = GiAddFloat32(vsrc0_0, vsrc1_0);\n      \
             GiStoreFloat32((dst) + 4 * 0, GiMaximumFloat32(vtmp_0, vzero));\n      \
             GI_FLOAT32_t vtmp_1"
        ));
        assert!(out.contains("\n  GI_FLOAT32_t vzero = GiBroadcastFloat32(0.f);\n"));
        assert!(out.contains("\n      float tmp_0 = (src0)[0] + (src1)[0];\n      (dst)[0] = tmp_0"));
        for line in out.lines().filter(|l| l.contains("GiStoreFloat32")) {
            assert!(line.starts_with("      "), "{line:?}");
        }
    }

    #[test]
    fn test_scalar_minus_vector_keeps_operand_order() {
        for (op, token, prim) in [
            (BinaryOp::Sub, "-", "GiSubtractFloat32"),
            (BinaryOp::TrueDiv, "/", "GiDivideFloat32"),
        ] {
            let k = kernel(op, Dtype::Float32, shape![1], shape![100]);
            assert_eq!(k.bcast(), Bcast::new(BcastPattern::VecScalar, true));
            assert!(k.reverse());
            let body = k.gen_code_body(&KernelArgs::default()).unwrap();
            // The scalar in0 is bound to src1 and broadcast into vsrc1_0.
            assert!(body.contains("const float *src0 = inputs[1]->ptr;"));
            assert!(body.contains("const float *src1 = inputs[0]->ptr;"));
            assert!(body.contains(&format!("{prim}(vsrc1_0, vsrc0_0)")));
            assert!(body.contains(&format!("(dst)[0] = (src1)[0] {token} (src0)[0];")));
        }
    }

    #[test]
    fn test_dynamic_kernel_keeps_operand_order() {
        let k = kernel(BinaryOp::Sub, Dtype::Float32, shape![1], shape![?, 4]);
        assert_eq!(k.bcast().pattern, BcastPattern::DynamicType);
        assert!(!k.reverse());
        let body = k.gen_code_body(&KernelArgs::default()).unwrap();
        assert!(body.contains("Layout src_layout_0 = inputs[0]->layout;"));
        assert!(body.contains("GiSubtractFloat32(vsrc0_0, vsrc1_0)"));
        assert_eq!(k.loop_schedule(), None);
    }

    #[test]
    fn test_custom_tensor_expressions() {
        let k = kernel(BinaryOp::Mul, Dtype::Float32, shape![2, 3, 4], shape![1, 3, 1]);
        let args = KernelArgs {
            inputs: [
                TensorExprs::new("a_ptr", "a_layout"),
                TensorExprs::new("b_ptr", "b_layout"),
            ],
            output: TensorExprs::new("c_ptr", "c_layout"),
        };
        let body = k.gen_code_body(&args).unwrap();
        assert!(body.contains("Layout src_layout_0 = a_layout;"));
        assert!(body.contains("Layout src_layout_1 = b_layout;"));
        assert!(body.contains("float *dst = c_ptr;"));
        assert!(body.contains("(src0 + src0_iter.offset)[0] * (src1 + src1_iter.offset)[0]"));
    }

    #[test]
    fn test_with_bcast_rejects_inapplicable_patterns() {
        let (in0, in1, out) = (
            f32_spec(shape![2, 3, 4]),
            f32_spec(shape![1, 3, 1]),
            f32_spec(shape![2, 3, 4]),
        );
        let err = BinaryKernel::with_bcast(
            BinaryOp::Add,
            in0.clone(),
            in1.clone(),
            out.clone(),
            Bcast::new(BcastPattern::VecScalar, false),
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedPattern { .. }));

        // Naive and dynamic skeletons are always correct.
        for pattern in [BcastPattern::Naive, BcastPattern::DynamicType] {
            BinaryKernel::with_bcast(
                BinaryOp::Add,
                in0.clone(),
                in1.clone(),
                out.clone(),
                Bcast::new(pattern, false),
            )
            .unwrap();
        }
    }

    #[test]
    fn test_mismatched_dtypes_are_rejected() {
        let err = BinaryKernel::new(
            BinaryOp::Add,
            f32_spec(shape![4]),
            TensorSpec::new(shape![4], Dtype::Float16),
            f32_spec(shape![4]),
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::DtypeMismatch { .. }));
    }

    #[test]
    fn test_input_rank_above_output_is_rejected() {
        let err = BinaryKernel::new(
            BinaryOp::Add,
            f32_spec(shape![1, 4]),
            f32_spec(shape![4]),
            f32_spec(shape![4]),
        )
        .unwrap_err();
        assert!(matches!(err, CodegenError::MalformedShape(_)));
    }

    #[test]
    fn test_grouped_schedules() {
        let k = kernel(BinaryOp::Add, Dtype::Float32, shape![2, 8, 5, 5], shape![1, 8, 1, 1]);
        let (groups, schedule) = k.loop_schedule().unwrap();
        assert_eq!(groups, 16);
        assert_eq!(schedule, LoopSchedule::new(25, 4));

        let k = kernel(BinaryOp::Add, Dtype::Float32, shape![6, 7, 1], shape![6, 7, 16]);
        assert_eq!(k.bcast(), Bcast::new(BcastPattern::VecBcast110, true));
        let (groups, schedule) = k.loop_schedule().unwrap();
        assert_eq!(groups, 42);
        assert_eq!(schedule, LoopSchedule::new(16, 4));

        let k = kernel(BinaryOp::Add, Dtype::Float32, shape![2, 3, 4, 5], shape![4, 5]);
        let (groups, schedule) = k.loop_schedule().unwrap();
        assert_eq!(groups, 6);
        assert_eq!(schedule, LoopSchedule::new(20, 4));
    }

    #[test]
    fn test_standalone_translation_unit() {
        let k = kernel(BinaryOp::FuseAddRelu, Dtype::Float16, shape![3, 9], shape![9]);
        let shapes = RuntimeShapes::from_static(&k).unwrap();
        let mut out = String::new();
        k.emit_standalone(Some(&shapes), &mut out).unwrap();
        assert!(out.contains("typedef struct {"));
        assert!(out.contains(&format!(
            "int {}(Tensor **inputs, int nr_input, Tensor **outputs, int nr_output) {{",
            k.kernel_name()
        )));
        assert!(out.contains("// bcast: VEC_BCAST111C, reversed: false"));
        assert!(out.contains("// schedule: 3 x (0 x 16 + 1 x 8 + 1 scalar)"));
        assert!(out.contains("  GI_FLOAT16_t vzero = GiBroadcastFloat16(0.0);"));
        assert!(out.contains("int main(int argc, char **argv) {"));

        let mut without_main = String::new();
        k.emit_standalone(None, &mut without_main).unwrap();
        assert!(!without_main.contains("int main("));
    }

    proptest! {
        #[test]
        fn test_random_static_shapes_render(
            dims in proptest::collection::vec(1..6u32, 1..=4),
            keep0 in proptest::collection::vec(any::<bool>(), 4),
            keep1 in proptest::collection::vec(any::<bool>(), 4),
            op in any::<BinaryOp>(),
            dtype in any::<Dtype>(),
        ) {
            let mask = |keep: &[bool]| -> Shape {
                dims.iter()
                    .zip(keep)
                    .map(|(&d, &k)| Dim::Static(if k { d } else { 1 }))
                    .collect()
            };
            let k = kernel(op, dtype, mask(&keep0), mask(&keep1));
            let body = k.gen_code_body(&KernelArgs::default()).unwrap();
            prop_assert!(
                !body.contains("${"),
                "unrendered placeholder in {}",
                k.kernel_name()
            );
            if k.bcast().pattern.is_sided() {
                prop_assert_eq!(k.reverse(), k.bcast().broadcast_first);
            }
        }
    }
}
