//! Operator-specific C fragments plugged into the loop skeletons.
//!
//! Unroll callbacks receive `[n, dst, a0, b0, a1, b1, ...]` and emit `n` statements, the `i`-th
//! combining `a_i` and `b_i` into `dst` at the `i`-th vector (or element) offset.

use super::c_utils::{c_type, vec_type, zero_literal};
use super::CodegenError;
use crate::common::{BinaryOp, Dtype};

/// Emits the fragments of one [BinaryOp] for one [Dtype].
///
/// With `reverse` set the skeleton's operands arrive swapped, so non-commutative operators
/// swap them back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpEmitter {
    pub op: BinaryOp,
    pub dtype: Dtype,
    pub reverse: bool,
}

struct UnrollArgs<'a> {
    unroll: usize,
    dst: &'a str,
    operands: &'a [&'a str],
}

impl OpEmitter {
    pub fn new(op: BinaryOp, dtype: Dtype, reverse: bool) -> Self {
        OpEmitter { op, dtype, reverse }
    }

    /// Declarations needed once per kernel, before any loop.
    pub fn init(&self, _args: &[&str]) -> Result<String, CodegenError> {
        match self.op {
            BinaryOp::FuseAddRelu => {
                let vt = vec_type(self.dtype);
                Ok(format!(
                    "{} vzero = {}({});",
                    vt.name,
                    vt.gi_fn("Broadcast"),
                    zero_literal(self.dtype)
                ))
            }
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::TrueDiv
            | BinaryOp::Max
            | BinaryOp::Min => Ok(String::new()),
        }
    }

    /// Vector statements storing `op(a_i, b_i)` to `dst + width * i`.
    pub fn simd_unroll(&self, args: &[&str]) -> Result<String, CodegenError> {
        let UnrollArgs {
            unroll,
            dst,
            operands,
        } = parse_unroll_args(args)?;
        let vt = vec_type(self.dtype);
        let width = self.dtype.simd_width();
        let store = vt.gi_fn("Store");
        let mut lines = Vec::with_capacity(unroll);
        for i in 0..unroll {
            let (a, b) = self.ordered(operands[2 * i], operands[2 * i + 1]);
            match self.op {
                BinaryOp::FuseAddRelu => {
                    lines.push(format!(
                        "{} vtmp_{i} = {}({a}, {b});",
                        vt.name,
                        vt.gi_fn("Add")
                    ));
                    lines.push(format!(
                        "{store}(({dst}) + {width} * {i}, {}(vtmp_{i}, vzero));",
                        vt.gi_fn("Maximum")
                    ));
                }
                _ => {
                    lines.push(format!(
                        "{store}(({dst}) + {width} * {i}, {}({a}, {b}));",
                        vt.gi_fn(self.simd_stem())
                    ));
                }
            }
        }
        Ok(lines.join("\n"))
    }

    /// Scalar statements computing `(dst)[i] = op((a_i)[i], (b_i)[i])`.
    pub fn naive_unroll(&self, args: &[&str]) -> Result<String, CodegenError> {
        let UnrollArgs {
            unroll,
            dst,
            operands,
        } = parse_unroll_args(args)?;
        let mut lines = Vec::with_capacity(unroll);
        for i in 0..unroll {
            let (a, b) = self.ordered(operands[2 * i], operands[2 * i + 1]);
            let (a, b) = (format!("({a})[{i}]"), format!("({b})[{i}]"));
            match self.op {
                BinaryOp::Add => lines.push(format!("({dst})[{i}] = {a} + {b};")),
                BinaryOp::Sub => lines.push(format!("({dst})[{i}] = {a} - {b};")),
                BinaryOp::Mul => lines.push(format!("({dst})[{i}] = {a} * {b};")),
                BinaryOp::TrueDiv => lines.push(format!("({dst})[{i}] = {a} / {b};")),
                BinaryOp::Max => lines.push(format!("({dst})[{i}] = {a} > {b} ? {a} : {b};")),
                BinaryOp::Min => lines.push(format!("({dst})[{i}] = {a} < {b} ? {a} : {b};")),
                BinaryOp::FuseAddRelu => {
                    lines.push(format!("{} tmp_{i} = {a} + {b};", c_type(self.dtype)));
                    lines.push(format!(
                        "({dst})[{i}] = tmp_{i} > 0 ? tmp_{i} : {};",
                        match self.dtype {
                            Dtype::Float32 => "0.0f",
                            Dtype::Float16 => "0.0",
                        }
                    ));
                }
            }
        }
        Ok(lines.join("\n"))
    }

    /// The GI primitive stem for the operator's vector form.
    fn simd_stem(&self) -> &'static str {
        match self.op {
            BinaryOp::Add | BinaryOp::FuseAddRelu => "Add",
            BinaryOp::Sub => "Subtract",
            BinaryOp::Mul => "Multiply",
            BinaryOp::TrueDiv => "Divide",
            BinaryOp::Max => "Maximum",
            BinaryOp::Min => "Minimum",
        }
    }

    fn ordered<'a>(&self, a: &'a str, b: &'a str) -> (&'a str, &'a str) {
        if self.reverse && !self.op.is_commutative() {
            (b, a)
        } else {
            (a, b)
        }
    }
}

fn parse_unroll_args<'a>(args: &'a [&'a str]) -> Result<UnrollArgs<'a>, CodegenError> {
    let [unroll, dst, operands @ ..] = args else {
        return Err(CodegenError::MalformedArgs(format!(
            "expected an unroll factor and a destination, got {args:?}"
        )));
    };
    let unroll = unroll.parse::<usize>().map_err(|_| {
        CodegenError::MalformedArgs(format!("unroll factor {unroll:?} is not an integer"))
    })?;
    if operands.len() != 2 * unroll {
        return Err(CodegenError::MalformedArgs(format!(
            "unroll factor {unroll} needs {} operands, got {}",
            2 * unroll,
            operands.len()
        )));
    }
    Ok(UnrollArgs {
        unroll,
        dst: *dst,
        operands,
    })
}
