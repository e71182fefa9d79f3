#![cfg(feature = "verification")]

use std::collections::HashSet;

use elemgen::bcast::{BcastPattern, DynamicBranch};
use elemgen::codegen::{BinaryKernel, RuntimeShapes};
use elemgen::common::{BinaryOp, Dtype};
use elemgen::shape;
use elemgen::tensorspec::{Shape, TensorSpec};
use rand::{rngs::StdRng, SeedableRng};
use strum::IntoEnumIterator;

fn clang_available() -> bool {
    matches!(std::env::var("CLANG"), Ok(v) if !v.is_empty())
}

fn check(op: BinaryOp, dtype: Dtype, s0: Shape, s1: Shape, out: Shape, expected: BcastPattern) {
    let kernel = BinaryKernel::new(
        op,
        TensorSpec::new(s0, dtype),
        TensorSpec::new(s1, dtype),
        TensorSpec::new(out, dtype),
    )
    .unwrap();
    assert_eq!(kernel.bcast().pattern, expected);
    let shapes = RuntimeShapes::from_static(&kernel).unwrap();
    let artifact = kernel.build(&shapes).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    assert!(
        artifact.check_correctness(op, &mut rng).unwrap(),
        "{} produced incorrect output",
        kernel.kernel_name()
    );
}

#[test]
fn test_every_static_pattern_matches_reference() {
    if !clang_available() {
        return;
    }
    for op in BinaryOp::iter() {
        for dtype in Dtype::iter().filter(|&d| op.supports(d)) {
            let w = dtype.simd_width();
            let cases = [
                (shape![37], shape![37], shape![37], BcastPattern::VecVec),
                (shape![1], shape![37], shape![37], BcastPattern::VecScalar),
                (shape![2, 5, 3, 3], shape![1, 5, 1, 1], shape![2, 5, 3, 3], BcastPattern::VecBcast101),
                (shape![2, 3, 2, 2, w], shape![1, 3, 1, 1, w], shape![2, 3, 2, 2, w], BcastPattern::VecBcast101xX),
                (shape![2, 3, 5, 7], shape![1, 1, 1, 7], shape![2, 3, 5, 7], BcastPattern::VecBcast111C),
                (shape![3, 5, 2], shape![3, 5, 1], shape![3, 5, 2], BcastPattern::VecBcast110),
                (shape![4, 6, 9], shape![1, 6, 9], shape![4, 6, 9], BcastPattern::VecBv),
                (shape![2, 1, 3], shape![1, 4, 1], shape![2, 4, 3], BcastPattern::Naive),
            ];
            for (s0, s1, out, pattern) in &cases {
                check(op, dtype, s0.clone(), s1.clone(), out.clone(), *pattern);
                // Swapped operands exercise the reversed variants.
                check(op, dtype, s1.clone(), s0.clone(), out.clone(), *pattern);
            }
        }
    }
}

#[test]
fn test_dynamic_kernel_matches_reference() {
    if !clang_available() {
        return;
    }
    let dtype = Dtype::Float32;
    for op in [BinaryOp::Sub, BinaryOp::TrueDiv, BinaryOp::FuseAddRelu] {
        let kernel = BinaryKernel::new(
            op,
            TensorSpec::new(shape![?, 6], dtype),
            TensorSpec::new(shape![?, 6], dtype),
            TensorSpec::new(shape![?, 6], dtype),
        )
        .unwrap();
        assert_eq!(kernel.bcast().pattern, BcastPattern::DynamicType);
        for (in0, in1) in [
            (vec![5, 6], vec![5, 6]),
            (vec![1, 6], vec![5, 6]),
            (vec![5, 6], vec![1, 6]),
        ] {
            let shapes = RuntimeShapes::resolve(&kernel, &in0, &in1).unwrap();
            let artifact = kernel.build(&shapes).unwrap();
            let mut rng = StdRng::seed_from_u64(7);
            assert!(artifact.check_correctness(op, &mut rng).unwrap());
        }
    }
}

fn dynamic_shape(rank: usize) -> Shape {
    std::iter::repeat(elemgen::tensorspec::Dim::Dynamic)
        .take(rank)
        .collect()
}

#[test]
fn test_fully_dynamic_kernel_takes_every_branch() {
    if !clang_available() {
        return;
    }
    let dtype = Dtype::Float32;
    let cases: [(Vec<u32>, Vec<u32>); 10] = [
        // Same volume.
        (vec![3, 7], vec![3, 7]),
        // One operand holds a single element.
        (vec![1], vec![3, 7]),
        (vec![3, 7], vec![1]),
        (vec![0], vec![1]),
        // One operand is a single row of the other.
        (vec![3, 7], vec![7]),
        (vec![7], vec![3, 7]),
        // General broadcast.
        (vec![2, 3, 4], vec![1, 3, 1]),
        (vec![4, 1], vec![1, 5]),
        (vec![1, 8, 1, 1], vec![2, 8, 5, 5]),
        (vec![2, 8, 5, 5], vec![1, 8, 1, 1]),
    ];
    let mut branches = HashSet::new();
    for op in [BinaryOp::Sub, BinaryOp::TrueDiv] {
        for (in0, in1) in &cases {
            let out_rank = in0.len().max(in1.len());
            let kernel = BinaryKernel::new(
                op,
                TensorSpec::new(dynamic_shape(in0.len()), dtype),
                TensorSpec::new(dynamic_shape(in1.len()), dtype),
                TensorSpec::new(dynamic_shape(out_rank), dtype),
            )
            .unwrap();
            assert_eq!(kernel.bcast().pattern, BcastPattern::DynamicType);
            let shapes = RuntimeShapes::resolve(&kernel, in0, in1).unwrap();
            branches.insert(DynamicBranch::select(in0, in1, &shapes.output));
            let artifact = kernel.build(&shapes).unwrap();
            let mut rng = StdRng::seed_from_u64(11);
            assert!(
                artifact.check_correctness(op, &mut rng).unwrap(),
                "{op} on {in0:?} and {in1:?} produced incorrect output"
            );
        }
    }
    assert_eq!(branches.len(), 4);
}
