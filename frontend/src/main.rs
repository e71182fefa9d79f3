#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use log::info;
use prettytable::{format, row};
use rayon::prelude::*;
use strum::IntoEnumIterator;

use std::io::{self, Write};
use std::path;

use elemgen::codegen::{BinaryKernel, BuiltArtifact, KernelArgs, RuntimeShapes};
use elemgen::common::{BinaryOp, Dtype};
use elemgen::tensorspec::{broadcast_shapes, parse_shape, Shape, TensorSpec};
use elemgen::utils::ToWriteFmt;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    subcmd: Subcommand,
}

#[derive(clap::Subcommand)]
enum Subcommand {
    /// Print the generated kernel
    Emit(EmitCmd),

    /// Print the broadcast pattern chosen for pairs of shapes
    Classify {
        #[arg(long, value_enum, default_value_t = Dtype::Float32)]
        dtype: Dtype,

        /// Shapes, taken in pairs
        #[arg(value_parser = parse_shape, num_args = 2.., required = true)]
        shapes: Vec<Shape>,
    },

    /// Generate every operator and dtype for a pair of shapes
    All {
        #[arg(value_parser = parse_shape)]
        shape0: Shape,
        #[arg(value_parser = parse_shape)]
        shape1: Shape,
    },

    /// Compile the kernel with $CLANG and run it
    Run(RunCmd),
}

#[derive(clap::Args)]
struct KernelQuery {
    #[arg(value_enum)]
    op: BinaryOp,
    #[arg(value_enum)]
    dtype: Dtype,
    /// First operand shape, e.g. `2x3x?`
    #[arg(value_parser = parse_shape)]
    shape0: Shape,
    /// Second operand shape
    #[arg(value_parser = parse_shape)]
    shape1: Shape,
    /// Output shape. Inferred by broadcasting the operands if omitted.
    #[arg(long, value_parser = parse_shape)]
    out: Option<Shape>,
}

#[derive(clap::Args)]
struct EmitCmd {
    #[command(flatten)]
    query: KernelQuery,

    /// Include the runtime header
    #[arg(long, default_value_t = false)]
    standalone: bool,

    /// Include a `main` which reads inputs from files (implies --standalone)
    #[arg(long, default_value_t = false)]
    harness: bool,
}

#[derive(clap::Args)]
struct RunCmd {
    #[command(flatten)]
    query: KernelQuery,

    /// Concrete operand shapes for kernels with dynamic extents
    #[arg(long, value_parser = parse_shape, num_args = 2)]
    runtime_shapes: Option<Vec<Shape>>,

    /// Raw little-endian input files. Random inputs are checked against a reference otherwise.
    #[arg(long, num_args = 2)]
    inputs: Option<Vec<path::PathBuf>>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    match &args.subcmd {
        Subcommand::Emit(cmd) => emit(cmd),
        Subcommand::Classify { dtype, shapes } => classify(*dtype, shapes),
        Subcommand::All { shape0, shape1 } => all(shape0, shape1),
        Subcommand::Run(cmd) => run(cmd),
    }
}

impl KernelQuery {
    fn kernel(&self) -> Result<BinaryKernel> {
        make_kernel(
            self.op,
            self.dtype,
            &self.shape0,
            &self.shape1,
            self.out.as_ref(),
        )
    }
}

fn make_kernel(
    op: BinaryOp,
    dtype: Dtype,
    shape0: &Shape,
    shape1: &Shape,
    out: Option<&Shape>,
) -> Result<BinaryKernel> {
    let out = match out {
        Some(out) => out.clone(),
        None => broadcast_shapes(shape0, shape1)
            .ok_or_else(|| anyhow!("shapes {shape0:?} and {shape1:?} do not broadcast"))?,
    };
    Ok(BinaryKernel::new(
        op,
        TensorSpec::new(shape0.clone(), dtype),
        TensorSpec::new(shape1.clone(), dtype),
        TensorSpec::new(out, dtype),
    )?)
}

fn emit(cmd: &EmitCmd) -> Result<()> {
    let kernel = cmd.query.kernel()?;
    info!("Emitting {}", kernel.kernel_name());
    let mut out = ToWriteFmt(io::stdout());
    if cmd.harness {
        let shapes = RuntimeShapes::from_static(&kernel)
            .ok_or_else(|| anyhow!("--harness requires static shapes"))?;
        kernel.emit_standalone(Some(&shapes), &mut out)?;
    } else if cmd.standalone {
        kernel.emit_standalone(None, &mut out)?;
    } else {
        kernel.emit_kernel(&KernelArgs::default(), &mut out)?;
    }
    Ok(())
}

fn classify(dtype: Dtype, shapes: &[Shape]) -> Result<()> {
    if shapes.len() % 2 != 0 {
        bail!("expected pairs of shapes but got {}", shapes.len());
    }
    let mut table = prettytable::Table::new();
    table.set_titles(row!["In0", "In1", "Out", "Pattern", "Reversed", "Kernel"]);
    for pair in shapes.chunks(2) {
        let kernel = make_kernel(BinaryOp::Add, dtype, &pair[0], &pair[1], None)?;
        let [in0, in1] = kernel.inputs();
        table.add_row(row![
            in0,
            in1,
            kernel.output(),
            kernel.bcast(),
            kernel.reverse(),
            kernel.kernel_name()
        ]);
    }
    table.set_format(compact_format());
    table.printstd();
    Ok(())
}

fn all(shape0: &Shape, shape1: &Shape) -> Result<()> {
    let configs = BinaryOp::iter()
        .flat_map(|op| {
            Dtype::iter()
                .filter(move |&d| op.supports(d))
                .map(move |d| (op, d))
        })
        .collect::<Vec<_>>();
    let results = configs
        .into_par_iter()
        .map(|(op, dtype)| {
            let kernel = make_kernel(op, dtype, shape0, shape1, None)?;
            let mut source = String::new();
            kernel.emit_kernel(&KernelArgs::default(), &mut source)?;
            Ok((kernel.kernel_name(), source.lines().count(), source.len()))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut table = prettytable::Table::new();
    table.set_titles(row!["Kernel", "Lines", "Bytes"]);
    for (name, lines, bytes) in results {
        table.add_row(row![name, r->lines, r->bytes]);
    }
    table.set_format(compact_format());
    table.printstd();
    Ok(())
}

fn run(cmd: &RunCmd) -> Result<()> {
    let kernel = cmd.query.kernel()?;
    let shapes = match &cmd.runtime_shapes {
        Some(dims) => {
            let [in0, in1] = [&dims[0], &dims[1]].map(|s| {
                s.iter()
                    .map(|d| d.get().ok_or_else(|| anyhow!("run-time shapes must be static")))
                    .collect::<Result<Vec<_>>>()
            });
            RuntimeShapes::resolve(&kernel, &in0?, &in1?)?
        }
        None => RuntimeShapes::from_static(&kernel)
            .ok_or_else(|| anyhow!("kernel has dynamic extents; pass --runtime-shapes"))?,
    };
    let built_artifact = kernel.build(&shapes)?;

    if let Some(inputs) = &cmd.inputs {
        let output = built_artifact.run(&inputs[0], &inputs[1])?;
        io::stdout().write_all(&output.stdout)?;
        return Ok(());
    }

    check_random(&kernel, &built_artifact)
}

#[cfg(feature = "verification")]
fn check_random(kernel: &BinaryKernel, built_artifact: &BuiltArtifact) -> Result<()> {
    let mut rng = rand::thread_rng();
    if !built_artifact.check_correctness(kernel.op(), &mut rng)? {
        bail!("Generated code returned incorrect output");
    }
    println!("{}: OK", kernel.kernel_name());
    Ok(())
}

#[cfg(not(feature = "verification"))]
fn check_random(_kernel: &BinaryKernel, _built_artifact: &BuiltArtifact) -> Result<()> {
    bail!("Built without the verification feature; pass --inputs")
}

fn compact_format() -> format::TableFormat {
    format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build()
}
