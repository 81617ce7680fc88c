//! voxelcast: voxelize an OBJ mesh on the GPU and write PNG slice atlases.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p voxelcast -- [OPTIONS]
//! ```
//!
//! The compute shader is read from `shaders/spv/voxelize.spv` in the working
//! directory. Compile it with
//!
//! ```bash
//! glslc crates/voxelcast-shaders/shaders/voxelize.comp -o shaders/spv/voxelize.spv
//! ```
//!
//! or build with `--features embedded-shaders` to compile it into the binary.
//!
//! ## Examples
//!
//! ```bash
//! # Ten scales from 0.1 to 1.0, output_01.png .. output_10.png
//! cargo run -p voxelcast -- -m bunny.obj
//!
//! # A single 256x64x256 grid
//! cargo run -p voxelcast -- -m bunny.obj --extent 256x64x256 --scales 1.0 -o bunny.png
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use anyhow::Context;
use voxelcast_app::{init_logging, CliArgs, RunConfig, RunPlan, Runner, VoxelWorkload, USAGE};
use voxelcast_gpu::GpuContextBuilder;

fn main() {
    // Everything that needs flushing or teardown is dropped inside `run`
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("voxelcast: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

fn run() -> anyhow::Result<i32> {
    let args = CliArgs::from_args()?;
    if args.help {
        eprintln!("{USAGE}");
        return Ok(0);
    }

    let config = RunConfig::resolve(&args).context("Invalid configuration")?;
    let _log_guard = init_logging(&config.logging)?;

    tracing::info!(
        "Voxelizing {} into a {} grid at {} scales",
        config.mesh.display(),
        config.extent(),
        config.scales.len()
    );

    let ctx = match GpuContextBuilder::new()
        .app_name(config.app_name.as_str())
        .validation(config.validation)
        .build()
    {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("Failed to initialize Vulkan: {e}");
            return Ok(1);
        }
    };

    let mut runner = Runner::initialize(RunPlan::from(&config), || {
        VoxelWorkload::new(&ctx, &config)
    });
    let report = runner.run();

    for failed in report.iterations.iter().filter(|it| it.error.is_some()) {
        tracing::warn!("Scale {} produced no output", failed.scale);
    }

    Ok(report.exit_code())
}
