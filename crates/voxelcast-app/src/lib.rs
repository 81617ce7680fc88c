//! Run loop, configuration and logging for voxelcast.
//!
//! A run initializes the GPU resources once, then for every configured scale
//! dispatches the voxelizer, reads the grid back and writes a PNG atlas.
//!
//! # Example
//!
//! ```no_run
//! use voxelcast_app::{init_logging, CliArgs, RunConfig, RunPlan, Runner, VoxelWorkload};
//! use voxelcast_gpu::GpuContextBuilder;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = RunConfig::resolve(&CliArgs::from_args()?)?;
//!     let _guard = init_logging(&config.logging)?;
//!
//!     let ctx = GpuContextBuilder::new().build()?;
//!     let mut runner = Runner::initialize(RunPlan::from(&config), || {
//!         VoxelWorkload::new(&ctx, &config)
//!     });
//!     std::process::exit(runner.run().exit_code());
//! }
//! ```

pub mod config;
pub mod logging;
pub mod runner;
pub mod workload;

pub use config::{CliArgs, IterationPolicy, LoggingConfig, RunConfig, USAGE};
pub use logging::init_logging;
pub use runner::{IterationReport, RunPlan, RunReport, RunState, Runner, Workload};
pub use workload::VoxelWorkload;

pub use voxelcast_gpu::{GpuContext, GpuContextBuilder};
