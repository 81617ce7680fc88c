//! Run loop: initialize once, then dispatch, read back and encode per scale.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use voxelcast_render::output_path;

use crate::config::{IterationPolicy, RunConfig};

/// Phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Ready,
    Dispatching,
    ReadingBack,
    Encoding,
    Done,
    Failed,
}

/// The GPU work a [`Runner`] drives, one call per phase.
pub trait Workload {
    /// Update the shader parameters for the next dispatch.
    fn set_scale(&mut self, scale: f32) -> anyhow::Result<()>;

    /// Run the compute pass and wait for it.
    fn dispatch(&mut self) -> anyhow::Result<()>;

    /// Copy the result to host memory.
    fn read_back(&mut self) -> anyhow::Result<Vec<u8>>;

    /// Write read-back bytes to `path`.
    fn encode(&mut self, data: &[u8], path: &Path) -> anyhow::Result<()>;
}

/// What the runner iterates over.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub scales: Vec<f32>,
    pub output_pattern: String,
    pub policy: IterationPolicy,
}

impl From<&RunConfig> for RunPlan {
    fn from(config: &RunConfig) -> Self {
        Self {
            scales: config.scales.clone(),
            output_pattern: config.output.clone(),
            policy: config.on_iteration_error,
        }
    }
}

/// Outcome of one iteration.
#[derive(Debug, Clone)]
pub struct IterationReport {
    /// 1-based iteration number
    pub index: usize,
    pub scale: f32,
    pub output: PathBuf,
    /// Dispatch plus read-back wall time
    pub gpu_time: Duration,
    pub error: Option<String>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub iterations: Vec<IterationReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.iterations.iter().filter(|it| it.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.iterations.len() - self.succeeded()
    }

    /// True when the run finished and every iteration succeeded.
    pub fn is_success(&self) -> bool {
        self.state == RunState::Done && self.failed() == 0
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.is_success())
    }
}

/// Drives a [`Workload`] through the scale sweep.
pub struct Runner<W> {
    workload: Option<W>,
    plan: RunPlan,
    state: RunState,
    history: Vec<RunState>,
}

impl<W: Workload> Runner<W> {
    /// Run `init` to build the workload.
    ///
    /// On failure the runner is left `Failed` and [`Self::run`] does nothing.
    pub fn initialize(plan: RunPlan, init: impl FnOnce() -> anyhow::Result<W>) -> Self {
        let mut runner = Self {
            workload: None,
            plan,
            state: RunState::Initializing,
            history: vec![RunState::Initializing],
        };

        match init() {
            Ok(workload) => {
                runner.workload = Some(workload);
                runner.transition(RunState::Ready);
            }
            Err(e) => {
                error!("Initialization failed: {e:#}");
                runner.transition(RunState::Failed);
            }
        }

        runner
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[RunState] {
        &self.history
    }

    pub fn workload(&self) -> Option<&W> {
        self.workload.as_ref()
    }

    fn transition(&mut self, next: RunState) {
        debug!("{:?} -> {next:?}", self.state);
        self.state = next;
        self.history.push(next);
    }

    /// Run every iteration of the plan.
    pub fn run(&mut self) -> RunReport {
        let mut iterations = Vec::with_capacity(self.plan.scales.len());

        if self.state != RunState::Ready {
            warn!("Run skipped in state {:?}", self.state);
            return RunReport {
                state: self.state,
                iterations,
            };
        }

        let scales = self.plan.scales.clone();
        for (i, scale) in scales.into_iter().enumerate() {
            let index = i + 1;
            let output = output_path(&self.plan.output_pattern, index);
            let mut gpu_time = Duration::ZERO;

            let result = self.run_iteration(index, scale, &output, &mut gpu_time);
            let error = result.err().map(|e| {
                error!("Iteration {index} (scale {scale}) failed: {e:#}");
                format!("{e:#}")
            });
            let failed = error.is_some();

            iterations.push(IterationReport {
                index,
                scale,
                output,
                gpu_time,
                error,
            });

            if failed {
                if self.plan.policy == IterationPolicy::Abort {
                    self.transition(RunState::Failed);
                    break;
                }
                self.transition(RunState::Ready);
            }
        }

        if self.state == RunState::Ready {
            self.transition(RunState::Done);
        }

        let report = RunReport {
            state: self.state,
            iterations,
        };
        info!(
            "Run finished: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    fn run_iteration(
        &mut self,
        index: usize,
        scale: f32,
        output: &Path,
        gpu_time: &mut Duration,
    ) -> anyhow::Result<()> {
        let Some(mut workload) = self.workload.take() else {
            anyhow::bail!("No workload");
        };
        let result = self.drive(&mut workload, index, scale, output, gpu_time);
        self.workload = Some(workload);
        result
    }

    fn drive(
        &mut self,
        workload: &mut W,
        index: usize,
        scale: f32,
        output: &Path,
        gpu_time: &mut Duration,
    ) -> anyhow::Result<()> {
        workload.set_scale(scale)?;

        let start = Instant::now();
        self.transition(RunState::Dispatching);
        workload.dispatch()?;
        self.transition(RunState::ReadingBack);
        let data = workload.read_back()?;
        *gpu_time = start.elapsed();

        info!("image {index} took {}ms", gpu_time.as_millis());

        self.transition(RunState::Encoding);
        workload.encode(&data, output)?;
        self.transition(RunState::Ready);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every call; fails the listed phases on the listed iterations.
    #[derive(Default)]
    struct FakeWorkload {
        calls: Vec<String>,
        fail_dispatch_at: Option<usize>,
        fail_read_back_at: Option<usize>,
        dispatches: usize,
    }

    impl Workload for FakeWorkload {
        fn set_scale(&mut self, scale: f32) -> anyhow::Result<()> {
            self.calls.push(format!("scale {scale}"));
            Ok(())
        }

        fn dispatch(&mut self) -> anyhow::Result<()> {
            self.dispatches += 1;
            self.calls.push("dispatch".to_string());
            if self.fail_dispatch_at == Some(self.dispatches) {
                anyhow::bail!("device lost");
            }
            Ok(())
        }

        fn read_back(&mut self) -> anyhow::Result<Vec<u8>> {
            self.calls.push("read_back".to_string());
            if self.fail_read_back_at == Some(self.dispatches) {
                anyhow::bail!("map failed");
            }
            Ok(vec![0; 4])
        }

        fn encode(&mut self, data: &[u8], path: &Path) -> anyhow::Result<()> {
            self.calls
                .push(format!("encode {} {}", data.len(), path.display()));
            Ok(())
        }
    }

    fn plan(scales: &[f32], policy: IterationPolicy) -> RunPlan {
        RunPlan {
            scales: scales.to_vec(),
            output_pattern: "output_{}.png".to_string(),
            policy,
        }
    }

    #[test]
    fn init_failure_stops_everything() {
        let mut runner = Runner::<FakeWorkload>::initialize(
            plan(&[0.5], IterationPolicy::Skip),
            || anyhow::bail!("Failed to create compute shader"),
        );
        assert_eq!(runner.state(), RunState::Failed);

        let report = runner.run();
        assert_eq!(report.state, RunState::Failed);
        assert!(report.iterations.is_empty());
        assert!(runner.workload().is_none());
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn full_sweep_visits_every_phase() {
        let mut runner = Runner::initialize(plan(&[0.5, 1.0], IterationPolicy::Skip), || {
            Ok(FakeWorkload::default())
        });
        let report = runner.run();

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            runner.workload().unwrap().calls,
            vec![
                "scale 0.5",
                "dispatch",
                "read_back",
                "encode 4 output_01.png",
                "scale 1",
                "dispatch",
                "read_back",
                "encode 4 output_02.png",
            ]
        );

        use RunState::*;
        assert_eq!(
            runner.history(),
            &[
                Initializing,
                Ready,
                Dispatching,
                ReadingBack,
                Encoding,
                Ready,
                Dispatching,
                ReadingBack,
                Encoding,
                Ready,
                Done
            ]
        );
    }

    #[test]
    fn skip_policy_continues_after_failure() {
        let mut runner = Runner::initialize(plan(&[0.1, 0.2, 0.3], IterationPolicy::Skip), || {
            Ok(FakeWorkload {
                fail_read_back_at: Some(2),
                ..FakeWorkload::default()
            })
        });
        let report = runner.run();

        assert_eq!(report.state, RunState::Done);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        assert!(report.iterations[1].error.as_deref().unwrap().contains("map failed"));
        assert_eq!(report.exit_code(), 1);

        // The failed iteration never encodes
        let encodes = runner
            .workload()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with("encode"))
            .count();
        assert_eq!(encodes, 2);
    }

    #[test]
    fn abort_policy_stops_at_first_failure() {
        let mut runner = Runner::initialize(plan(&[0.1, 0.2, 0.3], IterationPolicy::Abort), || {
            Ok(FakeWorkload {
                fail_dispatch_at: Some(1),
                ..FakeWorkload::default()
            })
        });
        let report = runner.run();

        assert_eq!(report.state, RunState::Failed);
        assert_eq!(report.iterations.len(), 1);
        assert_eq!(runner.workload().unwrap().dispatches, 1);
        assert!(!runner.workload().unwrap().calls.contains(&"read_back".to_string()));
    }

    #[test]
    fn single_scale_without_placeholder() {
        let mut runner = Runner::initialize(
            RunPlan {
                scales: vec![1.0],
                output_pattern: "voxels.png".to_string(),
                policy: IterationPolicy::Skip,
            },
            || Ok(FakeWorkload::default()),
        );
        let report = runner.run();
        assert_eq!(report.iterations[0].output, PathBuf::from("voxels.png"));
    }

    #[test]
    fn second_run_is_a_no_op() {
        let mut runner = Runner::initialize(plan(&[1.0], IterationPolicy::Skip), || {
            Ok(FakeWorkload::default())
        });
        assert!(runner.run().is_success());

        let again = runner.run();
        assert_eq!(again.state, RunState::Done);
        assert!(again.iterations.is_empty());
    }
}
