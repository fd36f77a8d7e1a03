use std::time::Duration;

use graphbench_engine::{EngineResult, Graph};
use serde::Serialize;

use crate::errors::{HarnessError, HarnessResult};
use crate::time;

/// Something that can execute one forward pass.
pub trait Execute {
    fn execute(&mut self) -> EngineResult<()>;
}

impl Execute for Graph<'_> {
    fn execute(&mut self) -> EngineResult<()> {
        self.run()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BenchLimits {
    /// Untimed executions before the measured loop.
    pub warmup_loops: usize,
    /// Timed executions.
    pub repeat: usize,
}

impl Default for BenchLimits {
    fn default() -> BenchLimits {
        BenchLimits { warmup_loops: 10, repeat: 1 }
    }
}

impl BenchLimits {
    pub fn validate(&self) -> HarnessResult<()> {
        if self.repeat == 0 {
            return Err(HarnessError::InvalidArgument("repeat count must be at least 1".into()));
        }
        Ok(())
    }
}

/// Wall-clock time of the timed loop.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BenchReport {
    pub warmup_loops: usize,
    pub repeat: usize,
    #[serde(rename = "total_us", serialize_with = "as_micros")]
    pub total: Duration,
}

fn as_micros<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1e6)
}

impl BenchReport {
    /// Mean duration of one execution.
    pub fn mean(&self) -> Duration {
        self.total / u32::try_from(self.repeat.max(1)).unwrap_or(u32::MAX)
    }

    pub fn total_micros(&self) -> u128 {
        self.total.as_micros()
    }

    pub fn mean_micros(&self) -> f64 {
        self.total.as_secs_f64() * 1e6 / self.repeat.max(1) as f64
    }
}

/// Runs the warm-up loop, then times `repeat` back-to-back executions.
pub fn bench(runner: &mut impl Execute, limits: &BenchLimits) -> HarnessResult<BenchReport> {
    limits.validate()?;
    if limits.warmup_loops > 0 {
        info!("Warming up ({} loops)...", limits.warmup_loops);
        for _ in 0..limits.warmup_loops {
            runner.execute()?;
        }
        info!("Done warming up.");
    }
    let start = time::now();
    for _ in 0..limits.repeat {
        runner.execute()?;
    }
    let total = start.elapsed();
    debug!("{} timed run(s) in {total:?}", limits.repeat);
    Ok(BenchReport { warmup_loops: limits.warmup_loops, repeat: limits.repeat, total })
}
