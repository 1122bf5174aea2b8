// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-phase timing for a pipeline run: preprocess, transform, alignment
//! template generation, postprocess, driver rendering, and each CEGIS
//! round. No memory instrumentation — the pipeline's resource profile is
//! dominated by external-process wall time, which `tracing` spans already
//! capture; this just accumulates the same numbers into a summary a CLI
//! run can print at the end.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Tracks how much time was spent in each named phase across one run.
#[derive(Debug, Default)]
pub struct PipelineProfiler {
    phases: HashMap<String, PhaseMetrics>,
    start_time: Option<Instant>,
}

/// Timing summary for a single named phase.
#[derive(Debug, Clone)]
pub struct PhaseMetrics {
    pub name: String,
    pub total_duration: Duration,
    pub execution_count: u32,
    pub average_duration: Duration,
    pub max_duration: Duration,
    pub min_duration: Duration,
}

/// Handle returned by `start_phase`; records elapsed time into the
/// profiler when dropped, so a phase's timing covers exactly the scope
/// the handle is held in.
pub struct PhaseTimer<'a> {
    profiler: &'a mut PipelineProfiler,
    phase_name: String,
    start_time: Instant,
}

impl PipelineProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_run(&mut self) {
        self.start_time = Some(Instant::now());
        self.phases.clear();
    }

    pub fn start_phase(&mut self, phase_name: &str) -> PhaseTimer {
        PhaseTimer { profiler: self, phase_name: phase_name.to_string(), start_time: Instant::now() }
    }

    fn record_phase(&mut self, phase_name: String, duration: Duration) {
        let metrics = self.phases.entry(phase_name.clone()).or_insert_with(|| PhaseMetrics {
            name: phase_name,
            total_duration: Duration::ZERO,
            execution_count: 0,
            average_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
            min_duration: Duration::MAX,
        });

        metrics.total_duration += duration;
        metrics.execution_count += 1;
        metrics.average_duration = metrics.total_duration / metrics.execution_count;
        metrics.max_duration = metrics.max_duration.max(duration);
        metrics.min_duration = metrics.min_duration.min(duration);
    }

    pub fn total_time(&self) -> Duration {
        self.start_time.map(|start| start.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn generate_report(&self) -> ProfilingReport {
        let mut phases: Vec<_> = self.phases.values().cloned().collect();
        phases.sort_by_key(|p| std::cmp::Reverse(p.total_duration));
        ProfilingReport { total_time: self.total_time(), phases }
    }

    /// Prints a summary to stderr, used by the CLI after a run completes.
    pub fn print_summary(&self) {
        let report = self.generate_report();

        eprintln!("\n=== Run Performance Report ===");
        eprintln!("Total time: {:.3}s", report.total_time.as_secs_f64());
        eprintln!();
        eprintln!("Phase Breakdown:");
        eprintln!("{:<30} {:>10} {:>10} {:>10} {:>10}", "Phase", "Total", "Count", "Average", "Max");
        eprintln!("{:-<70}", "");

        for phase in &report.phases {
            eprintln!(
                "{:<30} {:>10.3}s {:>10} {:>10.3}s {:>10.3}s",
                phase.name,
                phase.total_duration.as_secs_f64(),
                phase.execution_count,
                phase.average_duration.as_secs_f64(),
                phase.max_duration.as_secs_f64()
            );
        }
    }
}

/// A completed run's timing summary, phases sorted by total time
/// descending.
#[derive(Debug)]
pub struct ProfilingReport {
    pub total_time: Duration,
    pub phases: Vec<PhaseMetrics>,
}

impl<'a> Drop for PhaseTimer<'a> {
    fn drop(&mut self) {
        let duration = self.start_time.elapsed();
        self.profiler.record_phase(self.phase_name.clone(), duration);
    }
}

/// Times a block under a named phase.
#[macro_export]
macro_rules! profile_phase {
    ($profiler:expr, $phase:expr, $block:block) => {{
        let _timer = $profiler.start_phase($phase);
        $block
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_basic_profiling() {
        let mut profiler = PipelineProfiler::new();
        profiler.start_run();

        {
            let _timer = profiler.start_phase("preprocess");
            thread::sleep(Duration::from_millis(5));
        }
        {
            let _timer = profiler.start_phase("transform");
            thread::sleep(Duration::from_millis(10));
        }
        {
            let _timer = profiler.start_phase("alignment");
            thread::sleep(Duration::from_millis(2));
        }

        let report = profiler.generate_report();
        assert_eq!(report.phases.len(), 3);
        assert!(report.phases[0].total_duration >= report.phases[1].total_duration);
        assert!(report.phases[1].total_duration >= report.phases[2].total_duration);
    }

    #[test]
    fn test_repeated_phases_average_correctly() {
        let mut profiler = PipelineProfiler::new();
        profiler.start_run();

        for _ in 0..3 {
            let _timer = profiler.start_phase("cegis-round");
            thread::sleep(Duration::from_millis(3));
        }

        let report = profiler.generate_report();
        let phase = &report.phases[0];
        assert_eq!(phase.execution_count, 3);
        assert!(phase.total_duration >= Duration::from_millis(9));
    }
}
