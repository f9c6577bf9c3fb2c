//! # Latency sweep
//!
//! For every working-set size and stride a trial builds the chain, times `stride` full
//! traversals repeated until the minimum pass duration is covered, then times the same number
//! of repetitions of a loop with identical shape that only does the index arithmetic. The
//! difference is charged to the `csize` loads each repetition performs.
use crate::buffer::WorkingBuffer;
use crate::config::SweepConfig;
use crate::error::SweepError;
use crate::format_size_fixed_int;
use crate::report::RecordSink;
use crate::stopwatch::{self, Repeat, opaque};
use crate::timer::{CalibrationFactor, CycleCounter, TickSource};
use log::{debug, info, trace, warn};
use std::hint::black_box;
use std::ops::Range;
use std::time::Instant;

/// Latency of one (working-set size, stride) trial
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRecord {
    pub working_set_bytes: usize,
    pub stride_bytes: usize,
    /// Nanoseconds per load, `None` when overhead noise swallowed the memory time
    pub latency_ns: Option<f64>,
}

/// Raw tick counts of one trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialTicks {
    /// Repetitions of the combined pass (each one `csize` loads)
    pub steps: u64,
    /// Ticks of the combined memory + loop pass
    pub overall: u64,
    /// Ticks of the loop-only pass
    pub loop_only: u64,
}

impl TrialTicks {
    /// Per-load latency in ns, with the loop-only time clamped to the overall time.
    /// Anything that doesn't come out positive and finite is unmeasured.
    pub fn latency_ns(&self, csize: usize, factor: CalibrationFactor) -> Option<f64> {
        let loop_only = self.loop_only.min(self.overall);
        let mem_ticks = self.overall - loop_only;
        let accesses = self.steps as f64 * csize as f64;
        let latency = factor.ticks_to_ns(mem_ticks as f64 / accesses);
        (latency.is_finite() && latency > 0.0).then_some(latency)
    }
}

/// Owns the working buffer and runs trials against it
pub struct LatencySweeper<T: TickSource = CycleCounter> {
    config: SweepConfig,
    buffer: WorkingBuffer,
    ticks: T,
}

impl LatencySweeper<CycleCounter> {
    /// Validate `config` and allocate the buffer, timing with the hardware counter
    pub fn new(config: SweepConfig) -> Result<Self, SweepError> {
        Self::with_tick_source(config, CycleCounter)
    }
}

impl<T: TickSource> LatencySweeper<T> {
    pub fn with_tick_source(config: SweepConfig, ticks: T) -> Result<Self, SweepError> {
        config.validate()?;
        let buffer = WorkingBuffer::allocate(config.range_max)?;
        debug!("allocated working buffer of {} elements", buffer.len());
        Ok(LatencySweeper {
            config,
            buffer,
            ticks,
        })
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Virtual address span of the working buffer
    pub fn address_range(&self) -> Range<usize> {
        self.buffer.address_range()
    }

    /// Every (csize, stride) pair in measurement order, in elements
    pub fn trials(&self) -> impl Iterator<Item = (usize, usize)> + use<T> {
        self.config
            .sizes()
            .flat_map(|csize| SweepConfig::strides(csize).map(move |stride| (csize, stride)))
    }

    /// Measure a single trial
    pub fn run_trial(&mut self, csize: usize, stride: usize, factor: CalibrationFactor) -> MeasurementRecord {
        let budget = factor.ticks_for(self.config.min_duration);
        let cycle = self.buffer.build_cycle(csize, stride);

        // (reading data from memory) + (loop, instrs, etc...)
        let combined = stopwatch::repeat(&self.ticks, Repeat::ForTicks(budget), || {
            black_box(cycle.traverse());
        });

        // (loop, instrs, etc...) only
        let loop_only = stopwatch::repeat(&self.ticks, Repeat::Times(combined.steps), || {
            black_box(step_without_memory(black_box(csize), black_box(stride)));
        });

        let trial = TrialTicks {
            steps: combined.steps,
            overall: combined.ticks,
            loop_only: loop_only.ticks,
        };
        trace!("csize {} stride {}: {:?}", csize, stride, trial);

        MeasurementRecord {
            working_set_bytes: csize * self.config.element_size,
            stride_bytes: stride * self.config.element_size,
            latency_ns: trial.latency_ns(csize, factor),
        }
    }

    /// Run the whole sweep, handing records to `sink` as they are produced
    pub fn sweep_into<S: RecordSink>(&mut self, factor: CalibrationFactor, sink: &mut S) -> Result<(), SweepError> {
        for csize in self.config.sizes() {
            let row_time = Instant::now();
            let mut unmeasured = 0;
            for stride in SweepConfig::strides(csize) {
                let record = self.run_trial(csize, stride, factor);
                if record.latency_ns.is_none() {
                    unmeasured += 1;
                }
                sink.record(record)?;
            }
            sink.end_row()?;

            let bytes = (csize * self.config.element_size) as u64;
            if unmeasured > 0 {
                warn!(
                    "{} working set: {} stride(s) unmeasured (loop overhead >= total)",
                    format_size_fixed_int(bytes),
                    unmeasured
                );
            }
            info!(
                "{} working set measured in {:.2?}",
                format_size_fixed_int(bytes),
                row_time.elapsed()
            );
        }
        sink.finish()?;
        Ok(())
    }

    /// Run the whole sweep and collect the records in measurement order
    pub fn sweep(&mut self, factor: CalibrationFactor) -> Result<Vec<MeasurementRecord>, SweepError> {
        let mut records = Vec::with_capacity(self.trials().count());
        self.sweep_into(factor, &mut records)?;
        Ok(records)
    }
}

/// Same loop nest as [`crate::buffer::Cycle::traverse`], stepping the index arithmetically
/// instead of loading it from the buffer
#[inline(never)]
fn step_without_memory(csize: usize, stride: usize) -> usize {
    let mut index = 0usize;
    for _ in 0..stride {
        index = opaque(0);
        loop {
            index = opaque(index + stride);
            if index >= csize {
                break;
            }
        }
    }
    index
}

/// Pin the calling thread and raise its priority as configured. Failures only warn.
pub fn place_current_thread(config: &SweepConfig) {
    if let Some(cpu_num) = config.pin_core {
        let core_num = core_affinity::CoreId { id: cpu_num };
        if !core_affinity::set_for_current(core_num) {
            warn!(
                "Couldn't pin measuring thread to CPU core {} (NOTE: this is expected on macOS)",
                cpu_num
            );
        } else {
            info!("measuring thread pinned to CPU core {}", cpu_num);
        }
    }

    if config.max_priority
        && thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max).is_err()
    {
        warn!("Couldn't set measuring thread to maximum thread priority");
    }
}
