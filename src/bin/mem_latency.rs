//! Cache and Memory Read Latency Table
//!
//! Calibrates the tick counter, then prints the latency of every (working-set size, stride)
//! pair as a comma separated table on stdout. Progress goes to the log (stderr).
use cache_latency_rs::report::TableWriter;
use cache_latency_rs::sweep::place_current_thread;
use cache_latency_rs::timer::{CycleCounter, measure_ticks_per_ns};
use cache_latency_rs::{LatencySweeper, SweepConfig, SweepError, format_size};
use log::{error, info};
use std::env::{set_var, var_os};
use std::io;
use std::process::ExitCode;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn run(config: SweepConfig) -> Result<(), SweepError> {
    place_current_thread(&config);

    info!("calibrating {} over {:?}", CycleCounter.name(), config.calibration_interval);
    let factor = measure_ticks_per_ns(config.calibration_interval)?;

    let mut sweeper = LatencySweeper::new(config)?;
    let range = sweeper.address_range();
    info!(
        "working buffer: {} | {} trials",
        format_size((range.end - range.start) as f32),
        sweeper.trials().count()
    );

    let stdout = io::stdout();
    let mut table = TableWriter::new(stdout.lock(), sweeper.config(), factor, Some(range))?;
    sweeper.sweep_into(factor, &mut table)
}

fn main() -> ExitCode {
    if var_os("RUST_LOG").is_none() {
        unsafe { set_var("RUST_LOG", "INFO") };
    }
    env_logger::init();

    match run(SweepConfig::default()) {
        Ok(()) => {
            info!("Latency sweep completed!");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
