//! Memory read latency as a function of working-set size and access stride.
//!
//! The tick counter is calibrated against the wall clock ([`timer`]), then a
//! [`sweep::LatencySweeper`] chases pointers through a single working buffer for every
//! (size, stride) pair and subtracts the cost of an identical loop without the loads.
pub mod buffer;
pub mod config;
pub mod error;
pub mod report;
pub mod stopwatch;
pub mod sweep;
pub mod timer;

pub use config::SweepConfig;
pub use error::SweepError;
pub use sweep::{LatencySweeper, MeasurementRecord};
pub use timer::CalibrationFactor;

/// Convert number of bytes to formatted string
pub fn format_size(bytes: f32) -> String {
    const GB: f32 = 1024.0 * 1024.0 * 1024.0;
    const MB: f32 = 1024.0 * 1024.0;
    const KB: f32 = 1024.0;

    if bytes >= GB {
        format!("{:.2} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2} KiB", bytes / KB)
    } else {
        format!("{:.2} B", bytes)
    }
}

/// Convert number of bytes to formatted string for fixed-width integer string
pub fn format_size_fixed_int(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:>4} GiB", bytes / GB)
    } else if bytes >= MB {
        format!("{:>4} MiB", bytes / MB)
    } else if bytes >= KB {
        format!("{:>4} KiB", bytes / KB)
    } else {
        format!("{:>4} B", bytes)
    }
}
