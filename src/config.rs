//! # Config
//!
//! Parameters of a latency sweep. The defaults reproduce the classic table: 4-byte slots,
//! working sets from 4 KiB to 64 MiB and 0.1 s of counter time per timing pass.
use crate::buffer::Slot;
use crate::error::SweepError;
use crate::timer::DEFAULT_CALIBRATION_INTERVAL;
use std::time::Duration;

/// Smallest working-set size tested, in elements
pub const DEFAULT_RANGE_MIN: usize = 1 << 10;
/// Largest working-set size tested, in elements
pub const DEFAULT_RANGE_MAX: usize = 1 << 24;
/// Minimum duration of each timing pass
pub const DEFAULT_MIN_DURATION: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq)]
pub struct SweepConfig {
    /// Size of one buffer slot in bytes, used to label rows and columns
    pub element_size: usize,
    /// Smallest working-set size, in elements (power of two)
    pub range_min: usize,
    /// Largest working-set size, in elements (power of two)
    pub range_max: usize,
    /// Wall time each combined timing pass must cover
    pub min_duration: Duration,
    /// Sleep interval used to calibrate the tick counter
    pub calibration_interval: Duration,
    /// Optional CPU core to pin the measuring thread to
    pub pin_core: Option<usize>,
    /// Try to run the measuring thread at maximum priority
    pub max_priority: bool,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            element_size: std::mem::size_of::<Slot>(),
            range_min: DEFAULT_RANGE_MIN,
            range_max: DEFAULT_RANGE_MAX,
            min_duration: DEFAULT_MIN_DURATION,
            calibration_interval: DEFAULT_CALIBRATION_INTERVAL,
            pin_core: None,
            max_priority: true,
        }
    }
}

impl SweepConfig {
    pub fn with_element_size(mut self, element_size: usize) -> Self {
        self.element_size = element_size;
        self
    }

    /// Set the inclusive range of working-set sizes, in elements
    pub fn with_range(mut self, range_min: usize, range_max: usize) -> Self {
        self.range_min = range_min;
        self.range_max = range_max;
        self
    }

    pub fn with_min_duration(mut self, min_duration: Duration) -> Self {
        self.min_duration = min_duration;
        self
    }

    pub fn with_calibration_interval(mut self, interval: Duration) -> Self {
        self.calibration_interval = interval;
        self
    }

    pub fn with_pin_core(mut self, core: Option<usize>) -> Self {
        self.pin_core = core;
        self
    }

    pub fn with_max_priority(mut self, max_priority: bool) -> Self {
        self.max_priority = max_priority;
        self
    }

    /// Working-set sizes tested, in elements, in increasing order
    pub fn sizes(&self) -> impl Iterator<Item = usize> + use<> {
        powers_of_two(self.range_min, self.range_max)
    }

    /// Strides tested for a working set of `csize` elements, in increasing order
    pub fn strides(csize: usize) -> impl Iterator<Item = usize> {
        powers_of_two(1, csize / 2)
    }

    /// Every stride column that appears in the table, up to `range_max / 2`
    pub fn stride_columns(&self) -> impl Iterator<Item = usize> + use<> {
        Self::strides(self.range_max)
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        let invalid = |msg: String| Err(SweepError::InvalidConfig(msg));

        if self.element_size == 0 {
            return invalid("element size must be non-zero".to_string());
        }
        if !self.range_min.is_power_of_two() || !self.range_max.is_power_of_two() {
            return invalid(format!(
                "range bounds must be powers of two (got {}..={})",
                self.range_min, self.range_max
            ));
        }
        if self.range_min < 2 {
            return invalid(format!(
                "range minimum must be at least 2 elements (got {})",
                self.range_min
            ));
        }
        if self.range_min > self.range_max {
            return invalid(format!(
                "range minimum {} exceeds range maximum {}",
                self.range_min, self.range_max
            ));
        }
        if self.range_max > Slot::MAX as usize {
            return invalid(format!(
                "range maximum {} does not fit a {}-byte slot index",
                self.range_max,
                std::mem::size_of::<Slot>()
            ));
        }
        if self.range_max.checked_mul(self.element_size).is_none() {
            return invalid(format!(
                "{} elements of {} bytes overflow the byte labels",
                self.range_max, self.element_size
            ));
        }
        if self.min_duration.is_zero() {
            return invalid("minimum pass duration must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Powers of two from `start` to `end` inclusive, doubling each step
fn powers_of_two(start: usize, end: usize) -> impl Iterator<Item = usize> {
    std::iter::successors(Some(start), |&n| n.checked_mul(2)).take_while(move |&n| n <= end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SweepConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.element_size, 4);
        assert_eq!(config.sizes().count(), 15);
        assert_eq!(config.stride_columns().last(), Some(1 << 23));
    }

    #[test]
    fn strides_stop_at_half_the_working_set() {
        let strides: Vec<usize> = SweepConfig::strides(16).collect();
        assert_eq!(strides, vec![1, 2, 4, 8]);
        assert_eq!(SweepConfig::strides(1024).count(), 10);
        assert_eq!(SweepConfig::strides(2048).count(), 11);
    }

    #[test]
    fn sizes_are_inclusive() {
        let config = SweepConfig::default().with_range(1024, 4096);
        assert_eq!(config.sizes().collect::<Vec<_>>(), vec![1024, 2048, 4096]);
    }

    #[test]
    fn rejects_bad_ranges() {
        let base = SweepConfig::default();
        assert!(base.clone().with_range(1000, 4096).validate().is_err());
        assert!(base.clone().with_range(1, 4096).validate().is_err());
        assert!(base.clone().with_range(8192, 4096).validate().is_err());
        assert!(base.clone().with_element_size(0).validate().is_err());
        assert!(base.with_min_duration(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn rejects_byte_size_overflow() {
        let config = SweepConfig::default()
            .with_range(1024, 1 << 20)
            .with_element_size(usize::MAX / 1024);
        assert!(matches!(config.validate(), Err(SweepError::InvalidConfig(_))));
        assert!(config.with_range(1024, 1024).validate().is_ok());
    }
}
