//! # Timer
//!
//! Hardware tick counter access and its calibration against a monotonic wall clock.
//!
//! Tick values are read with:
//! - x86_64: `lfence; rdtsc` via the `_rdtsc` intrinsic
//! - aarch64: `isb; mrs cntvct_el0`
//! - anything else: nanoseconds from `std::time::Instant` (reduced precision)
//!
//! The calibration samples the wall clock and the counter, sleeps for a fixed interval, then
//! samples both again. Scheduler delays during the sleep bias the result and are not detected.
use crate::error::SweepError;
use log::{debug, info};
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Default real-time interval slept between the two calibration samples
pub const DEFAULT_CALIBRATION_INTERVAL: Duration = Duration::from_millis(500);

/// Source of monotonically increasing ticks
pub trait TickSource {
    fn ticks(&self) -> u64;
}

/// Wall clock used as the reference for calibration
pub trait WallClock {
    fn now(&self) -> Timestamp;

    fn sleep(&self, duration: Duration);
}

/// The CPU's cycle/timestamp counter
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleCounter;

impl CycleCounter {
    /// Name of the counter read on this target, for diagnostics
    pub fn name(&self) -> &'static str {
        #[cfg(target_arch = "x86_64")]
        {
            "rdtsc"
        }
        #[cfg(target_arch = "aarch64")]
        {
            "cntvct_el0"
        }
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            "Instant"
        }
    }
}

impl TickSource for CycleCounter {
    #[inline(always)]
    fn ticks(&self) -> u64 {
        read_cycle_counter()
    }
}

/// Read the raw tick counter of the current core
#[inline(always)]
pub fn read_cycle_counter() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_mm_lfence, _rdtsc};
        // lfence keeps earlier loads from drifting past the counter read
        unsafe {
            _mm_lfence();
            _rdtsc()
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        let cycles: u64;
        unsafe {
            std::arch::asm!(
                "isb",
                "mrs {}, cntvct_el0",
                out(reg) cycles,
                options(nostack, nomem),
            );
        }
        cycles
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        process_anchor().elapsed().as_nanos() as u64
    }
}

fn process_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// A wall clock reading split into whole seconds and the nanosecond remainder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: u64, nanos: u32) -> Self {
        debug_assert!((nanos as u64) < NANOS_PER_SEC);
        Timestamp { secs, nanos }
    }

    /// Nanoseconds elapsed from `earlier` to `self`, borrowing a second when the nanosecond
    /// part of `self` is the smaller one. Returns 0 if `earlier` is not before `self`.
    pub fn nanos_since(&self, earlier: Timestamp) -> u64 {
        if *self <= earlier {
            return 0;
        }
        let mut secs = self.secs - earlier.secs;
        let nanos = if self.nanos < earlier.nanos {
            secs -= 1;
            self.nanos as u64 + NANOS_PER_SEC - earlier.nanos as u64
        } else {
            (self.nanos - earlier.nanos) as u64
        };
        secs * NANOS_PER_SEC + nanos
    }
}

/// Monotonic clock measured from a process-wide anchor instant
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl WallClock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let since = process_anchor().elapsed();
        Timestamp::new(since.as_secs(), since.subsec_nanos())
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Ticks per nanosecond of a [`TickSource`]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct CalibrationFactor(f64);

impl CalibrationFactor {
    /// Wrap a factor, rejecting values that are not positive and finite
    pub fn new(ticks_per_ns: f64) -> Option<Self> {
        if ticks_per_ns.is_finite() && ticks_per_ns > 0.0 {
            Some(CalibrationFactor(ticks_per_ns))
        } else {
            None
        }
    }

    pub fn ticks_per_ns(&self) -> f64 {
        self.0
    }

    /// Number of ticks expected to elapse over `duration`
    pub fn ticks_for(&self, duration: Duration) -> u64 {
        (duration.as_nanos() as f64 * self.0) as u64
    }

    pub fn ticks_to_ns(&self, ticks: f64) -> f64 {
        ticks / self.0
    }
}

/// Printed with six significant digits, trailing zeros dropped
impl fmt::Display for CalibrationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const SIGNIFICANT_DIGITS: i32 = 6;
        let magnitude = self.0.log10().floor() as i32;
        let decimals = (SIGNIFICANT_DIGITS - 1 - magnitude).max(0) as usize;
        let text = format!("{:.*}", decimals, self.0);
        let text = if text.contains('.') {
            text.trim_end_matches('0').trim_end_matches('.')
        } else {
            text.as_str()
        };
        f.write_str(text)
    }
}

/// Derive ticks per nanosecond by sampling `clock` and `ticks` around a sleep of `interval`
pub fn calibrate<T, C>(ticks: &T, clock: &C, interval: Duration) -> Result<CalibrationFactor, SweepError>
where
    T: TickSource,
    C: WallClock,
{
    let begin_time = clock.now();
    let begin = ticks.ticks();
    clock.sleep(interval);
    let end = ticks.ticks();
    let end_time = clock.now();

    let elapsed_ns = end_time.nanos_since(begin_time);
    debug!(
        "calibration samples: ticks {} -> {}, wall {:?} -> {:?} ({} ns)",
        begin, end, begin_time, end_time, elapsed_ns
    );
    if elapsed_ns == 0 {
        return Err(SweepError::Calibration(
            "no wall clock time elapsed during calibration".to_string(),
        ));
    }

    let factor = end
        .checked_sub(begin)
        .filter(|&elapsed_ticks| elapsed_ticks > 0)
        .and_then(|elapsed_ticks| CalibrationFactor::new(elapsed_ticks as f64 / elapsed_ns as f64))
        .ok_or_else(|| {
            SweepError::Calibration(format!(
                "tick counter went from {} to {} over {} ns",
                begin, end, elapsed_ns
            ))
        })?;

    info!("tick / ns = {} (over {:?})", factor, interval);
    Ok(factor)
}

/// Calibrate the hardware [`CycleCounter`] against the [`MonotonicClock`]
pub fn measure_ticks_per_ns(interval: Duration) -> Result<CalibrationFactor, SweepError> {
    calibrate(&CycleCounter, &MonotonicClock, interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Simulated machine whose counter runs at a fixed rate and whose sleep is exact
    struct FakeMachine {
        now_ns: Cell<u64>,
        ticks_per_ns: f64,
        sleeps: bool,
    }

    impl FakeMachine {
        fn new(start_ns: u64, ticks_per_ns: f64) -> Self {
            FakeMachine {
                now_ns: Cell::new(start_ns),
                ticks_per_ns,
                sleeps: true,
            }
        }
    }

    impl TickSource for FakeMachine {
        fn ticks(&self) -> u64 {
            (self.now_ns.get() as f64 * self.ticks_per_ns) as u64
        }
    }

    impl WallClock for FakeMachine {
        fn now(&self) -> Timestamp {
            let ns = self.now_ns.get();
            Timestamp::new(ns / NANOS_PER_SEC, (ns % NANOS_PER_SEC) as u32)
        }

        fn sleep(&self, duration: Duration) {
            if self.sleeps {
                self.now_ns.set(self.now_ns.get() + duration.as_nanos() as u64);
            }
        }
    }

    #[test]
    fn nanos_since_borrows_a_second() {
        let earlier = Timestamp::new(1, 900_000_000);
        let later = Timestamp::new(2, 100);
        assert_eq!(later.nanos_since(earlier), 100_000_100);
    }

    #[test]
    fn nanos_since_without_borrow() {
        let earlier = Timestamp::new(3, 250);
        let later = Timestamp::new(5, 750);
        assert_eq!(later.nanos_since(earlier), 2 * NANOS_PER_SEC + 500);
    }

    #[test]
    fn nanos_since_is_zero_when_not_later() {
        let t = Timestamp::new(7, 10);
        assert_eq!(t.nanos_since(t), 0);
        assert_eq!(Timestamp::new(6, 999).nanos_since(t), 0);
    }

    #[test]
    fn calibrate_recovers_counter_rate() {
        // start just below a second boundary so the sleep crosses it
        let machine = FakeMachine::new(4 * NANOS_PER_SEC + 800_000_000, 2.5);
        let factor = calibrate(&machine, &machine, Duration::from_millis(500)).unwrap();
        assert!((factor.ticks_per_ns() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn calibrate_rejects_zero_elapsed_time() {
        let mut machine = FakeMachine::new(0, 3.0);
        machine.sleeps = false;
        let err = calibrate(&machine, &machine, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, SweepError::Calibration(_)));
    }

    #[test]
    fn calibrate_rejects_stalled_counter() {
        let machine = FakeMachine::new(0, 0.0);
        assert!(calibrate(&machine, &machine, Duration::from_millis(10)).is_err());
    }

    #[test]
    fn calibrate_rejects_counter_going_backwards() {
        struct Backwards {
            reads: Cell<u32>,
        }

        impl TickSource for Backwards {
            fn ticks(&self) -> u64 {
                self.reads.set(self.reads.get() + 1);
                if self.reads.get() == 1 { 1_000_000 } else { 999_000 }
            }
        }

        let clock = FakeMachine::new(0, 1.0);
        let counter = Backwards { reads: Cell::new(0) };
        let err = calibrate(&counter, &clock, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, SweepError::Calibration(_)));
    }

    #[test]
    fn factor_prints_six_significant_digits() {
        let show = |v: f64| CalibrationFactor::new(v).unwrap().to_string();
        assert_eq!(show(2.0999561580204755), "2.09996");
        assert_eq!(show(2.5), "2.5");
        assert_eq!(show(1.0), "1");
        assert_eq!(show(0.02400002), "0.024");
        assert_eq!(show(123.4567), "123.457");
    }

    #[test]
    fn factor_conversions() {
        let factor = CalibrationFactor::new(2.0).unwrap();
        assert_eq!(factor.ticks_for(Duration::from_millis(100)), 200_000_000);
        assert_eq!(factor.ticks_to_ns(50.0), 25.0);
        assert!(CalibrationFactor::new(0.0).is_none());
        assert!(CalibrationFactor::new(f64::NAN).is_none());
        assert!(CalibrationFactor::new(-1.0).is_none());
    }

    #[test]
    fn hardware_counter_advances() {
        let counter = CycleCounter;
        let first = counter.ticks();
        std::thread::sleep(Duration::from_millis(2));
        assert!(counter.ticks() > first);
    }
}
