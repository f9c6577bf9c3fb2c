//! # Stopwatch
//!
//! The repeat-and-time primitive shared by both passes of a trial. The memory pass and the
//! loop-overhead pass go through the same loop (body, count, read ticks, check) so that the
//! only difference between the two timings is the body itself.
use crate::timer::TickSource;

/// When a timed repetition stops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Keep going until at least this many ticks have elapsed
    ForTicks(u64),
    /// Run exactly this many repetitions (at least one)
    Times(u64),
}

/// Outcome of a timed repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedRun {
    /// Repetitions of the body performed
    pub steps: u64,
    /// Ticks elapsed from before the first repetition to after the last
    pub ticks: u64,
}

/// Run `body` repeatedly under `policy`, reading `source` after every repetition
#[inline(always)]
pub fn repeat<T, F>(source: &T, policy: Repeat, mut body: F) -> TimedRun
where
    T: TickSource,
    F: FnMut(),
{
    let mut steps = 0u64;
    let t0 = source.ticks();
    let mut t1;
    loop {
        body();
        steps += 1;
        t1 = source.ticks();
        let done = match policy {
            Repeat::ForTicks(budget) => t1.wrapping_sub(t0) >= budget,
            Repeat::Times(count) => steps >= count,
        };
        if done {
            break;
        }
    }
    TimedRun {
        steps,
        ticks: t1.wrapping_sub(t0),
    }
}

/// Hide `value` from the optimizer without emitting any instruction. The barrier counts as a
/// side effect, so it is never hoisted out of a loop nor merged with an identical one; a pass
/// over a loop nest that starts from it can't be folded into a closed form or dropped.
#[inline(always)]
pub fn opaque(value: usize) -> usize {
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    {
        let mut value = value;
        unsafe {
            std::arch::asm!("/* {0} */", inout(reg) value, options(nomem, nostack, preserves_flags));
        }
        value
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        std::hint::black_box(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Counter that advances by a fixed amount on every read
    struct SteppingCounter {
        now: Cell<u64>,
        step: u64,
    }

    impl TickSource for SteppingCounter {
        fn ticks(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now + self.step);
            now
        }
    }

    #[test]
    fn runs_until_budget_is_spent() {
        let counter = SteppingCounter { now: Cell::new(1000), step: 10 };
        let mut calls = 0;
        let run = repeat(&counter, Repeat::ForTicks(95), || calls += 1);
        assert_eq!(run.steps, 10);
        assert_eq!(calls, 10);
        assert_eq!(run.ticks, 100);
    }

    #[test]
    fn runs_exact_repetitions() {
        let counter = SteppingCounter { now: Cell::new(0), step: 3 };
        let mut calls = 0;
        let run = repeat(&counter, Repeat::Times(7), || calls += 1);
        assert_eq!(run.steps, 7);
        assert_eq!(calls, 7);
        assert_eq!(run.ticks, 21);
    }

    #[test]
    fn always_runs_at_least_once() {
        let counter = SteppingCounter { now: Cell::new(0), step: 1 };
        assert_eq!(repeat(&counter, Repeat::Times(0), || {}).steps, 1);
        assert_eq!(repeat(&counter, Repeat::ForTicks(0), || {}).steps, 1);
    }
}
