// Timer module - monotonic wall-clock timer
//
// Backs the RDT instruction and the host's elapsed-time report. Built on
// `std::time::Instant`, which is monotonic on every supported platform, so
// successive readings never decrease.

use std::time::Instant;

/// Monotonic timer
///
/// # Example
///
/// ```
/// use rm64::timer::Timer;
///
/// let timer = Timer::new();
/// let a = timer.elapsed_micros();
/// let b = timer.elapsed_micros();
/// assert!(b >= a);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a timer that starts counting immediately
    pub fn new() -> Self {
        Timer {
            start: Instant::now(),
        }
    }

    /// Restart the timer from zero
    pub fn start(&mut self) {
        self.start = Instant::now();
    }

    /// Seconds elapsed since the timer was started
    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Microseconds elapsed since the timer was started
    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
