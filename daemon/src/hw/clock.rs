//! Embassy-backed clock for the mux driver.

use core::ops::Add;
use core::time::Duration;

use embassy_time::{Instant, Timer};
use mux_core::driver::MuxClock;

/// Number of evenly spaced points a poll sleep can land on.
const SPREAD_STEPS: u32 = 4;

/// Embassy's monotonic instant with `core::time::Duration` arithmetic.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicInstant(Instant);

impl MonotonicInstant {
    pub const fn into_embassy(self) -> Instant {
        self.0
    }
}

impl From<Instant> for MonotonicInstant {
    fn from(instant: Instant) -> Self {
        Self(instant)
    }
}

impl Add<Duration> for MonotonicInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + to_embassy(rhs))
    }
}

fn to_embassy(duration: Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

/// Sleeps on embassy timers, rotating through the allowed range so repeated
/// polls do not land on the same tick.
#[derive(Default)]
pub struct EmbassyClock {
    step: u32,
}

impl EmbassyClock {
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    fn pick(&mut self, min: Duration, max: Duration) -> Duration {
        let span = max.saturating_sub(min);
        let step = self.step % SPREAD_STEPS;
        self.step = self.step.wrapping_add(1);
        min + span * step / (SPREAD_STEPS - 1)
    }
}

impl MuxClock for EmbassyClock {
    type Instant = MonotonicInstant;

    fn now(&self) -> MonotonicInstant {
        MonotonicInstant(Instant::now())
    }

    async fn sleep_range(&mut self, min: Duration, max: Duration) {
        let duration = self.pick(min, max);
        Timer::after(to_embassy(duration)).await;
    }
}
