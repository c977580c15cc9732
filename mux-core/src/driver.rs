//! Mux register driver.
//!
//! [`MuxDriver`] owns the [`RegisterWindow`] and a [`MuxClock`]. It latches the
//! software override, writes the requested idpin / vbus-valid bits and polls
//! the status register until the hardware follows or the deadline passes.
//! Nothing else may touch the window while a driver exists.

use core::fmt;
use core::future::Future;
use core::ops::Add;
use core::time::Duration;

use crate::arbiter::MuxTarget;
use crate::registers::{
    Cfg0, Cfg1, DUAL_ROLE_CFG0, DUAL_ROLE_CFG1, MIN_WINDOW_SIZE, RegisterDump, RegisterWindow,
};

/// Lower bound between two status polls.
pub const DEFAULT_POLL_MIN: Duration = Duration::from_millis(5);
/// Upper bound between two status polls.
pub const DEFAULT_POLL_MAX: Duration = Duration::from_millis(10);
/// Deadline for the status register to follow a write. Switching typically
/// takes about 600 ms.
pub const DEFAULT_SWITCH_TIMEOUT: Duration = Duration::from_millis(1_000);
/// Hold time between dropping vbus-valid and dropping idpin.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(200);

/// Monotonic time source and sleeper used while polling.
pub trait MuxClock {
    /// Monotonic timestamp type.
    type Instant: Copy + Ord + Add<Duration, Output = Self::Instant>;

    /// Returns the current time.
    fn now(&self) -> Self::Instant;

    /// Sleeps for some duration within `[min, max]`.
    ///
    /// Implementations should spread wake-ups across the range so several
    /// pollers do not hit the bus in lockstep.
    fn sleep_range(&mut self, min: Duration, max: Duration) -> impl Future<Output = ()>;

    /// Sleeps for exactly `duration`.
    fn sleep(&mut self, duration: Duration) -> impl Future<Output = ()> {
        self.sleep_range(duration, duration)
    }
}

/// Timing knobs for a mux transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MuxTimings {
    pub poll_min: Duration,
    pub poll_max: Duration,
    pub switch_timeout: Duration,
    pub settle_delay: Duration,
}

impl MuxTimings {
    /// Hardware defaults.
    pub const DEFAULT: Self = Self {
        poll_min: DEFAULT_POLL_MIN,
        poll_max: DEFAULT_POLL_MAX,
        switch_timeout: DEFAULT_SWITCH_TIMEOUT,
        settle_delay: DEFAULT_SETTLE_DELAY,
    };
}

impl Default for MuxTimings {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Failures reported by [`MuxDriver`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MuxError {
    /// The status register did not confirm `target` before the deadline.
    Timeout { target: MuxTarget, polls: u32 },
}

impl fmt::Display for MuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxError::Timeout { target, polls } => write!(
                f,
                "timeout waiting for mux to switch ({target}, {polls} polls)"
            ),
        }
    }
}

/// Window passed at attach does not cover both registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WindowTooSmall {
    pub size: usize,
}

impl fmt::Display for WindowTooSmall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "register window of {} bytes is smaller than {MIN_WINDOW_SIZE}",
            self.size
        )
    }
}

/// Result of writing a target into `CFG0`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WriteReport {
    /// `true` when this write latched the software override.
    pub latched: bool,
    /// Value written to `CFG0`.
    pub cfg0: u32,
}

/// Successful transition summary.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SwitchReport {
    pub write: WriteReport,
    /// Status reads performed before the hardware confirmed.
    pub polls: u32,
}

/// Owns the register window and executes mux targets against it.
pub struct MuxDriver<W, C> {
    window: W,
    clock: C,
    timings: MuxTimings,
}

impl<W, C> MuxDriver<W, C>
where
    W: RegisterWindow,
    C: MuxClock,
{
    /// Takes ownership of `window` after checking that it covers both registers.
    ///
    /// On error the window is dropped, releasing the mapping.
    pub fn new(window: W, clock: C, timings: MuxTimings) -> Result<Self, WindowTooSmall> {
        let size = window.size();
        if size < MIN_WINDOW_SIZE {
            return Err(WindowTooSmall { size });
        }

        Ok(Self {
            window,
            clock,
            timings,
        })
    }

    /// Returns the configured timings.
    pub const fn timings(&self) -> &MuxTimings {
        &self.timings
    }

    /// Returns the clock.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the clock mutably.
    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Returns the register window for inspection.
    pub fn window(&self) -> &W {
        &self.window
    }

    /// Releases the window and clock.
    pub fn into_parts(self) -> (W, C) {
        (self.window, self.clock)
    }

    /// Target currently latched in `CFG0`, or `None` while firmware owns the mux.
    pub fn current_target(&self) -> Option<MuxTarget> {
        Cfg0(self.window.read32(DUAL_ROLE_CFG0)).target()
    }

    /// Reads both registers without changing them.
    pub fn dump(&self) -> RegisterDump {
        RegisterDump::capture(&self.window)
    }

    /// Hands mux control to software if firmware still owns it.
    ///
    /// Returns `true` when the override was latched by this call.
    pub fn ensure_software_control(&mut self) -> bool {
        let cfg0 = Cfg0(self.window.read32(DUAL_ROLE_CFG0));
        if cfg0.software_control() {
            return false;
        }

        self.window
            .write32(DUAL_ROLE_CFG0, cfg0.with_software_control().0);
        debug!("mux: software control latched");
        true
    }

    /// Writes `target` into `CFG0` without waiting for the hardware.
    pub fn write_target(&mut self, target: MuxTarget) -> WriteReport {
        let latched = self.ensure_software_control();
        let cfg0 = Cfg0(self.window.read32(DUAL_ROLE_CFG0)).with_target(target);
        self.window.write32(DUAL_ROLE_CFG0, cfg0.0);
        WriteReport {
            latched,
            cfg0: cfg0.0,
        }
    }

    /// Polls `CFG1` until it reports the role implied by `target`.
    ///
    /// Returns the number of status reads performed.
    pub async fn wait_for_switch(&mut self, target: MuxTarget) -> Result<u32, MuxError> {
        let deadline = self.clock.now() + self.timings.switch_timeout;
        let mut polls: u32 = 0;

        loop {
            polls = polls.saturating_add(1);
            if Cfg1(self.window.read32(DUAL_ROLE_CFG1)).confirms(target) {
                return Ok(polls);
            }

            self.clock
                .sleep_range(self.timings.poll_min, self.timings.poll_max)
                .await;

            if self.clock.now() > deadline {
                warn!("mux: timeout waiting for mux to switch ({})", target);
                return Err(MuxError::Timeout { target, polls });
            }
        }
    }

    /// Writes `target` and waits for the hardware to confirm it.
    pub async fn apply(&mut self, target: MuxTarget) -> Result<SwitchReport, MuxError> {
        let write = self.write_target(target);
        let polls = self.wait_for_switch(target).await?;
        Ok(SwitchReport { write, polls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{HOST_MODE, SW_IDPIN, SW_IDPIN_EN, SW_VBUS_VALID};
    use core::cell::Cell;
    use embassy_futures::block_on;
    use heapless::Vec;

    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct MockInstant(u64);

    impl Add<Duration> for MockInstant {
        type Output = Self;

        fn add(self, rhs: Duration) -> Self::Output {
            Self(self.0 + rhs.as_micros() as u64)
        }
    }

    #[derive(Default)]
    struct MockClock {
        now_us: u64,
        sleeps: u32,
    }

    impl MuxClock for MockClock {
        type Instant = MockInstant;

        fn now(&self) -> Self::Instant {
            MockInstant(self.now_us)
        }

        async fn sleep_range(&mut self, _min: Duration, max: Duration) {
            self.sleeps += 1;
            self.now_us += max.as_micros() as u64;
        }
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    enum Access {
        Read(usize),
        Write(usize, u32),
    }

    struct MockWindow {
        cfg0: Cell<u32>,
        cfg1: Cell<u32>,
        size: usize,
        follow: bool,
        log: core::cell::RefCell<Vec<Access, 256>>,
    }

    impl MockWindow {
        fn new(follow: bool) -> Self {
            Self {
                cfg0: Cell::new(0),
                cfg1: Cell::new(HOST_MODE),
                size: MIN_WINDOW_SIZE,
                follow,
                log: core::cell::RefCell::new(Vec::new()),
            }
        }

        fn writes(&self) -> usize {
            self.log
                .borrow()
                .iter()
                .filter(|access| matches!(access, Access::Write(..)))
                .count()
        }
    }

    impl RegisterWindow for MockWindow {
        fn read32(&self, offset: usize) -> u32 {
            let _ = self.log.borrow_mut().push(Access::Read(offset));
            match offset {
                DUAL_ROLE_CFG0 => self.cfg0.get(),
                DUAL_ROLE_CFG1 => self.cfg1.get(),
                _ => 0,
            }
        }

        fn write32(&mut self, offset: usize, value: u32) {
            let _ = self.log.borrow_mut().push(Access::Write(offset, value));
            if offset == DUAL_ROLE_CFG0 {
                self.cfg0.set(value);
                if self.follow {
                    let host = value & SW_IDPIN == 0;
                    self.cfg1.set(if host { HOST_MODE } else { 0 });
                }
            }
        }

        fn size(&self) -> usize {
            self.size
        }
    }

    #[test]
    fn rejects_window_that_misses_status_register() {
        let mut window = MockWindow::new(true);
        window.size = DUAL_ROLE_CFG1;
        let result = MuxDriver::new(window, MockClock::default(), MuxTimings::DEFAULT);
        assert_eq!(result.err(), Some(WindowTooSmall { size: DUAL_ROLE_CFG1 }));
    }

    #[test]
    fn first_write_latches_software_control() {
        let mut driver =
            MuxDriver::new(MockWindow::new(true), MockClock::default(), MuxTimings::DEFAULT)
                .unwrap();

        assert_eq!(driver.current_target(), None);
        let report = driver.write_target(MuxTarget::DEVICE);
        assert!(report.latched);
        assert_eq!(report.cfg0, SW_IDPIN_EN | SW_IDPIN | SW_VBUS_VALID);
        assert_eq!(driver.window().writes(), 2);

        let again = driver.write_target(MuxTarget::HOST);
        assert!(!again.latched);
        assert_eq!(again.cfg0, SW_IDPIN_EN);
        assert_eq!(driver.window().writes(), 3);
        assert_eq!(driver.current_target(), Some(MuxTarget::HOST));
    }

    #[test]
    fn apply_returns_once_status_follows() {
        let mut driver =
            MuxDriver::new(MockWindow::new(true), MockClock::default(), MuxTimings::DEFAULT)
                .unwrap();

        let report = block_on(driver.apply(MuxTarget::DEVICE)).expect("switch should confirm");
        assert_eq!(report.polls, 1);
        assert_eq!(driver.clock().sleeps, 0);

        let reads = driver
            .window()
            .log
            .borrow()
            .iter()
            .filter(|access| matches!(access, Access::Read(_)))
            .count();
        assert!(reads >= 2, "apply must read CFG0 and CFG1");
    }

    #[test]
    fn apply_times_out_when_status_never_follows() {
        let mut driver =
            MuxDriver::new(MockWindow::new(false), MockClock::default(), MuxTimings::DEFAULT)
                .unwrap();

        let error = block_on(driver.apply(MuxTarget::DEVICE)).unwrap_err();
        let MuxError::Timeout { target, polls } = error;
        assert_eq!(target, MuxTarget::DEVICE);
        // 10 ms per sleep against a 1 s deadline.
        assert_eq!(polls, 101);
        assert!(driver.clock().now_us > 1_000_000);
        assert!(driver.clock().now_us <= 1_010_000);
    }

    #[test]
    fn dump_reads_without_writing() {
        let driver =
            MuxDriver::new(MockWindow::new(true), MockClock::default(), MuxTimings::DEFAULT)
                .unwrap();

        let dump = driver.dump();
        assert_eq!(dump, RegisterDump { cfg0: 0, cfg1: HOST_MODE });
        assert_eq!(driver.window().writes(), 0);
    }
}
