//! Virtual Cherry Trail register block and clock.
//!
//! Both share one timeline measured in virtual milliseconds. Sleeping on the
//! clock advances the timeline immediately, so a full transition with its
//! settle delay and status polls runs without wall-clock waits.

use std::cell::Cell;
use std::ops::Add;
use std::rc::Rc;
use std::time::Duration;

use embassy_futures::yield_now;
use mux_core::driver::MuxClock;
use mux_core::registers::{
    DUAL_ROLE_CFG0, DUAL_ROLE_CFG1, HOST_MODE, MIN_WINDOW_SIZE, RegisterWindow, SW_IDPIN,
};

/// Milliseconds on the virtual timeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualInstant(pub u64);

impl Add<Duration> for VirtualInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0.saturating_add(millis(rhs)))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Handle to the shared timeline.
#[derive(Clone, Default)]
pub struct Timeline(Rc<Cell<u64>>);

impl Timeline {
    pub fn now_ms(&self) -> u64 {
        self.0.get()
    }

    fn advance(&self, duration: Duration) {
        self.0.set(self.0.get().saturating_add(millis(duration)));
    }
}

/// Clock whose sleeps jump the timeline to the end of the allowed range.
pub struct VirtualClock {
    timeline: Timeline,
}

impl VirtualClock {
    pub fn new(timeline: Timeline) -> Self {
        Self { timeline }
    }
}

impl MuxClock for VirtualClock {
    type Instant = VirtualInstant;

    fn now(&self) -> VirtualInstant {
        VirtualInstant(self.timeline.now_ms())
    }

    async fn sleep_range(&mut self, _min: Duration, max: Duration) {
        self.timeline.advance(max);
        yield_now().await;
    }
}

/// Register block whose status register follows `CFG0` after `latency_ms`.
///
/// While `stuck` is set the status register never changes, which makes every
/// switch time out.
pub struct EmuWindow {
    timeline: Timeline,
    cfg0: Cell<u32>,
    cfg1: Cell<u32>,
    pending: Cell<Option<(u64, u32)>>,
    latency_ms: u64,
    stuck: Rc<Cell<bool>>,
}

impl EmuWindow {
    /// Powers up in host role with the override released.
    pub fn new(timeline: Timeline, latency_ms: u64, stuck: Rc<Cell<bool>>) -> Self {
        Self {
            timeline,
            cfg0: Cell::new(0),
            cfg1: Cell::new(HOST_MODE),
            pending: Cell::new(None),
            latency_ms,
            stuck,
        }
    }

    fn settle(&self) {
        if self.stuck.get() {
            return;
        }
        if let Some((due, status)) = self.pending.get() {
            if self.timeline.now_ms() >= due {
                self.cfg1.set(status);
                self.pending.set(None);
            }
        }
    }
}

impl RegisterWindow for EmuWindow {
    fn read32(&self, offset: usize) -> u32 {
        self.settle();
        match offset {
            DUAL_ROLE_CFG0 => self.cfg0.get(),
            DUAL_ROLE_CFG1 => self.cfg1.get(),
            _ => 0,
        }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        if offset != DUAL_ROLE_CFG0 {
            return;
        }
        self.cfg0.set(value);

        // ID low selects host; the status bit reports host role.
        let status = if value & SW_IDPIN == 0 { HOST_MODE } else { 0 };
        let due = self.timeline.now_ms().saturating_add(self.latency_ms);
        self.pending.set(Some((due, status)));
        self.settle();
    }

    fn size(&self) -> usize {
        MIN_WINDOW_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux_core::registers::SW_IDPIN_EN;

    #[test]
    fn status_follows_after_latency() {
        let timeline = Timeline::default();
        let mut window = EmuWindow::new(timeline.clone(), 50, Rc::new(Cell::new(false)));

        window.write32(DUAL_ROLE_CFG0, SW_IDPIN_EN | SW_IDPIN);
        assert_eq!(window.read32(DUAL_ROLE_CFG1), HOST_MODE);

        timeline.advance(Duration::from_millis(50));
        assert_eq!(window.read32(DUAL_ROLE_CFG1), 0);
        assert_eq!(window.read32(DUAL_ROLE_CFG0), SW_IDPIN_EN | SW_IDPIN);
    }

    #[test]
    fn stuck_status_never_moves() {
        let timeline = Timeline::default();
        let stuck = Rc::new(Cell::new(true));
        let mut window = EmuWindow::new(timeline.clone(), 0, stuck.clone());

        window.write32(DUAL_ROLE_CFG0, SW_IDPIN_EN | SW_IDPIN);
        timeline.advance(Duration::from_secs(5));
        assert_eq!(window.read32(DUAL_ROLE_CFG1), HOST_MODE);

        stuck.set(false);
        assert_eq!(window.read32(DUAL_ROLE_CFG1), 0);
    }
}
