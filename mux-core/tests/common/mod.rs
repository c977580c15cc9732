#![allow(dead_code)]

use core::cell::{Cell, RefCell};
use core::ops::Add;
use core::time::Duration;
use std::rc::Rc;

use embassy_futures::yield_now;
use mux_core::arbiter::MuxTarget;
use mux_core::controller::MuxController;
use mux_core::driver::{MuxClock, MuxDriver, MuxTimings};
use mux_core::registers::{
    Cfg0, DUAL_ROLE_CFG0, DUAL_ROLE_CFG1, HOST_MODE, MIN_WINDOW_SIZE, RegisterWindow, SW_IDPIN,
};

/// Virtual milliseconds since the simulation started.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimInstant(pub u64);

impl Add<Duration> for SimInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        Self(self.0 + rhs.as_millis() as u64)
    }
}

/// Clock that jumps forward on every sleep and lets other futures run.
#[derive(Clone)]
pub struct SimClock {
    now_ms: Rc<Cell<u64>>,
}

impl SimClock {
    pub fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

impl MuxClock for SimClock {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.now_ms.get())
    }

    async fn sleep_range(&mut self, _min: Duration, max: Duration) {
        self.now_ms.set(self.now_ms.get() + max.as_millis() as u64);
        yield_now().await;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read { at_ms: u64, offset: usize },
    Write { at_ms: u64, offset: usize, value: u32 },
}

/// Register block whose status follows `CFG0` after a fixed latency.
pub struct SimWindow {
    now_ms: Rc<Cell<u64>>,
    cfg0: Cell<u32>,
    cfg1: Cell<u32>,
    pending: Cell<Option<(u64, u32)>>,
    latency_ms: u64,
    stuck: bool,
    log: RefCell<Vec<Access>>,
}

impl SimWindow {
    fn refresh(&self) {
        if self.stuck {
            return;
        }
        if let Some((due, value)) = self.pending.get() {
            if self.now_ms.get() >= due {
                self.cfg1.set(value);
                self.pending.set(None);
            }
        }
    }

    pub fn log(&self) -> Vec<Access> {
        self.log.borrow().clone()
    }

    /// `(time, target)` for every write that changed the override bits.
    pub fn target_writes(&self) -> Vec<(u64, MuxTarget)> {
        self.log
            .borrow()
            .iter()
            .filter_map(|access| match *access {
                Access::Write {
                    at_ms,
                    offset: DUAL_ROLE_CFG0,
                    value,
                } => Cfg0(value).target().map(|target| (at_ms, target)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().clear();
    }
}

impl RegisterWindow for SimWindow {
    fn read32(&self, offset: usize) -> u32 {
        self.refresh();
        self.log.borrow_mut().push(Access::Read {
            at_ms: self.now_ms.get(),
            offset,
        });
        match offset {
            DUAL_ROLE_CFG0 => self.cfg0.get(),
            DUAL_ROLE_CFG1 => self.cfg1.get(),
            _ => 0,
        }
    }

    fn write32(&mut self, offset: usize, value: u32) {
        self.log.borrow_mut().push(Access::Write {
            at_ms: self.now_ms.get(),
            offset,
            value,
        });
        if offset == DUAL_ROLE_CFG0 {
            self.cfg0.set(value);
            let status = if value & SW_IDPIN == 0 { HOST_MODE } else { 0 };
            self.pending
                .set(Some((self.now_ms.get() + self.latency_ms, status)));
            self.refresh();
        }
    }

    fn size(&self) -> usize {
        MIN_WINDOW_SIZE
    }
}

/// Builds a clock and a window sharing one timeline.
pub fn bench(latency_ms: u64, stuck: bool) -> (SimWindow, SimClock) {
    let now_ms = Rc::new(Cell::new(0));
    let window = SimWindow {
        now_ms: now_ms.clone(),
        cfg0: Cell::new(0),
        cfg1: Cell::new(HOST_MODE),
        pending: Cell::new(None),
        latency_ms,
        stuck,
        log: RefCell::new(Vec::new()),
    };
    (window, SimClock { now_ms })
}

pub fn controller(latency_ms: u64, stuck: bool) -> MuxController<SimWindow, SimClock> {
    let (window, clock) = bench(latency_ms, stuck);
    let driver = MuxDriver::new(window, clock, MuxTimings::DEFAULT).expect("window covers CFG1");
    MuxController::new(driver)
}
