//! Worker-side context for one mux instance.
//!
//! [`MuxController`] owns the driver, the latest cable facts and the mode the
//! worker last applied. Producers never see it; they talk to the
//! [`TaskQueue`] and the worker feeds every queued task through
//! [`MuxController::execute`] one at a time.

use core::fmt;

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::arbiter::{
    ArbitrationPolicy, Mode, MuxTarget, TransitionStep, plan_transition, target_with_policy,
};
use crate::driver::{MuxClock, MuxDriver, MuxError, MuxTimings, WindowTooSmall};
use crate::queue::{
    EnqueueError, MuxTask, QueuedTask, TaskQueue, TaskQueueProducer, TaskTicket,
};
use crate::registers::{RegisterDump, RegisterWindow};
use crate::signals::{
    CableSignal, CableState, PublisherDescriptor, PublisherDirectory, ResolvedPublishers,
    SignalSource, UnavailableDependency, covered_signals, resolve_publishers,
};
use crate::telemetry::{TelemetryEventKind, TelemetryRecorder};

/// Result of one executed task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaskOutcome {
    /// A target was computed and written. `result` carries the poll count of
    /// the final write or the timeout.
    Applied {
        target: MuxTarget,
        result: Result<u32, MuxError>,
    },
    Dumped(RegisterDump),
}

/// Attach failed; the window has already been released.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttachError {
    WindowTooSmall { size: usize },
    Unavailable(UnavailableDependency),
}

impl From<WindowTooSmall> for AttachError {
    fn from(error: WindowTooSmall) -> Self {
        AttachError::WindowTooSmall { size: error.size }
    }
}

impl From<UnavailableDependency> for AttachError {
    fn from(error: UnavailableDependency) -> Self {
        AttachError::Unavailable(error)
    }
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::WindowTooSmall { size } => {
                fmt::Display::fmt(&WindowTooSmall { size: *size }, f)
            }
            AttachError::Unavailable(dependency) => fmt::Display::fmt(dependency, f),
        }
    }
}

/// A controller plus the publishers it should subscribe to.
pub struct Attached<W, C: MuxClock> {
    pub controller: MuxController<W, C>,
    pub publishers: ResolvedPublishers,
}

/// Resolves publishers, then takes ownership of `window`.
///
/// Publishers are resolved first so a deferred attach never holds the
/// window; on any error `window` is dropped before returning.
pub fn attach<W, C, D>(
    window: W,
    clock: C,
    timings: MuxTimings,
    directory: &D,
    table: &'static [PublisherDescriptor],
) -> Result<Attached<W, C>, AttachError>
where
    W: RegisterWindow,
    C: MuxClock,
    D: PublisherDirectory + ?Sized,
{
    let publishers = match resolve_publishers(directory, table) {
        Ok(publishers) => publishers,
        Err(dependency) => {
            warn!(
                "mux: deferring attach, {} not ready ({})",
                dependency.publisher, dependency.platform_id
            );
            return Err(dependency.into());
        }
    };

    let driver = MuxDriver::new(window, clock, timings)?;
    Ok(Attached {
        controller: MuxController::new(driver),
        publishers,
    })
}

/// Enqueues the current value of every signal `publishers` provide.
///
/// Returns the number of tasks enqueued. Signals the source cannot report
/// are skipped.
pub fn sync_initial_state<P, S>(
    producer: &mut P,
    publishers: &[&PublisherDescriptor],
    source: &S,
) -> Result<usize, EnqueueError<P::Error>>
where
    P: TaskQueueProducer + ?Sized,
    S: SignalSource + ?Sized,
{
    let mut enqueued = 0;
    for kind in covered_signals(publishers) {
        if let Some(value) = source.current(kind) {
            producer.try_enqueue(MuxTask::Signal(CableSignal::new(kind, value)))?;
            enqueued += 1;
        }
    }
    Ok(enqueued)
}

/// Serialized mux context owned by the worker.
pub struct MuxController<W, C: MuxClock> {
    driver: MuxDriver<W, C>,
    cable: CableState,
    mode: Mode,
    policy: ArbitrationPolicy,
    telemetry: TelemetryRecorder<C::Instant>,
}

impl<W, C> MuxController<W, C>
where
    W: RegisterWindow,
    C: MuxClock,
{
    /// Wraps `driver` with default mode, empty cable state and charger-aware rules.
    pub fn new(driver: MuxDriver<W, C>) -> Self {
        Self {
            driver,
            cable: CableState::default(),
            mode: Mode::default(),
            policy: ArbitrationPolicy::default(),
            telemetry: TelemetryRecorder::new(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: ArbitrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the mode used until the first `ApplyMode` task.
    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn driver(&self) -> &MuxDriver<W, C> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut MuxDriver<W, C> {
        &mut self.driver
    }

    pub const fn cable(&self) -> CableState {
        self.cable
    }

    pub const fn mode(&self) -> Mode {
        self.mode
    }

    pub const fn policy(&self) -> ArbitrationPolicy {
        self.policy
    }

    pub fn telemetry(&self) -> &TelemetryRecorder<C::Instant> {
        &self.telemetry
    }

    /// Releases the driver, and with it the register window.
    pub fn detach(self) -> MuxDriver<W, C> {
        self.driver
    }

    fn record(&mut self, event: TelemetryEventKind) {
        let now = self.driver.clock().now();
        self.telemetry.record(event, now);
    }

    /// Runs one task to completion.
    pub async fn execute(&mut self, task: MuxTask) -> TaskOutcome {
        match task {
            MuxTask::Signal(signal) => {
                if self.cable.apply(signal) {
                    self.record(TelemetryEventKind::SignalChanged(signal));
                }
                self.reconcile().await
            }
            MuxTask::ApplyMode(mode) => {
                self.mode = mode;
                self.record(TelemetryEventKind::ModeApplied(mode));
                self.reconcile().await
            }
            MuxTask::DumpRegisters => {
                let dump = self.driver.dump();
                info!("{}", dump);
                self.record(TelemetryEventKind::RegistersDumped(dump));
                TaskOutcome::Dumped(dump)
            }
        }
    }

    /// Recomputes the target from mode and cable state and drives the mux to it.
    ///
    /// A timeout is reported in the outcome but does not roll anything back;
    /// the next task simply tries again.
    async fn reconcile(&mut self) -> TaskOutcome {
        let target = target_with_policy(self.policy, self.mode, self.cable);
        self.record(TelemetryEventKind::TargetComputed(target));

        let current = match self.policy {
            ArbitrationPolicy::ChargerAware => self.driver.current_target(),
            ArbitrationPolicy::MuxOnly => None,
        };
        let plan = plan_transition(current, target, self.driver.timings().settle_delay);

        let mut result = Ok(0);
        for step in plan {
            let written = step.target();
            let report = self.driver.write_target(written);
            if report.latched {
                self.record(TelemetryEventKind::SoftwareControlEnabled);
            }
            self.record(TelemetryEventKind::RegisterWrite {
                target: written,
                cfg0: report.cfg0,
            });

            match step {
                TransitionStep::Prepare { settle, .. } => {
                    let millis = u32::try_from(settle.as_millis()).unwrap_or(u32::MAX);
                    self.record(TelemetryEventKind::SettleDelay(millis));
                    self.driver.clock_mut().sleep(settle).await;
                }
                TransitionStep::Commit(_) => {
                    result = self.driver.wait_for_switch(written).await;
                    match result {
                        Ok(polls) => self.record(TelemetryEventKind::SwitchConfirmed {
                            target: written,
                            polls,
                        }),
                        Err(MuxError::Timeout { target, polls }) => {
                            self.record(TelemetryEventKind::SwitchTimedOut { target, polls });
                        }
                    }
                }
            }
        }

        TaskOutcome::Applied { target, result }
    }

    /// Executes one received task and marks its ticket complete.
    pub async fn run_task<M: RawMutex, const DEPTH: usize>(
        &mut self,
        queue: &TaskQueue<M, DEPTH>,
        queued: QueuedTask,
    ) -> TaskOutcome {
        debug!("mux: running {} {}", queued.ticket, queued.task);
        self.record(TelemetryEventKind::TaskStarted(queued.ticket));
        let outcome = self.execute(queued.task).await;
        self.record(TelemetryEventKind::TaskFinished(queued.ticket));
        queue.complete(queued.ticket);
        outcome
    }

    /// Worker loop: executes queued tasks in FIFO order forever.
    pub async fn run<M: RawMutex, const DEPTH: usize>(
        &mut self,
        queue: &TaskQueue<M, DEPTH>,
    ) -> ! {
        loop {
            let queued = queue.receive().await;
            self.run_task(queue, queued).await;
        }
    }

    /// Executes everything currently queued and returns the last ticket run.
    pub async fn drain<M: RawMutex, const DEPTH: usize>(
        &mut self,
        queue: &TaskQueue<M, DEPTH>,
    ) -> Option<TaskTicket> {
        let mut last = None;
        while let Some(queued) = queue.try_receive() {
            self.run_task(queue, queued).await;
            last = Some(queued.ticket);
        }
        last
    }
}
