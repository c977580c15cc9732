use std::convert::Infallible;

use embassy_executor::Executor;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use mux_core::control::{ControlSurface, ModeCell};
use mux_core::controller::{AttachError, MuxController, attach, sync_initial_state};
use mux_core::queue::{DEFAULT_QUEUE_DEPTH, TaskQueue};
use mux_core::signals::{KNOWN_PUBLISHERS, resolve_publishers};
use static_cell::StaticCell;

use crate::config::DaemonConfig;
use crate::error::DaemonError;
use crate::extcon::{ExtconPublisher, PublisherSet, SysfsDirectory};
use crate::hw::{EmbassyClock, MmioWindow};

mod control;
mod extcon_task;
mod worker_task;

pub type MuxQueue = TaskQueue<CriticalSectionRawMutex, DEFAULT_QUEUE_DEPTH>;
pub type DaemonController = MuxController<MmioWindow, EmbassyClock>;

pub(super) static QUEUE: MuxQueue = MuxQueue::new();
pub(super) static MODE: ModeCell = ModeCell::new(mux_core::arbiter::Mode::Otg);
static EXECUTOR: StaticCell<Executor> = StaticCell::new();

/// Attaches to the mux and runs until the process is killed.
///
/// Only returns on a startup failure.
pub fn start(config: DaemonConfig) -> Result<Infallible, DaemonError> {
    let directory = SysfsDirectory::new(&config.sysfs_root);
    let window = map_window(&directory, &config)?;
    let attached = attach(
        window,
        EmbassyClock::new(),
        config.timings,
        &directory,
        KNOWN_PUBLISHERS,
    )?;
    let controller = attached.controller.with_policy(config.policy);

    let mut publishers = Vec::with_capacity(attached.publishers.len());
    for descriptor in &attached.publishers {
        let mut publisher = ExtconPublisher::open(&directory, *descriptor)?;
        let sample = publisher
            .sample()
            .map_err(|source| DaemonError::io(format!("read {}", publisher.name()), source))?;
        publisher.prime(&sample);
        publishers.push(publisher);
    }

    let mut producer = &QUEUE;
    let source = PublisherSet(&publishers);
    let synced = sync_initial_state(&mut producer, &attached.publishers, &source)?;

    if let Some(mode) = config.mode {
        ControlSurface::new(&MODE, &QUEUE).request_mode(mode)?;
    }

    if publishers.is_empty() {
        log::info!("no cable publishers on this platform; mux follows mode only");
    } else {
        log::info!(
            "attached with {} publisher(s), {synced} initial signal(s) queued",
            publishers.len()
        );
    }

    control::spawn_stdin_transport(&MODE, &QUEUE)
        .map_err(|source| DaemonError::io("spawn control thread", source))?;

    let interval = embassy_time::Duration::from_micros(
        u64::try_from(config.poll_interval.as_micros()).unwrap_or(u64::MAX),
    );
    let executor = EXECUTOR.init(Executor::new());
    executor.run(move |spawner| {
        spawner
            .spawn(worker_task::run(controller, &QUEUE))
            .expect("failed to spawn mux worker");
        for publisher in publishers {
            spawner
                .spawn(extcon_task::run(publisher, interval, &QUEUE))
                .expect("failed to spawn extcon poller");
        }
    })
}

/// Maps the register window once every publisher is present, so a deferred
/// start never touches physical memory.
fn map_window(
    directory: &SysfsDirectory,
    config: &DaemonConfig,
) -> Result<MmioWindow, DaemonError> {
    if let Err(missing) = resolve_publishers(directory, KNOWN_PUBLISHERS) {
        log::warn!("{missing}; deferring");
        return Err(AttachError::Unavailable(missing).into());
    }
    MmioWindow::map(&config.mem_path, config.base, config.size)
}
