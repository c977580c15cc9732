use mux_core::controller::TaskOutcome;

use super::{DaemonController, MuxQueue};

#[embassy_executor::task]
pub async fn run(mut controller: DaemonController, queue: &'static MuxQueue) -> ! {
    loop {
        let queued = queue.receive().await;
        let first = controller.telemetry().next_id();

        let outcome = controller.run_task(queue, queued).await;
        if let Some(level) = outcome_level(&outcome) {
            match outcome {
                TaskOutcome::Applied {
                    target,
                    result: Ok(polls),
                } => {
                    log::log!(level, "{}: mux at {target} after {polls} poll(s)", queued.ticket);
                }
                TaskOutcome::Applied { result: Err(error), .. } => {
                    log::log!(level, "{}: {error}", queued.ticket);
                }
                TaskOutcome::Dumped(_) => {}
            }
        }

        for record in controller.telemetry().since(first) {
            log::trace!(
                "[+{:>8} ms] {:>4} {}",
                record.timestamp.into_embassy().as_millis(),
                record.id,
                record.event
            );
        }
    }
}

/// Level for a finished task, if it is logged at all. Timeouts stay at debug
/// because the driver has already warned about them.
fn outcome_level(outcome: &TaskOutcome) -> Option<log::Level> {
    match outcome {
        TaskOutcome::Applied { .. } => Some(log::Level::Debug),
        TaskOutcome::Dumped(_) => None,
    }
}
