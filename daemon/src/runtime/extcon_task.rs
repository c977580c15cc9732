use embassy_time::{Duration, Timer};
use mux_core::queue::{EnqueueError, MuxTask};

use super::MuxQueue;
use crate::extcon::ExtconPublisher;

/// Samples one publisher and forwards changed signals to the worker.
///
/// A change that does not fit in the queue stays undelivered and is offered
/// again on the next sample.
#[embassy_executor::task(pool_size = 4)]
pub async fn run(
    mut publisher: ExtconPublisher,
    interval: Duration,
    queue: &'static MuxQueue,
) -> ! {
    loop {
        Timer::after(interval).await;

        let sample = match publisher.sample() {
            Ok(sample) => sample,
            Err(error) => {
                log::warn!("{}: state read failed: {error}", publisher.name());
                continue;
            }
        };

        for signal in publisher.changes(&sample) {
            match queue.enqueue(MuxTask::Signal(signal)) {
                Ok(ticket) => {
                    log::debug!("{}: {signal} queued as {ticket}", publisher.name());
                    publisher.mark_delivered(signal);
                }
                Err(EnqueueError::QueueFull | EnqueueError::Other(())) => {
                    log::warn!("{}: task queue full, retrying {signal}", publisher.name());
                    break;
                }
            }
        }
    }
}
