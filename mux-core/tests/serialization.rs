mod common;

use embassy_futures::block_on;
use embassy_futures::select::{Either, select};
use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use mux_core::arbiter::Mode;
use mux_core::controller::sync_initial_state;
use mux_core::queue::{MuxTask, TaskQueue, TaskTicket};
use mux_core::signals::{CableSignal, KNOWN_PUBLISHERS, SignalKind, SignalSource};
use mux_core::telemetry::TelemetryEventKind;

const BURST: [MuxTask; 6] = [
    MuxTask::ApplyMode(Mode::Device),
    MuxTask::Signal(CableSignal::new(SignalKind::IdPresence, true)),
    MuxTask::ApplyMode(Mode::Host),
    MuxTask::Signal(CableSignal::new(SignalKind::VbusCharger1, true)),
    MuxTask::DumpRegisters,
    MuxTask::ApplyMode(Mode::Otg),
];

#[test]
fn burst_runs_one_task_at_a_time_in_order() {
    let queue: TaskQueue<NoopRawMutex, 16> = TaskQueue::new();
    let mut controller = common::controller(30, false);

    let producer = async {
        let mut last = None;
        for (index, task) in BURST.into_iter().enumerate() {
            last = Some(queue.enqueue(task).expect("queue has room"));
            if index % 2 == 1 {
                // Let the worker start polling while more work arrives.
                yield_now().await;
            }
        }
        let last = last.expect("burst is not empty");
        queue.wait_for(last).await;
        last
    };

    let last = match block_on(select(controller.run(&queue), producer)) {
        Either::First(never) => match never {},
        Either::Second(last) => last,
    };
    assert_eq!(last, TaskTicket(BURST.len() as u32));

    let mut open: Option<TaskTicket> = None;
    let mut finished = Vec::new();
    for record in controller.telemetry().oldest_first() {
        match record.event {
            TelemetryEventKind::TaskStarted(ticket) => {
                assert_eq!(open, None, "{ticket} started while {open:?} was running");
                open = Some(ticket);
            }
            TelemetryEventKind::TaskFinished(ticket) => {
                assert_eq!(open, Some(ticket));
                open = None;
                finished.push(ticket.0);
            }
            TelemetryEventKind::RegisterWrite { .. } => {
                assert!(open.is_some(), "register write outside a task");
            }
            _ => {}
        }
    }

    assert_eq!(finished, [1, 2, 3, 4, 5, 6]);
}

#[test]
fn waiting_on_ticket_does_not_need_sleeps() {
    let queue: TaskQueue<NoopRawMutex, 4> = TaskQueue::new();
    let mut controller = common::controller(600, false);

    let producer = async {
        let ticket = queue
            .enqueue(MuxTask::ApplyMode(Mode::Device))
            .expect("queue has room");
        queue.wait_for(ticket).await;
        queue.is_complete(ticket)
    };

    let done = match block_on(select(controller.run(&queue), producer)) {
        Either::First(never) => match never {},
        Either::Second(done) => done,
    };
    assert!(done);
    assert_eq!(controller.driver().clock().now_ms(), 600);
}

struct DeviceCable;

impl SignalSource for DeviceCable {
    fn current(&self, kind: SignalKind) -> Option<bool> {
        Some(matches!(kind, SignalKind::IdPresence | SignalKind::VbusCharger2))
    }
}

#[test]
fn initial_sync_brings_hardware_to_cable_state() {
    let queue: TaskQueue<NoopRawMutex, 8> = TaskQueue::new();
    let mut controller = common::controller(0, false);

    let mut producer = &queue;
    let publishers = [&KNOWN_PUBLISHERS[1]];
    let enqueued = sync_initial_state(&mut producer, &publishers, &DeviceCable).unwrap();
    assert_eq!(enqueued, 4);

    block_on(controller.drain(&queue));
    assert!(controller.cable().id_present());
    assert!(controller.cable().vbus_valid());
    assert_eq!(
        controller.driver().current_target(),
        Some(mux_core::arbiter::MuxTarget::DEVICE)
    );
}
