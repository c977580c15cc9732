//! Serialized task queue feeding the mux worker.
//!
//! Producers (cable-signal callbacks, the control surface) never block: they
//! push a [`MuxTask`] and receive a [`TaskTicket`]. A single worker drains the
//! queue in FIFO order and marks each ticket complete, so callers that care
//! can await completion instead of sleeping.

use core::cell::Cell;
use core::fmt;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::signal::Signal;
use portable_atomic::{AtomicU32, Ordering};

use crate::arbiter::Mode;
use crate::signals::CableSignal;

/// Default queue depth used by the runtime crates.
pub const DEFAULT_QUEUE_DEPTH: usize = 16;

/// Work item executed by the mux worker.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MuxTask {
    /// A publisher reported a new cable fact.
    Signal(CableSignal),
    /// The owning subsystem requested a role.
    ApplyMode(Mode),
    /// Log both registers without changing them.
    DumpRegisters,
}

impl fmt::Display for MuxTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MuxTask::Signal(signal) => write!(f, "signal {signal}"),
            MuxTask::ApplyMode(mode) => write!(f, "mode {mode}"),
            MuxTask::DumpRegisters => f.write_str("dumpregs"),
        }
    }
}

/// Monotonic handle for an enqueued task. Tickets start at 1.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskTicket(pub u32);

impl fmt::Display for TaskTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task paired with the ticket handed to its producer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct QueuedTask {
    pub ticket: TaskTicket,
    pub task: MuxTask,
}

/// Error surfaced when a task cannot be enqueued.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnqueueError<E = ()> {
    /// Queue has reached its maximum capacity.
    QueueFull,
    /// Transport-specific failure.
    Other(E),
}

impl<E> EnqueueError<E> {
    /// Maps the inner error type.
    pub fn map_other<F, M>(self, mapper: M) -> EnqueueError<F>
    where
        M: FnOnce(E) -> F,
    {
        match self {
            EnqueueError::QueueFull => EnqueueError::QueueFull,
            EnqueueError::Other(err) => EnqueueError::Other(mapper(err)),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for EnqueueError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::QueueFull => f.write_str("task queue full"),
            EnqueueError::Other(err) => write!(f, "task queue error: {err:?}"),
        }
    }
}

/// Trait implemented by producers that push work to the mux worker.
pub trait TaskQueueProducer {
    /// Transport-specific error type.
    type Error;

    /// Attempts to enqueue a task without blocking.
    fn try_enqueue(&mut self, task: MuxTask) -> Result<TaskTicket, EnqueueError<Self::Error>>;

    /// Enqueues `task` and runs `accepted` once it is in the queue.
    ///
    /// Transports that can run `accepted` under the same lock as the insert
    /// should override this so no other producer can enqueue in between.
    fn try_enqueue_and<F>(
        &mut self,
        task: MuxTask,
        accepted: F,
    ) -> Result<TaskTicket, EnqueueError<Self::Error>>
    where
        F: FnOnce(TaskTicket),
    {
        let ticket = self.try_enqueue(task)?;
        accepted(ticket);
        Ok(ticket)
    }

    /// Returns the queue capacity if it is known.
    fn capacity(&self) -> Option<usize> {
        None
    }

    /// Returns the current queue depth if it can be observed.
    fn len(&self) -> Option<usize> {
        None
    }

    /// Returns `true` when the queue reports that it currently holds no items.
    fn is_empty(&self) -> Option<bool> {
        self.len().map(|current| current == 0)
    }
}

impl<P: TaskQueueProducer + ?Sized> TaskQueueProducer for &mut P {
    type Error = P::Error;

    fn try_enqueue(&mut self, task: MuxTask) -> Result<TaskTicket, EnqueueError<Self::Error>> {
        (**self).try_enqueue(task)
    }

    fn try_enqueue_and<F>(
        &mut self,
        task: MuxTask,
        accepted: F,
    ) -> Result<TaskTicket, EnqueueError<Self::Error>>
    where
        F: FnOnce(TaskTicket),
    {
        (**self).try_enqueue_and(task, accepted)
    }

    fn capacity(&self) -> Option<usize> {
        (**self).capacity()
    }

    fn len(&self) -> Option<usize> {
        (**self).len()
    }
}

/// FIFO queue with completion tracking, shared between producers and the worker.
pub struct TaskQueue<M: RawMutex, const DEPTH: usize> {
    channel: Channel<M, QueuedTask, DEPTH>,
    next_ticket: Mutex<M, Cell<u32>>,
    completed_through: AtomicU32,
    completed: Signal<M, TaskTicket>,
}

impl<M: RawMutex, const DEPTH: usize> TaskQueue<M, DEPTH> {
    /// Creates an empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            next_ticket: Mutex::new(Cell::new(1)),
            completed_through: AtomicU32::new(0),
            completed: Signal::new(),
        }
    }

    /// Enqueues `task` without blocking.
    ///
    /// Tickets are handed out under the same lock as the channel insert, so
    /// ticket order always matches execution order.
    pub fn enqueue(&self, task: MuxTask) -> Result<TaskTicket, EnqueueError> {
        self.enqueue_and(task, |_| {})
    }

    /// Enqueues `task` and, while still holding the ticket lock, runs
    /// `accepted`. Nothing runs when the queue is full.
    pub fn enqueue_and<F>(&self, task: MuxTask, accepted: F) -> Result<TaskTicket, EnqueueError>
    where
        F: FnOnce(TaskTicket),
    {
        self.next_ticket.lock(|next| {
            let ticket = TaskTicket(next.get());
            match self.channel.try_send(QueuedTask { ticket, task }) {
                Ok(()) => {
                    next.set(ticket.0.wrapping_add(1));
                    accepted(ticket);
                    Ok(ticket)
                }
                Err(TrySendError::Full(_)) => Err(EnqueueError::QueueFull),
            }
        })
    }

    /// Waits for the next task.
    pub async fn receive(&self) -> QueuedTask {
        self.channel.receive().await
    }

    /// Takes the next task if one is queued.
    pub fn try_receive(&self) -> Option<QueuedTask> {
        self.channel.try_receive().ok()
    }

    /// Marks `ticket` (and every earlier ticket) complete.
    pub fn complete(&self, ticket: TaskTicket) {
        self.completed_through.store(ticket.0, Ordering::Release);
        self.completed.signal(ticket);
    }

    /// Returns `true` once the worker has finished `ticket`.
    pub fn is_complete(&self, ticket: TaskTicket) -> bool {
        self.completed_through.load(Ordering::Acquire) >= ticket.0
    }

    /// Resolves once `ticket` has been executed.
    ///
    /// Supports one waiter at a time.
    pub async fn wait_for(&self, ticket: TaskTicket) {
        while !self.is_complete(ticket) {
            self.completed.wait().await;
        }
    }

    /// Number of tasks waiting for the worker.
    pub fn len(&self) -> usize {
        self.channel.len()
    }

    /// Returns `true` when no task is waiting.
    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    /// Maximum number of waiting tasks.
    pub const fn capacity(&self) -> usize {
        DEPTH
    }
}

impl<M: RawMutex, const DEPTH: usize> Default for TaskQueue<M, DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const DEPTH: usize> TaskQueueProducer for &TaskQueue<M, DEPTH> {
    type Error = ();

    fn try_enqueue(&mut self, task: MuxTask) -> Result<TaskTicket, EnqueueError<Self::Error>> {
        self.enqueue(task)
    }

    fn try_enqueue_and<F>(
        &mut self,
        task: MuxTask,
        accepted: F,
    ) -> Result<TaskTicket, EnqueueError<Self::Error>>
    where
        F: FnOnce(TaskTicket),
    {
        self.enqueue_and(task, accepted)
    }

    fn capacity(&self) -> Option<usize> {
        Some(DEPTH)
    }

    fn len(&self) -> Option<usize> {
        Some(self.channel.len())
    }
}
