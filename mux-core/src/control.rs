//! Text control surface.
//!
//! Mirrors a read/write attribute: reads return the lowercase mode name and
//! writes accept `host`, `device`, `otg` or the `dumpregs` debug command. A
//! write only enqueues work; it never touches the registers itself.

use core::fmt;

use portable_atomic::{AtomicU8, Ordering};
use winnow::combinator::alt;
use winnow::prelude::*;

use crate::arbiter::Mode;
use crate::queue::{EnqueueError, MuxTask, TaskQueueProducer, TaskTicket};

/// Last requested mode, readable from any context.
///
/// The worker carries its own copy of the mode inside each task; this cell
/// only backs [`ControlSurface::get_mode`].
pub struct ModeCell(AtomicU8);

impl ModeCell {
    /// Creates a cell holding `mode`.
    #[must_use]
    pub const fn new(mode: Mode) -> Self {
        Self(AtomicU8::new(mode.to_raw()))
    }

    pub fn get(&self) -> Mode {
        Mode::from_raw(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, mode: Mode) {
        self.0.store(mode.to_raw(), Ordering::Release);
    }
}

impl Default for ModeCell {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

/// Parsed control write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlRequest {
    SetMode(Mode),
    DumpRegisters,
}

/// Control text did not name a known mode or command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidMode;

impl fmt::Display for InvalidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid mode (expected host, device, otg or dumpregs)")
    }
}

fn request(input: &mut &str) -> Result<ControlRequest, ()> {
    alt((
        "host".value(ControlRequest::SetMode(Mode::Host)),
        "device".value(ControlRequest::SetMode(Mode::Device)),
        "otg".value(ControlRequest::SetMode(Mode::Otg)),
        "dumpregs".value(ControlRequest::DumpRegisters),
    ))
    .parse_next(input)
}

/// Parses attribute text. One trailing newline is accepted.
pub fn parse_request(text: &str) -> Result<ControlRequest, InvalidMode> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    request.parse(text).map_err(|_| InvalidMode)
}

/// Failure of a control write.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlError<E = ()> {
    InvalidMode,
    Queue(EnqueueError<E>),
}

impl<E> From<InvalidMode> for ControlError<E> {
    fn from(_: InvalidMode) -> Self {
        ControlError::InvalidMode
    }
}

impl<E> From<EnqueueError<E>> for ControlError<E> {
    fn from(error: EnqueueError<E>) -> Self {
        ControlError::Queue(error)
    }
}

impl<E: fmt::Debug> fmt::Display for ControlError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::InvalidMode => fmt::Display::fmt(&InvalidMode, f),
            ControlError::Queue(error) => fmt::Display::fmt(error, f),
        }
    }
}

/// Mode attribute for one device instance.
pub struct ControlSurface<'a, P> {
    mode: &'a ModeCell,
    producer: P,
}

impl<'a, P: TaskQueueProducer> ControlSurface<'a, P> {
    pub const fn new(mode: &'a ModeCell, producer: P) -> Self {
        Self { mode, producer }
    }

    /// Lowercase name of the last accepted mode.
    pub fn get_mode(&self) -> &'static str {
        self.mode.get().as_str()
    }

    /// Parses `text` and enqueues the matching task.
    ///
    /// Unknown text is rejected before anything is enqueued. The returned
    /// ticket completes once the worker has applied the request.
    pub fn set_mode(&mut self, text: &str) -> Result<TaskTicket, ControlError<P::Error>> {
        match parse_request(text)? {
            ControlRequest::SetMode(mode) => self.request_mode(mode),
            ControlRequest::DumpRegisters => Ok(self.producer.try_enqueue(MuxTask::DumpRegisters)?),
        }
    }

    /// Enqueues a recompute for `mode` and records it as current.
    ///
    /// Unlike [`ControlSurface::set_mode`] this accepts [`Mode::Invalid`].
    pub fn request_mode(&mut self, mode: Mode) -> Result<TaskTicket, ControlError<P::Error>> {
        let cell = self.mode;
        let ticket = self
            .producer
            .try_enqueue_and(MuxTask::ApplyMode(mode), |_| cell.set(mode))?;
        info!("changing mode to {}", mode.as_str());
        Ok(ticket)
    }

    /// Returns the underlying producer.
    pub fn producer(&self) -> &P {
        &self.producer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskQueue;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn parses_known_words_with_optional_newline() {
        assert_eq!(parse_request("host"), Ok(ControlRequest::SetMode(Mode::Host)));
        assert_eq!(parse_request("device\n"), Ok(ControlRequest::SetMode(Mode::Device)));
        assert_eq!(parse_request("otg"), Ok(ControlRequest::SetMode(Mode::Otg)));
        assert_eq!(parse_request("dumpregs\n"), Ok(ControlRequest::DumpRegisters));
    }

    #[test]
    fn rejects_unknown_or_padded_text() {
        for text in ["bogus", "", "hostx", "host\n\n", " host", "HOST", "invalid"] {
            assert_eq!(parse_request(text), Err(InvalidMode), "input {text:?}");
        }
    }

    #[test]
    fn set_mode_enqueues_and_updates_cell() {
        let queue: TaskQueue<NoopRawMutex, 4> = TaskQueue::new();
        let cell = ModeCell::default();
        let mut surface = ControlSurface::new(&cell, &queue);
        assert_eq!(surface.get_mode(), "otg");

        let ticket = surface.set_mode("host\n").unwrap();
        assert_eq!(surface.get_mode(), "host");

        let queued = queue.try_receive().unwrap();
        assert_eq!(queued.ticket, ticket);
        assert_eq!(queued.task, MuxTask::ApplyMode(Mode::Host));
    }

    #[test]
    fn same_mode_is_not_suppressed() {
        let queue: TaskQueue<NoopRawMutex, 4> = TaskQueue::new();
        let cell = ModeCell::default();
        let mut surface = ControlSurface::new(&cell, &queue);

        surface.set_mode("device").unwrap();
        surface.set_mode("device").unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn invalid_text_changes_nothing() {
        let queue: TaskQueue<NoopRawMutex, 4> = TaskQueue::new();
        let cell = ModeCell::new(Mode::Device);
        let mut surface = ControlSurface::new(&cell, &queue);

        assert_eq!(surface.set_mode("bogus"), Err(ControlError::InvalidMode));
        assert_eq!(surface.get_mode(), "device");
        assert!(queue.is_empty());
    }

    #[test]
    fn dumpregs_keeps_mode() {
        let queue: TaskQueue<NoopRawMutex, 4> = TaskQueue::new();
        let cell = ModeCell::new(Mode::Host);
        let mut surface = ControlSurface::new(&cell, &queue);

        surface.set_mode("dumpregs").unwrap();
        assert_eq!(surface.get_mode(), "host");
        assert_eq!(queue.try_receive().map(|queued| queued.task), Some(MuxTask::DumpRegisters));
    }

    #[test]
    fn full_queue_leaves_mode_untouched() {
        let queue: TaskQueue<NoopRawMutex, 1> = TaskQueue::new();
        let cell = ModeCell::default();
        let mut surface = ControlSurface::new(&cell, &queue);

        surface.set_mode("device").unwrap();
        assert_eq!(
            surface.set_mode("host"),
            Err(ControlError::Queue(EnqueueError::QueueFull))
        );
        assert_eq!(surface.get_mode(), "device");
    }

    #[test]
    fn mode_tracks_last_queued_request_across_surfaces() {
        let queue: TaskQueue<NoopRawMutex, 4> = TaskQueue::new();
        let cell = ModeCell::default();
        let mut first = ControlSurface::new(&cell, &queue);
        let mut second = ControlSurface::new(&cell, &queue);

        first.request_mode(Mode::Device).unwrap();
        second.request_mode(Mode::Host).unwrap();
        first.request_mode(Mode::Device).unwrap();

        let mut last = None;
        while let Some(queued) = queue.try_receive() {
            if let MuxTask::ApplyMode(mode) = queued.task {
                last = Some(mode);
            }
        }
        assert_eq!(last, Some(cell.get()));
        assert_eq!(first.get_mode(), "device");
    }
}
