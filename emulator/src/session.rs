use std::cell::Cell;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use mux_core::arbiter::{ArbitrationPolicy, Mode};
use mux_core::control::{ControlSurface, ModeCell};
use mux_core::controller::MuxController;
use mux_core::driver::{MuxDriver, MuxTimings};
use mux_core::queue::{DEFAULT_QUEUE_DEPTH, MuxTask, TaskQueue, TaskTicket};
use mux_core::signals::{CableSignal, SignalKind};

use crate::board::{EmuWindow, Timeline, VirtualClock};

/// Status register latency used when `--latency` is not given.
pub const DEFAULT_LATENCY_MS: u64 = 600;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "mode",
        "mode [host|device|otg|dumpregs]   - read or write the mode attribute",
    ),
    (
        "signal",
        "signal <id|charger1|charger2|charger3> <on|off> - report a cable fact",
    ),
    (
        "status",
        "status                            - show mode, cable facts and mux target",
    ),
    (
        "regs",
        "regs                              - show both dual-role registers",
    ),
    (
        "stuck",
        "stuck <on|off>                    - freeze the status register",
    ),
    (
        "help",
        "help [topic]                      - show help for a command",
    ),
];

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub latency_ms: u64,
    pub stuck: bool,
    pub policy: ArbitrationPolicy,
    pub transcript: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            latency_ms: DEFAULT_LATENCY_MS,
            stuck: false,
            policy: ArbitrationPolicy::ChargerAware,
            transcript: None,
        }
    }
}

type EmuQueue = TaskQueue<NoopRawMutex, DEFAULT_QUEUE_DEPTH>;

pub struct Session {
    queue: EmuQueue,
    mode: ModeCell,
    controller: MuxController<EmuWindow, VirtualClock>,
    timeline: Timeline,
    stuck: Rc<Cell<bool>>,
    transcript: Option<TranscriptLogger>,
}

impl Session {
    pub fn new(options: SessionOptions) -> io::Result<Self> {
        let transcript = match &options.transcript {
            Some(path) => Some(TranscriptLogger::new(path)?),
            None => None,
        };

        let timeline = Timeline::default();
        let stuck = Rc::new(Cell::new(options.stuck));
        let window = EmuWindow::new(timeline.clone(), options.latency_ms, stuck.clone());
        let clock = VirtualClock::new(timeline.clone());
        let driver = MuxDriver::new(window, clock, MuxTimings::DEFAULT)
            .map_err(|error| io::Error::other(error.to_string()))?;

        Ok(Self {
            queue: EmuQueue::new(),
            mode: ModeCell::new(Mode::Otg),
            controller: MuxController::new(driver).with_policy(options.policy),
            timeline,
            stuck,
            transcript,
        })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.log(TranscriptRole::Host, std::slice::from_ref(&trimmed))?;

        let (command, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (trimmed, ""),
        };

        let lines = match command.to_ascii_lowercase().as_str() {
            "help" => Self::help(rest),
            "mode" => self.mode(rest),
            "signal" => self.signal(rest),
            "status" => self.status(),
            "regs" => vec![self.controller.driver().dump().to_string()],
            "stuck" => self.stuck(rest),
            other => vec![format!("ERR unknown command `{other}` (try `help`)")],
        };

        self.log(TranscriptRole::Emulator, lines.as_slice())?;
        Ok(lines)
    }

    /// Virtual milliseconds since the session started.
    pub fn now_ms(&self) -> u64 {
        self.timeline.now_ms()
    }

    fn mode(&mut self, rest: &str) -> Vec<String> {
        let mut surface = ControlSurface::new(&self.mode, &self.queue);
        if rest.is_empty() {
            return vec![surface.get_mode().to_string()];
        }

        match surface.set_mode(rest) {
            Ok(ticket) => self.run_queued(ticket),
            Err(error) => vec![format!("ERR {error}")],
        }
    }

    fn signal(&mut self, rest: &str) -> Vec<String> {
        let mut words = rest.split_whitespace();
        let (Some(label), Some(value), None) = (words.next(), words.next(), words.next()) else {
            return vec!["ERR usage: signal <id|charger1|charger2|charger3> <on|off>".to_string()];
        };
        let Some(kind) = SignalKind::from_label(&label.to_ascii_lowercase()) else {
            return vec![format!("ERR unknown signal `{label}`")];
        };
        let Some(value) = parse_switch(value) else {
            return vec![format!("ERR expected on or off, got `{value}`")];
        };

        match self.queue.enqueue(MuxTask::Signal(CableSignal::new(kind, value))) {
            Ok(ticket) => self.run_queued(ticket),
            Err(error) => vec![format!("ERR {error}")],
        }
    }

    fn stuck(&mut self, rest: &str) -> Vec<String> {
        match parse_switch(rest) {
            Some(true) => {
                self.stuck.set(true);
                vec!["OK status register frozen".to_string()]
            }
            Some(false) => {
                self.stuck.set(false);
                vec!["OK status register follows CFG0".to_string()]
            }
            None => vec!["ERR usage: stuck <on|off>".to_string()],
        }
    }

    fn status(&self) -> Vec<String> {
        let policy = match self.controller.policy() {
            ArbitrationPolicy::ChargerAware => "charger-aware",
            ArbitrationPolicy::MuxOnly => "mux-only",
        };
        let target = self
            .controller
            .driver()
            .current_target()
            .map_or_else(|| "released".to_string(), |target| target.to_string());

        vec![
            format!(
                "mode={} applied={} policy={policy}",
                self.mode.get(),
                self.controller.mode()
            ),
            format!("cable {}", self.controller.cable()),
            format!("mux {target}"),
            format!("time +{} ms", self.timeline.now_ms()),
        ]
    }

    fn help(topic: &str) -> Vec<String> {
        if topic.is_empty() {
            let mut lines = vec!["Available commands:".to_string()];
            lines.extend(HELP_TOPICS.iter().map(|(_, detail)| format!("  {detail}")));
            lines.push("Type `help <topic>` for a specific command.".to_string());
            return lines;
        }

        match HELP_TOPICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(topic))
        {
            Some((_, detail)) => vec![(*detail).to_string()],
            None => vec![
                format!("No help available for `{topic}`."),
                format!("Available topics: {}", help_topic_list()),
            ],
        }
    }

    /// Runs everything queued and narrates the telemetry it produced.
    fn run_queued(&mut self, ticket: TaskTicket) -> Vec<String> {
        let first = self.controller.telemetry().next_id();
        block_on(self.controller.drain(&self.queue));

        let mut lines = vec![format!("OK {ticket}")];
        lines.extend(
            self.controller
                .telemetry()
                .since(first)
                .map(|record| format!("  [{:>6} ms] {}", record.timestamp.0, record.event)),
        );
        lines
    }

    fn log(&mut self, role: TranscriptRole, lines: &[impl AsRef<str>]) -> io::Result<()> {
        let now_ms = self.timeline.now_ms();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(now_ms, &role, line.as_ref())?;
            }
        }
        Ok(())
    }
}

fn parse_switch(word: &str) -> Option<bool> {
    match word.to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Some(true),
        "off" | "0" | "false" => Some(false),
        _ => None,
    }
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        log::debug!("writing transcript to {}", path.display());

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        logger.write_header()?;
        Ok(logger)
    }

    fn write_header(&mut self) -> io::Result<()> {
        writeln!(self.writer, "# Cherry Trail USB mux emulator transcript")?;
        writeln!(
            self.writer,
            "# Timestamps are virtual milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(&mut self, now_ms: u64, role: &TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[+{now_ms:>6} ms] {} {line}", role.prefix())?;
        self.writer.flush()
    }
}
