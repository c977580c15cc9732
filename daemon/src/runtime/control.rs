//! Line-oriented control transport on stdin.
//!
//! An empty line or `?` prints the current mode; any other line is written to
//! the mode attribute. Each write answers `ok #<ticket>` or `error: <reason>`.

use std::io::{self, BufRead, Write};
use std::thread;

use mux_core::control::{ControlSurface, ModeCell};

use super::MuxQueue;

pub fn spawn_stdin_transport(
    mode: &'static ModeCell,
    queue: &'static MuxQueue,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("mux-control".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let stdout = io::stdout();
            if let Err(error) = serve(stdin.lock(), stdout.lock(), mode, queue) {
                log::warn!("control transport stopped: {error}");
            } else {
                log::info!("control input closed");
            }
        })
}

/// Answers control lines from `reader` until end of input.
pub fn serve<R, W>(mut reader: R, mut writer: W, mode: &ModeCell, queue: &MuxQueue) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    let mut surface = ControlSurface::new(mode, queue);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(());
        }

        let request = line.trim_end_matches(['\n', '\r']);
        if request.is_empty() || request == "?" {
            writeln!(writer, "{}", surface.get_mode())?;
        } else {
            match surface.set_mode(request) {
                Ok(ticket) => writeln!(writer, "ok {ticket}")?,
                Err(error) => writeln!(writer, "error: {error}")?,
            }
        }
        writer.flush()?;
    }
}
