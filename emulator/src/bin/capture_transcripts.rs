//! Replays fixed scenarios and writes one transcript per scenario.

use std::io;
use std::path::Path;

#[path = "../board.rs"]
mod board;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, SessionOptions};

const OUTPUT_DIR: &str = "transcripts";

const SCENARIOS: &[(&str, &[&str])] = &[
    (
        "otg-cable-cycle",
        &[
            "status",
            "signal id on",
            "signal charger1 on",
            "signal charger1 off",
            "signal id off",
            "status",
        ],
    ),
    (
        "device-to-host",
        &["mode device", "regs", "mode host", "mode dumpregs", "mode"],
    ),
    (
        "stuck-status",
        &["stuck on", "mode device", "stuck off", "mode device", "status"],
    ),
    (
        "rejected-writes",
        &["mode sideways", "mode HOST", "mode", "signal usb on"],
    ),
];

fn main() -> io::Result<()> {
    for (name, commands) in SCENARIOS {
        let path = Path::new(OUTPUT_DIR).join(format!("{name}.log"));
        let mut session = Session::new(SessionOptions {
            transcript: Some(path.clone()),
            ..SessionOptions::default()
        })?;
        for command in *commands {
            let _ = session.handle_command(command)?;
        }
        println!("wrote {}", path.display());
    }
    Ok(())
}
